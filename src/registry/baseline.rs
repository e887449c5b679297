//! Baseline forecasting methods shipped with the default registry.
//!
//! Each one scores itself by fitting on the leading 80% of the series and
//! forecasting the held-out tail. Forecast bounds are a 95% band built from
//! the holdout RMSE, widened with the square root of the horizon.

use serde_json::json;

use crate::error::{ForgeError, Result};
use crate::registry::metrics::{self, Metrics};
use crate::registry::{Evaluation, Evaluator, ForecastPoint};
use crate::series::Series;

const HOLDOUT_FRACTION: f64 = 0.2;
const MIN_OBSERVATIONS: usize = 3;
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    /// Repeat the last observation.
    Naive,
    /// Extend the line through the first and last observations.
    Drift,
    MovingAverage { window: usize },
    ExponentialSmoothing { alpha: f64 },
    /// Repeat the last full season.
    SeasonalNaive { period: usize },
}

#[derive(Debug, Clone)]
pub struct BaselineModel {
    name: String,
    method: Method,
}

impl BaselineModel {
    pub fn new(name: impl Into<String>, method: Method) -> Self {
        Self {
            name: name.into(),
            method,
        }
    }

    /// Default suite, in registration order.
    pub fn all() -> Vec<Self> {
        vec![
            Self::new(
                "Simple Moving Average",
                Method::MovingAverage { window: 3 },
            ),
            Self::new(
                "Exponential Smoothing",
                Method::ExponentialSmoothing { alpha: 0.3 },
            ),
            Self::new("Naive", Method::Naive),
            Self::new("Drift", Method::Drift),
            Self::new("Seasonal Naive", Method::SeasonalNaive { period: 12 }),
        ]
    }

    pub fn method(&self) -> Method {
        self.method
    }

    fn params(&self) -> String {
        match self.method {
            Method::Naive => json!({"method": "naive"}),
            Method::Drift => json!({"method": "drift"}),
            Method::MovingAverage { window } => {
                json!({"method": "moving_average", "window": window})
            }
            Method::ExponentialSmoothing { alpha } => {
                json!({"method": "exponential_smoothing", "alpha": alpha})
            }
            Method::SeasonalNaive { period } => {
                json!({"method": "seasonal_naive", "period": period})
            }
        }
        .to_string()
    }

    /// Fit on `history` and project `horizon` steps ahead.
    fn project(&self, history: &[f64], horizon: usize) -> Result<Vec<f64>> {
        let n = history.len();
        let last = match history.last() {
            Some(v) => *v,
            None => return Err(self.fit_error("no observations to fit")),
        };

        let values = match self.method {
            Method::Naive => vec![last; horizon],
            Method::Drift => {
                if n < 2 {
                    return Err(self.fit_error("drift needs at least two observations"));
                }
                let slope = (last - history[0]) / (n - 1) as f64;
                (1..=horizon).map(|k| last + slope * k as f64).collect()
            }
            Method::MovingAverage { window } => {
                if window == 0 {
                    return Err(self.fit_error("window must be positive"));
                }
                let w = window.min(n);
                let mean = history[n - w..].iter().sum::<f64>() / w as f64;
                vec![mean; horizon]
            }
            Method::ExponentialSmoothing { alpha } => {
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(self.fit_error("alpha must be in (0, 1]"));
                }
                let level = history[1..]
                    .iter()
                    .fold(history[0], |level, x| alpha * x + (1.0 - alpha) * level);
                vec![level; horizon]
            }
            Method::SeasonalNaive { period } => {
                if period == 0 {
                    return Err(self.fit_error("period must be positive"));
                }
                // Short histories repeat whatever they have.
                let p = period.min(n);
                (0..horizon).map(|k| history[n - p + k % p]).collect()
            }
        };
        Ok(values)
    }

    fn holdout<'a>(&self, values: &'a [f64]) -> Result<(&'a [f64], &'a [f64])> {
        if values.len() < MIN_OBSERVATIONS {
            return Err(self.fit_error(&format!(
                "at least {} observations are needed to hold out a test window",
                MIN_OBSERVATIONS
            )));
        }
        let test_len = ((values.len() as f64 * HOLDOUT_FRACTION).round() as usize).max(1);
        Ok(values.split_at(values.len() - test_len))
    }

    fn fit_error(&self, message: &str) -> ForgeError {
        ForgeError::Evaluator {
            model: self.name.clone(),
            message: message.to_string(),
        }
    }
}

impl Evaluator for BaselineModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, series: &Series) -> Result<Evaluation> {
        let (train, test) = self.holdout(series.values())?;
        let predicted = self.project(train, test.len())?;
        let metrics = Metrics::score(test, &predicted).map_err(|e| self.fit_error(&e.to_string()))?;
        Ok(Evaluation {
            metrics,
            params: self.params(),
        })
    }

    fn forecast(&self, series: &Series, horizon: usize) -> Result<Vec<ForecastPoint>> {
        if horizon == 0 {
            return Err(ForgeError::Validation("horizon must be positive".to_string()));
        }

        let (train, test) = self.holdout(series.values())?;
        let sigma = metrics::rmse(test, &self.project(train, test.len())?)
            .map_err(|e| self.fit_error(&e.to_string()))?;
        let predictions = self.project(series.values(), horizon)?;

        let points: Vec<ForecastPoint> = predictions
            .into_iter()
            .enumerate()
            .map(|(i, prediction)| {
                let period = i + 1;
                let half_width = Z_95 * sigma * (period as f64).sqrt();
                ForecastPoint {
                    period,
                    prediction,
                    lower_bound: prediction - half_width,
                    upper_bound: prediction + half_width,
                }
            })
            .collect();

        let finite = |p: &ForecastPoint| {
            p.prediction.is_finite() && p.lower_bound.is_finite() && p.upper_bound.is_finite()
        };
        if !points.iter().all(finite) {
            return Err(self.fit_error("forecast overflowed; observations are too extreme"));
        }
        Ok(points)
    }
}
