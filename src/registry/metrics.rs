//! Forecast error metrics used to rank evaluators.

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
}

impl Metrics {
    pub fn new(mape: f64, mae: f64, mse: f64, rmse: f64) -> Self {
        Self {
            mape,
            mae,
            mse,
            rmse,
        }
    }

    /// Score predictions against the observations they were meant to hit.
    ///
    /// Observations equal to zero are left out of the MAPE average.
    pub fn score(actual: &[f64], predicted: &[f64]) -> Result<Self> {
        check_lengths(actual, predicted)?;

        let n = actual.len() as f64;
        let mut abs_sum = 0.0;
        let mut sq_sum = 0.0;
        let mut pct_sum = 0.0;
        let mut pct_count = 0usize;

        for (a, p) in actual.iter().zip(predicted) {
            let err = a - p;
            abs_sum += err.abs();
            sq_sum += err * err;
            if *a != 0.0 {
                pct_sum += (err / a).abs();
                pct_count += 1;
            }
        }

        if pct_count == 0 {
            return Err(ForgeError::Validation(
                "MAPE is undefined when every observation is zero".to_string(),
            ));
        }

        let mse = sq_sum / n;
        let metrics = Self {
            mape: pct_sum / pct_count as f64 * 100.0,
            mae: abs_sum / n,
            mse,
            rmse: mse.sqrt(),
        };
        // Finite inputs can still overflow.
        if ![metrics.mape, metrics.mae, metrics.mse, metrics.rmse]
            .iter()
            .all(|m| m.is_finite())
        {
            return Err(ForgeError::Validation(
                "error metrics overflowed; observations are too extreme to score".to_string(),
            ));
        }
        Ok(metrics)
    }
}

/// Root mean squared error on its own, defined even where MAPE is not.
pub fn rmse(actual: &[f64], predicted: &[f64]) -> Result<f64> {
    check_lengths(actual, predicted)?;
    let sq_sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p) * (a - p))
        .sum();
    let rmse = (sq_sum / actual.len() as f64).sqrt();
    if !rmse.is_finite() {
        return Err(ForgeError::Validation(
            "RMSE overflowed; observations are too extreme to score".to_string(),
        ));
    }
    Ok(rmse)
}

fn check_lengths(actual: &[f64], predicted: &[f64]) -> Result<()> {
    if actual.is_empty() {
        return Err(ForgeError::Validation(
            "cannot score an empty holdout".to_string(),
        ));
    }
    if actual.len() != predicted.len() {
        return Err(ForgeError::Validation(format!(
            "{} observations but {} predictions",
            actual.len(),
            predicted.len()
        )));
    }
    Ok(())
}
