//! Pluggable forecasting evaluators and the ordered registry that holds them.
//!
//! The executor only knows the [`Evaluator`] contract: fit a method to a
//! series, report error metrics plus opaque parameters, and (for retraining)
//! project a forecast with bounds. Registration order matters: it numbers the
//! progress steps and breaks MAPE ties in the final ranking.

pub mod baseline;
pub mod metrics;

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};
use crate::series::Series;

pub use baseline::{BaselineModel, Method};
pub use metrics::Metrics;

/// What an evaluator reports for one fit.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: Metrics,
    /// Fitted configuration, opaque to the engine.
    pub params: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: String,
    pub metrics: Metrics,
    pub params: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub period: usize,
    pub prediction: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastReport {
    pub model_name: String,
    pub forecast: Vec<ForecastPoint>,
}

/// A forecasting method the engine can score.
///
/// Calls are synchronous and may be slow; the engine runs them on the
/// blocking pool. Implementations must not assume they can be interrupted.
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, series: &Series) -> Result<Evaluation>;

    fn forecast(&self, series: &Series, horizon: usize) -> Result<Vec<ForecastPoint>>;
}

/// Ordered, name-unique collection of evaluators.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    evaluators: Vec<Arc<dyn Evaluator>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in baseline methods, in their canonical order.
    pub fn baseline() -> Self {
        Self {
            evaluators: BaselineModel::all()
                .into_iter()
                .map(|model| Arc::new(model) as Arc<dyn Evaluator>)
                .collect(),
        }
    }

    pub fn register(&mut self, evaluator: impl Evaluator + 'static) -> Result<()> {
        self.register_arc(Arc::new(evaluator))
    }

    pub fn register_arc(&mut self, evaluator: Arc<dyn Evaluator>) -> Result<()> {
        if self.get(evaluator.name()).is_some() {
            return Err(ForgeError::DuplicateModel(evaluator.name().to_string()));
        }
        tracing::debug!(model = evaluator.name(), "Evaluator registered");
        self.evaluators.push(evaluator);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, evaluator: impl Evaluator + 'static) -> Result<Self> {
        self.register(evaluator)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.iter().find(|e| e.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Evaluator>> {
        self.evaluators.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.evaluators.iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

/// Sort ascending by MAPE, keeping input order for ties.
pub fn rank_results(results: &mut [ModelResult]) {
    results.sort_by(compare_mape);
}

/// Orders by MAPE with NaN after every number.
pub fn compare_mape(a: &ModelResult, b: &ModelResult) -> Ordering {
    let (x, y) = (a.metrics.mape, b.metrics.mape);
    x.partial_cmp(&y)
        .unwrap_or_else(|| x.is_nan().cmp(&y.is_nan()))
}
