//! Caller-facing operations: submit, poll, watch and retrain-and-forecast.
//!
//! Submission validates synchronously and returns as soon as the job is
//! recorded and enqueued. Polling is a pure read of the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{ForgeError, Result};
use crate::registry::{ForecastReport, ModelRegistry};
use crate::scheduler::{FailureCode, JobQueue, JobState, JobStore};
use crate::series::Series;

#[derive(Clone)]
pub struct Gateway {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<ModelRegistry>,
}

impl Gateway {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            registry,
        }
    }

    /// Validate `values`, record a PENDING job and enqueue it.
    ///
    /// Validation failures never create a job. If the enqueue fails after the
    /// record exists, the record is failed so pollers do not wait forever.
    pub async fn submit(&self, values: Vec<f64>) -> Result<Uuid> {
        let series = self.validate(values)?;
        let payload = series.to_payload()?;

        let job_id = Uuid::new_v4();
        let deadline = self
            .config
            .job_timeout_ms
            .map(|ms| Utc::now() + chrono::Duration::milliseconds(ms as i64));

        self.store.create(job_id, deadline).await?;

        if let Err(e) = self.queue.enqueue(job_id, payload).await {
            tracing::error!(job_id = %job_id, error = %e, "Enqueue failed after job creation");
            let failed = JobState::failure(
                FailureCode::Infrastructure,
                format!("could not enqueue job: {}", e),
            );
            if let Err(update_err) = self.store.update(&job_id, failed).await {
                tracing::warn!(job_id = %job_id, error = %update_err, "Could not mark job failed");
            }
            return Err(e);
        }

        tracing::info!(job_id = %job_id, observations = series.len(), "Job submitted");
        Ok(job_id)
    }

    /// Current state of a job as a caller should see it.
    pub async fn poll(&self, job_id: &Uuid) -> Result<JobState> {
        Ok(self.store.get(job_id).await?.state)
    }

    /// Poll every `interval` and yield each state change, ending after the
    /// first terminal state or error. A zero interval yields a single
    /// validation error. Polling stops once the stream is dropped.
    pub fn watch(&self, job_id: Uuid, interval: Duration) -> ReceiverStream<Result<JobState>> {
        let (tx, rx) = mpsc::channel(16);
        if interval.is_zero() {
            let _ = tx.try_send(Err(ForgeError::Validation(
                "watch interval must be positive".to_string(),
            )));
            return ReceiverStream::new(rx);
        }
        let store = self.store.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut last: Option<JobState> = None;

            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!(job_id = %job_id, "Watcher gone, stopping poll");
                        break;
                    }
                    _ = ticker.tick() => {}
                }
                match store.get(&job_id).await {
                    Ok(job) => {
                        let terminal = job.is_terminal();
                        if last.as_ref() != Some(&job.state) {
                            last = Some(job.state.clone());
                            if tx.send(Ok(job.state)).await.is_err() {
                                break;
                            }
                        }
                        if terminal {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Retrain `model_name` on the whole series and forecast the configured
    /// horizon. Runs inline for the caller; no job is created.
    pub async fn forecast(&self, values: Vec<f64>, model_name: &str) -> Result<ForecastReport> {
        let series = self.validate(values)?;
        let evaluator = self
            .registry
            .get(model_name)
            .ok_or_else(|| ForgeError::UnknownModel(model_name.to_string()))?;
        let horizon = self.config.forecast_horizon;

        let forecast = tokio::task::spawn_blocking(move || evaluator.forecast(&series, horizon))
            .await
            .map_err(|e| ForgeError::Evaluator {
                model: model_name.to_string(),
                message: format!("evaluator panicked: {}", e),
            })??;

        tracing::info!(model = model_name, horizon, "Forecast produced");
        Ok(ForecastReport {
            model_name: model_name.to_string(),
            forecast,
        })
    }

    /// Registered model names, in evaluation order.
    pub fn models(&self) -> Vec<String> {
        self.registry.names().into_iter().map(String::from).collect()
    }

    fn validate(&self, values: Vec<f64>) -> Result<Series> {
        let series = Series::new(values)?;
        series.check_bounds(self.config.min_observations, self.config.max_observations)?;
        Ok(series)
    }
}
