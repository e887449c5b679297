use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::{ForgeError, Result};
use crate::registry::{rank_results, ModelRegistry, ModelResult};
use crate::scheduler::{FailureCode, Job, JobState, JobStatus, JobStore};
use crate::series::Series;
use crate::worker::retry::with_retry;

/// What the worker should do with the delivery once execution returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A terminal state was written. Ack.
    Finished(JobStatus),
    /// Nothing to do: the job is gone or already terminal. Ack.
    Skipped,
    /// State could not be recorded. Nack so the message is redelivered.
    Requeue,
}

impl Outcome {
    pub fn should_ack(self) -> bool {
        !matches!(self, Outcome::Requeue)
    }
}

/// Result of job execution
#[derive(Debug)]
pub struct ExecutionResult {
    pub job_id: Uuid,
    pub outcome: Outcome,
}

/// Why the model loop stopped early.
enum Abort {
    /// Record this terminal state.
    Fail(JobState),
    Skip(String),
    Requeue(ForgeError),
}

/// Runs every registered evaluator against one job's series.
///
/// The executor is the only writer of a job after submission. For each model
/// it first publishes a PROGRESS snapshot naming that model, then evaluates
/// it. Results are collected in memory and written once, ranked, as SUCCESS.
/// The first evaluator failure fails the whole job.
#[derive(Clone)]
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    registry: Arc<ModelRegistry>,
    retry: RetryConfig,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<ModelRegistry>, retry: RetryConfig) -> Self {
        Self {
            store,
            registry,
            retry,
        }
    }

    pub async fn execute(&self, job_id: Uuid, payload: &[u8]) -> ExecutionResult {
        let outcome = match self.evaluate_all(job_id, payload).await {
            Ok(results) => self.finish(job_id, JobState::Success { results }).await,
            Err(Abort::Fail(state)) => self.finish(job_id, state).await,
            Err(Abort::Skip(reason)) => {
                tracing::info!(job_id = %job_id, reason = %reason, "Skipping job");
                Outcome::Skipped
            }
            Err(Abort::Requeue(e)) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job state unavailable, requeueing");
                Outcome::Requeue
            }
        };
        ExecutionResult { job_id, outcome }
    }

    /// Fail a job whose message has been delivered too many times.
    pub async fn abandon(&self, job_id: Uuid, attempts: u32) -> ExecutionResult {
        let outcome = match self.read(job_id).await {
            Ok(job) if job.is_terminal() => Outcome::Skipped,
            Ok(_) => {
                tracing::error!(job_id = %job_id, attempts, "Delivery attempts exhausted");
                self.finish(
                    job_id,
                    JobState::failure(
                        FailureCode::Infrastructure,
                        format!("job was delivered {} times without completing", attempts),
                    ),
                )
                .await
            }
            Err(ForgeError::JobNotFound(_)) => Outcome::Skipped,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Job state unavailable, requeueing");
                Outcome::Requeue
            }
        };
        ExecutionResult { job_id, outcome }
    }

    async fn evaluate_all(
        &self,
        job_id: Uuid,
        payload: &[u8],
    ) -> std::result::Result<Vec<ModelResult>, Abort> {
        let job = match self.read(job_id).await {
            Ok(job) => job,
            Err(ForgeError::JobNotFound(_)) => {
                return Err(Abort::Skip("job not found or expired".to_string()))
            }
            Err(e) => return Err(Abort::Requeue(e)),
        };
        if job.is_terminal() {
            return Err(Abort::Skip(format!("job already {}", job.status())));
        }
        if job.status() == JobStatus::Progress {
            tracing::warn!(job_id = %job_id, "Redelivered job restarts from the first model");
        }

        let series = Series::from_payload(payload)
            .map_err(|e| Abort::Fail(JobState::failure(FailureCode::InvalidPayload, e.to_string())))?;
        let series = Arc::new(series);

        let total = self.registry.len();
        let mut results = Vec::with_capacity(total);

        for (index, evaluator) in self.registry.iter().enumerate() {
            let name = evaluator.name().to_string();
            Self::check_deadline(&job)?;

            self.write(job_id, JobState::progress(index + 1, total, name.as_str()))
                .await
                .map_err(Self::abort_on_write)?;
            tracing::info!(job_id = %job_id, model = %name, step = index + 1, total, "Evaluating model");

            let task_evaluator = evaluator.clone();
            let task_series = series.clone();
            let evaluation =
                tokio::task::spawn_blocking(move || task_evaluator.evaluate(&task_series)).await;

            match evaluation {
                Ok(Ok(evaluation)) => {
                    tracing::debug!(
                        job_id = %job_id,
                        model = %name,
                        mape = evaluation.metrics.mape,
                        "Model evaluated"
                    );
                    results.push(ModelResult {
                        model_name: name,
                        metrics: evaluation.metrics,
                        params: evaluation.params,
                    });
                }
                Ok(Err(e)) => {
                    let message = match e {
                        ForgeError::Evaluator { message, .. } => message,
                        other => other.to_string(),
                    };
                    tracing::warn!(job_id = %job_id, model = %name, error = %message, "Model failed");
                    return Err(Abort::Fail(JobState::model_failure(name, message)));
                }
                Err(join_error) => {
                    tracing::error!(job_id = %job_id, model = %name, error = %join_error, "Model panicked");
                    return Err(Abort::Fail(JobState::model_failure(
                        name,
                        format!("evaluator panicked: {}", join_error),
                    )));
                }
            }
        }

        rank_results(&mut results);
        Ok(results)
    }

    /// Write a terminal state, falling back to an infrastructure failure if
    /// the store keeps refusing.
    async fn finish(&self, job_id: Uuid, state: JobState) -> Outcome {
        let status = state.status();
        match self.write(job_id, state).await {
            Ok(()) => {
                tracing::info!(job_id = %job_id, status = %status, "Job finished");
                Outcome::Finished(status)
            }
            Err(e) if e.is_transient() => {
                tracing::error!(job_id = %job_id, status = %status, error = %e, "Failed to record terminal state");
                let fallback = JobState::failure(
                    FailureCode::Infrastructure,
                    format!("could not record result: {}", e),
                );
                if status != JobStatus::Failure && self.store.update(&job_id, fallback).await.is_ok() {
                    Outcome::Finished(JobStatus::Failure)
                } else {
                    Outcome::Requeue
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Terminal state rejected by store");
                Outcome::Skipped
            }
        }
    }

    fn check_deadline(job: &Job) -> std::result::Result<(), Abort> {
        if job.deadline_passed(Utc::now()) {
            tracing::warn!(job_id = %job.id, deadline = ?job.deadline, "Job deadline exceeded");
            return Err(Abort::Fail(JobState::failure(
                FailureCode::DeadlineExceeded,
                ForgeError::DeadlineExceeded.to_string(),
            )));
        }
        Ok(())
    }

    fn abort_on_write(e: ForgeError) -> Abort {
        match e {
            e if e.is_transient() => Abort::Fail(JobState::failure(
                FailureCode::Infrastructure,
                format!("could not publish progress: {}", e),
            )),
            other => Abort::Skip(other.to_string()),
        }
    }

    async fn read(&self, job_id: Uuid) -> Result<Job> {
        let store = self.store.as_ref();
        let id = &job_id;
        with_retry(&self.retry, "get job", move || store.get(id)).await
    }

    async fn write(&self, job_id: Uuid, state: JobState) -> Result<()> {
        let store = self.store.as_ref();
        let id = &job_id;
        with_retry(&self.retry, "update job", move || store.update(id, state.clone())).await
    }
}
