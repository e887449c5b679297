use std::time::Duration;

use rand::Rng;

use crate::error::{ForgeError, Result};

/// Backoff policy for store and queue calls made by workers.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based): exponential, capped, plus
    /// up to 20% jitter.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << retry.min(16))
            .min(self.max_delay_ms);
        let jitter = if exp >= 5 {
            rand::thread_rng().gen_range(0..=exp / 5)
        } else {
            0
        };
        Duration::from_millis(exp + jitter)
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent workers pulling from the queue.
    pub worker_count: usize,
    /// Inclusive bounds on the number of observations a submission may carry.
    pub min_observations: usize,
    pub max_observations: usize,
    /// Periods produced by retrain-and-forecast.
    pub forecast_horizon: usize,
    /// How long terminal jobs stay readable.
    pub result_ttl_ms: u64,
    /// Per-job deadline measured from submission. `None` lets jobs run unbounded.
    pub job_timeout_ms: Option<u64>,
    /// Visibility lease on a dequeued message.
    pub lease_ms: u64,
    /// How often a busy worker renews its lease. Must be shorter than `lease_ms`.
    pub lease_heartbeat_ms: u64,
    /// Deliveries after which a message is dead-lettered and its job failed.
    pub max_deliveries: u32,
    /// How often expired leases are requeued and expired jobs purged.
    pub janitor_interval_ms: u64,
    pub store_capacity: usize,
    pub queue_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            min_observations: 12,
            max_observations: 120,
            forecast_horizon: 12,
            result_ttl_ms: 3_600_000,
            job_timeout_ms: Some(600_000),
            lease_ms: 30_000,
            lease_heartbeat_ms: 10_000,
            max_deliveries: 3,
            janitor_interval_ms: 1_000,
            store_capacity: 10_000,
            queue_capacity: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_observation_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_observations = min;
        self.max_observations = max;
        self
    }

    pub fn with_forecast_horizon(mut self, horizon: usize) -> Self {
        self.forecast_horizon = horizon;
        self
    }

    pub fn with_result_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.result_ttl_ms = ttl_ms;
        self
    }

    pub fn with_job_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.job_timeout_ms = timeout_ms;
        self
    }

    pub fn with_lease(mut self, lease_ms: u64, heartbeat_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self.lease_heartbeat_ms = heartbeat_ms;
        self
    }

    pub fn with_janitor_interval_ms(mut self, interval_ms: u64) -> Self {
        self.janitor_interval_ms = interval_ms;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_millis(self.result_ttl_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ForgeError::Validation(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.min_observations == 0 || self.min_observations > self.max_observations {
            return Err(ForgeError::Validation(format!(
                "invalid observation bounds {}..={}",
                self.min_observations, self.max_observations
            )));
        }
        if self.forecast_horizon == 0 {
            return Err(ForgeError::Validation(
                "forecast_horizon must be positive".to_string(),
            ));
        }
        if self.lease_heartbeat_ms == 0 || self.lease_heartbeat_ms >= self.lease_ms {
            return Err(ForgeError::Validation(format!(
                "lease heartbeat ({}ms) must be positive and shorter than the lease ({}ms)",
                self.lease_heartbeat_ms, self.lease_ms
            )));
        }
        if self.janitor_interval_ms == 0 {
            return Err(ForgeError::Validation(
                "janitor_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_deliveries == 0 || self.retry.max_attempts == 0 {
            return Err(ForgeError::Validation(
                "max_deliveries and retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
