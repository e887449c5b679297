use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::scheduler::{JobQueue, JobStore};

/// Periodic maintenance: hand out messages whose lease expired and drop
/// terminal jobs past their retention.
pub struct Janitor {
    interval: Duration,
}

impl Janitor {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub async fn run(
        &self,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    Self::sweep(store.as_ref(), queue.as_ref()).await;
                }
            }
        }
        tracing::debug!("Janitor stopped");
    }

    /// One maintenance pass.
    pub async fn sweep(store: &dyn JobStore, queue: &dyn JobQueue) {
        match queue.requeue_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(count = n, "Requeued deliveries with expired leases"),
            Err(e) => tracing::warn!(error = %e, "Failed to requeue expired deliveries"),
        }
        match store.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(count = n, "Purged expired jobs"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired jobs"),
        }
    }
}
