use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::scheduler::JobQueue;

/// Keeps a delivery's lease alive while its job is being worked on.
///
/// A worker that dies stops heartbeating, its lease runs out and the message
/// is handed to someone else.
pub struct LeaseHeartbeat {
    interval: Duration,
}

impl LeaseHeartbeat {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Renew `receipt` every interval until `stop` is cancelled or the lease
    /// is found to be lost.
    pub async fn run(&self, queue: Arc<dyn JobQueue>, receipt: Uuid, stop: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        // The first tick fires immediately; the lease is fresh at that point.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    match queue.extend_lease(&receipt).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(receipt = %receipt, "Lease lost, job may be redelivered");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(receipt = %receipt, error = %e, "Failed to renew lease");
                        }
                    }
                }
            }
        }
    }
}
