use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::{ForgeError, Result};

const DEFAULT_CAPACITY: usize = 10_000;
const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// A message handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: Uuid,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub attempt: u32,
    /// Identifies this particular delivery for `ack`/`nack`/`extend_lease`.
    pub receipt: Uuid,
}

/// At-least-once hand-off between submission and the workers.
///
/// A dequeued message stays leased to its worker until acknowledged. If the
/// lease runs out first (the worker died or stalled) the message becomes
/// eligible for redelivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid, payload: Vec<u8>) -> Result<()>;

    /// Wait until a message is available and lease it.
    async fn dequeue(&self) -> Result<Delivery>;

    /// Remove a delivered message for good.
    async fn ack(&self, receipt: &Uuid) -> Result<()>;

    /// Give a delivered message back for redelivery.
    async fn nack(&self, receipt: &Uuid) -> Result<()>;

    /// Push the lease of an in-flight message forward. Returns `false` when
    /// the lease was already lost.
    async fn extend_lease(&self, receipt: &Uuid) -> Result<bool>;

    /// Return messages whose lease ran out to the ready queue.
    async fn requeue_expired(&self) -> Result<usize>;
}

#[derive(Debug)]
struct Message {
    job_id: Uuid,
    payload: Vec<u8>,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    lease_expires: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    ready: VecDeque<Message>,
    in_flight: HashMap<Uuid, InFlight>,
}

/// Bounded in-process queue with visibility leases.
#[derive(Debug)]
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    lease: Duration,
    capacity: usize,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_LEASE, DEFAULT_CAPACITY)
    }

    pub fn with_limits(lease: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            lease,
            capacity,
        }
    }

    /// Messages waiting for a worker.
    pub async fn ready_len(&self) -> usize {
        self.inner.lock().await.ready.len()
    }

    /// Messages leased to a worker and not yet acknowledged.
    pub async fn in_flight_len(&self) -> usize {
        self.inner.lock().await.in_flight.len()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job_id: Uuid, payload: Vec<u8>) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if inner.ready.len() + inner.in_flight.len() >= self.capacity {
                return Err(ForgeError::Infrastructure(format!(
                    "job queue at capacity ({} messages)",
                    self.capacity
                )));
            }
            inner.ready.push_back(Message {
                job_id,
                payload,
                attempt: 0,
            });
        }
        self.notify.notify_one();
        tracing::debug!(job_id = %job_id, "Job enqueued");
        Ok(())
    }

    async fn dequeue(&self) -> Result<Delivery> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(mut message) = inner.ready.pop_front() {
                    message.attempt += 1;
                    let delivery = Delivery {
                        job_id: message.job_id,
                        payload: message.payload.clone(),
                        attempt: message.attempt,
                        receipt: Uuid::new_v4(),
                    };
                    inner.in_flight.insert(
                        delivery.receipt,
                        InFlight {
                            message,
                            lease_expires: Instant::now() + self.lease,
                        },
                    );
                    // Wake another waiter if more work is left.
                    if !inner.ready.is_empty() {
                        self.notify.notify_one();
                    }
                    return Ok(delivery);
                }
            }
            notified.await;
        }
    }

    async fn ack(&self, receipt: &Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.in_flight.remove(receipt).is_none() {
            // Lease expired and the message was handed out again.
            tracing::warn!(receipt = %receipt, "Ack for unknown or expired delivery");
        }
        Ok(())
    }

    async fn nack(&self, receipt: &Uuid) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            match inner.in_flight.remove(receipt) {
                Some(in_flight) => inner.ready.push_back(in_flight.message),
                None => {
                    tracing::warn!(receipt = %receipt, "Nack for unknown or expired delivery");
                    return Ok(());
                }
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn extend_lease(&self, receipt: &Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        match inner.in_flight.get_mut(receipt) {
            Some(in_flight) => {
                in_flight.lease_expires = Instant::now() + self.lease;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn requeue_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let requeued = {
            let mut inner = self.inner.lock().await;
            let expired: Vec<Uuid> = inner
                .in_flight
                .iter()
                .filter(|(_, in_flight)| in_flight.lease_expires <= now)
                .map(|(receipt, _)| *receipt)
                .collect();
            for receipt in &expired {
                if let Some(in_flight) = inner.in_flight.remove(receipt) {
                    tracing::warn!(
                        job_id = %in_flight.message.job_id,
                        attempt = in_flight.message.attempt,
                        "Delivery lease expired, requeueing"
                    );
                    inner.ready.push_back(in_flight.message);
                }
            }
            expired.len()
        };
        for _ in 0..requeued {
            self.notify.notify_one();
        }
        Ok(requeued)
    }
}
