use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{ForgeError, Result};
use crate::gateway::Gateway;
use crate::registry::ModelRegistry;
use crate::scheduler::{Delivery, JobQueue, JobStore, MemoryJobQueue, MemoryJobStore};
use crate::worker::{Janitor, JobExecutor, LeaseHeartbeat};

/// Process-wide handle that owns the store, queue and registry and runs the
/// workers against them.
///
/// Nothing is global: tests build an engine around fakes through
/// [`Engine::new`], the binary uses [`Engine::in_memory`].
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    registry: Arc<ModelRegistry>,
    shutdown: CancellationToken,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        registry: ModelRegistry,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(ForgeError::Validation(
                "model registry has no evaluators".to_string(),
            ));
        }

        Ok(Self {
            config,
            store,
            queue,
            registry: Arc::new(registry),
            shutdown: CancellationToken::new(),
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Engine over an in-process store and queue sized from `config`.
    pub fn in_memory(config: EngineConfig, registry: ModelRegistry) -> Result<Self> {
        let store = Arc::new(MemoryJobStore::with_limits(
            config.result_ttl(),
            config.store_capacity,
        ));
        let queue = Arc::new(MemoryJobQueue::with_limits(
            config.lease(),
            config.queue_capacity,
        ));
        Self::new(config, store, queue, registry)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn queue(&self) -> Arc<dyn JobQueue> {
        self.queue.clone()
    }

    pub fn registry(&self) -> Arc<ModelRegistry> {
        self.registry.clone()
    }

    /// Token cancelled by [`Engine::shutdown`]; also usable to trigger it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            self.config.clone(),
            self.store.clone(),
            self.queue.clone(),
            self.registry.clone(),
        )
    }

    /// Spawn the worker pool and the janitor.
    ///
    /// Workers pull from the queue until shutdown. Each job is owned by one
    /// worker from dequeue to ack; parallelism is across jobs only.
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Engine already started");
            return;
        }

        let executor = JobExecutor::new(
            self.store.clone(),
            self.registry.clone(),
            self.config.retry.clone(),
        );

        let mut handles = self.handles.lock().await;
        for worker_id in 1..=self.config.worker_count {
            let queue = self.queue.clone();
            let executor = executor.clone();
            let config = self.config.clone();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                Self::worker_loop(worker_id, queue, executor, config, shutdown).await;
            }));
        }

        let janitor = Janitor::new(self.config.janitor_interval_ms);
        let store = self.store.clone();
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            janitor.run(store, queue, shutdown).await;
        }));

        tracing::info!(
            workers = self.config.worker_count,
            models = ?self.registry.names(),
            "Engine started"
        );
    }

    /// Stop taking new jobs and wait for the workers to return. A job that is
    /// already running is allowed to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Engine task ended abnormally");
            }
        }
        tracing::info!("Engine stopped");
    }

    /// Worker loop: dequeue, execute, ack or nack.
    ///
    /// While a job runs a [`LeaseHeartbeat`] keeps its delivery leased, so
    /// only a dead worker's message ever gets redelivered. Deliveries beyond
    /// `max_deliveries` are failed instead of executed again.
    async fn worker_loop(
        worker_id: usize,
        queue: Arc<dyn JobQueue>,
        executor: JobExecutor,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(worker_id, "Worker started");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = queue.dequeue() => result,
            };

            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "Dequeue failed");
                    tokio::time::sleep(Duration::from_millis(config.retry.base_delay_ms)).await;
                    continue;
                }
            };

            tracing::debug!(
                worker_id,
                job_id = %delivery.job_id,
                attempt = delivery.attempt,
                "Job claimed"
            );

            let result = if delivery.attempt > config.max_deliveries {
                executor.abandon(delivery.job_id, delivery.attempt - 1).await
            } else {
                Self::run_leased(&queue, &executor, &config, &delivery, &shutdown).await
            };

            let settled = if result.outcome.should_ack() {
                queue.ack(&delivery.receipt).await
            } else {
                queue.nack(&delivery.receipt).await
            };
            if let Err(e) = settled {
                tracing::warn!(
                    worker_id,
                    job_id = %delivery.job_id,
                    error = %e,
                    "Failed to settle delivery, it will be redelivered after its lease"
                );
            }
        }

        tracing::debug!(worker_id, "Worker stopped");
    }

    async fn run_leased(
        queue: &Arc<dyn JobQueue>,
        executor: &JobExecutor,
        config: &EngineConfig,
        delivery: &Delivery,
        shutdown: &CancellationToken,
    ) -> crate::worker::ExecutionResult {
        let stop = shutdown.child_token();
        let heartbeat = LeaseHeartbeat::new(config.lease_heartbeat_ms);
        let heartbeat_queue = queue.clone();
        let receipt = delivery.receipt;
        let heartbeat_stop = stop.clone();
        let heartbeat_task = tokio::spawn(async move {
            heartbeat.run(heartbeat_queue, receipt, heartbeat_stop).await;
        });

        let result = executor.execute(delivery.job_id, &delivery.payload).await;

        stop.cancel();
        let _ = heartbeat_task.await;
        result
    }
}
