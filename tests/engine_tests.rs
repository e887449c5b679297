
use std::sync::Arc;
use std::time::Duration;

use forecast_forge::registry::ModelRegistry;
use forecast_forge::scheduler::{
    FailureCode, JobQueue, JobState, JobStatus, JobStore, MemoryJobQueue, MemoryJobStore,
};
use forecast_forge::{Engine, ForgeError};
use test_harness::{
    assert_eventually, five_model_registry, sample_series, start_engine, start_engine_with_store,
    test_config, wait_for_terminal, FailingEvaluator, FixedEvaluator, PanickingEvaluator,
    RecordingStore,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Engine over a queue the test can also reach into.
fn engine_with_queue(
    config: forecast_forge::config::EngineConfig,
    registry: ModelRegistry,
) -> (Engine, Arc<MemoryJobQueue>) {
    let store = Arc::new(MemoryJobStore::with_limits(config.result_ttl(), 100));
    let queue = Arc::new(MemoryJobQueue::with_limits(config.lease(), 100));
    let engine = Engine::new(config, store, queue.clone(), registry).unwrap();
    (engine, queue)
}

#[tokio::test]
async fn test_baseline_job_progresses_to_ranked_success() {
    let store = Arc::new(RecordingStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let engine = Engine::new(test_config(), store.clone(), queue, ModelRegistry::baseline()).unwrap();
    let gateway = engine.gateway();

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    // Nothing runs until the workers start
    assert_eq!(gateway.poll(&job_id).await.unwrap(), JobState::Pending);

    engine.start().await;
    let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    let JobState::Success { results } = state else {
        panic!("expected SUCCESS, got {:?}", state);
    };
    assert_eq!(results.len(), 5);
    assert!(results.windows(2).all(|w| w[0].metrics.mape <= w[1].metrics.mape));

    let history = store.history(&job_id);
    let names = ModelRegistry::baseline();
    for (i, name) in names.names().iter().enumerate() {
        assert_eq!(history[i], JobState::progress(i + 1, 5, *name));
    }
    assert_eq!(history.len(), 6);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_short_series_rejected_without_job() {
    let store = Arc::new(RecordingStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let engine =
        Engine::new(test_config(), store.clone(), queue.clone(), five_model_registry()).unwrap();

    let err = engine.gateway().submit(sample_series(5)).await.unwrap_err();

    assert!(matches!(err, ForgeError::Validation(_)));
    assert!(store.is_empty().await);
    assert_eq!(queue.ready_len().await, 0);
}

#[tokio::test]
async fn test_failing_model_fails_job_with_its_name() {
    let registry = ModelRegistry::new()
        .with(FixedEvaluator::new("alpha", 1.0))
        .unwrap()
        .with(FixedEvaluator::new("beta", 2.0))
        .unwrap()
        .with(FailingEvaluator::new("gamma"))
        .unwrap()
        .with(FixedEvaluator::new("delta", 3.0))
        .unwrap()
        .with(FixedEvaluator::new("epsilon", 4.0))
        .unwrap();
    let engine = start_engine(test_config(), registry).await;
    let gateway = engine.gateway();

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    match state {
        JobState::Failure { code, model, .. } => {
            assert_eq!(code, FailureCode::Evaluator);
            assert_eq!(model.as_deref(), Some("gamma"));
        }
        other => panic!("expected FAILURE, got {:?}", other),
    }

    let json = serde_json::to_value(gateway.poll(&job_id).await.unwrap()).unwrap();
    assert_eq!(json["status"], "FAILURE");
    assert!(json.get("results").is_none());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_and_expired_jobs_not_found() {
    let config = test_config().with_result_ttl_ms(50);
    let engine = start_engine(config, five_model_registry()).await;
    let gateway = engine.gateway();

    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        gateway.poll(&missing).await,
        Err(ForgeError::JobNotFound(id)) if id == missing
    ));

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    let gateway_ref = &gateway;
    assert_eventually(
        move || async move {
            matches!(
                gateway_ref.poll(&job_id).await,
                Err(ForgeError::JobNotFound(_))
            )
        },
        TIMEOUT,
        "finished job should expire after its TTL",
    )
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_polls_see_consistent_progress() {
    let mut registry = ModelRegistry::new();
    for i in 0..5 {
        registry
            .register(FixedEvaluator::slow(
                &format!("slow-{}", i),
                i as f64,
                Duration::from_millis(30),
            ))
            .unwrap();
    }
    let engine = start_engine(test_config(), registry).await;
    let gateway = engine.gateway();
    let job_id = gateway.submit(sample_series(24)).await.unwrap();

    let mut pollers = Vec::new();
    for _ in 0..8 {
        let gateway = gateway.clone();
        pollers.push(tokio::spawn(async move {
            let mut last_current = 0;
            loop {
                match gateway.poll(&job_id).await.unwrap() {
                    JobState::Progress { progress } => {
                        assert!(progress.current <= progress.total);
                        assert_eq!(progress.total, 5);
                        assert!(progress.current >= last_current, "progress went backwards");
                        last_current = progress.current;
                    }
                    JobState::Pending => assert_eq!(last_current, 0),
                    JobState::Success { results } => {
                        assert_eq!(results.len(), 5);
                        return;
                    }
                    other => panic!("unexpected state {:?}", other),
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }));
    }

    for poller in pollers {
        tokio::time::timeout(TIMEOUT, poller).await.unwrap().unwrap();
    }
    engine.shutdown().await;
}

#[tokio::test]
async fn test_terminal_poll_is_idempotent() {
    let engine = start_engine(test_config(), five_model_registry()).await;
    let gateway = engine.gateway();
    let job_id = gateway.submit(sample_series(24)).await.unwrap();

    let first = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;
    for _ in 0..5 {
        assert_eq!(gateway.poll(&job_id).await.unwrap(), first);
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_many_jobs_all_complete() {
    let engine = start_engine(test_config().with_workers(4), ModelRegistry::baseline()).await;
    let gateway = engine.gateway();

    let mut ids = Vec::new();
    for len in 12..32 {
        ids.push(gateway.submit(sample_series(len)).await.unwrap());
    }

    for id in &ids {
        let state = wait_for_terminal(&gateway, id, TIMEOUT).await;
        assert_eq!(state.status(), JobStatus::Success, "job {} ended {:?}", id, state);
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_worker_survives_panicking_evaluator() {
    let registry = ModelRegistry::new()
        .with(FixedEvaluator::new("steady", 1.0))
        .unwrap()
        .with(PanickingEvaluator::new("volatile"))
        .unwrap();
    let engine = start_engine(test_config().with_workers(1), registry).await;
    let gateway = engine.gateway();

    // A single worker has to get through every one of these
    for _ in 0..3 {
        let job_id = gateway.submit(sample_series(24)).await.unwrap();
        let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;
        assert!(matches!(
            state,
            JobState::Failure {
                code: FailureCode::Evaluator,
                ..
            }
        ));
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn test_job_timeout_yields_deadline_exceeded() {
    let mut registry = ModelRegistry::new();
    for i in 0..5 {
        registry
            .register(FixedEvaluator::slow(
                &format!("slow-{}", i),
                1.0,
                Duration::from_millis(60),
            ))
            .unwrap();
    }
    let config = test_config().with_job_timeout_ms(Some(100));
    let engine = start_engine(config, registry).await;
    let gateway = engine.gateway();

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    assert!(matches!(
        state,
        JobState::Failure {
            code: FailureCode::DeadlineExceeded,
            model: None,
            ..
        }
    ));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_lost_delivery_is_redelivered() {
    let config = test_config().with_lease(100, 30);
    let (engine, queue) = engine_with_queue(config, five_model_registry());
    let gateway = engine.gateway();

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    // A worker that takes the message and dies without acking
    let stolen = queue.dequeue().await.unwrap();
    assert_eq!(stolen.job_id, job_id);

    engine.start().await;
    let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    assert_eq!(state.status(), JobStatus::Success);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_deliveries_fail_job() {
    let mut config = test_config().with_lease(100, 30);
    config.max_deliveries = 1;
    let (engine, queue) = engine_with_queue(config, five_model_registry());
    let gateway = engine.gateway();

    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    queue.dequeue().await.unwrap();

    engine.start().await;
    let state = wait_for_terminal(&gateway, &job_id, TIMEOUT).await;

    assert!(matches!(
        state,
        JobState::Failure {
            code: FailureCode::Infrastructure,
            ..
        }
    ));

    let queue_ref = &queue;
    assert_eventually(
        move || async move { queue_ref.in_flight_len().await == 0 && queue_ref.ready_len().await == 0 },
        TIMEOUT,
        "abandoned delivery should be acked",
    )
    .await;

    engine.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_workers() {
    let (engine, queue) = engine_with_queue(test_config(), five_model_registry());
    engine.start().await;
    // Second start is a no-op
    engine.start().await;

    tokio::time::timeout(TIMEOUT, engine.shutdown())
        .await
        .expect("shutdown should finish");
    assert!(engine.shutdown_token().is_cancelled());

    // Accepted but never picked up
    let gateway = engine.gateway();
    let job_id = gateway.submit(sample_series(24)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.poll(&job_id).await.unwrap(), JobState::Pending);
    assert_eq!(queue.ready_len().await, 1);
}

#[tokio::test]
async fn test_shutdown_lets_running_job_finish() {
    let registry = ModelRegistry::new()
        .with(FixedEvaluator::slow("slow", 1.0, Duration::from_millis(150)))
        .unwrap();
    let engine = start_engine(test_config().with_workers(1), registry).await;
    let gateway = engine.gateway();
    let job_id = gateway.submit(sample_series(24)).await.unwrap();

    let gateway_ref = &gateway;
    assert_eventually(
        move || async move { gateway_ref.poll(&job_id).await.unwrap().status() == JobStatus::Progress },
        TIMEOUT,
        "job should start",
    )
    .await;

    engine.shutdown().await;
    assert_eq!(
        gateway.poll(&job_id).await.unwrap().status(),
        JobStatus::Success
    );
}

#[tokio::test]
async fn test_engine_rejects_empty_registry_and_bad_config() {
    assert!(matches!(
        Engine::in_memory(test_config(), ModelRegistry::new()),
        Err(ForgeError::Validation(_))
    ));
    assert!(matches!(
        Engine::in_memory(test_config().with_workers(0), five_model_registry()),
        Err(ForgeError::Validation(_))
    ));
}

#[tokio::test]
async fn test_engine_over_custom_store() {
    let store: Arc<dyn JobStore> = Arc::new(RecordingStore::new());
    let engine = start_engine_with_store(test_config(), store.clone(), five_model_registry()).await;

    let job_id = engine.gateway().submit(sample_series(30)).await.unwrap();
    let state = wait_for_terminal(&engine.gateway(), &job_id, TIMEOUT).await;

    assert_eq!(state.status(), JobStatus::Success);
    assert_eq!(store.get(&job_id).await.unwrap().state, state);
    engine.shutdown().await;
}
