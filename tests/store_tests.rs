use std::time::Duration;

use chrono::Utc;
use forecast_forge::registry::{Metrics, ModelResult};
use forecast_forge::scheduler::{FailureCode, JobState, JobStatus, JobStore, MemoryJobStore};
use forecast_forge::ForgeError;
use uuid::Uuid;

fn success_state() -> JobState {
    JobState::Success {
        results: vec![ModelResult {
            model_name: "Naive".to_string(),
            metrics: Metrics::new(4.2, 1.0, 2.0, 1.414),
            params: "{}".to_string(),
        }],
    }
}

#[tokio::test]
async fn test_create_then_get_is_pending() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();

    store.create(id, None).await.unwrap();

    let job = store.get(&id).await.unwrap();
    assert_eq!(job.id, id);
    assert_eq!(job.status(), JobStatus::Pending);
    assert!(job.completed_at.is_none());
    assert!(job.deadline.is_none());
}

#[tokio::test]
async fn test_create_duplicate_rejected() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();

    store.create(id, None).await.unwrap();
    let err = store.create(id, None).await.unwrap_err();

    assert!(matches!(err, ForgeError::DuplicateJob(dup) if dup == id));
}

#[tokio::test]
async fn test_create_keeps_deadline() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();
    let deadline = Utc::now() + chrono::Duration::seconds(30);

    store.create(id, Some(deadline)).await.unwrap();

    assert_eq!(store.get(&id).await.unwrap().deadline, Some(deadline));
}

#[tokio::test]
async fn test_get_unknown_is_not_found() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();

    let err = store.get(&id).await.unwrap_err();
    assert!(matches!(err, ForgeError::JobNotFound(missing) if missing == id));
}

#[tokio::test]
async fn test_update_unknown_is_not_found() {
    let store = MemoryJobStore::new();

    let err = store
        .update(&Uuid::new_v4(), JobState::progress(1, 5, "Naive"))
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::JobNotFound(_)));
}

#[tokio::test]
async fn test_full_lifecycle_sets_timestamps() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();
    let created = store.get(&id).await.unwrap();

    store.update(&id, JobState::progress(1, 2, "a")).await.unwrap();
    store.update(&id, JobState::progress(2, 2, "b")).await.unwrap();
    let running = store.get(&id).await.unwrap();
    assert_eq!(running.state, JobState::progress(2, 2, "b"));
    assert!(running.updated_at >= created.updated_at);
    assert!(running.completed_at.is_none());

    store.update(&id, success_state()).await.unwrap();
    let done = store.get(&id).await.unwrap();
    assert_eq!(done.status(), JobStatus::Success);
    assert!(done.completed_at.is_some());
    assert_eq!(done.created_at, created.created_at);
}

#[tokio::test]
async fn test_terminal_job_is_immutable() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();
    store.update(&id, JobState::progress(1, 1, "a")).await.unwrap();
    store.update(&id, success_state()).await.unwrap();

    let err = store
        .update(&id, JobState::failure(FailureCode::Infrastructure, "late"))
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::JobFinalized(_)));

    let err = store
        .update(&id, JobState::progress(1, 1, "a"))
        .await
        .unwrap_err();
    assert!(matches!(err, ForgeError::JobFinalized(_)));

    assert_eq!(store.get(&id).await.unwrap().state, success_state());
}

#[tokio::test]
async fn test_illegal_transitions_rejected() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();

    // PENDING cannot jump straight to SUCCESS
    let err = store.update(&id, success_state()).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Success
        }
    ));

    store.update(&id, JobState::progress(1, 3, "a")).await.unwrap();
    let err = store.update(&id, JobState::Pending).await.unwrap_err();
    assert!(matches!(
        err,
        ForgeError::InvalidTransition {
            from: JobStatus::Progress,
            to: JobStatus::Pending
        }
    ));
}

#[tokio::test]
async fn test_pending_can_fail_directly() {
    let store = MemoryJobStore::new();
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();

    store
        .update(&id, JobState::failure(FailureCode::InvalidPayload, "bad bytes"))
        .await
        .unwrap();

    let job = store.get(&id).await.unwrap();
    assert_eq!(job.status(), JobStatus::Failure);
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_terminal_job_expires_after_ttl() {
    let store = MemoryJobStore::with_limits(Duration::from_millis(50), 100);
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();
    store
        .update(&id, JobState::failure(FailureCode::Evaluator, "boom"))
        .await
        .unwrap();

    // Repeated reads before expiry are identical
    let first = store.get(&id).await.unwrap();
    let second = store.get(&id).await.unwrap();
    assert_eq!(first.state, second.state);

    tokio::time::sleep(Duration::from_millis(80)).await;

    assert!(matches!(
        store.get(&id).await,
        Err(ForgeError::JobNotFound(_))
    ));
    // Still physically held until purged
    assert_eq!(store.len().await, 1);
    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_non_terminal_jobs_never_expire() {
    let store = MemoryJobStore::with_limits(Duration::from_millis(10), 100);
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();
    store.update(&id, JobState::progress(1, 5, "a")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.purge_expired().await.unwrap(), 0);
    assert_eq!(store.get(&id).await.unwrap().status(), JobStatus::Progress);
}

#[tokio::test]
async fn test_expired_id_can_be_recreated() {
    let store = MemoryJobStore::with_limits(Duration::from_millis(10), 100);
    let id = Uuid::new_v4();
    store.create(id, None).await.unwrap();
    store
        .update(&id, JobState::failure(FailureCode::Evaluator, "boom"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    store.create(id, None).await.unwrap();
    assert_eq!(store.get(&id).await.unwrap().status(), JobStatus::Pending);
}

#[tokio::test]
async fn test_capacity_rejects_when_full() {
    let store = MemoryJobStore::with_limits(Duration::from_secs(60), 2);
    store.create(Uuid::new_v4(), None).await.unwrap();
    store.create(Uuid::new_v4(), None).await.unwrap();

    let err = store.create(Uuid::new_v4(), None).await.unwrap_err();
    assert!(matches!(err, ForgeError::Infrastructure(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_capacity_reclaims_expired_records() {
    let store = MemoryJobStore::with_limits(Duration::from_millis(10), 1);
    let old = Uuid::new_v4();
    store.create(old, None).await.unwrap();
    store
        .update(&old, JobState::failure(FailureCode::Evaluator, "boom"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    store.create(Uuid::new_v4(), None).await.unwrap();
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_concurrent_updates_to_distinct_jobs() {
    let store = std::sync::Arc::new(MemoryJobStore::new());
    let ids: Vec<Uuid> = (0..20).map(|_| Uuid::new_v4()).collect();
    for id in &ids {
        store.create(*id, None).await.unwrap();
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for step in 1..=5 {
                store
                    .update(&id, JobState::progress(step, 5, format!("m{}", step)))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for id in &ids {
        assert_eq!(
            store.get(id).await.unwrap().state,
            JobState::progress(5, 5, "m5")
        );
    }
}
