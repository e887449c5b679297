use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::scheduler::job::{Job, JobState};

const DEFAULT_MAX_JOBS: usize = 10_000;
const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

/// Key-value registry of job state.
///
/// The store is the single owner of job records; callers only ever get
/// clones. Every method is atomic per key.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a PENDING record. Fails with `DuplicateJob` if the id is live.
    async fn create(&self, id: Uuid, deadline: Option<DateTime<Utc>>) -> Result<()>;

    /// Fetch a snapshot. Expired records are reported as `JobNotFound`.
    async fn get(&self, id: &Uuid) -> Result<Job>;

    /// Replace the mutable part of a record in one step.
    async fn update(&self, id: &Uuid, state: JobState) -> Result<()>;

    /// Physically drop expired terminal records. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

#[derive(Debug)]
struct Entry {
    job: Job,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process job store backed by a `RwLock<HashMap>`.
///
/// Terminal jobs are kept for `ttl` after they finish.
#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Entry>>,
    ttl: Duration,
    max_jobs: usize,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_RESULT_TTL, DEFAULT_MAX_JOBS)
    }

    pub fn with_limits(ttl: Duration, max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
            max_jobs,
        }
    }

    /// Number of records held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: Uuid, deadline: Option<DateTime<Utc>>) -> Result<()> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;

        if let Some(entry) = jobs.get(&id) {
            if !entry.is_expired(now) {
                return Err(ForgeError::DuplicateJob(id));
            }
        }

        if jobs.len() >= self.max_jobs {
            jobs.retain(|_, entry| !entry.is_expired(now));
            if jobs.len() >= self.max_jobs {
                return Err(ForgeError::Infrastructure(format!(
                    "job store at capacity ({} jobs)",
                    self.max_jobs
                )));
            }
        }

        jobs.insert(
            id,
            Entry {
                job: Job::new(id).with_deadline(deadline),
                expires_at: None,
            },
        );
        tracing::debug!(job_id = %id, "Job record created");
        Ok(())
    }

    async fn get(&self, id: &Uuid) -> Result<Job> {
        let jobs = self.jobs.read().await;
        match jobs.get(id) {
            Some(entry) if !entry.is_expired(Instant::now()) => Ok(entry.job.clone()),
            _ => Err(ForgeError::JobNotFound(*id)),
        }
    }

    async fn update(&self, id: &Uuid, state: JobState) -> Result<()> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let entry = match jobs.get_mut(id) {
            Some(entry) if !entry.is_expired(now) => entry,
            _ => return Err(ForgeError::JobNotFound(*id)),
        };

        let from = entry.job.status();
        let to = state.status();
        if from.is_terminal() {
            return Err(ForgeError::JobFinalized(*id));
        }
        if !from.can_transition_to(to) {
            return Err(ForgeError::InvalidTransition { from, to });
        }

        let stamp = Utc::now();
        entry.job.state = state;
        entry.job.updated_at = stamp;
        if to.is_terminal() {
            entry.job.completed_at = Some(stamp);
            entry.expires_at = Some(now + self.ttl);
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| !entry.is_expired(now));
        Ok(before - jobs.len())
    }
}
