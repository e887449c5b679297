use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::ModelResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Progress,
    Success,
    Failure,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Progress => write!(f, "PROGRESS"),
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

impl JobStatus {
    /// SUCCESS and FAILURE never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    /// Legal edges of the job state machine.
    ///
    /// `Progress -> Progress` is the step advance, and also what a redelivered
    /// job goes through when a new worker restarts it from the first model.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Progress)
                | (JobStatus::Pending, JobStatus::Failure)
                | (JobStatus::Progress, JobStatus::Progress)
                | (JobStatus::Progress, JobStatus::Success)
                | (JobStatus::Progress, JobStatus::Failure)
        )
    }
}

/// Which evaluator is running, 1-based within the registry order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub label: String,
}

impl Progress {
    pub fn new(current: usize, total: usize, label: impl Into<String>) -> Self {
        Self {
            current,
            total,
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
    Evaluator,
    Infrastructure,
    DeadlineExceeded,
    InvalidPayload,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCode::Evaluator => write!(f, "EVALUATOR"),
            FailureCode::Infrastructure => write!(f, "INFRASTRUCTURE"),
            FailureCode::DeadlineExceeded => write!(f, "DEADLINE_EXCEEDED"),
            FailureCode::InvalidPayload => write!(f, "INVALID_PAYLOAD"),
        }
    }
}

/// Status together with the data that status is allowed to carry.
///
/// Serializes to exactly what a poller sees, e.g.
/// `{"status":"PROGRESS","progress":{"current":2,"total":5,"label":"Drift"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Progress {
        progress: Progress,
    },
    Success {
        results: Vec<ModelResult>,
    },
    Failure {
        error: String,
        code: FailureCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
}

impl JobState {
    pub fn progress(current: usize, total: usize, label: impl Into<String>) -> Self {
        JobState::Progress {
            progress: Progress::new(current, total, label),
        }
    }

    pub fn failure(code: FailureCode, error: impl Into<String>) -> Self {
        JobState::Failure {
            error: error.into(),
            code,
            model: None,
        }
    }

    pub fn model_failure(model: impl Into<String>, error: impl Into<String>) -> Self {
        JobState::Failure {
            error: error.into(),
            code: FailureCode::Evaluator,
            model: Some(model.into()),
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobState::Pending => JobStatus::Pending,
            JobState::Progress { .. } => JobStatus::Progress,
            JobState::Success { .. } => JobStatus::Success,
            JobState::Failure { .. } => JobStatus::Failure,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    /// Workers give up at the next step boundary once this has passed.
    pub deadline: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: JobState::Pending,
            deadline: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<DateTime<Utc>>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn status(&self) -> JobStatus {
        self.state.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }
}
