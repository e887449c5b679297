use thiserror::Error;
use uuid::Uuid;

use crate::scheduler::JobStatus;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Job already exists: {0}")]
    DuplicateJob(Uuid),

    #[error("Job {0} is finalized and can no longer change")]
    JobFinalized(Uuid),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Model '{model}' failed: {message}")]
    Evaluator { model: String, message: String },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model already registered: {0}")]
    DuplicateModel(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Job deadline exceeded")]
    DeadlineExceeded,

    #[error("Infrastructure error: {0}")]
    Infrastructure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ForgeError {
    /// Errors worth retrying at the transport layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ForgeError::Infrastructure(_))
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;
