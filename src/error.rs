use thiserror::Error;

use crate::schedule::types::TaskStatus;

pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors surfaced by the task engine.
///
/// Adapter failures are only ever recorded on the task itself; the other
/// variants are returned synchronously to the caller.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("task is not completed yet, current status: {status}")]
    NotReady { status: TaskStatus },

    #[error("gone: {0}")]
    Gone(String),

    #[error("task {task_id} already failed {attempts} times, retry limit reached")]
    RetryLimitExceeded { task_id: String, attempts: u32 },

    #[error("adapter failure: {0}")]
    Adapter(#[from] AdapterError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}

/// Failure reported by an external collaborator (downloader or relocator).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct AdapterError {
    pub message: String,
}

impl AdapterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
