use thiserror::Error;

use crate::domain::ExecutionStatus;

/// The invocation payload could not be turned into a job descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("timeout_seconds must be positive, got {0}")]
    NonPositiveTimeout(i64),

    #[error("invalid `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failure of the backing object store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    /// Retryable network/service failure.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage failure: {0}")]
    Other(String),
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Rejection at admission time. The job never entered the queue.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("queue is full ({depth} waiting); retry later")]
    Backpressure { depth: usize },

    #[error("job_id {0} was already submitted")]
    DuplicateJob(String),

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// A waiter could not obtain the result of an admitted job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("job {0} was dropped from the queue during shutdown")]
    ShuttingDown(String),

    #[error("result of job {0} was lost")]
    Lost(String),
}

/// The task ran, but its outcome could not be persisted.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("could not persist result of job {job_id} (task status {status:?}): {source}")]
    Storage {
        job_id: String,
        status: ExecutionStatus,
        #[source]
        source: StorageError,
    },

    #[error("could not serialize result of job {job_id}: {source}")]
    Serialize {
        job_id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ReportError {
    pub fn job_id(&self) -> &str {
        match self {
            ReportError::Storage { job_id, .. } | ReportError::Serialize { job_id, .. } => job_id,
        }
    }
}

/// Internal sandbox failure. Always converted into an `INTERNAL_ERROR` result.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to prepare working directory: {0}")]
    Workdir(#[source] std::io::Error),

    #[error("failed to load function: {0}")]
    Load(String),

    #[error("failed to spawn function: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to wait for function: {0}")]
    Wait(#[source] std::io::Error),

    #[error("failed to capture function output: {0}")]
    Capture(String),

    #[error("failed to read function result: {0}")]
    Result(#[source] std::io::Error),
}
