use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the executor
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Configuration rejected at construction
    #[error("invalid executor configuration: {0}")]
    InvalidConfig(String),

    /// Executor was constructed outside of a Tokio runtime
    #[error("executor requires a running Tokio runtime")]
    NoRuntime,

    /// Payload rejected at job creation, no job was created
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] InvalidPayload),

    /// Result slot closed without ever producing a value
    #[error("could not obtain a result for job {0}")]
    NoResult(Uuid),

    /// No worker registered under this id
    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    /// Worker exists but no longer accepts signals
    #[error("worker {0} is a zombie")]
    WorkerGone(String),
}

/// Reason a payload was rejected by [`Payload::validate`](crate::job::Payload::validate)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct InvalidPayload(pub String);

impl InvalidPayload {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
