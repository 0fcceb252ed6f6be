//! Processor trait definition
//!
//! A processor performs the actual work for a payload. The executor never
//! shares a processor between workers: a [`ProcessorFactory`] creates one
//! instance per worker, and that worker owns it for its whole life.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::Payload;

/// Error returned when a processor cannot be initialized
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorError {
    /// Error message
    pub message: String,
}

impl ProcessorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ProcessorError {}

impl From<anyhow::Error> for ProcessorError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Work performed by a single worker
///
/// # Example
///
/// ```ignore
/// use jobpool::prelude::*;
///
/// struct Upper;
///
/// #[async_trait]
/// impl Processor for Upper {
///     type Payload = String;
///     type Output = String;
///
///     async fn process(&mut self, payload: String) -> String {
///         payload.to_uppercase()
///     }
/// }
/// ```
#[async_trait]
pub trait Processor: Send + 'static {
    /// Input accepted by [`process`](Processor::process)
    type Payload: Payload;

    /// Value produced for each payload
    type Output: Send + 'static;

    /// Prepare the processor before its worker accepts jobs
    ///
    /// A failure here retires the worker: it never receives a job.
    async fn initialize(&mut self) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Process one payload
    async fn process(&mut self, payload: Self::Payload) -> Self::Output;

    /// Release resources, called once during worker teardown
    async fn destroy(&mut self) {}
}

/// Creates one processor per worker
pub trait ProcessorFactory: Send + Sync {
    type Processor: Processor;

    /// Create the processor owned by `worker_id`
    fn create(&self, worker_id: &str) -> Self::Processor;
}

impl<F, P> ProcessorFactory for F
where
    F: Fn(&str) -> P + Send + Sync,
    P: Processor,
{
    type Processor = P;

    fn create(&self, worker_id: &str) -> P {
        self(worker_id)
    }
}
