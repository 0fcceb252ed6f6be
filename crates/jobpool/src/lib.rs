//! # Job Pool
//!
//! An asynchronous job executor backed by a fixed-size pool of workers.
//!
//! ## Features
//!
//! - **Per-worker processors**: a factory creates one [`Processor`] per worker, never shared
//! - **Bounded dispatch**: at most one in-flight job per worker, extra jobs wait for a free worker
//! - **Expiration**: a job that waits longer than its expiry resolves as [`JobOutcome::Expired`]
//! - **Correlated results**: every job gets exactly one [`JobResult`], via callbacks or by waiting
//! - **Graceful shutdown**: workers are stopped concurrently before the queue is closed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Executor                             │
//! │  fire_job / fire_and_forget_job / execute_job / destroy      │
//! └─────────────────────────────────────────────────────────────┘
//!          │ one firing task per job (enqueue, expire, correlate)
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              JobQueue (capacity = worker count)              │
//! └─────────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  [Worker 1] [Worker 2] ... [Worker N]  (one Processor each)  │
//! │  event loop: kill signal | next job | heartbeat              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use jobpool::prelude::*;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Processor for Echo {
//!     type Payload = String;
//!     type Output = String;
//!
//!     async fn process(&mut self, payload: String) -> String {
//!         payload
//!     }
//! }
//!
//! let mut executor = Executor::new("echo", ExecutorConfig::new(2), |_: &str| Echo)?;
//! let result = executor.execute_job("hello".to_string()).await?;
//! assert_eq!(result.outcome, JobOutcome::Completed("hello".to_string()));
//! executor.destroy().await;
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod processor;
pub mod telemetry;
pub mod worker;

mod queue;
mod tick;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::ExecutorConfig;
    pub use crate::error::{ExecutorError, InvalidPayload};
    pub use crate::executor::{callback, Callback, Executor};
    pub use crate::job::{JobOutcome, JobResult, Payload};
    pub use crate::processor::{Processor, ProcessorError, ProcessorFactory};
    pub use crate::worker::{Signal, WorkerStatus};
    pub use async_trait::async_trait;
}

// Re-export key types at crate root
pub use config::ExecutorConfig;
pub use error::{ExecutorError, InvalidPayload};
pub use executor::{callback, Callback, Executor};
pub use job::{JobOutcome, JobResult, Payload};
pub use processor::{Processor, ProcessorError, ProcessorFactory};
pub use worker::{Signal, WorkerStatus};
