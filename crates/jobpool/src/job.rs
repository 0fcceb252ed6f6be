//! Job and result model
//!
//! A `Job` is created for every submission and carries its own single-slot
//! result channel. The sending half of that channel is wrapped in a
//! `ResultSlot`, which is consumed on delivery so a job can be answered at
//! most once.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ExecutorError, InvalidPayload};

/// A value that can be submitted to the executor
///
/// Both methods have defaults: every payload is valid and never expires.
pub trait Payload: Send + 'static {
    /// Reject the payload before a job is created
    fn validate(&self) -> Result<(), InvalidPayload> {
        Ok(())
    }

    /// How long the job may wait for a free worker (`None` = never expires)
    fn expires_after(&self) -> Option<Duration> {
        None
    }
}

impl Payload for () {}
impl Payload for String {}
impl Payload for Vec<u8> {}
impl Payload for serde_json::Value {}

macro_rules! impl_payload {
    ($($ty:ty),*) => {
        $(impl Payload for $ty {})*
    };
}

impl_payload!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

/// Value delivered for a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome<O> {
    /// The processor ran and produced this value
    Completed(O),
    /// No worker took the job before its expiry elapsed
    Expired,
}

impl<O> JobOutcome<O> {
    pub fn is_expired(&self) -> bool {
        matches!(self, JobOutcome::Expired)
    }

    pub fn completed(&self) -> Option<&O> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Expired => None,
        }
    }

    pub fn into_completed(self) -> Option<O> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Expired => None,
        }
    }
}

/// Result of a job, correlated to it by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult<O> {
    pub correlation_id: Uuid,
    pub outcome: JobOutcome<O>,
    /// Worker that produced the result (None when expired)
    pub worker_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl<O> JobResult<O> {
    pub fn is_expired(&self) -> bool {
        self.outcome.is_expired()
    }
}

/// One dispatched unit of work
#[derive(Debug)]
pub(crate) struct Job<P, O> {
    correlation_id: Uuid,
    payload: P,
    expires_after: Option<Duration>,
    created_at: DateTime<Utc>,
    slot: ResultSlot<O>,
}

impl<P: Payload, O> Job<P, O> {
    /// Validate the payload and create a job with its result receiver
    pub(crate) fn new(
        payload: P,
    ) -> Result<(Self, oneshot::Receiver<JobResult<O>>), ExecutorError> {
        payload.validate()?;

        let correlation_id = Uuid::now_v7();
        let (tx, rx) = oneshot::channel();
        let job = Self {
            correlation_id,
            expires_after: payload.expires_after(),
            payload,
            created_at: Utc::now(),
            slot: ResultSlot { correlation_id, tx },
        };

        Ok((job, rx))
    }
}

impl<P, O> Job<P, O> {
    pub(crate) fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub(crate) fn expires_after(&self) -> Option<Duration> {
        self.expires_after
    }

    pub(crate) fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Resolve the job as expired without it ever reaching a worker
    pub(crate) fn expire(self) {
        self.slot.deliver(JobOutcome::Expired, None);
    }

    /// Hand the payload to a processor, keeping the slot for the result
    pub(crate) fn into_parts(self) -> (P, ResultSlot<O>) {
        (self.payload, self.slot)
    }
}

/// Sending half of a job's result channel
#[derive(Debug)]
pub(crate) struct ResultSlot<O> {
    correlation_id: Uuid,
    tx: oneshot::Sender<JobResult<O>>,
}

impl<O> ResultSlot<O> {
    pub(crate) fn deliver(self, outcome: JobOutcome<O>, worker_id: Option<String>) {
        let result = JobResult {
            correlation_id: self.correlation_id,
            outcome,
            worker_id,
            completed_at: Utc::now(),
        };

        if self.tx.send(result).is_err() {
            warn!(
                correlation_id = %self.correlation_id,
                "Result receiver dropped before delivery"
            );
        }
    }
}
