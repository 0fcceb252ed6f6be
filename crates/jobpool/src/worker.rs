//! Pool worker
//!
//! Each worker owns one processor and runs an event loop over three sources:
//! its signal mailbox, the shared job queue and a heartbeat timeout. The loop
//! ends on a kill signal, when the queue reports that no more jobs will
//! arrive, or when the mailbox is dropped together with the executor.
//! Teardown then runs exactly once and leaves the worker a zombie.
//!
//! A worker contributes one slot of queue capacity from the moment its
//! processor is ready until it stops taking jobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info_span, trace, warn, Instrument};

use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::job::JobOutcome;
use crate::processor::Processor;
use crate::queue::{JobQueue, Queued, SharedReceiver, Slots};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerStatus {
    /// Accepting signals and jobs
    Alive,
    /// Torn down, accepts nothing
    Zombie,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Alive => write!(f, "alive"),
            WorkerStatus::Zombie => write!(f, "zombie"),
        }
    }
}

/// Control message delivered to a worker's mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Stop accepting jobs and tear down
    Kill,
    /// Unrecognized signal, logged and ignored
    Other(u8),
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Kill => write!(f, "kill"),
            Signal::Other(code) => write!(f, "signal({})", code),
        }
    }
}

/// Executor-side handle to a running worker
#[derive(Debug, Clone)]
pub(crate) struct WorkerHandle {
    id: String,
    signals: mpsc::Sender<Signal>,
    status: watch::Receiver<WorkerStatus>,
}

impl WorkerHandle {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn status(&self) -> WorkerStatus {
        *self.status.borrow()
    }

    /// Deliver a signal, waiting for the single-slot mailbox to free up
    pub(crate) async fn signal(&self, signal: Signal) -> Result<(), ExecutorError> {
        self.signals
            .send(signal)
            .await
            .map_err(|_| ExecutorError::WorkerGone(self.id.clone()))
    }

    pub(crate) async fn kill(&self) -> Result<(), ExecutorError> {
        trace!(worker_id = %self.id, "Sending kill signal");
        self.signal(Signal::Kill).await
    }

    /// Wait until the worker reports done
    ///
    /// Also returns if the worker task ended without tearing down (a
    /// processor panic), since it will never report done in that case.
    pub(crate) async fn wait(&self) {
        let mut status = self.status.clone();
        let _ = status.wait_for(|s| *s == WorkerStatus::Zombie).await;
    }
}

pub(crate) struct Worker<P: Processor> {
    id: String,
    heartbeat: Duration,
    shutdown_grace: Duration,
    jobs: SharedReceiver<P::Payload, P::Output>,
    slots: Slots,
    /// Whether this worker's slot is open
    in_pool: bool,
    signals: mpsc::Receiver<Signal>,
    status: watch::Sender<WorkerStatus>,
    processor: P,
    processed: u64,
}

impl<P: Processor> Worker<P> {
    /// Start a worker on its own task and return its handle
    pub(crate) fn spawn(
        id: String,
        config: &ExecutorConfig,
        queue: &JobQueue<P::Payload, P::Output>,
        processor: P,
    ) -> WorkerHandle {
        let (signal_tx, signal_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(WorkerStatus::Alive);

        let worker = Self {
            id: id.clone(),
            heartbeat: config.heartbeat,
            shutdown_grace: config.shutdown_grace,
            jobs: queue.receiver(),
            slots: queue.slots(),
            in_pool: false,
            signals: signal_rx,
            status: status_tx,
            processor,
            processed: 0,
        };

        let span = info_span!("worker", worker_id = %id);
        tokio::spawn(worker.run().instrument(span));

        WorkerHandle {
            id,
            signals: signal_tx,
            status: status_rx,
        }
    }

    fn is_alive(&self) -> bool {
        *self.status.borrow() == WorkerStatus::Alive
    }

    async fn run(mut self) {
        if let Err(e) = self.processor.initialize().await {
            error!(error = %e, "Could not initialize processor, retiring worker");
            self.die().await;
            return;
        }

        self.slots.open();
        self.in_pool = true;
        debug!("Worker started");

        while self.is_alive() {
            let jobs = self.jobs.clone();

            tokio::select! {
                signal = self.signals.recv() => match signal {
                    Some(Signal::Kill) => {
                        trace!("Killed");
                        break;
                    }
                    Some(other) => {
                        warn!(signal = %other, "Unknown signal received");
                    }
                    None => {
                        trace!("Signal mailbox dropped");
                        break;
                    }
                },
                queued = async move { jobs.lock().await.recv().await } => match queued {
                    Some(queued) => self.handle(queued).await,
                    None => {
                        trace!("Received all jobs");
                        break;
                    }
                },
                _ = tokio::time::sleep(self.heartbeat) => {
                    trace!("Nothing to do");
                }
            }
        }

        trace!(processed = self.processed, "Finished");
        self.die().await;
    }

    async fn handle(&mut self, queued: Queued<P::Payload, P::Output>) {
        let (job, permit) = queued.into_parts();
        self.processed += 1;

        let correlation_id = job.correlation_id();
        let queued_for = chrono::Utc::now().signed_duration_since(job.created_at());
        trace!(
            %correlation_id,
            counter = self.processed,
            queued_ms = queued_for.num_milliseconds(),
            "Received job #{:06}",
            self.processed
        );

        let (payload, slot) = job.into_parts();
        let output = self.processor.process(payload).await;

        trace!(%correlation_id, counter = self.processed, "Reporting result");
        slot.deliver(JobOutcome::Completed(output), Some(self.id.clone()));
        drop(permit);
    }

    /// Give the worker's capacity slot back, at most once
    fn leave_pool(&mut self) {
        if std::mem::take(&mut self.in_pool) {
            self.slots.retire();
            trace!("Left the pool");
        }
    }

    /// Tear down once: grace period, release the processor, become a zombie
    async fn die(&mut self) {
        if !self.is_alive() {
            return;
        }

        self.leave_pool();
        self.signals.close();
        trace!("Dying...");
        tokio::time::sleep(self.shutdown_grace).await;

        self.processor.destroy().await;
        self.status.send_replace(WorkerStatus::Zombie);
        trace!("Became a zombie");
    }
}

impl<P: Processor> Drop for Worker<P> {
    fn drop(&mut self) {
        // Reached without teardown when the processor panics
        self.leave_pool();
    }
}
