//! Job executor
//!
//! The `Executor` owns the worker pool and the shared job queue. It is
//! responsible for:
//! - Creating and registering one worker per configured slot
//! - Firing jobs, expiring those that wait too long for a free worker
//! - Correlating each job's result back to its callbacks
//! - Shutting the pool down worker by worker before closing the queue

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, instrument, trace, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::error::ExecutorError;
use crate::job::{Job, JobResult};
use crate::processor::{Processor, ProcessorFactory};
use crate::queue::{Dispatch, JobQueue};
use crate::tick::{tick, Tick};
use crate::worker::{Signal, Worker, WorkerHandle, WorkerStatus};

/// Function invoked with a job's result
///
/// Callbacks run on a blocking background task, in the order they were
/// supplied. `None` entries are skipped.
pub type Callback<O> = Box<dyn FnOnce(&JobResult<O>) + Send + 'static>;

/// Wrap a closure as a callback slot
pub fn callback<O, F>(f: F) -> Option<Callback<O>>
where
    F: FnOnce(&JobResult<O>) + Send + 'static,
{
    Some(Box::new(f))
}

/// Pool of workers executing jobs of one processor type
///
/// # Example
///
/// ```ignore
/// use jobpool::prelude::*;
///
/// let config = ExecutorConfig::new(4).with_heartbeat(Duration::from_millis(100));
/// let mut executor = Executor::new("resize", config, |_: &str| Resizer::default())?;
///
/// // Fire and receive the result through a callback
/// executor.fire_job(image, vec![callback(|result| println!("{:?}", result.outcome))])?;
///
/// // Or wait for it
/// let result = executor.execute_job(other_image).await?;
///
/// executor.destroy().await;
/// ```
pub struct Executor<P: Processor> {
    name: String,
    config: ExecutorConfig,
    queue: JobQueue<P::Payload, P::Output>,
    workers: HashMap<String, WorkerHandle>,
    tasks: TaskTracker,
}

impl<P: Processor> Executor<P> {
    /// Create an executor and start its workers
    ///
    /// Must be called from within a Tokio runtime. Workers are named
    /// `<name>-worker-<index>`, starting at 1.
    pub fn new<F>(
        name: impl Into<String>,
        config: ExecutorConfig,
        factory: F,
    ) -> Result<Self, ExecutorError>
    where
        F: ProcessorFactory<Processor = P>,
    {
        let name = name.into();
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;

        let queue = JobQueue::new(config.workers);
        let mut workers = HashMap::with_capacity(config.workers);

        for index in 1..=config.workers {
            let worker_id = format!("{}-worker-{}", name, index);
            trace!(
                executor = %name,
                %worker_id,
                "Creating worker ({}/{})",
                index,
                config.workers
            );

            let processor = factory.create(&worker_id);
            let handle = Worker::spawn(worker_id.clone(), &config, &queue, processor);
            workers.insert(worker_id, handle);
        }

        info!(
            executor = %name,
            workers = config.workers,
            heartbeat_ms = config.heartbeat.as_millis() as u64,
            "Executor started"
        );

        Ok(Self {
            name,
            config,
            queue,
            workers,
            tasks: TaskTracker::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Number of registered workers (zero after [`destroy`](Self::destroy))
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn worker_statuses(&self) -> Vec<(String, WorkerStatus)> {
        let mut statuses: Vec<_> = self
            .workers
            .values()
            .map(|w| (w.id().to_string(), w.status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    /// Workers whose processor is ready and that have not left the pool
    ///
    /// This is the pool's actual capacity: a worker that failed to
    /// initialize, was killed or panicked no longer counts.
    pub fn live_workers(&self) -> usize {
        self.queue.live_workers()
    }

    /// Jobs currently queued or being processed
    pub fn in_flight(&self) -> usize {
        self.queue.in_flight()
    }

    /// Whether new jobs can still reach a worker
    pub fn is_accepting(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Send a signal to one worker
    pub async fn signal_worker(
        &self,
        worker_id: &str,
        signal: Signal,
    ) -> Result<(), ExecutorError> {
        let worker = self
            .workers
            .get(worker_id)
            .ok_or_else(|| ExecutorError::WorkerNotFound(worker_id.to_string()))?;
        worker.signal(signal).await
    }

    /// Fire a job and deliver its result to `callbacks` (asynchronous)
    ///
    /// Returns as soon as the job is scheduled. Fails only if the payload is
    /// rejected, in which case no job is created.
    pub fn fire_job(
        &self,
        payload: P::Payload,
        callbacks: Vec<Option<Callback<P::Output>>>,
    ) -> Result<Uuid, ExecutorError> {
        let (job, rx) = Job::new(payload)?;
        let correlation_id = job.correlation_id();

        let span = info_span!("job", executor = %self.name, %correlation_id);
        let dispatcher = self.dispatcher();
        self.tasks
            .spawn(async move { dispatcher.fire(job, rx, callbacks).await }.instrument(span));

        Ok(correlation_id)
    }

    /// Fire a job whose result is drained and discarded
    pub fn fire_and_forget_job(&self, payload: P::Payload) -> Result<Uuid, ExecutorError> {
        self.fire_job(payload, vec![callback(|_| {})])
    }

    /// Fire a job and wait for its result (synchronous for the caller)
    #[instrument(skip_all, fields(executor = %self.name))]
    pub async fn execute_job(
        &self,
        payload: P::Payload,
    ) -> Result<JobResult<P::Output>, ExecutorError>
    where
        P::Output: Clone,
    {
        let (tx, mut rx) = oneshot::channel();
        let forward = callback(move |result: &JobResult<P::Output>| {
            let _ = tx.send(result.clone());
        });

        let correlation_id = self.fire_job(payload, vec![forward])?;

        loop {
            match tick(self.config.heartbeat, &mut rx).await {
                Tick::Ready(Ok(result)) => return Ok(result),
                Tick::Ready(Err(_)) => return Err(ExecutorError::NoResult(correlation_id)),
                Tick::Idle => trace!(%correlation_id, "Waiting for result of job"),
            }
        }
    }

    /// Wait until every fired job has been resolved and its callbacks have run
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Kill every worker, wait for all of them, then close the queue
    ///
    /// Workers are stopped concurrently, so this takes as long as the slowest
    /// worker's in-flight job plus the teardown grace period. Jobs still
    /// waiting for a worker afterwards resolve as expired.
    #[instrument(skip(self), fields(executor = %self.name))]
    pub async fn destroy(&mut self) {
        let mut pending = JoinSet::new();

        for worker in self.workers.values() {
            let worker = worker.clone();
            trace!(worker_id = %worker.id(), "Waiting for worker...");

            pending.spawn(
                async move {
                    if let Err(e) = worker.kill().await {
                        trace!(worker_id = %worker.id(), error = %e, "Worker already stopped");
                    }
                    trace!(worker_id = %worker.id(), "Waiting for worker's death...");
                    worker.wait().await;
                    worker.id().to_string()
                }
                .instrument(Span::current()),
            );
        }

        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(worker_id) => {
                    self.workers.remove(&worker_id);
                    trace!(%worker_id, "Worker unregistered");
                }
                Err(e) => error!(error = %e, "Worker shutdown task failed"),
            }
        }

        if !self.workers.is_empty() {
            warn!(
                remaining = self.workers.len(),
                "Unregistering workers that did not report done"
            );
            self.workers.clear();
        }

        trace!("Closing job queue");
        for job in self.queue.close().await {
            warn!(correlation_id = %job.correlation_id(), "Job expired at shutdown");
            job.expire();
        }

        info!("Executor destroyed");
    }

    fn dispatcher(&self) -> Dispatcher<P::Payload, P::Output> {
        Dispatcher {
            heartbeat: self.config.heartbeat,
            queue: self.queue.clone(),
            tasks: self.tasks.clone(),
        }
    }
}

/// State a firing task needs, detached from the executor
struct Dispatcher<Pl, O> {
    heartbeat: Duration,
    queue: JobQueue<Pl, O>,
    tasks: TaskTracker,
}

impl<Pl, O> Dispatcher<Pl, O>
where
    Pl: Send + 'static,
    O: Send + 'static,
{
    async fn fire(
        self,
        job: Job<Pl, O>,
        rx: oneshot::Receiver<JobResult<O>>,
        callbacks: Vec<Option<Callback<O>>>,
    ) {
        trace!(callbacks = callbacks.len(), "Firing job");
        self.enqueue(job).await;
        self.await_result(rx, callbacks).await;
    }

    /// Offer the job to the queue until it is taken or expires
    ///
    /// Either way exactly one result ends up in the job's slot: from the
    /// worker that takes it, or from here. The job keeps one reservation
    /// for all attempts, so it is not overtaken by jobs fired later.
    async fn enqueue(&self, job: Job<Pl, O>) {
        let fired_at = Instant::now();
        let expires_after = job.expires_after();
        let mut reservation = self.queue.reserve();
        let mut job = job;

        loop {
            let wait = poll_interval(self.heartbeat, expires_after, fired_at.elapsed());

            match self.queue.try_dispatch(job, &mut reservation, wait).await {
                Dispatch::Sent => {
                    trace!("Job has been fired");
                    return;
                }
                Dispatch::Pending(pending) => {
                    if expires_after.is_some_and(|limit| fired_at.elapsed() >= limit) {
                        warn!(
                            waited_ms = fired_at.elapsed().as_millis() as u64,
                            "Job has expired"
                        );
                        pending.expire();
                        return;
                    }
                    trace!("Job has not been fired yet (waiting for free worker)");
                    job = pending;
                }
                Dispatch::Closed(rejected) => {
                    warn!("Job queue is closed, job expired without running");
                    rejected.expire();
                    return;
                }
            }
        }
    }

    async fn await_result(
        &self,
        mut rx: oneshot::Receiver<JobResult<O>>,
        callbacks: Vec<Option<Callback<O>>>,
    ) {
        loop {
            match tick(self.heartbeat, &mut rx).await {
                Tick::Ready(Ok(result)) => {
                    debug!(
                        expired = result.is_expired(),
                        callbacks = callbacks.len(),
                        "Job done, calling callbacks"
                    );
                    let span = Span::current();
                    self.tasks.spawn_blocking(move || {
                        span.in_scope(|| run_callbacks(&result, callbacks))
                    });
                    return;
                }
                Tick::Ready(Err(_)) => {
                    error!("Result slot closed without a result");
                    return;
                }
                Tick::Idle => trace!("Waiting for output of job"),
            }
        }
    }
}

/// Next dispatch wait: the heartbeat, shortened so the last attempt ends on
/// the job's deadline
fn poll_interval(
    heartbeat: Duration,
    expires_after: Option<Duration>,
    elapsed: Duration,
) -> Duration {
    match expires_after {
        None => heartbeat,
        Some(limit) => heartbeat.min(limit.saturating_sub(elapsed)),
    }
}

fn run_callbacks<O>(result: &JobResult<O>, callbacks: Vec<Option<Callback<O>>>) {
    let total = callbacks.len();

    for (index, callback) in callbacks.into_iter().enumerate() {
        let Some(callback) = callback else {
            trace!("Skipping callback function ({}/{})", index + 1, total);
            continue;
        };

        trace!("Running callback function ({}/{})", index + 1, total);
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(result))) {
            error!(
                callback = index + 1,
                panic = panic_message(panic.as_ref()),
                "Callback panicked"
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

impl<P: Processor> Drop for Executor<P> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            warn!(
                executor = %self.name,
                workers = self.workers.len(),
                "Executor dropped without destroy"
            );
        }
        self.queue.stop_accepting();
    }
}

impl<P: Processor> std::fmt::Debug for Executor<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("workers", &self.worker_ids())
            .field("capacity", &self.queue.capacity())
            .field("live_workers", &self.live_workers())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
