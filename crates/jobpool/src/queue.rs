//! Shared bounded job queue
//!
//! Many producers (firing tasks) and many consumers (workers) share one
//! queue. Capacity counts jobs in flight, not just jobs buffered: a job takes
//! a permit before it is enqueued and the permit is returned only after its
//! worker has delivered the result. Permits exist only for live workers. A
//! worker opens its slot once its processor is ready and gives it back when
//! it leaves the pool, so a send only succeeds while some live worker is free
//! to take the job.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};

use crate::job::Job;
use crate::tick::{tick, Tick};

/// Receiving half shared by all workers
pub(crate) type SharedReceiver<P, O> = Arc<Mutex<mpsc::Receiver<Queued<P, O>>>>;

type Acquire = Pin<Box<dyn Future<Output = Result<OwnedSemaphorePermit, AcquireError>> + Send>>;

/// A job sitting in (or taken from) the queue, with its capacity permit
pub(crate) struct Queued<P, O> {
    job: Job<P, O>,
    permit: SlotPermit,
}

impl<P, O> Queued<P, O> {
    /// Split into the job and the permit to drop once its result is delivered
    pub(crate) fn into_parts(self) -> (Job<P, O>, SlotPermit) {
        (self.job, self.permit)
    }
}

/// Capacity held by one job, handed back to [`Slots`] on drop
pub(crate) struct SlotPermit {
    permit: Option<OwnedSemaphorePermit>,
    slots: Slots,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.slots.release(permit);
        }
    }
}

/// Outcome of one dispatch attempt
pub(crate) enum Dispatch<P, O> {
    /// The job is in the queue and will be claimed by a worker
    Sent,
    /// No capacity within the wait, the job is handed back
    Pending(Job<P, O>),
    /// The queue has been closed, the job is handed back
    Closed(Job<P, O>),
}

/// A job's place in line for a free worker
///
/// Kept across dispatch attempts so a waiting job is not overtaken by jobs
/// fired after it.
pub(crate) struct Reservation {
    acquire: Acquire,
}

/// Capacity contributed by live workers
#[derive(Clone)]
pub(crate) struct Slots {
    permits: Arc<Semaphore>,
    /// Permits in existence, free or held by a job
    total: Arc<AtomicUsize>,
    /// Permits to forget as soon as their job releases them
    owed: Arc<AtomicUsize>,
}

impl Slots {
    fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
            total: Arc::new(AtomicUsize::new(0)),
            owed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A worker is ready to take jobs
    pub(crate) fn open(&self) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.permits.add_permits(1);
    }

    /// A worker left the pool
    ///
    /// If every permit is held by a job, the next one released is forgotten
    /// instead of returned.
    pub(crate) fn retire(&self) {
        if self.permits.forget_permits(1) == 1 {
            self.total.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.owed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release(&self, permit: OwnedSemaphorePermit) {
        let repaid = self
            .owed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |owed| owed.checked_sub(1))
            .is_ok();

        if repaid {
            permit.forget();
            self.total.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Workers currently contributing capacity
    fn live(&self) -> usize {
        self.total
            .load(Ordering::SeqCst)
            .saturating_sub(self.owed.load(Ordering::SeqCst))
    }

    fn in_flight(&self) -> usize {
        self.total
            .load(Ordering::SeqCst)
            .saturating_sub(self.permits.available_permits())
    }
}

pub(crate) struct JobQueue<P, O> {
    capacity: usize,
    slots: Slots,
    tx: mpsc::Sender<Queued<P, O>>,
    rx: SharedReceiver<P, O>,
}

impl<P, O> Clone for JobQueue<P, O> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            slots: self.slots.clone(),
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<P, O> JobQueue<P, O> {
    /// Create a queue for at most `capacity` workers, none of them ready yet
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            slots: Slots::new(),
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    pub(crate) fn receiver(&self) -> SharedReceiver<P, O> {
        Arc::clone(&self.rx)
    }

    pub(crate) fn slots(&self) -> Slots {
        self.slots.clone()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Workers able to take jobs
    pub(crate) fn live_workers(&self) -> usize {
        self.slots.live()
    }

    /// Jobs queued or being processed right now
    pub(crate) fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.slots.permits.is_closed()
    }

    /// Take a place in line for capacity
    pub(crate) fn reserve(&self) -> Reservation {
        Reservation {
            acquire: Box::pin(Arc::clone(&self.slots.permits).acquire_owned()),
        }
    }

    /// Try to enqueue `job`, waiting at most `wait` for capacity
    ///
    /// On `Pending` the reservation keeps its place and can be passed again.
    pub(crate) async fn try_dispatch(
        &self,
        job: Job<P, O>,
        reservation: &mut Reservation,
        wait: Duration,
    ) -> Dispatch<P, O> {
        let permit = match tick(wait, &mut reservation.acquire).await {
            Tick::Ready(Ok(permit)) => SlotPermit {
                permit: Some(permit),
                slots: self.slots.clone(),
            },
            Tick::Ready(Err(_)) => return Dispatch::Closed(job),
            Tick::Idle => return Dispatch::Pending(job),
        };

        match self.tx.try_send(Queued { job, permit }) {
            Ok(()) => Dispatch::Sent,
            Err(TrySendError::Full(queued)) => {
                // The acquire has completed, wait in line again
                *reservation = self.reserve();
                Dispatch::Pending(queued.job)
            }
            Err(TrySendError::Closed(queued)) => Dispatch::Closed(queued.job),
        }
    }

    /// Refuse new jobs without touching the ones already queued
    pub(crate) fn stop_accepting(&self) {
        self.slots.permits.close();
    }

    /// Close the queue and return the jobs still buffered in it
    ///
    /// After this, every dispatch attempt reports [`Dispatch::Closed`].
    pub(crate) async fn close(&self) -> Vec<Job<P, O>> {
        self.stop_accepting();

        let mut rx = self.rx.lock().await;
        rx.close();

        let mut remaining = Vec::new();
        while let Ok(queued) = rx.try_recv() {
            remaining.push(queued.job);
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(value: u64) -> Job<u64, u64> {
        Job::new(value).unwrap().0
    }

    async fn dispatch(
        queue: &JobQueue<u64, u64>,
        value: u64,
        wait: Duration,
    ) -> Dispatch<u64, u64> {
        let mut reservation = queue.reserve();
        queue.try_dispatch(job(value), &mut reservation, wait).await
    }

    fn open_queue(workers: usize) -> JobQueue<u64, u64> {
        let queue = JobQueue::new(workers);
        for _ in 0..workers {
            queue.slots().open();
        }
        queue
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_capacity_until_a_worker_opens() {
        let queue = JobQueue::<u64, u64>::new(1);
        let wait = Duration::from_millis(10);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Pending(_)));
        assert_eq!(queue.live_workers(), 0);

        queue.slots().open();
        assert!(matches!(dispatch(&queue, 2, wait).await, Dispatch::Sent));
        assert_eq!(queue.live_workers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_counts_in_flight_jobs() {
        let queue = open_queue(1);
        let wait = Duration::from_millis(10);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Sent));
        assert_eq!(queue.in_flight(), 1);

        // Taking the job off the queue does not free capacity
        let queued = queue.receiver().lock().await.recv().await.unwrap();
        assert!(matches!(dispatch(&queue, 2, wait).await, Dispatch::Pending(_)));

        // Releasing the permit does
        let (_job, permit) = queued.into_parts();
        drop(permit);
        assert_eq!(queue.in_flight(), 0);
        assert!(matches!(dispatch(&queue, 3, wait).await, Dispatch::Sent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_hands_job_back() {
        let queue = open_queue(1);
        let second = job(2);
        let second_id = second.correlation_id();

        assert!(matches!(dispatch(&queue, 1, Duration::ZERO).await, Dispatch::Sent));
        let mut reservation = queue.reserve();
        match queue
            .try_dispatch(second, &mut reservation, Duration::ZERO)
            .await
        {
            Dispatch::Pending(returned) => assert_eq!(returned.correlation_id(), second_id),
            _ => panic!("expected pending"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reservation_keeps_its_place() {
        let queue = open_queue(1);
        let wait = Duration::from_millis(10);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Sent));

        // The older job waits one interval, then a newer one gets in line
        let mut older = queue.reserve();
        let older_job = match queue.try_dispatch(job(2), &mut older, wait).await {
            Dispatch::Pending(job) => job,
            _ => panic!("expected pending"),
        };
        let mut newer = queue.reserve();
        let newer_job = match queue.try_dispatch(job(3), &mut newer, wait).await {
            Dispatch::Pending(job) => job,
            _ => panic!("expected pending"),
        };

        let queued = queue.receiver().lock().await.recv().await.unwrap();
        drop(queued);

        assert!(matches!(
            queue.try_dispatch(newer_job, &mut newer, wait).await,
            Dispatch::Pending(_)
        ));
        assert!(matches!(
            queue.try_dispatch(older_job, &mut older, wait).await,
            Dispatch::Sent
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_removes_free_slot() {
        let queue = open_queue(2);
        let wait = Duration::from_millis(10);

        queue.slots().retire();
        assert_eq!(queue.live_workers(), 1);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Sent));
        assert!(matches!(dispatch(&queue, 2, wait).await, Dispatch::Pending(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retire_while_busy_forgets_next_release() {
        let queue = open_queue(2);
        let slots = queue.slots();
        let wait = Duration::from_millis(10);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Sent));
        assert!(matches!(dispatch(&queue, 2, wait).await, Dispatch::Sent));

        slots.retire();
        assert_eq!(queue.live_workers(), 1);
        assert_eq!(queue.in_flight(), 2);

        let rx = queue.receiver();
        let first = rx.lock().await.recv().await.unwrap();
        let second = rx.lock().await.recv().await.unwrap();

        drop(first);
        assert_eq!(queue.in_flight(), 1);
        assert!(matches!(dispatch(&queue, 3, wait).await, Dispatch::Pending(_)));

        drop(second);
        assert_eq!(queue.in_flight(), 0);
        assert!(matches!(dispatch(&queue, 4, wait).await, Dispatch::Sent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drains_buffered_jobs() {
        let queue = open_queue(2);
        let wait = Duration::from_millis(10);

        assert!(matches!(dispatch(&queue, 1, wait).await, Dispatch::Sent));
        assert!(matches!(dispatch(&queue, 2, wait).await, Dispatch::Sent));

        let remaining = queue.close().await;
        assert_eq!(remaining.len(), 2);
        assert!(queue.is_closed());

        assert!(matches!(dispatch(&queue, 3, wait).await, Dispatch::Closed(_)));
    }

    #[tokio::test]
    async fn test_receiver_sees_end_of_queue_after_close() {
        let queue = JobQueue::<u64, u64>::new(1);
        let receiver = queue.receiver();

        queue.close().await;

        assert!(receiver.lock().await.recv().await.is_none());
        assert_eq!(queue.capacity(), 1);
    }
}
