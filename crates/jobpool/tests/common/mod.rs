//! Shared processors and payloads for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobpool::prelude::*;

/// Payload value rejected by validation
pub const POISON: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct Task {
    pub value: u64,
    pub work: Duration,
    pub expires_after: Option<Duration>,
    pub block: bool,
    pub panic: bool,
}

impl Task {
    pub fn new(value: u64) -> Self {
        Self {
            value,
            work: Duration::ZERO,
            expires_after: None,
            block: false,
            panic: false,
        }
    }

    pub fn with_work(mut self, work: Duration) -> Self {
        self.work = work;
        self
    }

    pub fn expiring(mut self, after: Duration) -> Self {
        self.expires_after = Some(after);
        self
    }

    /// Never finishes processing
    pub fn blocking(mut self) -> Self {
        self.block = true;
        self
    }

    /// Panics inside the processor
    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }
}

impl Payload for Task {
    fn validate(&self) -> Result<(), InvalidPayload> {
        if self.value == POISON {
            return Err(InvalidPayload::new("poison value"));
        }
        Ok(())
    }

    fn expires_after(&self) -> Option<Duration> {
        self.expires_after
    }
}

/// Counters shared by every processor of one executor
#[derive(Debug, Default)]
pub struct Stats {
    pub processed: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub fail_init_for: Option<String>,
}

impl Stats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_init_for(worker_id: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_init_for: Some(worker_id.to_string()),
            ..Default::default()
        })
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

pub struct TestProcessor {
    worker_id: String,
    stats: Arc<Stats>,
}

#[async_trait]
impl Processor for TestProcessor {
    type Payload = Task;
    type Output = u64;

    async fn initialize(&mut self) -> Result<(), ProcessorError> {
        if self.stats.fail_init_for.as_deref() == Some(self.worker_id.as_str()) {
            return Err(ProcessorError::new("backend unavailable"));
        }
        Ok(())
    }

    async fn process(&mut self, task: Task) -> u64 {
        if task.block {
            std::future::pending::<()>().await;
        }
        if task.panic {
            panic!("processor failure for {}", task.value);
        }
        if !task.work.is_zero() {
            tokio::time::sleep(task.work).await;
        }
        self.stats.processed.fetch_add(1, Ordering::SeqCst);
        task.value
    }

    async fn destroy(&mut self) {
        self.stats.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn factory(stats: Arc<Stats>) -> impl Fn(&str) -> TestProcessor + Send + Sync {
    move |worker_id: &str| TestProcessor {
        worker_id: worker_id.to_string(),
        stats: stats.clone(),
    }
}

pub fn config(workers: usize) -> ExecutorConfig {
    ExecutorConfig::new(workers)
        .with_heartbeat(Duration::from_millis(50))
        .with_shutdown_grace(Duration::from_millis(10))
}

pub fn executor(name: &str, workers: usize, stats: Arc<Stats>) -> Executor<TestProcessor> {
    Executor::new(name, config(workers), factory(stats)).expect("executor should start")
}

/// Wait until `workers` processors are ready to take jobs
pub async fn wait_for_workers(executor: &Executor<TestProcessor>, workers: usize) {
    while executor.live_workers() < workers {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}
