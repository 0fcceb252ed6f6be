use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobpool::prelude::*;
use jobpool::telemetry::{init_telemetry, TelemetryConfig};

/// Demo payload: how long to "work" and how long to wait for a worker
#[derive(Debug, Clone)]
struct Sleep {
    millis: u64,
    expires_after: Option<Duration>,
}

impl Payload for Sleep {
    fn validate(&self) -> Result<(), InvalidPayload> {
        if self.millis > 60_000 {
            return Err(InvalidPayload::new("sleep longer than a minute"));
        }
        Ok(())
    }

    fn expires_after(&self) -> Option<Duration> {
        self.expires_after
    }
}

struct Sleeper {
    worker_id: String,
}

#[async_trait]
impl Processor for Sleeper {
    type Payload = Sleep;
    type Output = String;

    async fn process(&mut self, payload: Sleep) -> String {
        tokio::time::sleep(Duration::from_millis(payload.millis)).await;
        format!("{} slept {}ms", self.worker_id, payload.millis)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "jobpool=info")
    // - JOBPOOL_WORKERS, JOBPOOL_HEARTBEAT_MS, JOBPOOL_SHUTDOWN_GRACE_MS: pool settings
    // - JOBPOOL_DEMO_JOBS: number of jobs to fire (default: 10)
    init_telemetry(TelemetryConfig::from_env());

    let config = ExecutorConfig::from_env();
    let jobs: u64 = std::env::var("JOBPOOL_DEMO_JOBS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    tracing::info!(
        workers = config.workers,
        heartbeat_ms = config.heartbeat.as_millis() as u64,
        jobs,
        "Starting demo executor"
    );

    let mut executor = Executor::new("demo", config, |worker_id: &str| Sleeper {
        worker_id: worker_id.to_string(),
    })
    .context("Failed to create executor")?;

    let expired = Arc::new(AtomicUsize::new(0));
    for index in 0..jobs {
        // Every third job gives up if it cannot start within 50ms
        let payload = Sleep {
            millis: 100 + (index % 5) * 50,
            expires_after: (index % 3 == 0).then(|| Duration::from_millis(50)),
        };

        let expired = expired.clone();
        executor.fire_job(
            payload,
            vec![callback(move |result: &JobResult<String>| {
                match &result.outcome {
                    JobOutcome::Completed(message) => {
                        tracing::info!(correlation_id = %result.correlation_id, "{}", message)
                    }
                    JobOutcome::Expired => {
                        expired.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(correlation_id = %result.correlation_id, "Job expired");
                    }
                }
            })],
        )?;
    }

    let interrupted = tokio::select! {
        _ = executor.drain() => {
            tracing::info!(
                expired = expired.load(Ordering::SeqCst),
                "All jobs resolved"
            );
            false
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            true
        }
    };

    if !interrupted {
        let last = executor
            .execute_job(Sleep {
                millis: 10,
                expires_after: None,
            })
            .await?;
        tracing::info!(outcome = ?last.outcome, "Final synchronous job");
    }

    executor.destroy().await;
    tracing::info!("Executor shutdown complete");
    Ok(())
}
