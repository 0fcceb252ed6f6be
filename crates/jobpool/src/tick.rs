//! Timed wait on a future
//!
//! Waits on a future for at most one interval and reports either the value or
//! that the interval elapsed without progress. The future is borrowed, so the
//! caller can keep waiting on the same future across ticks (liveness logging
//! between ticks).

use std::future::Future;
use std::time::Duration;

/// Outcome of waiting one interval
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Tick<T> {
    /// The future completed
    Ready(T),
    /// The interval elapsed first
    Idle,
}

/// Wait for `fut` for at most `interval`
pub(crate) async fn tick<F>(interval: Duration, fut: &mut F) -> Tick<F::Output>
where
    F: Future + Unpin,
{
    match tokio::time::timeout(interval, fut).await {
        Ok(value) => Tick::Ready(value),
        Err(_) => Tick::Idle,
    }
}
