//! Retry with exponential backoff
//!
//! Two flavours share one schedule type: database lock contention (retry
//! until a wall-clock budget is spent) and transient source failures (retry a
//! fixed number of times).

use nxt_common::Result;
use std::future::Future;
use std::time::{Duration, Instant};

/// Exponential backoff: `initial`, doubling, capped at `max`
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { next: initial, max }
    }

    /// Collector schedule: 500 ms doubling, capped at 8 s
    pub fn for_sources() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(8))
    }

    /// Database lock schedule: 10 ms doubling, capped at 1 s
    pub fn for_locks() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_millis(1000))
    }

    /// Delay to wait now; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = (self.next * 2).min(self.max);
        current
    }
}

/// Retry a database operation while SQLite reports lock contention, until
/// `max_wait_ms` has elapsed. Other errors return immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut backoff = Backoff::for_locks();
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_lock_contention() => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database still locked, giving up"
                    );
                    return Err(err);
                }

                let delay = backoff.next_delay();
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Database locked, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}
