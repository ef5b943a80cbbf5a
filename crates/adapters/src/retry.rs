//! Bounded exponential backoff around a single query
//!
//! Every failure is retried the same way: no jitter, no error
//! classification. After the last attempt the final error is returned
//! exactly as the query produced it.

use backon::{Backoff, BackoffBuilder, ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry budget for [`query_with_retry`]
///
/// - Attempts: `retries` (at least one)
/// - Delay before attempt k+1: `min(base_delay_ms * 2^(k-1), max_delay_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            base_delay_ms: 200,
            max_delay_ms: 1000,
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            retries,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Budget used by relational reads
    pub fn for_reads() -> Self {
        Self {
            base_delay_ms: 150,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    /// Delays in whole milliseconds; the builder scales with an `f32` factor
    pub fn backoff(&self) -> impl Backoff {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_factor(2.0)
            .with_max_times(self.attempts() as usize - 1)
            .build()
            .map(whole_millis)
    }

    /// The sleeps between attempts, in order
    pub fn delays(&self) -> Vec<Duration> {
        self.backoff().collect()
    }
}

fn whole_millis(delay: Duration) -> Duration {
    Duration::from_millis((delay.as_secs_f64() * 1000.0).round() as u64)
}

/// Run `query` until it succeeds or the policy's attempts are used up.
///
/// Backoff sleeps go through `tokio::time::sleep`, so other tasks keep
/// running while this one waits.
pub async fn query_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    query: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut remaining = policy.attempts() - 1;
    query
        .retry(policy.backoff())
        .sleep(tokio::time::sleep)
        .notify(|err: &E, delay: Duration| {
            remaining = remaining.saturating_sub(1);
            warn!(
                operation,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                retries_left = remaining,
                "Query failed, retrying"
            );
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, PartialEq)]
    struct ReplicaLag(u32);

    impl Display for ReplicaLag {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "replica lag on attempt {}", self.0)
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 5);
        assert_eq!(policy.base_delay_ms, 200);
        assert_eq!(policy.max_delay_ms, 1000);
        assert_eq!(RetryPolicy::for_reads().base_delay_ms, 150);
    }

    #[test]
    fn test_delays_double_then_cap() {
        let delays = RetryPolicy::default().delays();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn test_delays_are_whole_milliseconds() {
        let policy = RetryPolicy::new(8, 150, 5000);
        let delays = policy.delays();
        assert_eq!(delays.len(), 7);
        assert_eq!(delays[0], Duration::from_millis(150));
        assert_eq!(delays[4], Duration::from_millis(2400));
        assert_eq!(delays[6], Duration::from_millis(5000));
        assert!(delays.iter().all(|d| d.subsec_nanos() % 1_000_000 == 0));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let policy = RetryPolicy::new(0, 200, 1000);
        assert_eq!(policy.attempts(), 1);
        assert!(policy.delays().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error_unchanged() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, 200, 1000);
        let start = tokio::time::Instant::now();

        let counter = calls.clone();
        let result: Result<(), ReplicaLag> = query_with_retry(&policy, "read", || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Err(ReplicaLag(attempt))
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err(), ReplicaLag(3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();

        let counter = calls.clone();
        let result: Result<&str, ReplicaLag> = query_with_retry(&policy, "read", || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(ReplicaLag(attempt))
                } else {
                    Ok("rows")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "rows");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_does_not_block_other_tasks() {
        let ticks = Arc::new(AtomicU32::new(0));
        let ticker = {
            let ticks = ticks.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        let policy = RetryPolicy::new(2, 300, 1000);
        let _: Result<(), ReplicaLag> =
            query_with_retry(&policy, "read", || async { Err(ReplicaLag(0)) }).await;

        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        ticker.await.unwrap();
    }
}
