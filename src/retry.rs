//! Retry policy for establishing a broker session.
//!
//! A broker that is restarting, or not up yet when the process starts,
//! refuses connections for a while. [`retry_with_backoff`] re-runs the
//! connect→authenticate→channel-open sequence until it succeeds, a
//! non-transient error occurs, or the budget runs out.
//!
//! # Retry Strategy
//!
//! - Only [`RpcError::is_transient`] errors are retried
//! - Exponential backoff with ±25% jitter so restarting fleets do not reconnect in lockstep
//! - Delay capped at `max_delay`
//! - Exhaustion surfaces as [`RpcError::Connect`], carrying the attempt count and last failure

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use tokio::time::sleep;

use crate::{log_debug, log_warn, Result, RpcError};

/// Retry configuration with exponential backoff.
///
/// # Example
///
/// ```
/// use broker_rpc::RetryConfig;
/// use std::time::Duration;
///
/// let retry = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just the initial attempt).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    pub multiplier: f32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// - `max_attempts`: 3
    /// - `multiplier`: 2.0
    /// - `initial_delay`: 100ms
    /// - `max_delay`: 5s
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Run `operation`, retrying transient failures with exponential backoff.
///
/// With `retry_config` set to `None` the operation runs exactly once and its
/// error is returned untouched. Non-transient errors are returned untouched
/// as soon as they occur. When retries are configured and every attempt
/// fails transiently, the result is [`RpcError::Connect`].
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: Option<&RetryConfig>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(retry_config) = retry_config else {
        return operation().await;
    };

    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if err.is_transient() => {
                attempt += 1;

                if attempt > retry_config.max_attempts {
                    log_warn!("giving up after {attempt} attempt(s): {err}");
                    return Err(RpcError::Connect {
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }

                let jittered_delay = apply_jitter(current_delay);

                log_debug!(
                    "attempt {attempt}/{} failed ({err}), retrying in {jittered_delay:?}",
                    retry_config.max_attempts + 1,
                );

                sleep(jittered_delay).await;

                let next_delay = Duration::from_secs_f64(
                    current_delay.as_secs_f64() * retry_config.multiplier as f64,
                );
                current_delay = next_delay.min(retry_config.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Scale `delay` by a random factor in `0.75..=1.25`.
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let hash = RandomState::new().hash_one(std::time::SystemTime::now());
    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::from_secs_f64(delay.as_secs_f64() * jitter_multiplier)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_no_retry_on_success() {
        // ---
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(Some(&RetryConfig::default()), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, RpcError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_none_config_executes_once_and_keeps_error_kind() {
        // ---
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(RpcError::Transport("refused".into())) }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        // ---
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(Some(&fast_retry(3)), || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(RpcError::Transport("broker restarting".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_connect_error() {
        // ---
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(Some(&fast_retry(2)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(RpcError::Transport("always down".into())) }
        })
        .await;

        match result {
            Err(RpcError::Connect { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, RpcError::Transport(_)));
            }
            other => panic!("expected Connect, got {other:?}"),
        }
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_rejection_is_not_retried() {
        // ---
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(Some(&fast_retry(5)), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(RpcError::Auth("ACCESS_REFUSED".into())) }
        })
        .await;

        assert!(matches!(result, Err(RpcError::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exponential_backoff_timing() {
        // ---
        let retry_config = RetryConfig {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
        };
        let start = Instant::now();

        let _ = retry_with_backoff(Some(&retry_config), || async {
            Err::<i32, _>(RpcError::Transport("down".into()))
        })
        .await;

        // 50 + 100 + 200 ms, each scaled by 0.75..1.25
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(260), "elapsed too short: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "elapsed too long: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_max_delay_cap() {
        // ---
        let retry_config = RetryConfig {
            max_attempts: 5,
            multiplier: 10.0,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        };
        let start = Instant::now();

        let _ = retry_with_backoff(Some(&retry_config), || async {
            Err::<i32, _>(RpcError::Transport("down".into()))
        })
        .await;

        // five delays of at most 62.5ms each
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(450), "cap not applied: {elapsed:?}");
    }

    #[test]
    fn test_jitter_range() {
        // ---
        let delay = Duration::from_millis(100);

        for _ in 0..100 {
            let jittered = apply_jitter(delay);
            assert!(jittered >= Duration::from_millis(75), "too low: {jittered:?}");
            assert!(jittered <= Duration::from_millis(125), "too high: {jittered:?}");
        }
    }
}
