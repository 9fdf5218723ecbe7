//! Rate-limited transport for remote catalog calls
//!
//! Every remote call made by the engine goes through `RateLimitedTransport::execute`.
//!
//! **Algorithm:**
//! 1. Wait out any shared back-off window set by a throttled call
//! 2. Wait for the steady-state quota (when configured)
//! 3. Attempt the operation
//! 4. On a retryable error, if attempts remain:
//!    - Throttled: wait `max(retry_after, backoff)`, with the server hint
//!      capped at `MAX_RETRY_AFTER`; the window is shared by every clone of
//!      the transport so one throttled worker holds all of them
//!    - Unavailable / Protocol: wait `backoff` (this caller only)
//! 5. Otherwise surface the error to the caller
//!
//! **Backoff Strategy:**
//! - Initial delay: `base`
//! - Multiplier: 2.0 (exponential), capped at `cap`
//! - At most `max_attempts` attempts per logical operation

use crate::config::RemoteConfig;
use crate::error::TransportError;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Longest server-requested wait honoured before a retry
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Retry schedule for one logical operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            base: config.backoff_base(),
            cap: config.backoff_cap(),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Delay after the `failed_attempt`-th failure (1-based)
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.cap)
            .min(self.cap)
    }
}

struct TransportInner {
    policy: BackoffPolicy,
    /// No attempt starts before this instant
    backoff_until: Mutex<Option<Instant>>,
    quota: Option<DefaultDirectRateLimiter>,
    remote_calls: AtomicU64,
    throttled_responses: AtomicU64,
}

/// Shared retry/back-off wrapper; clones share back-off state and counters
#[derive(Clone)]
pub struct RateLimitedTransport {
    inner: Arc<TransportInner>,
}

impl RateLimitedTransport {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self::build(policy, None)
    }

    /// Transport that additionally holds requests to `per_second`
    pub fn with_quota(policy: BackoffPolicy, per_second: NonZeroU32) -> Self {
        Self::build(policy, Some(RateLimiter::direct(Quota::per_second(per_second))))
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        let policy = BackoffPolicy::from_config(config);
        match config.requests_per_second.and_then(NonZeroU32::new) {
            Some(per_second) => Self::with_quota(policy, per_second),
            None => Self::new(policy),
        }
    }

    fn build(policy: BackoffPolicy, quota: Option<DefaultDirectRateLimiter>) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                policy,
                backoff_until: Mutex::new(None),
                quota,
                remote_calls: AtomicU64::new(0),
                throttled_responses: AtomicU64::new(0),
            }),
        }
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.inner.policy
    }

    /// Attempts issued so far, across all clones
    pub fn remote_calls(&self) -> u64 {
        self.inner.remote_calls.load(Ordering::Relaxed)
    }

    /// Throttled responses seen so far, across all clones
    pub fn throttled_responses(&self) -> u64 {
        self.inner.throttled_responses.load(Ordering::Relaxed)
    }

    /// Run `operation` under the retry policy
    ///
    /// # Arguments
    /// * `operation_name` - Name for logging (e.g., "list catalog page", "upload")
    /// * `operation` - Closure producing one attempt
    ///
    /// # Returns
    /// The first successful result, or the last error once attempts are
    /// exhausted or a non-retryable error occurs
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut operation: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let policy = self.inner.policy;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            self.wait_for_shared_backoff().await;
            if let Some(quota) = &self.inner.quota {
                quota.until_ready().await;
            }

            if attempt > 1 {
                tracing::debug!(operation = operation_name, attempt, "Retrying remote call");
            }

            self.inner.remote_calls.fetch_add(1, Ordering::Relaxed);

            let err = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::debug!(operation = operation_name, attempt, "Remote call succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err) => err,
            };

            if let TransportError::Throttled { .. } = err {
                self.inner.throttled_responses.fetch_add(1, Ordering::Relaxed);
            }

            if !err.is_retryable() {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %err,
                    "Remote call rejected, not retrying"
                );
                return Err(err);
            }

            if attempt >= policy.max_attempts {
                tracing::error!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    code = err.code(),
                    error = %err,
                    "Remote call failed: retry attempts exhausted"
                );
                return Err(err);
            }

            let backoff = policy.delay_for(attempt);
            let wait = err
                .retry_after()
                .map_or(backoff, |hint| hint.min(MAX_RETRY_AFTER).max(backoff));

            match &err {
                TransportError::Throttled { retry_after } => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
                        backoff_ms = wait.as_millis() as u64,
                        "Throttled by remote catalog, backing off all workers"
                    );
                    self.extend_shared_backoff(wait).await;
                }
                TransportError::Protocol(detail) => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        detail = %detail,
                        "Malformed response from remote catalog, will retry after backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
                _ => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        error = %err,
                        "Remote catalog unavailable, will retry after backoff"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    async fn wait_for_shared_backoff(&self) {
        loop {
            let until = *self.inner.backoff_until.lock().await;
            match until {
                Some(deadline) if deadline > Instant::now() => tokio::time::sleep_until(deadline).await,
                _ => return,
            }
        }
    }

    async fn extend_shared_backoff(&self, wait: Duration) {
        let Some(candidate) = Instant::now().checked_add(wait) else {
            return;
        };
        let mut until = self.inner.backoff_until.lock().await;
        if until.map_or(true, |current| candidate > current) {
            *until = Some(candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
            max_attempts: 3,
        }
    }

    #[test]
    fn test_delay_doubles_up_to_cap() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(8));
    }

    #[test]
    fn test_from_config() {
        let config = RemoteConfig::default();
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy, BackoffPolicy::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_first_attempt() {
        let transport = RateLimitedTransport::new(policy());

        let result = transport.execute("test_op", || async { Ok::<_, TransportError>(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(transport.remote_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_unavailable() {
        let transport = RateLimitedTransport::new(policy());
        let attempts = AtomicU32::new(0);

        let result = transport
            .execute("test_op", || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TransportError::Unavailable("connection reset".to_string()))
                    } else {
                        Ok("listed")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "listed");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_is_not_retried() {
        let transport = RateLimitedTransport::new(policy());
        let attempts = AtomicU32::new(0);

        let result = transport
            .execute("test_op", || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::Rejected("404 Not Found".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(TransportError::Rejected(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_three_times_gives_three_attempts_with_increasing_delay() {
        let transport = RateLimitedTransport::new(policy());
        let attempt_times = std::sync::Mutex::new(Vec::new());

        let result = transport
            .execute("test_op", || {
                attempt_times.lock().unwrap().push(Instant::now());
                async { Err::<(), _>(TransportError::Throttled { retry_after: None }) }
            })
            .await;

        assert_eq!(result, Err(TransportError::Throttled { retry_after: None }));

        let times = attempt_times.into_inner().unwrap();
        assert_eq!(times.len(), 3);

        let first_gap = times[1] - times[0];
        let second_gap = times[2] - times[1];
        assert!(first_gap >= Duration::from_secs(1));
        assert!(second_gap > first_gap);
        assert_eq!(transport.throttled_responses(), 3);
        assert_eq!(transport.remote_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_wins_when_longer() {
        let transport = RateLimitedTransport::new(policy());
        let attempt_times = std::sync::Mutex::new(Vec::new());

        let _ = transport
            .execute("test_op", || {
                let mut times = attempt_times.lock().unwrap();
                times.push(Instant::now());
                let first = times.len() == 1;
                async move {
                    if first {
                        Err(TransportError::Throttled { retry_after: Some(Duration::from_secs(20)) })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let times = attempt_times.into_inner().unwrap();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_retry_after_hint_is_capped() {
        let transport = RateLimitedTransport::new(policy());
        let attempt_times = std::sync::Mutex::new(Vec::new());

        let result = transport
            .execute("test_op", || {
                let mut times = attempt_times.lock().unwrap();
                times.push(Instant::now());
                let first = times.len() == 1;
                async move {
                    if first {
                        Err(TransportError::Throttled {
                            retry_after: Some(Duration::from_secs(u64::MAX / 2)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        let times = attempt_times.into_inner().unwrap();
        let waited = times[1] - times[0];
        assert!(waited >= MAX_RETRY_AFTER);
        assert!(waited < MAX_RETRY_AFTER + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_hint_shorter_than_schedule_is_ignored() {
        let transport = RateLimitedTransport::new(policy());
        let attempt_times = std::sync::Mutex::new(Vec::new());

        let _ = transport
            .execute("test_op", || {
                let mut times = attempt_times.lock().unwrap();
                times.push(Instant::now());
                let first = times.len() == 1;
                async move {
                    if first {
                        Err(TransportError::Throttled { retry_after: Some(Duration::from_millis(10)) })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        let times = attempt_times.into_inner().unwrap();
        assert!(times[1] - times[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_holds_other_workers() {
        let transport = RateLimitedTransport::new(policy());
        let throttled = Arc::new(tokio::sync::Notify::new());
        let start = Instant::now();

        let worker = {
            let transport = transport.clone();
            let throttled = throttled.clone();
            tokio::spawn(async move {
                let mut first = true;
                transport
                    .execute("throttled_op", move || {
                        let was_first = std::mem::replace(&mut first, false);
                        let throttled = throttled.clone();
                        async move {
                            if was_first {
                                throttled.notify_one();
                                Err(TransportError::Throttled { retry_after: Some(Duration::from_secs(10)) })
                            } else {
                                Ok(())
                            }
                        }
                    })
                    .await
            })
        };

        throttled.notified().await;
        // Let the worker record its back-off window
        tokio::task::yield_now().await;

        let called_at = transport
            .execute("other_op", || async { Ok::<_, TransportError>(Instant::now()) })
            .await
            .unwrap();

        assert!(called_at - start >= Duration::from_secs(10));
        worker.await.unwrap().unwrap();
    }
}
