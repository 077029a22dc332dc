//! Bounded retry with exponential backoff, jitter and `Retry-After` support.

use super::classify::{classify, retry_after, Classification, FailureInfo};
use super::events::{BulkProgress, RetryAttempt, RetryEvent, RetryObserver};
use futures::future::join_all;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Upper bound of the random jitter, as a fraction of the computed delay.
const JITTER_RATIO: f64 = 0.1;

/// Configuration for one retry loop.
#[derive(Clone)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    observers: Vec<Arc<dyn RetryObserver>>,
}

impl RetryOptions {
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            observers: Vec::new(),
        }
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Forward every retry as a [`RetryEvent`] on `tx`.
    pub fn with_events(self, tx: UnboundedSender<RetryEvent>) -> Self {
        self.with_observer(Arc::new(tx))
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// `min(base * 2^(attempt-1), max)`, without jitter. `attempt` is 1-based.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the attempt following a failed `attempt`.
    ///
    /// A 429 with a usable `Retry-After` wins over computed backoff and is used
    /// as-is (no jitter, no cap).
    pub fn next_delay(&self, attempt: u32, failure: &dyn FailureInfo) -> Duration {
        if let Some(hint) = retry_after(failure) {
            return hint;
        }
        let delay = self.backoff_delay(attempt);
        if self.jitter {
            with_jitter(delay)
        } else {
            delay
        }
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Adds a uniformly random amount in `[0, 10%]` of `delay`.
pub(crate) fn with_jitter(delay: Duration) -> Duration {
    let ceiling_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
    let extra = rand::thread_rng().gen_range(0..=ceiling_ms);
    delay + Duration::from_millis(extra)
}

/// Outcome of a retry loop.
#[derive(Debug)]
pub struct RetryResult<T, E> {
    /// The value, or the last failure exactly as the operation produced it.
    pub outcome: Result<T, E>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// Sum of all sleeps performed between attempts.
    pub total_delay: Duration,
}

impl<T, E> RetryResult<T, E> {
    pub fn success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn result(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&E> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.outcome
    }
}

/// Runs async operations with bounded retries.
///
/// Holds no state between calls; every `retry` is self-contained.
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    options: RetryOptions,
}

impl RetryManager {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Invoke `operation` until it succeeds, fails terminally, or the budget of
    /// `max_retries + 1` attempts is spent.
    pub async fn retry<T, E, F, Fut>(&self, mut operation: F) -> RetryResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureInfo,
    {
        let opts = &self.options;
        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;

        loop {
            attempts += 1;
            let failure = match operation().await {
                Ok(value) => {
                    return RetryResult {
                        outcome: Ok(value),
                        attempts,
                        total_delay,
                    }
                }
                Err(e) => e,
            };

            if attempts > opts.max_retries {
                warn!(attempts, status = ?failure.status(), "retry budget exhausted");
                return RetryResult {
                    outcome: Err(failure),
                    attempts,
                    total_delay,
                };
            }

            let reason = match classify(&failure) {
                Classification::Retryable(reason) => reason,
                Classification::Terminal => {
                    debug!(attempts, status = ?failure.status(), "terminal failure, not retrying");
                    return RetryResult {
                        outcome: Err(failure),
                        attempts,
                        total_delay,
                    };
                }
            };

            let delay = opts.next_delay(attempts, &failure);
            debug!(
                attempt = attempts,
                ?reason,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );
            let event = RetryAttempt {
                attempt: attempts,
                reason,
                delay,
                failure: &failure,
            };
            for observer in &opts.observers {
                observer.on_retry(&event);
            }
            drop(failure);

            tokio::time::sleep(delay).await;
            total_delay = total_delay.saturating_add(delay);
        }
    }

    /// Run `operations` in sequential batches of `concurrency`.
    ///
    /// Operations inside a batch are polled together on the calling task; the
    /// next batch starts only after every operation of the current one settled.
    /// Results come back in submission order. One [`BulkProgress`] is sent per
    /// settled operation.
    pub async fn retry_bulk<T, E, F, Fut>(
        &self,
        operations: Vec<F>,
        concurrency: usize,
        progress: Option<&UnboundedSender<BulkProgress>>,
    ) -> Vec<RetryResult<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureInfo,
    {
        self.retry_bulk_paced(operations, concurrency, Duration::ZERO, progress)
            .await
    }

    /// Like [`retry_bulk`](Self::retry_bulk), sleeping `pause` between batches.
    ///
    /// The pause is pacing, not retry backoff, so it is not counted in any
    /// result's `total_delay`.
    pub async fn retry_bulk_paced<T, E, F, Fut>(
        &self,
        operations: Vec<F>,
        concurrency: usize,
        pause: Duration,
        progress: Option<&UnboundedSender<BulkProgress>>,
    ) -> Vec<RetryResult<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureInfo,
    {
        let total = operations.len();
        let batch_size = concurrency.max(1);
        let completed = AtomicUsize::new(0);
        let mut results = Vec::with_capacity(total);
        let mut pending = operations.into_iter().enumerate();

        loop {
            let batch: Vec<_> = pending.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            if !results.is_empty() && !pause.is_zero() {
                debug!(pause_ms = pause.as_millis() as u64, "pacing before next batch");
                tokio::time::sleep(pause).await;
            }
            debug!(batch_len = batch.len(), total, "starting batch");

            let running = batch.into_iter().map(|(index, op)| {
                let completed = &completed;
                async move {
                    let result = self.retry(op).await;
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(tx) = progress {
                        let _ = tx.send(BulkProgress {
                            completed: done,
                            total,
                            index,
                            succeeded: result.success(),
                            attempts: result.attempts,
                        });
                    }
                    result
                }
            });
            results.extend(join_all(running).await);
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::mpsc;

    fn no_jitter() -> RetryOptions {
        RetryOptions::new().with_jitter(false)
    }

    #[test]
    fn test_defaults() {
        let opts = RetryOptions::default();
        assert_eq!(opts.max_retries, 5);
        assert_eq!(opts.base_delay, Duration::from_millis(1000));
        assert_eq!(opts.max_delay, Duration::from_millis(30000));
        assert!(opts.jitter);
        assert_eq!(opts.observer_count(), 0);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let opts = no_jitter();
        let delays: Vec<u64> = (1..=7)
            .map(|k| opts.backoff_delay(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let opts = no_jitter();
        assert_eq!(opts.backoff_delay(200), Duration::from_millis(30000));
        assert_eq!(opts.backoff_delay(0), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_within_ten_percent() {
        let opts = RetryOptions::new();
        let failure = GatewayError::service(503, "ServiceUnavailable", "busy");
        for attempt in 1..=5 {
            let base = opts.backoff_delay(attempt);
            for _ in 0..50 {
                let d = opts.next_delay(attempt, &failure);
                assert!(d >= base, "{:?} below {:?}", d, base);
                assert!(
                    d.as_millis() <= base.as_millis() + base.as_millis() / 10,
                    "{:?} above 110% of {:?}",
                    d,
                    base
                );
            }
        }
    }

    #[test]
    fn test_retry_after_beats_backoff_and_skips_jitter() {
        let opts = RetryOptions::new().with_max_delay(Duration::from_secs(1));
        let failure = GatewayError::service(429, "TooManyRequestsException", "slow down")
            .with_header("Retry-After", "12");
        assert_eq!(opts.next_delay(1, &failure), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let manager = RetryManager::default();
        let result = manager
            .retry(|| async { Ok::<_, GatewayError>("ok") })
            .await;
        assert!(result.success());
        assert_eq!(result.result(), Some(&"ok"));
        assert_eq!(result.attempts, 1);
        assert_eq!(result.total_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_server_errors_then_success() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = RetryManager::new(no_jitter().with_events(tx));
        let calls = AtomicU32::new(0);

        let result = manager
            .retry(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(GatewayError::service(500, "InternalFailure", "boom"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(result.success());
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.total_delay, Duration::from_millis(3000));

        let mut delays = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            delays.push(ev.delay.as_millis() as u64);
        }
        assert_eq!(delays, vec![1000, 2000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_stops_after_one_attempt() {
        let manager = RetryManager::new(no_jitter().with_max_retries(9));
        let calls = AtomicU32::new(0);

        let result = manager
            .retry(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(GatewayError::service(400, "BadRequestException", "bad name")) }
            })
            .await;

        assert!(!result.success());
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let err = result.error().unwrap();
        assert_eq!(err.status, Some(400));
        assert_eq!(err.code, "BadRequestException");
        assert_eq!(err.message, "bad name");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_uses_full_budget() {
        let manager = RetryManager::new(no_jitter().with_max_retries(3));
        let result = manager
            .retry(|| async { Err::<(), _>(GatewayError::network("connection reset")) })
            .await;
        assert!(!result.success());
        assert_eq!(result.attempts, 4);
        // 1000 + 2000 + 4000
        assert_eq!(result.total_delay, Duration::from_millis(7000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let manager = RetryManager::new(no_jitter().with_max_retries(0));
        let result = manager
            .retry(|| async { Err::<(), _>(GatewayError::service(503, "ServiceUnavailable", "")) })
            .await;
        assert_eq!(result.attempts, 1);
        assert_eq!(result.total_delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_results_keep_submission_order() {
        let manager = RetryManager::new(no_jitter());
        let ops: Vec<_> = (0..4u64)
            .map(|i| {
                move || async move {
                    // Later submissions finish first.
                    tokio::time::sleep(Duration::from_millis(100 * (4 - i))).await;
                    Ok::<_, GatewayError>(i)
                }
            })
            .collect();

        let results = manager.retry_bulk(ops, 4, None).await;
        let values: Vec<u64> = results.iter().map(|r| *r.result().unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }
}
