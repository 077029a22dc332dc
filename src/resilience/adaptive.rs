//! Adaptive rate limiting keyed by account, region and operation kind.
//!
//! The limiter learns from 429 responses: whenever a retried call is rate limited
//! with a suggested wait, that wait (plus a safety buffer) is remembered for the
//! key and used as the base delay of later retry loops on the same key. Learned
//! delays relax linearly once the key has been quiet for a minute, but never
//! below half the configured base.

use super::classify::{suggested_wait, FailureInfo, RetryReason, RATE_LIMIT_HEADERS};
use super::events::{RetryAttempt, RetryObserver};
use super::retry::RetryOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// A rate-limit event younger than this keeps the learned delay in force.
const RECENT_WINDOW: Duration = Duration::from_millis(60_000);
/// Time over which the delay relaxes toward the recovery floor.
const RECOVERY_HORIZON_MS: f64 = 300_000.0;
/// Reduction cap; the delay never relaxes below half the base.
const MAX_REDUCTION: f64 = 0.5;

const DELETE_MAX_RETRIES: u32 = 10;
const DELETE_MAX_DELAY: Duration = Duration::from_millis(120_000);
const DEFAULT_OPERATION_DELAY: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Delete,
    List,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Delete => "delete",
            OperationKind::List => "list",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "delete" => Ok(OperationKind::Delete),
            "list" => Ok(OperationKind::List),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}

/// Scope of learned throttling behavior, rendered as `account:region:kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub account_id: String,
    pub region: String,
    pub kind: OperationKind,
}

impl RateLimitKey {
    pub fn new(account_id: impl Into<String>, region: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            account_id: account_id.into(),
            region: region.into(),
            kind,
        }
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.account_id, self.region, self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub last_rate_limit: Instant,
    pub suggested_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimitStats {
    /// Number of keys with a recorded rate-limit event.
    pub total_rate_limits: usize,
    /// Mean suggested delay across those keys.
    pub average_delay: Duration,
}

/// Caller-supplied values that take precedence over the limiter's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub base_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
}

/// Learned rate-limit state for one CLI run.
///
/// Construct one per process (or per test) and share it with `Arc`. Call
/// [`reset_history`](Self::reset_history) at the start of each bulk command so
/// an earlier run does not bias an unrelated one.
#[derive(Debug, Default)]
pub struct AdaptiveRateLimiter {
    history: Mutex<HashMap<RateLimitKey, HistoryEntry>>,
}

impl AdaptiveRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Conservative retry options for deleting APIs in `account`/`region`.
    ///
    /// Defaults to 10 retries capped at 120s, with an adaptive base delay and a
    /// recorder that learns from 429 responses.
    pub fn delete_retry_options(
        self: &Arc<Self>,
        account_id: &str,
        region: &str,
        overrides: RetryOverrides,
    ) -> RetryOptions {
        let key = RateLimitKey::new(account_id, region, OperationKind::Delete);
        let base = overrides
            .base_delay
            .unwrap_or_else(|| Self::operation_delay(OperationKind::Delete));
        let base_delay = self.calculate_adaptive_delay(&key, base);

        RetryOptions::new()
            .with_max_retries(overrides.max_retries.unwrap_or(DELETE_MAX_RETRIES))
            .with_base_delay(base_delay)
            .with_max_delay(overrides.max_delay.unwrap_or(DELETE_MAX_DELAY))
            .with_jitter(true)
            .with_observer(Arc::new(RateLimitRecorder {
                limiter: Arc::clone(self),
                key,
            }))
    }

    /// Adaptive retry options for any operation kind.
    ///
    /// Delete delegates to [`delete_retry_options`](Self::delete_retry_options);
    /// create and list keep the general [`RetryOptions`] defaults unless overridden.
    pub fn retry_options(
        self: &Arc<Self>,
        kind: OperationKind,
        account_id: &str,
        region: &str,
        overrides: RetryOverrides,
    ) -> RetryOptions {
        if kind == OperationKind::Delete {
            return self.delete_retry_options(account_id, region, overrides);
        }
        let key = RateLimitKey::new(account_id, region, kind);
        let defaults = RetryOptions::new();
        let base = overrides.base_delay.unwrap_or(defaults.base_delay);
        let base_delay = self.calculate_adaptive_delay(&key, base);

        RetryOptions::new()
            .with_max_retries(overrides.max_retries.unwrap_or(defaults.max_retries))
            .with_base_delay(base_delay)
            .with_max_delay(overrides.max_delay.unwrap_or(defaults.max_delay))
            .with_observer(Arc::new(RateLimitRecorder {
                limiter: Arc::clone(self),
                key,
            }))
    }

    pub fn calculate_adaptive_delay(&self, key: &RateLimitKey, base_delay: Duration) -> Duration {
        self.calculate_adaptive_delay_at(key, base_delay, Instant::now())
    }

    /// Adaptive base delay for `key` as seen at `now`.
    pub fn calculate_adaptive_delay_at(
        &self,
        key: &RateLimitKey,
        base_delay: Duration,
        now: Instant,
    ) -> Duration {
        let Some(entry) = self.entry(key) else {
            return base_delay;
        };

        let elapsed = now.saturating_duration_since(entry.last_rate_limit);
        if elapsed < RECENT_WINDOW {
            return entry.suggested_delay.max(base_delay);
        }

        let reduction = (elapsed.as_millis() as f64 / RECOVERY_HORIZON_MS).min(MAX_REDUCTION);
        let relaxed_ns = (base_delay.as_nanos() as f64 * (1.0 - reduction)).round() as u64;
        Duration::from_nanos(relaxed_ns).max(base_delay / 2)
    }

    /// Fixed pacing between successive operations of one kind (not a retry delay).
    pub fn operation_delay(kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Delete => Duration::from_millis(2_000),
            OperationKind::Create => Duration::from_millis(1_000),
            OperationKind::List => Duration::from_millis(500),
        }
    }

    /// Pacing for an operation named by string; unknown names get 1s.
    pub fn operation_delay_named(kind: &str) -> Duration {
        kind.parse::<OperationKind>()
            .map(Self::operation_delay)
            .unwrap_or(DEFAULT_OPERATION_DELAY)
    }

    pub fn record_rate_limit(&self, key: RateLimitKey, suggested_delay: Duration) {
        self.record_rate_limit_at(key, suggested_delay, Instant::now());
    }

    /// Overwrites any earlier entry for `key`; concurrent writers race and the last one wins.
    pub fn record_rate_limit_at(&self, key: RateLimitKey, suggested_delay: Duration, at: Instant) {
        if let Ok(mut history) = self.history.lock() {
            debug!(%key, delay_ms = suggested_delay.as_millis() as u64, "recorded rate limit");
            history.insert(
                key,
                HistoryEntry {
                    last_rate_limit: at,
                    suggested_delay,
                },
            );
        }
    }

    pub fn entry(&self, key: &RateLimitKey) -> Option<HistoryEntry> {
        self.history.lock().ok().and_then(|h| h.get(key).copied())
    }

    pub fn reset_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    pub fn stats(&self) -> RateLimitStats {
        let Ok(history) = self.history.lock() else {
            return RateLimitStats::default();
        };
        let total = history.len();
        if total == 0 {
            return RateLimitStats::default();
        }
        let sum = history
            .values()
            .fold(Duration::ZERO, |acc, e| acc.saturating_add(e.suggested_delay));
        RateLimitStats {
            total_rate_limits: total,
            average_delay: sum / total as u32,
        }
    }
}

/// Feeds 429 waits back into the limiter with a 20% safety buffer.
struct RateLimitRecorder {
    limiter: Arc<AdaptiveRateLimiter>,
    key: RateLimitKey,
}

impl RateLimitRecorder {
    fn buffered_wait(failure: &dyn FailureInfo) -> Option<Duration> {
        suggested_wait(failure, RATE_LIMIT_HEADERS)
            .map(|wait| wait.checked_mul(6).map_or(Duration::MAX, |w| w / 5))
    }
}

impl RetryObserver for RateLimitRecorder {
    fn on_retry(&self, attempt: &RetryAttempt<'_>) {
        if attempt.reason != RetryReason::RateLimited {
            return;
        }
        if let Some(delay) = Self::buffered_wait(attempt.failure) {
            self.limiter.record_rate_limit(self.key.clone(), delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;

    fn key() -> RateLimitKey {
        RateLimitKey::new("123456789012", "us-east-1", OperationKind::Delete)
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key().to_string(), "123456789012:us-east-1:delete");
    }

    #[test]
    fn test_operation_kind_parse() {
        assert_eq!("Delete".parse::<OperationKind>(), Ok(OperationKind::Delete));
        assert!("update".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_operation_delays() {
        assert_eq!(AdaptiveRateLimiter::operation_delay(OperationKind::Delete), Duration::from_millis(2000));
        assert_eq!(AdaptiveRateLimiter::operation_delay(OperationKind::Create), Duration::from_millis(1000));
        assert_eq!(AdaptiveRateLimiter::operation_delay(OperationKind::List), Duration::from_millis(500));
        assert_eq!(AdaptiveRateLimiter::operation_delay_named("import"), Duration::from_millis(1000));
    }

    #[test]
    fn test_no_history_returns_base() {
        let limiter = AdaptiveRateLimiter::new();
        let base = Duration::from_millis(2000);
        assert_eq!(limiter.calculate_adaptive_delay(&key(), base), base);
    }

    #[test]
    fn test_recent_event_never_goes_below_base() {
        let limiter = AdaptiveRateLimiter::new();
        let t = Instant::now();
        limiter.record_rate_limit_at(key(), Duration::from_millis(500), t);
        let base = Duration::from_millis(2000);
        let d = limiter.calculate_adaptive_delay_at(&key(), base, t + Duration::from_secs(10));
        assert_eq!(d, base);
    }

    #[test]
    fn test_gradual_recovery_is_linear_until_floor() {
        let limiter = AdaptiveRateLimiter::new();
        let t = Instant::now();
        limiter.record_rate_limit_at(key(), Duration::from_millis(6000), t);
        let base = Duration::from_millis(2000);

        // 90s quiet: 30% reduction.
        let d = limiter.calculate_adaptive_delay_at(&key(), base, t + Duration::from_secs(90));
        assert_eq!(d.as_millis(), 1400);

        // 150s quiet: 50% reduction hits the floor.
        let d = limiter.calculate_adaptive_delay_at(&key(), base, t + Duration::from_secs(150));
        assert_eq!(d.as_millis(), 1000);
    }

    #[test]
    fn test_recorder_ignores_non_429() {
        let limiter = Arc::new(AdaptiveRateLimiter::new());
        let recorder = RateLimitRecorder {
            limiter: Arc::clone(&limiter),
            key: key(),
        };
        let failure = GatewayError::service(503, "ServiceUnavailable", "").with_header("retry-after", "5");
        recorder.on_retry(&RetryAttempt {
            attempt: 1,
            reason: RetryReason::ServerError(503),
            delay: Duration::from_secs(1),
            failure: &failure,
        });
        assert_eq!(limiter.stats().total_rate_limits, 0);
    }

    #[test]
    fn test_recorder_applies_safety_buffer() {
        let limiter = Arc::new(AdaptiveRateLimiter::new());
        let recorder = RateLimitRecorder {
            limiter: Arc::clone(&limiter),
            key: key(),
        };
        let failure = GatewayError::service(429, "TooManyRequestsException", "")
            .with_header("x-amzn-ratelimit-retry-after", "5");
        recorder.on_retry(&RetryAttempt {
            attempt: 2,
            reason: RetryReason::RateLimited,
            delay: Duration::from_secs(5),
            failure: &failure,
        });
        let entry = limiter.entry(&key()).unwrap();
        assert_eq!(entry.suggested_delay, Duration::from_millis(6000));
    }

    #[test]
    fn test_odd_base_floor_is_exact_half() {
        let limiter = AdaptiveRateLimiter::new();
        let t = Instant::now();
        limiter.record_rate_limit_at(key(), Duration::from_millis(6000), t);
        let base = Duration::from_millis(1001);
        let d = limiter.calculate_adaptive_delay_at(&key(), base, t + Duration::from_secs(600));
        assert_eq!(d, Duration::from_micros(500_500));
    }

    #[test]
    fn test_recorder_survives_huge_wait_header() {
        let limiter = Arc::new(AdaptiveRateLimiter::new());
        let recorder = RateLimitRecorder {
            limiter: Arc::clone(&limiter),
            key: key(),
        };
        let failure = GatewayError::service(429, "TooManyRequestsException", "")
            .with_header("x-amzn-ratelimit-retry-after", "4000000000000000000");
        recorder.on_retry(&RetryAttempt {
            attempt: 1,
            reason: RetryReason::RateLimited,
            delay: Duration::from_secs(2),
            failure: &failure,
        });
        assert_eq!(limiter.entry(&key()).unwrap().suggested_delay, Duration::MAX);

        limiter.record_rate_limit(
            RateLimitKey::new("123456789012", "eu-west-1", OperationKind::Delete),
            Duration::MAX,
        );
        assert_eq!(limiter.stats().total_rate_limits, 2);
    }

    #[test]
    fn test_stats_average() {
        let limiter = AdaptiveRateLimiter::new();
        limiter.record_rate_limit(key(), Duration::from_millis(1200));
        limiter.record_rate_limit(
            RateLimitKey::new("123456789012", "eu-west-1", OperationKind::Delete),
            Duration::from_millis(3600),
        );
        // Same key again overwrites rather than adding.
        limiter.record_rate_limit(key(), Duration::from_millis(2400));
        let stats = limiter.stats();
        assert_eq!(stats.total_rate_limits, 2);
        assert_eq!(stats.average_delay, Duration::from_millis(3000));
    }

    #[test]
    fn test_delete_options_defaults_and_overrides() {
        let limiter = Arc::new(AdaptiveRateLimiter::new());
        let opts = limiter.delete_retry_options("123456789012", "us-east-1", RetryOverrides::default());
        assert_eq!(opts.max_retries, 10);
        assert_eq!(opts.max_delay, Duration::from_millis(120_000));
        assert_eq!(opts.base_delay, Duration::from_millis(2000));
        assert!(opts.jitter);
        assert_eq!(opts.observer_count(), 1);

        let opts = limiter.delete_retry_options(
            "123456789012",
            "us-east-1",
            RetryOverrides {
                max_retries: Some(3),
                base_delay: Some(Duration::from_millis(250)),
                max_delay: Some(Duration::from_secs(5)),
            },
        );
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.base_delay, Duration::from_millis(250));
        assert_eq!(opts.max_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_create_options_follow_general_defaults() {
        let limiter = Arc::new(AdaptiveRateLimiter::new());
        let opts = limiter.retry_options(OperationKind::Create, "123456789012", "us-east-1", RetryOverrides::default());
        assert_eq!(opts.max_retries, 5);
        assert_eq!(opts.base_delay, Duration::from_millis(1000));
        assert_eq!(opts.max_delay, Duration::from_millis(30000));
    }
}
