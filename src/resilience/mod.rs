//! 弹性模块：重试、退避与自适应限流。
//!
//! # Resilience Module
//!
//! Every gateway call made by the workflows goes through this module.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`classify`] | Pure retryable / terminal classification of failures |
//! | [`retry`] | Bounded retry loop with exponential backoff, jitter and `Retry-After` |
//! | [`adaptive`] | Per account/region/operation learning from 429 responses |
//! | [`events`] | Observer trait and typed event records for retries and bulk progress |
//!
//! ## Retry
//!
//! ```rust
//! use apigw_fleet::resilience::{RetryManager, RetryOptions};
//! use apigw_fleet::gateway::GatewayError;
//! use std::time::Duration;
//!
//! # async fn run() {
//! let manager = RetryManager::new(
//!     RetryOptions::new()
//!         .with_max_retries(3)
//!         .with_base_delay(Duration::from_millis(200)),
//! );
//! let result = manager
//!     .retry(|| async { Ok::<_, GatewayError>("created") })
//!     .await;
//! assert!(result.success());
//! # }
//! ```
//!
//! ## Adaptive Rate Limiter
//!
//! The limiter is an explicit context object. Share it with `Arc` and reset it
//! once per bulk command:
//!
//! ```rust
//! use apigw_fleet::resilience::{AdaptiveRateLimiter, RetryOverrides};
//! use std::sync::Arc;
//!
//! let limiter = Arc::new(AdaptiveRateLimiter::new());
//! limiter.reset_history();
//! let opts = limiter.delete_retry_options("123456789012", "us-east-1", RetryOverrides::default());
//! assert_eq!(opts.max_retries, 10);
//! ```

pub mod adaptive;
pub mod classify;
pub mod events;
pub mod retry;

pub use adaptive::{
    AdaptiveRateLimiter, HistoryEntry, OperationKind, RateLimitKey, RateLimitStats,
    RetryOverrides,
};
pub use classify::{classify, Classification, FailureInfo, FailureKind, RetryReason};
pub use events::{BulkProgress, RetryAttempt, RetryEvent, RetryObserver};
pub use retry::{RetryManager, RetryOptions, RetryResult};
