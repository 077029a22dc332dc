//! # apigw-fleet
//!
//! 跨账号、跨区域批量管理 API Gateway REST API，并对每次调用进行自适应重试。
//!
//! Bulk create, list and delete API Gateway REST APIs across many AWS accounts
//! and regions, with every call wrapped in an adaptive retry layer.
//!
//! ## Overview
//!
//! Cross-account access is obtained by assuming one role per account. Each
//! gateway call runs inside a bounded retry loop that honors `Retry-After`,
//! falls back to exponential backoff with jitter, and feeds 429 responses into
//! an adaptive rate limiter keyed by account, region and operation kind.
//!
//! ## Key Features
//!
//! - **Retry**: [`resilience::RetryManager`] with backoff, jitter and `Retry-After`
//! - **Adaptive limiting**: [`resilience::AdaptiveRateLimiter`] learns from 429s
//! - **Classification**: pure retryable / terminal split via [`resilience::classify`]
//! - **Workflows**: [`workflow::Fleet`] distributes work over all targets
//! - **Events**: retries and bulk progress reported on typed channels
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apigw_fleet::config::FleetConfig;
//! use apigw_fleet::credentials::SimulatedCredentials;
//! use apigw_fleet::gateway::SimulatedGateway;
//! use apigw_fleet::resilience::AdaptiveRateLimiter;
//! use apigw_fleet::workflow::{ExecutionMode, Fleet};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> apigw_fleet::Result<()> {
//!     let config = FleetConfig::load(None)?;
//!     let fleet = Fleet::new(
//!         config,
//!         Arc::new(SimulatedGateway::new()),
//!         Arc::new(SimulatedCredentials::new()),
//!         Arc::new(AdaptiveRateLimiter::new()),
//!     );
//!
//!     let report = fleet.create_apis(10, ExecutionMode::Sequential).await?;
//!     println!("{} created, {} failed", report.succeeded, report.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Retry loop, failure classification, adaptive rate limiting |
//! | [`workflow`] | Bulk create / delete / list over all targets |
//! | [`gateway`] | API Gateway client seam and the in-process simulator |
//! | [`credentials`] | Role assumption seam |
//! | [`config`] | YAML fleet configuration |

pub mod config;
pub mod credentials;
pub mod gateway;
pub mod resilience;
pub mod workflow;

pub use config::{FleetConfig, Target};
pub use resilience::{AdaptiveRateLimiter, RetryManager, RetryOptions, RetryResult};
pub use workflow::{ExecutionMode, Fleet, WorkflowReport};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
