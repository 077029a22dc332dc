//! Bulk workflows over every configured account and region.
//!
//! A [`Fleet`] ties together the config, the gateway and credential
//! collaborators, and one [`AdaptiveRateLimiter`]. Each bulk command resets the
//! limiter's history before it starts, then runs every gateway call through a
//! [`RetryManager`](crate::resilience::RetryManager) and paces successive calls
//! with [`AdaptiveRateLimiter::operation_delay`].

mod create;
mod delete;
mod distribute;
mod list;

pub use delete::DeleteSelection;
pub use distribute::{distribute, Allocation};
pub use list::{ListOutcome, TargetListing};

use crate::config::{FleetConfig, Target};
use crate::credentials::{AssumedSession, CredentialProvider};
use crate::gateway::{ApiGateway, GatewayError};
use crate::resilience::{
    AdaptiveRateLimiter, BulkProgress, FailureInfo, OperationKind, RetryEvent, RetryOptions,
    RetryOverrides, RetryResult,
};
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One operation at a time, paced by the operation delay.
    #[default]
    Sequential,
    /// Batches of `concurrency` operations per target.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOperation {
    /// `label/region` of the target.
    pub target: String,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub kind: OperationKind,
    pub succeeded: usize,
    pub failed: Vec<FailedOperation>,
    /// Gateway invocations across all operations, retries included.
    pub attempts: u32,
    pub total_delay_ms: u64,
}

impl WorkflowReport {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            succeeded: 0,
            failed: Vec::new(),
            attempts: 0,
            total_delay_ms: 0,
        }
    }

    pub fn record<T>(&mut self, target: &Target, name: &str, result: &RetryResult<T, GatewayError>) {
        self.attempts = self.attempts.saturating_add(result.attempts);
        let delay_ms = u64::try_from(result.total_delay.as_millis()).unwrap_or(u64::MAX);
        self.total_delay_ms = self.total_delay_ms.saturating_add(delay_ms);
        match &result.outcome {
            Ok(_) => self.succeeded += 1,
            Err(e) => self.record_failure(target, name, e.to_string(), e.status()),
        }
    }

    pub fn record_failure(
        &mut self,
        target: &Target,
        name: &str,
        message: impl Into<String>,
        status: Option<u16>,
    ) {
        self.failed.push(FailedOperation {
            target: target.to_string(),
            name: name.to_string(),
            message: message.into(),
            status,
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Fleet {
    config: FleetConfig,
    gateway: Arc<dyn ApiGateway>,
    credentials: Arc<dyn CredentialProvider>,
    limiter: Arc<AdaptiveRateLimiter>,
    retry_events: Option<UnboundedSender<RetryEvent>>,
    progress: Option<UnboundedSender<BulkProgress>>,
    delete_overrides: RetryOverrides,
}

impl Fleet {
    pub fn new(
        config: FleetConfig,
        gateway: Arc<dyn ApiGateway>,
        credentials: Arc<dyn CredentialProvider>,
        limiter: Arc<AdaptiveRateLimiter>,
    ) -> Self {
        Self {
            config,
            gateway,
            credentials,
            limiter,
            retry_events: None,
            progress: None,
            delete_overrides: RetryOverrides::default(),
        }
    }

    /// Forward every retry of every operation to `tx`.
    pub fn with_retry_events(mut self, tx: UnboundedSender<RetryEvent>) -> Self {
        self.retry_events = Some(tx);
        self
    }

    /// Receive one record per settled operation in parallel mode.
    pub fn with_progress(mut self, tx: UnboundedSender<BulkProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_delete_overrides(mut self, overrides: RetryOverrides) -> Self {
        self.delete_overrides = overrides;
        self
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.limiter
    }

    /// Name of the `n`th API created for `target` (1-based).
    pub fn api_name(&self, target: &Target, n: usize) -> String {
        format!(
            "{}-{}-{}-{}",
            self.config.api_name_prefix,
            target.label(),
            target.region,
            n
        )
    }

    /// Delete uses the limiter's conservative defaults; create and list follow the config.
    fn retry_options(&self, kind: OperationKind, target: &Target) -> RetryOptions {
        let options = match kind {
            OperationKind::Delete => self.limiter.delete_retry_options(
                &target.account_id,
                &target.region,
                self.delete_overrides,
            ),
            _ => self
                .limiter
                .retry_options(
                    kind,
                    &target.account_id,
                    &target.region,
                    self.config.retry.to_overrides(),
                )
                .with_jitter(self.config.retry.jitter),
        };
        match &self.retry_events {
            Some(tx) => options.with_events(tx.clone()),
            None => options,
        }
    }

    async fn session(
        &self,
        cache: &mut HashMap<String, AssumedSession>,
        target: &Target,
    ) -> Result<AssumedSession> {
        if let Some(session) = cache.get(&target.account_id) {
            if !session.is_expired() {
                return Ok(session.clone());
            }
        }
        let account = self.config.account(&target.account_id).ok_or_else(|| {
            Error::configuration_with_context(
                "target account is not configured",
                ErrorContext::new()
                    .with_details(target.account_id.clone())
                    .with_source("workflow"),
            )
        })?;
        debug!(account = %account.id, role = %account.role_arn, "assuming role");
        let session = self.credentials.assume(account).await?;
        cache.insert(target.account_id.clone(), session.clone());
        Ok(session)
    }

    async fn pace(kind: OperationKind) {
        tokio::time::sleep(AdaptiveRateLimiter::operation_delay(kind)).await;
    }
}
