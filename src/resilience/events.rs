//! Retry and bulk progress reporting.
//!
//! The retry loop reports through [`RetryObserver`]s and never prints. An
//! `UnboundedSender<RetryEvent>` is itself an observer, so consumers can drain a
//! typed channel into a logger or a progress display.

use super::classify::{FailureInfo, RetryReason};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// A retry about to happen, borrowed from the retry loop.
pub struct RetryAttempt<'a> {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    pub reason: RetryReason,
    /// Sleep before the next attempt.
    pub delay: Duration,
    pub failure: &'a dyn FailureInfo,
}

pub trait RetryObserver: Send + Sync {
    fn on_retry(&self, attempt: &RetryAttempt<'_>);
}

/// Owned record of a retry, suitable for sending across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEvent {
    pub attempt: u32,
    pub reason: RetryReason,
    pub delay: Duration,
    pub status: Option<u16>,
}

impl From<&RetryAttempt<'_>> for RetryEvent {
    fn from(a: &RetryAttempt<'_>) -> Self {
        Self {
            attempt: a.attempt,
            reason: a.reason,
            delay: a.delay,
            status: a.failure.status(),
        }
    }
}

impl RetryObserver for UnboundedSender<RetryEvent> {
    fn on_retry(&self, attempt: &RetryAttempt<'_>) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.send(RetryEvent::from(attempt));
    }
}

/// Emitted once per operation settled by `retry_bulk`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkProgress {
    /// Operations settled so far, including this one.
    pub completed: usize,
    pub total: usize,
    /// Position of this operation in the submitted list.
    pub index: usize,
    pub succeeded: bool,
    pub attempts: u32,
}
