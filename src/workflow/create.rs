use super::{distribute, ExecutionMode, Fleet, WorkflowReport};
use crate::resilience::{AdaptiveRateLimiter, OperationKind, RetryManager};
use crate::Result;
use std::collections::HashMap;
use tracing::{info, warn};

impl Fleet {
    /// Create `total` REST APIs spread over every target.
    pub async fn create_apis(&self, total: usize, mode: ExecutionMode) -> Result<WorkflowReport> {
        self.limiter.reset_history();
        let plan = distribute(total, &self.config.targets())?;
        info!(total, targets = plan.len(), ?mode, "creating REST APIs");

        let mut report = WorkflowReport::new(OperationKind::Create);
        let mut sessions = HashMap::new();
        let mut first = true;

        for alloc in plan.iter().filter(|a| a.count > 0) {
            if !first {
                Self::pace(OperationKind::Create).await;
            }
            first = false;

            let target = &alloc.target;
            let region = target.region.as_str();
            let names: Vec<String> = (1..=alloc.count).map(|n| self.api_name(target, n)).collect();

            let session = match self.session(&mut sessions, target).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%target, error = %e, "skipping target");
                    for name in &names {
                        report.record_failure(target, name, e.to_string(), None);
                    }
                    continue;
                }
            };

            match mode {
                ExecutionMode::Sequential => {
                    for (i, name) in names.iter().enumerate() {
                        if i > 0 {
                            Self::pace(OperationKind::Create).await;
                        }
                        let manager =
                            RetryManager::new(self.retry_options(OperationKind::Create, target));
                        let result = manager
                            .retry(|| self.gateway.create_rest_api(&session, region, name))
                            .await;
                        report.record(target, name, &result);
                    }
                }
                ExecutionMode::Parallel => {
                    let manager =
                        RetryManager::new(self.retry_options(OperationKind::Create, target));
                    let session = &session;
                    let ops: Vec<_> = names
                        .iter()
                        .map(|name| move || self.gateway.create_rest_api(session, region, name))
                        .collect();
                    let results = manager
                        .retry_bulk_paced(
                            ops,
                            self.config.concurrency,
                            AdaptiveRateLimiter::operation_delay(OperationKind::Create),
                            self.progress.as_ref(),
                        )
                        .await;
                    for (name, result) in names.iter().zip(&results) {
                        report.record(target, name, result);
                    }
                }
            }
            info!(%target, created = alloc.count, "target done");
        }

        Ok(report)
    }
}
