use super::{ExecutionMode, Fleet, WorkflowReport};
use crate::gateway::RestApi;
use crate::resilience::{AdaptiveRateLimiter, OperationKind, RetryManager};
use crate::Result;
use std::collections::HashMap;
use tracing::{info, warn};

/// Which APIs a delete run removes from each target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeleteSelection {
    /// Names starting with the configured `api_name_prefix`.
    #[default]
    ConfiguredPrefix,
    Prefix(String),
    All,
}

impl DeleteSelection {
    fn matches(&self, api: &RestApi, configured_prefix: &str) -> bool {
        match self {
            DeleteSelection::ConfiguredPrefix => api.name.starts_with(configured_prefix),
            DeleteSelection::Prefix(p) => api.name.starts_with(p.as_str()),
            DeleteSelection::All => true,
        }
    }
}

fn display_name(api: &RestApi) -> String {
    format!("{} ({})", api.name, api.id)
}

impl Fleet {
    /// Delete the selected APIs from every target.
    ///
    /// Deletes are the most throttled operation class, so sequential mode asks the
    /// limiter for fresh adaptive options before each call.
    pub async fn delete_apis(
        &self,
        selection: &DeleteSelection,
        mode: ExecutionMode,
    ) -> Result<WorkflowReport> {
        self.limiter.reset_history();
        let targets = self.config.targets();
        info!(targets = targets.len(), ?selection, ?mode, "deleting REST APIs");

        let mut report = WorkflowReport::new(OperationKind::Delete);
        let mut sessions = HashMap::new();

        for (t, target) in targets.iter().enumerate() {
            if t > 0 {
                Self::pace(OperationKind::Delete).await;
            }
            let region = target.region.as_str();

            let session = match self.session(&mut sessions, target).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%target, error = %e, "skipping target");
                    report.record_failure(target, "<list>", e.to_string(), None);
                    continue;
                }
            };

            let listing = RetryManager::new(self.retry_options(OperationKind::List, target))
                .retry(|| self.gateway.list_rest_apis(&session, region))
                .await;
            let apis = match listing.outcome {
                Ok(apis) => apis,
                Err(e) => {
                    warn!(%target, error = %e, "listing failed");
                    report.record_failure(target, "<list>", e.to_string(), e.status);
                    continue;
                }
            };
            let selected: Vec<RestApi> = apis
                .into_iter()
                .filter(|api| selection.matches(api, &self.config.api_name_prefix))
                .collect();
            info!(%target, selected = selected.len(), "APIs selected for deletion");

            match mode {
                ExecutionMode::Sequential => {
                    for (i, api) in selected.iter().enumerate() {
                        if i > 0 {
                            Self::pace(OperationKind::Delete).await;
                        }
                        let manager =
                            RetryManager::new(self.retry_options(OperationKind::Delete, target));
                        let result = manager
                            .retry(|| self.gateway.delete_rest_api(&session, region, &api.id))
                            .await;
                        report.record(target, &display_name(api), &result);
                    }
                }
                ExecutionMode::Parallel => {
                    let manager =
                        RetryManager::new(self.retry_options(OperationKind::Delete, target));
                    let session = &session;
                    let ops: Vec<_> = selected
                        .iter()
                        .map(|api| {
                            move || self.gateway.delete_rest_api(session, region, &api.id)
                        })
                        .collect();
                    let results = manager
                        .retry_bulk_paced(
                            ops,
                            self.config.concurrency,
                            AdaptiveRateLimiter::operation_delay(OperationKind::Delete),
                            self.progress.as_ref(),
                        )
                        .await;
                    for (api, result) in selected.iter().zip(&results) {
                        report.record(target, &display_name(api), result);
                    }
                }
            }
        }

        let stats = self.limiter.stats();
        info!(
            succeeded = report.succeeded,
            failed = report.failed.len(),
            rate_limited_keys = stats.total_rate_limits,
            "delete run finished"
        );
        Ok(report)
    }
}
