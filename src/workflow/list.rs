use super::{Fleet, WorkflowReport};
use crate::config::Target;
use crate::gateway::RestApi;
use crate::resilience::{OperationKind, RetryManager};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetListing {
    pub target: Target,
    pub apis: Vec<RestApi>,
}

#[derive(Debug, Clone)]
pub struct ListOutcome {
    pub report: WorkflowReport,
    /// Targets that answered, in config order.
    pub listings: Vec<TargetListing>,
}

impl ListOutcome {
    pub fn api_count(&self) -> usize {
        self.listings.iter().map(|l| l.apis.len()).sum()
    }
}

impl Fleet {
    pub async fn list_apis(&self) -> Result<ListOutcome> {
        self.limiter.reset_history();
        let targets = self.config.targets();
        info!(targets = targets.len(), "listing REST APIs");

        let mut report = WorkflowReport::new(OperationKind::List);
        let mut listings = Vec::with_capacity(targets.len());
        let mut sessions = HashMap::new();

        for (t, target) in targets.iter().enumerate() {
            if t > 0 {
                Self::pace(OperationKind::List).await;
            }
            let session = match self.session(&mut sessions, target).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%target, error = %e, "skipping target");
                    report.record_failure(target, "<list>", e.to_string(), None);
                    continue;
                }
            };
            let region = target.region.as_str();
            let result = RetryManager::new(self.retry_options(OperationKind::List, target))
                .retry(|| self.gateway.list_rest_apis(&session, region))
                .await;
            report.record(target, "<list>", &result);
            if let Ok(apis) = result.outcome {
                listings.push(TargetListing {
                    target: target.clone(),
                    apis,
                });
            }
        }

        Ok(ListOutcome { report, listings })
    }
}
