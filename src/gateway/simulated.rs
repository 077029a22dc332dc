use super::{ApiGateway, GatewayError, RestApi};
use crate::credentials::AssumedSession;
use crate::resilience::OperationKind;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    /// REST APIs keyed by `account:region`.
    apis: BTreeMap<String, Vec<RestApi>>,
}

#[derive(Debug, Default)]
struct State {
    snapshot: Snapshot,
    faults: HashMap<OperationKind, VecDeque<GatewayError>>,
    calls: HashMap<OperationKind, usize>,
}

/// In-process stand-in for API Gateway.
///
/// - Keeps REST APIs per account and region, optionally mirrored to a JSON file
/// - Scripted faults are returned before any real work, in push order
/// - Optional random throttling answers 429 with a `Retry-After` header
pub struct SimulatedGateway {
    state: Mutex<State>,
    throttle_probability: f64,
    throttle_retry_after_secs: u64,
    state_file: Option<PathBuf>,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            throttle_probability: 0.0,
            throttle_retry_after_secs: 1,
            state_file: None,
        }
    }

    /// Load state from `path` if it exists; [`save`](Self::save) writes it back.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let snapshot = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str(&raw)?
        } else {
            Snapshot::default()
        };
        let mut gateway = Self::new();
        gateway.state_file = Some(path.to_path_buf());
        if let Ok(mut st) = gateway.state.lock() {
            st.snapshot = snapshot;
        }
        Ok(gateway)
    }

    /// Answer a random share of calls with 429 `TooManyRequestsException`.
    pub fn with_throttling(mut self, probability: f64, retry_after_secs: u64) -> Self {
        self.throttle_probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.throttle_retry_after_secs = retry_after_secs;
        self
    }

    /// Queue a failure for the next call of `kind`.
    pub fn push_fault(&self, kind: OperationKind, fault: GatewayError) {
        if let Ok(mut st) = self.state.lock() {
            st.faults.entry(kind).or_default().push_back(fault);
        }
    }

    /// Number of calls of `kind` received, including failed ones.
    pub fn calls(&self, kind: OperationKind) -> usize {
        self.state
            .lock()
            .map(|st| st.calls.get(&kind).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Seed an API directly, bypassing faults and throttling.
    pub fn insert(&self, account_id: &str, region: &str, api: RestApi) {
        if let Ok(mut st) = self.state.lock() {
            st.snapshot
                .apis
                .entry(scope(account_id, region))
                .or_default()
                .push(api);
        }
    }

    pub fn apis(&self, account_id: &str, region: &str) -> Vec<RestApi> {
        self.state
            .lock()
            .ok()
            .and_then(|st| st.snapshot.apis.get(&scope(account_id, region)).cloned())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let raw = {
            let st = self.lock()?;
            serde_json::to_string_pretty(&st.snapshot)?
        };
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn lock(&self) -> std::result::Result<std::sync::MutexGuard<'_, State>, GatewayError> {
        self.state
            .lock()
            .map_err(|_| GatewayError::service(500, "InternalFailure", "simulated gateway state poisoned"))
    }

    /// Count the call and decide whether it fails before doing any work.
    fn admit(&self, kind: OperationKind) -> std::result::Result<(), GatewayError> {
        let mut st = self.lock()?;
        *st.calls.entry(kind).or_default() += 1;
        if let Some(fault) = st.faults.get_mut(&kind).and_then(VecDeque::pop_front) {
            debug!(%kind, %fault, "returning scripted fault");
            return Err(fault);
        }
        drop(st);

        if self.throttle_probability > 0.0 && rand::thread_rng().gen_bool(self.throttle_probability) {
            let mut err = GatewayError::service(429, "TooManyRequestsException", "Too Many Requests");
            if self.throttle_retry_after_secs > 0 {
                err = err.with_header("Retry-After", &self.throttle_retry_after_secs.to_string());
            }
            return Err(err);
        }
        Ok(())
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn scope(account_id: &str, region: &str) -> String {
    format!("{}:{}", account_id, region)
}

fn new_api_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

#[async_trait]
impl ApiGateway for SimulatedGateway {
    async fn create_rest_api(
        &self,
        session: &AssumedSession,
        region: &str,
        name: &str,
    ) -> std::result::Result<RestApi, GatewayError> {
        self.admit(OperationKind::Create)?;
        if name.trim().is_empty() {
            return Err(GatewayError::service(
                400,
                "BadRequestException",
                "Invalid REST API name specified",
            ));
        }
        let api = RestApi {
            id: new_api_id(),
            name: name.to_string(),
            description: Some(format!("Created by apigw-fleet as {}", session.session_name)),
        };
        let mut st = self.lock()?;
        st.snapshot
            .apis
            .entry(scope(&session.account_id, region))
            .or_default()
            .push(api.clone());
        Ok(api)
    }

    async fn delete_rest_api(
        &self,
        session: &AssumedSession,
        region: &str,
        api_id: &str,
    ) -> std::result::Result<(), GatewayError> {
        self.admit(OperationKind::Delete)?;
        let mut st = self.lock()?;
        let apis = st
            .snapshot
            .apis
            .entry(scope(&session.account_id, region))
            .or_default();
        match apis.iter().position(|a| a.id == api_id) {
            Some(pos) => {
                apis.remove(pos);
                Ok(())
            }
            None => Err(GatewayError::service(
                404,
                "NotFoundException",
                format!("Invalid API identifier specified {}:{}", session.account_id, api_id),
            )),
        }
    }

    async fn list_rest_apis(
        &self,
        session: &AssumedSession,
        region: &str,
    ) -> std::result::Result<Vec<RestApi>, GatewayError> {
        self.admit(OperationKind::List)?;
        let st = self.lock()?;
        Ok(st
            .snapshot
            .apis
            .get(&scope(&session.account_id, region))
            .cloned()
            .unwrap_or_default())
    }
}
