//! Cross-account sessions.
//!
//! Each account is reached by assuming a role. The STS exchange itself is a
//! collaborator behind [`CredentialProvider`]; workflows only need the
//! resulting [`AssumedSession`].

use crate::config::AccountConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::{Duration, SystemTime};

const SESSION_TTL: Duration = Duration::from_secs(3600);

/// Temporary credentials scoped to one account. Secrets are never held here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumedSession {
    pub account_id: String,
    pub role_arn: String,
    pub session_name: String,
    pub access_key_id: String,
    pub expires_at: SystemTime,
}

impl AssumedSession {
    /// A locally generated session, as handed out by [`SimulatedCredentials`].
    pub fn synthetic(account_id: impl Into<String>, role_arn: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            account_id: account_id.into(),
            role_arn: role_arn.into(),
            session_name: format!("apigw-fleet-{}", &id[..8]),
            access_key_id: format!("ASIA{}", id[..16].to_ascii_uppercase()),
            expires_at: SystemTime::now() + SESSION_TTL,
        }
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn assume(&self, account: &AccountConfig) -> Result<AssumedSession>;
}

/// Hands out synthetic sessions; accounts can be marked as denied.
#[derive(Debug, Default)]
pub struct SimulatedCredentials {
    denied: HashSet<String>,
}

impl SimulatedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `assume` fail for `account_id`, as if the trust policy rejected us.
    pub fn deny(mut self, account_id: impl Into<String>) -> Self {
        self.denied.insert(account_id.into());
        self
    }
}

#[async_trait]
impl CredentialProvider for SimulatedCredentials {
    async fn assume(&self, account: &AccountConfig) -> Result<AssumedSession> {
        if self.denied.contains(&account.id) {
            return Err(Error::credentials(
                &account.id,
                format!("not authorized to perform sts:AssumeRole on {}", account.role_arn),
            ));
        }
        Ok(AssumedSession::synthetic(&account.id, &account.role_arn))
    }
}
