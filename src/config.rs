//! Fleet configuration.
//!
//! Loaded from YAML (read only). Resolution order for the file is an explicit
//! path, then `APIGW_FLEET_CONFIG`, then `./apigw-fleet.yaml`.

use crate::resilience::{RetryOptions, RetryOverrides};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CONFIG_ENV: &str = "APIGW_FLEET_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "apigw-fleet.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// 12-digit AWS account id.
    pub id: String,
    /// Role assumed in this account.
    pub role_arn: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = RetryOptions::default();
        Self {
            max_retries: d.max_retries,
            base_delay_ms: d.base_delay.as_millis() as u64,
            max_delay_ms: d.max_delay.as_millis() as u64,
            jitter: d.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_options(&self) -> RetryOptions {
        RetryOptions::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_jitter(self.jitter)
    }

    /// The configured values as overrides for the adaptive limiter.
    pub fn to_overrides(&self) -> RetryOverrides {
        RetryOverrides {
            max_retries: Some(self.max_retries),
            base_delay: Some(Duration::from_millis(self.base_delay_ms)),
            max_delay: Some(Duration::from_millis(self.max_delay_ms)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetConfig {
    pub accounts: Vec<AccountConfig>,
    pub regions: Vec<String>,
    #[serde(default = "default_prefix")]
    pub api_name_prefix: String,
    #[serde(default)]
    pub retry: RetrySettings,
    /// Operations per batch in parallel mode.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_prefix() -> String {
    "fleet-api".to_string()
}

fn default_concurrency() -> usize {
    1
}

/// One account/region pair that operations are issued against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    pub account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_alias: Option<String>,
    pub role_arn: String,
    pub region: String,
}

impl Target {
    /// Alias when configured, account id otherwise.
    pub fn label(&self) -> &str {
        self.account_alias.as_deref().unwrap_or(&self.account_id)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.label(), self.region)
    }
}

impl FleetConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: FleetConfig = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, apply env overrides, validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_path(explicit);
        if !path.exists() {
            return Err(Error::configuration_with_context(
                "config file not found",
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            ));
        }
        debug!(path = %path.display(), "loading fleet config");
        let raw = std::fs::read_to_string(&path)?;
        let mut cfg: FleetConfig = serde_yaml::from_str(&raw)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = env::var(CONFIG_ENV) {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// `APIGW_FLEET_CONCURRENCY` and `APIGW_FLEET_MAX_RETRIES`; unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(n) = env::var("APIGW_FLEET_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.concurrency = n;
        }
        if let Some(n) = env::var("APIGW_FLEET_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.retry.max_retries = n;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.accounts.is_empty() {
            return Err(invalid("at least one account is required", "accounts"));
        }
        for (i, account) in self.accounts.iter().enumerate() {
            if account.id.len() != 12 || !account.id.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid(
                    format!("account id must be 12 digits, got '{}'", account.id),
                    format!("accounts[{}].id", i),
                ));
            }
            let expected = format!("arn:aws:iam::{}:role/", account.id);
            if !account.role_arn.starts_with(&expected) {
                return Err(invalid(
                    format!("role ARN must start with '{}'", expected),
                    format!("accounts[{}].role_arn", i),
                ));
            }
        }
        if self.regions.is_empty() {
            return Err(invalid("at least one region is required", "regions"));
        }
        if let Some(i) = self.regions.iter().position(|r| r.trim().is_empty()) {
            return Err(invalid("region must not be empty", format!("regions[{}]", i)));
        }
        if self.api_name_prefix.trim().is_empty() {
            return Err(invalid("api name prefix must not be empty", "api_name_prefix"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(invalid(
                "base delay must not exceed max delay",
                "retry.base_delay_ms",
            ));
        }
        Ok(())
    }

    /// Every account/region pair, accounts outermost, in config order.
    pub fn targets(&self) -> Vec<Target> {
        self.accounts
            .iter()
            .flat_map(|account| {
                self.regions.iter().map(move |region| Target {
                    account_id: account.id.clone(),
                    account_alias: account.alias.clone(),
                    role_arn: account.role_arn.clone(),
                    region: region.clone(),
                })
            })
            .collect()
    }

    pub fn account(&self, account_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.id == account_id)
    }
}

fn invalid(msg: impl Into<String>, field: impl Into<String>) -> Error {
    Error::validation_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config_loader"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
accounts:
  - id: "111111111111"
    role_arn: "arn:aws:iam::111111111111:role/ApiGatewayAdmin"
    alias: prod
  - id: "222222222222"
    role_arn: "arn:aws:iam::222222222222:role/ApiGatewayAdmin"
regions: [us-east-1, eu-west-1]
retry:
  max_retries: 3
"#;

    #[test]
    fn test_parse_with_defaults() {
        let cfg = FleetConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.api_name_prefix, "fleet-api");
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.base_delay_ms, 1000);
        assert_eq!(cfg.retry.max_delay_ms, 30000);
        assert!(cfg.retry.jitter);
    }

    #[test]
    fn test_targets_cross_product_in_order() {
        let cfg = FleetConfig::from_yaml_str(SAMPLE).unwrap();
        let labels: Vec<String> = cfg.targets().iter().map(|t| t.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "prod/us-east-1",
                "prod/eu-west-1",
                "222222222222/us-east-1",
                "222222222222/eu-west-1",
            ]
        );
    }

    #[test]
    fn test_rejects_bad_account_id() {
        let raw = SAMPLE.replace("\"222222222222\"", "\"2222\"");
        let err = FleetConfig::from_yaml_str(&raw).unwrap_err();
        let ctx = err.context().unwrap();
        assert_eq!(ctx.field_path.as_deref(), Some("accounts[1].id"));
    }

    #[test]
    fn test_rejects_mismatched_role_arn() {
        let raw = SAMPLE.replace(
            "arn:aws:iam::222222222222:role/ApiGatewayAdmin",
            "arn:aws:iam::999999999999:role/ApiGatewayAdmin",
        );
        assert!(FleetConfig::from_yaml_str(&raw).is_err());
    }

    #[test]
    fn test_rejects_inverted_delays() {
        let raw = format!("{}  base_delay_ms: 5000\n  max_delay_ms: 100\n", SAMPLE);
        let err = FleetConfig::from_yaml_str(&raw).unwrap_err();
        assert_eq!(
            err.context().unwrap().field_path.as_deref(),
            Some("retry.base_delay_ms")
        );
    }

    #[test]
    fn test_rejects_empty_regions() {
        let raw = SAMPLE.replace("regions: [us-east-1, eu-west-1]", "regions: []");
        assert!(FleetConfig::from_yaml_str(&raw).is_err());
    }

    #[test]
    fn test_explicit_path_wins() {
        let p = Path::new("/tmp/fleet.yaml");
        assert_eq!(FleetConfig::resolve_path(Some(p)), p.to_path_buf());
    }

    #[test]
    fn test_settings_to_options() {
        let opts = RetrySettings {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 40,
            jitter: false,
        }
        .to_options();
        assert_eq!(opts.max_retries, 2);
        assert_eq!(opts.backoff_delay(3), Duration::from_millis(40));
        assert!(!opts.jitter);
    }
}
