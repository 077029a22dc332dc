//! API Gateway client seam.
//!
//! Workflows talk to API Gateway only through [`ApiGateway`]. Real AWS bindings
//! (SigV4 signing, endpoints) live outside this crate; [`SimulatedGateway`] is an
//! in-process implementation used by the CLI sandbox and the tests.

mod simulated;

pub use simulated::SimulatedGateway;

use crate::credentials::AssumedSession;
use crate::resilience::{FailureInfo, FailureKind};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A REST API as reported by API Gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestApi {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[async_trait]
pub trait ApiGateway: Send + Sync {
    async fn create_rest_api(
        &self,
        session: &AssumedSession,
        region: &str,
        name: &str,
    ) -> Result<RestApi, GatewayError>;

    async fn delete_rest_api(
        &self,
        session: &AssumedSession,
        region: &str,
        api_id: &str,
    ) -> Result<(), GatewayError>;

    async fn list_rest_apis(
        &self,
        session: &AssumedSession,
        region: &str,
    ) -> Result<Vec<RestApi>, GatewayError>;
}

/// Error codes AWS uses to signal throttling rather than a real failure.
const THROTTLING_CODES: &[&str] = &[
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "LimitExceededException",
    "RequestThrottled",
    "SlowDown",
    "PriorRequestNotComplete",
    "EC2ThrottledException",
];

/// Codes that mean the request never got a service response.
const NETWORK_CODES: &[&str] = &[
    "TimeoutError",
    "RequestTimeout",
    "RequestTimeoutException",
    "NetworkingError",
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "EPIPE",
];

pub fn kind_for_code(code: &str) -> FailureKind {
    if THROTTLING_CODES.contains(&code) {
        FailureKind::Throttling
    } else if NETWORK_CODES.contains(&code) {
        FailureKind::Network
    } else {
        FailureKind::Application
    }
}

/// Failure of a single gateway call.
#[derive(Debug, Clone)]
pub struct GatewayError {
    /// HTTP status, absent when no response was received.
    pub status: Option<u16>,
    /// AWS error code, e.g. `NotFoundException`.
    pub code: String,
    pub message: String,
    headers: HeaderMap,
}

impl GatewayError {
    /// A failure reported by the service with a response status.
    pub fn service(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code: code.into(),
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// A connectivity failure with no response.
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: "NetworkingError".to_string(),
            message: message.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Attach a response header. Invalid names or values are dropped.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl FailureInfo for GatewayError {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name.to_ascii_lowercase().as_str())
            .and_then(|v| v.to_str().ok())
    }

    fn kind(&self) -> FailureKind {
        kind_for_code(&self.code)
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {} {}: {}", status, self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{classify, Classification, RetryReason};

    #[test]
    fn test_code_kinds() {
        assert_eq!(kind_for_code("TooManyRequestsException"), FailureKind::Throttling);
        assert_eq!(kind_for_code("ThrottlingException"), FailureKind::Throttling);
        assert_eq!(kind_for_code("ECONNRESET"), FailureKind::Network);
        assert_eq!(kind_for_code("NotFoundException"), FailureKind::Application);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let err = GatewayError::service(429, "TooManyRequestsException", "slow down")
            .with_header("X-Amzn-RateLimit-Retry-After", "3");
        assert_eq!(err.header("x-amzn-ratelimit-retry-after"), Some("3"));
        assert_eq!(err.header("X-AMZN-RATELIMIT-RETRY-AFTER"), Some("3"));
        assert_eq!(err.header("retry-after"), None);
    }

    #[test]
    fn test_invalid_header_is_dropped() {
        let err = GatewayError::service(429, "x", "y").with_header("bad header", "1");
        assert!(err.headers().is_empty());
    }

    #[test]
    fn test_network_error_is_retryable() {
        let err = GatewayError::network("connection reset by peer");
        assert_eq!(err.status(), None);
        assert_eq!(classify(&err), Classification::Retryable(RetryReason::Network));
        assert_eq!(err.to_string(), "NetworkingError: connection reset by peer");
    }

    #[test]
    fn test_display_with_status() {
        let err = GatewayError::service(404, "NotFoundException", "Invalid API identifier specified");
        assert_eq!(
            err.to_string(),
            "HTTP 404 NotFoundException: Invalid API identifier specified"
        );
    }
}
