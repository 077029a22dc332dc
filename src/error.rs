use crate::gateway::GatewayError;
use std::fmt;
use thiserror::Error;

/// Where a command-level error came from.
///
/// Rendered after the message as ` (field: .., details: .., source: ..)`,
/// skipping unset parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Config key at fault, e.g. `accounts[0].id`.
    pub field_path: Option<String>,
    pub details: Option<String>,
    /// Component that raised it: `config_loader`, `distribution`, `workflow`.
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(self, path: impl Into<String>) -> Self {
        Self {
            field_path: Some(path.into()),
            ..self
        }
    }

    pub fn with_details(self, details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..self
        }
    }

    pub fn with_source(self, source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..self
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = [
            ("field", &self.field_path),
            ("details", &self.details),
            ("source", &self.source),
        ];
        let mut set = parts
            .iter()
            .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
            .peekable();
        if set.peek().is_none() {
            return Ok(());
        }
        f.write_str(" (")?;
        for (i, (label, value)) in set.enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", label, value)?;
        }
        f.write_str(")")
    }
}

/// Unified error type for apigw-fleet.
///
/// Per-operation gateway failures never surface here: they are carried untouched
/// inside [`crate::resilience::RetryResult`] so callers can inspect them. This type
/// covers the failures that stop a whole command (bad config, unreadable files,
/// credential problems).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{context}")]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{context}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Credential error for account {account}: {message}")]
    Credentials { account: String, message: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn credentials(account: impl Into<String>, msg: impl Into<String>) -> Self {
        Error::Credentials {
            account: account.into(),
            message: msg.into(),
        }
    }

    /// Context of configuration and validation errors.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Validation { context, .. } => {
                Some(context)
            }
            _ => None,
        }
    }
}
