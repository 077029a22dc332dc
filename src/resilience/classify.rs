//! Failure classification.
//!
//! Classification is a pure function of a failure's status, headers and kind tag,
//! kept apart from the retry loop so it can be tested on its own.

use std::time::Duration;

/// Header names that may carry a server-suggested wait, in lookup order.
pub const RATE_LIMIT_HEADERS: &[&str] = &[
    "retry-after",
    "x-amzn-ratelimit-retry-after",
    "x-amzn-ratelimit-retryafter",
];

/// Statuses that are always worth another attempt.
pub const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Transport-level discriminator for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection reset, DNS failure, timeout before a response arrived.
    Network,
    /// The service reported throttling through its error code.
    Throttling,
    /// Anything else: validation, authorization, not-found.
    Application,
}

/// What the retry core needs to know about a failure.
///
/// `header` lookups must be case-insensitive.
pub trait FailureInfo {
    fn status(&self) -> Option<u16>;
    fn header(&self, name: &str) -> Option<&str>;
    fn kind(&self) -> FailureKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// HTTP 429.
    RateLimited,
    /// HTTP 500, 502, 503 or 504.
    ServerError(u16),
    Network,
    Throttled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Retryable(RetryReason),
    Terminal,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Classification::Retryable(_))
    }
}

pub fn classify(failure: &dyn FailureInfo) -> Classification {
    match failure.status() {
        Some(429) => return Classification::Retryable(RetryReason::RateLimited),
        Some(status) if RETRYABLE_STATUSES.contains(&status) => {
            return Classification::Retryable(RetryReason::ServerError(status))
        }
        _ => {}
    }
    match failure.kind() {
        FailureKind::Network => Classification::Retryable(RetryReason::Network),
        FailureKind::Throttling => Classification::Retryable(RetryReason::Throttled),
        FailureKind::Application => Classification::Terminal,
    }
}

pub fn is_rate_limited(failure: &dyn FailureInfo) -> bool {
    failure.status() == Some(429)
}

/// Server-suggested wait from the standard `Retry-After` header.
///
/// Only honored on 429 responses, and only in the `<seconds>` form with a
/// positive value.
pub fn retry_after(failure: &dyn FailureInfo) -> Option<Duration> {
    if !is_rate_limited(failure) {
        return None;
    }
    suggested_wait(failure, &RATE_LIMIT_HEADERS[..1])
}

/// First header in `names` holding a positive integer number of seconds.
pub fn suggested_wait(failure: &dyn FailureInfo, names: &[&str]) -> Option<Duration> {
    names.iter().find_map(|name| {
        let raw = failure.header(name)?.trim();
        match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fake {
        status: Option<u16>,
        headers: HashMap<String, String>,
        kind: FailureKind,
    }

    impl Fake {
        fn with_status(status: u16) -> Self {
            Self {
                status: Some(status),
                headers: HashMap::new(),
                kind: FailureKind::Application,
            }
        }

        fn with_kind(kind: FailureKind) -> Self {
            Self {
                status: None,
                headers: HashMap::new(),
                kind,
            }
        }

        fn with_header(mut self, name: &str, value: &str) -> Self {
            self.headers.insert(name.to_ascii_lowercase(), value.to_string());
            self
        }
    }

    impl FailureInfo for Fake {
        fn status(&self) -> Option<u16> {
            self.status
        }
        fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str)
        }
        fn kind(&self) -> FailureKind {
            self.kind
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert_eq!(
            classify(&Fake::with_status(429)),
            Classification::Retryable(RetryReason::RateLimited)
        );
        for status in [500u16, 502, 503, 504] {
            assert_eq!(
                classify(&Fake::with_status(status)),
                Classification::Retryable(RetryReason::ServerError(status)),
                "status {} should be retryable",
                status
            );
        }
    }

    #[test]
    fn test_terminal_statuses() {
        for status in [400u16, 401, 403, 404, 409, 501] {
            assert_eq!(
                classify(&Fake::with_status(status)),
                Classification::Terminal,
                "status {} should be terminal",
                status
            );
        }
    }

    #[test]
    fn test_kind_tags_without_status() {
        assert_eq!(
            classify(&Fake::with_kind(FailureKind::Network)),
            Classification::Retryable(RetryReason::Network)
        );
        assert_eq!(
            classify(&Fake::with_kind(FailureKind::Throttling)),
            Classification::Retryable(RetryReason::Throttled)
        );
        assert!(!classify(&Fake::with_kind(FailureKind::Application)).is_retryable());
    }

    #[test]
    fn test_throttling_kind_with_client_status_is_retryable() {
        // API Gateway reports TooManyRequestsException with a 400 on some paths.
        let mut failure = Fake::with_status(400);
        failure.kind = FailureKind::Throttling;
        assert!(classify(&failure).is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_429() {
        let limited = Fake::with_status(429).with_header("Retry-After", "7");
        assert_eq!(retry_after(&limited), Some(Duration::from_secs(7)));

        let unavailable = Fake::with_status(503).with_header("Retry-After", "7");
        assert_eq!(retry_after(&unavailable), None);
    }

    #[test]
    fn test_retry_after_rejects_zero_and_garbage() {
        assert_eq!(retry_after(&Fake::with_status(429).with_header("retry-after", "0")), None);
        assert_eq!(retry_after(&Fake::with_status(429).with_header("retry-after", "soon")), None);
        assert_eq!(
            retry_after(&Fake::with_status(429).with_header("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")),
            None
        );
    }

    #[test]
    fn test_suggested_wait_checks_aws_variants_in_order() {
        let failure = Fake::with_status(429).with_header("X-Amzn-RateLimit-RetryAfter", "4");
        assert_eq!(
            suggested_wait(&failure, RATE_LIMIT_HEADERS),
            Some(Duration::from_secs(4))
        );

        let both = Fake::with_status(429)
            .with_header("retry-after", "2")
            .with_header("x-amzn-ratelimit-retry-after", "9");
        assert_eq!(
            suggested_wait(&both, RATE_LIMIT_HEADERS),
            Some(Duration::from_secs(2))
        );
    }
}
