//! Upstream error classification.
//!
//! Classification is a pure scan of the lowercased error message against four
//! ordered pattern lists. Precedence is critical > excluded > non-retryable >
//! retryable; the first match wins and an unmatched message defaults to
//! non-retryable.

use std::time::Duration;

/// How a failed upstream attempt should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Authentication/billing failure. Permanent provider penalty.
    Critical,
    /// Upstream refusal that must not count against provider health.
    Excluded,
    /// Client-shaped error; retrying elsewhere won't help.
    NonRetryable,
    /// Transient failure; the dispatcher may fail over.
    Retryable,
}

impl ErrorClass {
    #[must_use]
    pub fn is_retryable(self) -> bool {
        self == Self::Retryable
    }

    /// Whether this failure counts toward error totals, consecutive errors,
    /// and the circuit breaker.
    #[must_use]
    pub fn records_failure(self) -> bool {
        self != Self::Excluded
    }
}

/// A classified error with the pattern that decided it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ErrorClass,
    pub matched_pattern: Option<&'static str>,
}

/// Thresholds the circuit breaker reads from the classifier's configuration.
#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    pub max_consecutive_errors: u32,
    pub error_window: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 10,
            error_window: Duration::from_secs(300),
        }
    }
}

const CRITICAL_PATTERNS: &[&str] = &[
    "401",
    "402",
    "unauthorized",
    "invalid api key",
    "invalid_api_key",
    "incorrect api key",
    "authentication",
    "balance is too low",
    "insufficient balance",
    "account suspended",
    "account deactivated",
    "billing",
];

const EXCLUDED_PATTERNS: &[&str] = &[
    "unsupported_country",
    "unsupported country",
    "country, region, or territory not supported",
    "content policy",
    "content_policy",
    "content management policy",
    "violates our usage policies",
    "prompt blocked",
    "responsibleaipolicyviolation",
];

const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "400",
    "403",
    "404",
    "405",
    "413",
    "422",
    "bad request",
    "invalid_request",
    "invalid request",
    "model not found",
    "model_not_found",
    "context length",
    "context_length_exceeded",
    "maximum context",
    "quota exceeded",
    "insufficient_quota",
    "unsupported parameter",
    "not supported",
];

const RETRYABLE_PATTERNS: &[&str] = &[
    "429",
    "too many requests",
    "rate limit",
    "rate_limit",
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
    "overloaded",
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "connection reset",
    "connection refused",
    "connection closed",
    "network",
    "stream idle",
];

/// Classify an error message. First match wins, in precedence order.
#[must_use]
pub fn classify(message: &str) -> Classification {
    let msg = message.to_lowercase();

    let lists = [
        (ErrorClass::Critical, CRITICAL_PATTERNS),
        (ErrorClass::Excluded, EXCLUDED_PATTERNS),
        (ErrorClass::NonRetryable, NON_RETRYABLE_PATTERNS),
        (ErrorClass::Retryable, RETRYABLE_PATTERNS),
    ];

    for (class, patterns) in lists {
        if let Some(pattern) = patterns.iter().find(|p| msg.contains(**p)) {
            return Classification {
                class,
                matched_pattern: Some(pattern),
            };
        }
    }

    Classification {
        class: ErrorClass::NonRetryable,
        matched_pattern: None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_patterns() {
        assert_eq!(classify("HTTP 401 Unauthorized").class, ErrorClass::Critical);
        assert_eq!(
            classify("Your balance is too low for this request").class,
            ErrorClass::Critical
        );
        assert_eq!(classify("Invalid API key provided").class, ErrorClass::Critical);
    }

    #[test]
    fn excluded_patterns() {
        let c = classify("unsupported_country: request from blocked region");
        assert_eq!(c.class, ErrorClass::Excluded);
        assert!(!c.class.records_failure());
        assert!(!c.class.is_retryable());
        assert_eq!(
            classify("flagged by the content policy filter").class,
            ErrorClass::Excluded
        );
    }

    #[test]
    fn retryable_patterns() {
        assert_eq!(classify("ETIMEDOUT").class, ErrorClass::Retryable);
        assert_eq!(classify("HTTP 503 Service Unavailable").class, ErrorClass::Retryable);
        assert_eq!(classify("429 Too Many Requests").class, ErrorClass::Retryable);
        assert_eq!(classify("connection reset by peer").class, ErrorClass::Retryable);
    }

    #[test]
    fn non_retryable_patterns() {
        assert_eq!(classify("HTTP 400 Bad Request").class, ErrorClass::NonRetryable);
        assert_eq!(
            classify("insufficient_quota: quota exceeded").class,
            ErrorClass::NonRetryable
        );
    }

    #[test]
    fn unmatched_defaults_to_non_retryable() {
        let c = classify("something inexplicable happened");
        assert_eq!(c.class, ErrorClass::NonRetryable);
        assert!(c.matched_pattern.is_none());
    }

    #[test]
    fn precedence_critical_over_retryable() {
        // "401" (critical) and "timeout" (retryable) both match; critical wins.
        let c = classify("401 unauthorized after upstream timeout");
        assert_eq!(c.class, ErrorClass::Critical);
        assert_eq!(c.matched_pattern, Some("401"));
    }

    #[test]
    fn precedence_excluded_over_non_retryable() {
        // "content policy" (excluded) and "400" (non-retryable) both match.
        let c = classify("HTTP 400: request rejected by content policy");
        assert_eq!(c.class, ErrorClass::Excluded);
    }

    #[test]
    fn precedence_non_retryable_over_retryable() {
        // "quota exceeded" (non-retryable) and "429" (retryable) both match.
        let c = classify("429: quota exceeded for this billing period");
        // "billing" is critical and checked first of all.
        assert_eq!(c.class, ErrorClass::Critical);

        let c = classify("429: quota exceeded this month");
        assert_eq!(c.class, ErrorClass::NonRetryable);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(classify("RATE LIMIT EXCEEDED").class, ErrorClass::Retryable);
    }

    #[test]
    fn default_config_thresholds() {
        let cfg = ClassifierConfig::default();
        assert_eq!(cfg.max_consecutive_errors, 10);
        assert_eq!(cfg.error_window, Duration::from_secs(300));
    }
}
