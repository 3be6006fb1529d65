//! Retry decisions for failed row workflows.
//!
//! Upstream collaborators only report failures as text, so failures are
//! classified by content. [`classify`] is the one place that knows which
//! tokens mean "this will never work".

use crate::config::RetryConfig;
use std::time::Duration;

/// Lower-case substrings that mark a failure as permanent.
const PERMANENT_MARKERS: &[&str] = &[
    "metadata not available",
    "geocoding failed",
    "not found",
    "not_found",
    "zero_results",
    "zero results",
];

/// Whether retrying could change the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Permanent,
    Transient,
}

/// Classify a failure message (case-insensitive).
pub fn classify(message: &str) -> FailureKind {
    let lower = message.to_lowercase();
    if PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        FailureKind::Permanent
    } else {
        FailureKind::Transient
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp,
}

/// Fixed-delay retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts allowed after the first one
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.retry_delay_ms))
    }

    /// Decide what to do after a failure, given how many retries were already made.
    pub fn should_retry(&self, message: &str, retries_so_far: u32) -> RetryDecision {
        match classify(message) {
            FailureKind::Permanent => RetryDecision::GiveUp,
            FailureKind::Transient if retries_so_far < self.max_retries => {
                RetryDecision::Retry(self.delay)
            }
            FailureKind::Transient => RetryDecision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permanent_markers() {
        assert_eq!(classify("Geocoding failed"), FailureKind::Permanent);
        assert_eq!(classify("Street View metadata not available"), FailureKind::Permanent);
        assert_eq!(classify("Google Geocoding returned ZERO_RESULTS: no details"), FailureKind::Permanent);
        assert_eq!(classify("Cloudinary returned HTTP 404 Not Found: {}"), FailureKind::Permanent);
    }

    #[test]
    fn test_classify_transient() {
        assert_eq!(classify("Cloudinary request timeout"), FailureKind::Transient);
        assert_eq!(
            classify("Google Geocoding returned OVER_QUERY_LIMIT: You have exceeded your daily request quota"),
            FailureKind::Transient
        );
        assert_eq!(classify("connection reset by peer"), FailureKind::Transient);
    }

    #[test]
    fn test_zero_results_never_retries() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        for message in ["ZERO_RESULTS", "zero_results", "status Zero_Results from upstream"] {
            for retries in 0..5 {
                assert_eq!(policy.should_retry(message, retries), RetryDecision::GiveUp);
            }
        }
    }

    #[test]
    fn test_timeout_retries_exactly_max_retries() {
        for max_retries in [0, 1, 3] {
            let policy = RetryPolicy::new(max_retries, Duration::from_millis(3000));
            let mut retries = 0;
            while let RetryDecision::Retry(delay) = policy.should_retry("Cloudinary request timeout", retries) {
                assert_eq!(delay, Duration::from_millis(3000));
                retries += 1;
                assert!(retries <= max_retries, "retried past the budget");
            }
            assert_eq!(retries, max_retries);
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.delay, Duration::from_secs(3));
    }
}
