//! Rate Limit Error Types
//!
//! Errors surfaced by the limiter to its callers. Transient saturation is not
//! an error: it is handled internally by backing off.

use std::time::Duration;

/// Error types for admission control
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// The resource name was never registered
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// Backoff attempts exhausted for this admission attempt
    #[error("Max retry attempts ({attempts}) reached for {resource}")]
    RetryLimitExceeded { resource: String, attempts: u32 },

    /// A resource limit failed validation
    #[error("Invalid limit for {resource}: {reason}")]
    InvalidLimit { resource: String, reason: String },

    /// Caller-supplied deadline elapsed before admission
    #[error("Timed out waiting for {resource} after {timeout:?}")]
    Timeout { resource: String, timeout: Duration },

    /// The limiter was shut down while the request was pending
    #[error("Rate limiter shut down while waiting for {resource}")]
    Shutdown { resource: String },
}

impl RateLimitError {
    /// Short label used for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            RateLimitError::UnknownResource(_) => "unknown_resource",
            RateLimitError::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            RateLimitError::InvalidLimit { .. } => "invalid_limit",
            RateLimitError::Timeout { .. } => "timeout",
            RateLimitError::Shutdown { .. } => "shutdown",
        }
    }

    /// Whether a caller may reasonably skip the item and continue its batch
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            RateLimitError::RetryLimitExceeded { .. } | RateLimitError::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RateLimitError::UnknownResource("bing".to_string());
        assert_eq!(err.to_string(), "Unknown resource: bing");

        let err = RateLimitError::RetryLimitExceeded {
            resource: "openai".to_string(),
            attempts: 5,
        };
        assert_eq!(err.to_string(), "Max retry attempts (5) reached for openai");
    }

    #[test]
    fn test_error_reason() {
        let err = RateLimitError::Shutdown {
            resource: "youtube".to_string(),
        };
        assert_eq!(err.reason(), "shutdown");
        assert!(!err.is_skippable());

        let err = RateLimitError::Timeout {
            resource: "youtube".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert!(err.is_skippable());
    }
}
