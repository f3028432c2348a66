//! Error types for the result pipeline.
//!
//! Every failure the pipeline can surface belongs to a small closed set of
//! kinds, exposed through [`ResultsError::kind`]. Callers match on the kind
//! rather than on message text.
//!
//! ## Error Categories
//!
//! - **Authentication Errors**: `NotConfigured`, `LoginFailed`, `InvalidCredentials`,
//!   `CaptchaRequired`. These come from the session collaborator and always reach
//!   the caller unchanged.
//! - **Network Errors**: transient upstream failures, including throttling.
//! - **Shape Errors**: the upstream payload did not contain a usable race session.
//! - **Participant Errors**: a single participant's lap fetch failed. These are
//!   absorbed by the aggregator and only appear in logs and tests.
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use paddock::{ErrorKind, ResultsError};
//!
//! let error = ResultsError::network_with_status("Too many requests", 429);
//! assert_eq!(error.kind(), ErrorKind::NetworkError);
//! assert!(error.is_throttling());
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T, E = ResultsError> = std::result::Result<T, E>;

/// Shared, cloneable error source.
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync>;

/// Closed set of error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub enum ErrorKind {
    NotConfigured,
    LoginFailed,
    InvalidCredentials,
    CaptchaRequired,
    NetworkError,
    InvalidResultShape,
    ParticipantFetchFailed,
    Cancelled,
    Config,
}

/// Main error type for the result pipeline.
///
/// Errors are `Clone` so that a single failed shared fetch can be delivered
/// to every caller waiting on it.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum ResultsError {
    #[error("Upstream session is not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("Login failed: {reason}")]
    LoginFailed { reason: String },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("CAPTCHA verification required before logging in again")]
    CaptchaRequired,

    #[error("Network error: {reason}")]
    Network {
        reason: String,
        status: Option<u16>,
        #[source]
        source: Option<ErrorSource>,
    },

    #[error("Result {result_id} has an unexpected shape: {details}")]
    InvalidResultShape { result_id: u64, details: String },

    #[error("Lap fetch failed for participant {cust_id}: {reason}")]
    ParticipantFetchFailed { cust_id: i64, reason: String },

    #[error("Progressive load for result {result_id} was cancelled")]
    Cancelled { result_id: u64 },

    #[error("Invalid configuration: {details}")]
    Config { details: String },
}

impl ResultsError {
    /// Returns the tag callers use to classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResultsError::NotConfigured { .. } => ErrorKind::NotConfigured,
            ResultsError::LoginFailed { .. } => ErrorKind::LoginFailed,
            ResultsError::InvalidCredentials => ErrorKind::InvalidCredentials,
            ResultsError::CaptchaRequired => ErrorKind::CaptchaRequired,
            ResultsError::Network { .. } => ErrorKind::NetworkError,
            ResultsError::InvalidResultShape { .. } => ErrorKind::InvalidResultShape,
            ResultsError::ParticipantFetchFailed { .. } => ErrorKind::ParticipantFetchFailed,
            ResultsError::Cancelled { .. } => ErrorKind::Cancelled,
            ResultsError::Config { .. } => ErrorKind::Config,
        }
    }

    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResultsError::Network { .. } => true,
            ResultsError::ParticipantFetchFailed { .. } => true,
            ResultsError::Cancelled { .. } => true,
            ResultsError::InvalidResultShape { .. } => false,
            ResultsError::NotConfigured { .. } => false,
            ResultsError::LoginFailed { .. } => false,
            ResultsError::InvalidCredentials => false,
            ResultsError::CaptchaRequired => false,
            ResultsError::Config { .. } => false,
        }
    }

    /// Authentication-class errors need external resolution and are never absorbed.
    pub fn is_authentication(&self) -> bool {
        matches!(
            self,
            ResultsError::NotConfigured { .. }
                | ResultsError::LoginFailed { .. }
                | ResultsError::InvalidCredentials
                | ResultsError::CaptchaRequired
        )
    }

    /// Whether the upstream signalled throttling.
    ///
    /// Matches HTTP 429, or a message mentioning "rate" or "limit".
    pub fn is_throttling(&self) -> bool {
        match self {
            ResultsError::Network { status: Some(429), .. } => true,
            ResultsError::Network { reason, .. }
            | ResultsError::ParticipantFetchFailed { reason, .. } => {
                let reason = reason.to_ascii_lowercase();
                reason.contains("rate") || reason.contains("limit")
            }
            _ => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            ResultsError::NotConfigured { .. } => vec![
                "Provide upstream account credentials",
                "Check the session provider configuration",
            ],
            ResultsError::LoginFailed { .. } => vec![
                "Verify the upstream service is reachable",
                "Log in manually to check the account status",
            ],
            ResultsError::InvalidCredentials => vec![
                "Update the stored account email and password",
                "Confirm the account is not locked",
            ],
            ResultsError::CaptchaRequired => vec![
                "Log in through the upstream website to clear the CAPTCHA",
                "Wait before retrying the automated login",
            ],
            ResultsError::Network { .. } => vec![
                "Retry the request",
                "Increase the lap fetch delay if throttling persists",
                "Check network connectivity",
            ],
            ResultsError::InvalidResultShape { .. } => vec![
                "Check the result identifier refers to a completed race",
                "Inspect the upstream payload for schema changes",
            ],
            ResultsError::ParticipantFetchFailed { .. } => vec![
                "Invalidate the result to retry missing lap data",
                "Lower the participant cap or raise the fetch delay",
            ],
            ResultsError::Cancelled { .. } => vec!["Request the result again"],
            ResultsError::Config { .. } => vec![
                "Check the configuration file for invalid values",
                "Remove the override to fall back to defaults",
            ],
        }
    }

    /// Helper constructor for network errors.
    pub fn network(reason: impl Into<String>) -> Self {
        ResultsError::Network { reason: reason.into(), status: None, source: None }
    }

    /// Helper constructor for network errors carrying an HTTP status.
    pub fn network_with_status(reason: impl Into<String>, status: u16) -> Self {
        ResultsError::Network { reason: reason.into(), status: Some(status), source: None }
    }

    /// Helper constructor for network errors with source.
    pub fn network_with_source(
        reason: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ResultsError::Network { reason: reason.into(), status: None, source: Some(Arc::new(source)) }
    }

    /// Helper constructor for result shape errors.
    pub fn invalid_shape(result_id: u64, details: impl Into<String>) -> Self {
        ResultsError::InvalidResultShape { result_id, details: details.into() }
    }

    /// Helper constructor for participant lap fetch failures.
    pub fn participant_failed(cust_id: i64, reason: impl Into<String>) -> Self {
        ResultsError::ParticipantFetchFailed { cust_id, reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(details: impl Into<String>) -> Self {
        ResultsError::Config { details: details.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn network_messages_mentioning_rate_are_throttling(
            prefix in "[a-z ]{0,12}",
            suffix in "[a-z ]{0,12}"
          ) {
            let error = ResultsError::network(format!("{}Rate{}", prefix, suffix));
            prop_assert!(error.is_throttling());
            prop_assert!(error.is_retryable());
          }

          #[test]
          fn error_messages_carry_context(result_id in 1u64..u64::MAX, details in "\\w+") {
            let error = ResultsError::invalid_shape(result_id, details.clone());
            let message = error.to_string();
            prop_assert!(message.contains(&result_id.to_string()));
            prop_assert!(message.contains(&details));
          }
        }
    }

    #[test]
    fn kinds_cover_every_variant() {
        let cases = [
            (ResultsError::NotConfigured { reason: "x".into() }, ErrorKind::NotConfigured),
            (ResultsError::LoginFailed { reason: "x".into() }, ErrorKind::LoginFailed),
            (ResultsError::InvalidCredentials, ErrorKind::InvalidCredentials),
            (ResultsError::CaptchaRequired, ErrorKind::CaptchaRequired),
            (ResultsError::network("x"), ErrorKind::NetworkError),
            (ResultsError::invalid_shape(1, "x"), ErrorKind::InvalidResultShape),
            (ResultsError::participant_failed(1, "x"), ErrorKind::ParticipantFetchFailed),
            (ResultsError::Cancelled { result_id: 1 }, ErrorKind::Cancelled),
            (ResultsError::config("x"), ErrorKind::Config),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind);
            assert!(!error.recovery_suggestions().is_empty());
        }
    }

    #[test]
    fn authentication_errors_are_not_retryable() {
        let errors = [
            ResultsError::NotConfigured { reason: "no account".into() },
            ResultsError::LoginFailed { reason: "503".into() },
            ResultsError::InvalidCredentials,
            ResultsError::CaptchaRequired,
        ];

        for error in errors {
            assert!(error.is_authentication());
            assert!(!error.is_retryable());
            assert!(!error.is_throttling());
        }
    }

    #[test]
    fn throttling_detection() {
        assert!(ResultsError::network_with_status("Too Many Requests", 429).is_throttling());
        assert!(ResultsError::network("request LIMIT exceeded").is_throttling());
        assert!(ResultsError::participant_failed(7, "rate limited").is_throttling());
        assert!(!ResultsError::network_with_status("Bad Gateway", 502).is_throttling());
        assert!(!ResultsError::invalid_shape(1, "rate").is_throttling());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + Clone + 'static>() {}
        assert_send_sync_static::<ResultsError>();

        let io = std::io::Error::other("connection reset");
        let error = ResultsError::network_with_source("get_result failed", io);
        let source = std::error::Error::source(&error).expect("source should be kept");
        assert_eq!(source.to_string(), "connection reset");

        // Clones share the same source
        let cloned = error.clone();
        assert!(std::error::Error::source(&cloned).is_some());
    }
}
