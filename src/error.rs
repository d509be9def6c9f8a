//! Error types for the Sentry Operator

use std::time::Duration;

use thiserror::Error;

use crate::sentry::SentryError;
use crate::store::StoreError;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource store error
    #[error("Resource store error: {0}")]
    Store(#[from] StoreError),

    /// Sentry API error
    #[error("Sentry error: {0}")]
    Sentry(#[from] SentryError),

    /// Version conflicts kept recurring within one reconciliation
    #[error("Gave up on {key} after {attempts} conflicting updates")]
    ConflictRetriesExhausted { key: String, attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Secret key not found
    #[error("Secret key '{key}' not found in secret '{secret}'")]
    SecretKeyNotFound { secret: String, key: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Leader election lost or failed
    #[error("Leader election error: {0}")]
    LeaderElection(String),
}

/// How the dispatcher should schedule the next attempt after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Requeue with bounded exponential backoff
    Backoff,
    /// Requeue at the long fixed interval; only a spec change can help
    Terminal,
}

impl RetryClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RetryClass::Backoff => "retryable",
            RetryClass::Terminal => "terminal",
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            Error::Sentry(e) if !e.class().is_retryable() => RetryClass::Terminal,
            Error::Validation(_) | Error::Config(_) => RetryClass::Terminal,
            _ => RetryClass::Backoff,
        }
    }
}

/// A call abandoned before it completed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class_follows_sentry_classification() {
        assert_eq!(
            Error::Sentry(SentryError::RateLimited).retry_class(),
            RetryClass::Backoff
        );
        assert_eq!(
            Error::Sentry(SentryError::Server {
                status: 502,
                message: "bad gateway".to_string()
            })
            .retry_class(),
            RetryClass::Backoff
        );
        assert_eq!(
            Error::Sentry(SentryError::Validation {
                status: 400,
                message: "bad slug".to_string()
            })
            .retry_class(),
            RetryClass::Terminal
        );
        assert_eq!(
            Error::Sentry(SentryError::NotFound("team".to_string())).retry_class(),
            RetryClass::Backoff
        );
    }

    #[test]
    fn test_local_failures() {
        assert_eq!(
            Error::validation("slug is empty").retry_class(),
            RetryClass::Terminal
        );
        assert_eq!(
            Error::Store(StoreError::Conflict).retry_class(),
            RetryClass::Backoff
        );
        assert_eq!(
            Error::ConflictRetriesExhausted {
                key: "default/alpha".to_string(),
                attempts: 5
            }
            .retry_class(),
            RetryClass::Backoff
        );
    }
}
