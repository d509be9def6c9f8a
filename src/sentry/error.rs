//! Sentry API failures and their classification

use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::error::Interrupted;

/// Result type for Sentry API calls
pub type SentryResult<T> = std::result::Result<T, SentryError>;

/// Coarse failure classes the reconciler decides on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    RateLimited,
    ServerError,
    Validation,
    Transport,
}

impl ErrorClass {
    /// Whether a later attempt with the same spec can succeed
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Validation)
    }
}

/// A failed Sentry API call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SentryError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("sentry server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("invalid request ({status}): {message}")]
    Validation { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

/// Error body returned by the Sentry API
#[derive(Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

impl SentryError {
    /// Build an error from a non-success HTTP response
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.detail)
            .unwrap_or_else(|| body.trim().to_string());
        let message = if message.is_empty() {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        } else {
            message
        };

        match status {
            StatusCode::NOT_FOUND => SentryError::NotFound(message),
            StatusCode::CONFLICT => SentryError::Conflict(message),
            StatusCode::TOO_MANY_REQUESTS => SentryError::RateLimited,
            s if s.is_server_error() => SentryError::Server {
                status: s.as_u16(),
                message,
            },
            s => SentryError::Validation {
                status: s.as_u16(),
                message,
            },
        }
    }

    /// Transport status code carried by the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            SentryError::NotFound(_) => Some(404),
            SentryError::Conflict(_) => Some(409),
            SentryError::RateLimited => Some(429),
            SentryError::Server { status, .. } | SentryError::Validation { status, .. } => {
                Some(*status)
            }
            SentryError::Transport(_) | SentryError::Timeout(_) | SentryError::Cancelled => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            SentryError::NotFound(_) => ErrorClass::NotFound,
            SentryError::Conflict(_) => ErrorClass::Conflict,
            SentryError::RateLimited => ErrorClass::RateLimited,
            SentryError::Server { .. } => ErrorClass::ServerError,
            SentryError::Validation { .. } => ErrorClass::Validation,
            SentryError::Transport(_) | SentryError::Timeout(_) | SentryError::Cancelled => {
                ErrorClass::Transport
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }
}

impl From<reqwest::Error> for SentryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SentryError::Transport(format!("timeout: {}", err));
        }
        if let Some(status) = err.status() {
            return SentryError::from_response(status, &err.to_string());
        }
        SentryError::Transport(err.to_string())
    }
}

impl From<Interrupted> for SentryError {
    fn from(interrupted: Interrupted) -> Self {
        match interrupted {
            Interrupted::TimedOut(after) => SentryError::Timeout(after),
            Interrupted::Cancelled => SentryError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_map_to_classes() {
        let cases = [
            (StatusCode::NOT_FOUND, ErrorClass::NotFound),
            (StatusCode::CONFLICT, ErrorClass::Conflict),
            (StatusCode::TOO_MANY_REQUESTS, ErrorClass::RateLimited),
            (StatusCode::INTERNAL_SERVER_ERROR, ErrorClass::ServerError),
            (StatusCode::BAD_GATEWAY, ErrorClass::ServerError),
            (StatusCode::BAD_REQUEST, ErrorClass::Validation),
            (StatusCode::FORBIDDEN, ErrorClass::Validation),
        ];

        for (status, class) in cases {
            let err = SentryError::from_response(status, "");
            assert_eq!(err.class(), class, "status {}", status);
            assert_eq!(err.status(), Some(status.as_u16()));
        }
    }

    #[test]
    fn test_only_validation_is_terminal() {
        assert!(!ErrorClass::Validation.is_retryable());
        assert!(ErrorClass::RateLimited.is_retryable());
        assert!(ErrorClass::ServerError.is_retryable());
        assert!(ErrorClass::Transport.is_retryable());
        assert!(ErrorClass::Conflict.is_retryable());
    }

    #[test]
    fn test_rate_limited_message() {
        let err = SentryError::from_response(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(err.to_string(), "rate limited");
    }

    #[test]
    fn test_detail_is_extracted_from_json_body() {
        let err = SentryError::from_response(
            StatusCode::BAD_REQUEST,
            r#"{"detail": "slug must be lowercase"}"#,
        );
        assert_eq!(
            err,
            SentryError::Validation {
                status: 400,
                message: "slug must be lowercase".to_string()
            }
        );
    }

    #[test]
    fn test_interruptions_are_transport_failures() {
        let timed_out = SentryError::from(Interrupted::TimedOut(Duration::from_secs(3)));
        assert_eq!(timed_out.class(), ErrorClass::Transport);
        assert_eq!(SentryError::from(Interrupted::Cancelled).class(), ErrorClass::Transport);
        assert_eq!(timed_out.status(), None);
    }
}
