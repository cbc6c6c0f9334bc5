//! Command client errors.

use tether_core::{ErrorCategory, TransientCause, errors::classify_error_chain};
use thiserror::Error;

/// A failed command call.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The base URL is missing or unusable.
    #[error("invalid command endpoint: {0}")]
    Config(String),
    /// Reset, timeout, DNS, or TLS failure.
    #[error("{cause}: {source}")]
    Transient {
        /// Which transient failure.
        cause: TransientCause,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },
    /// A transport failure that is not recognised as transient.
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    /// The server rejected our credentials.
    #[error("authentication rejected with status {status}")]
    Authentication {
        /// 401 or 403.
        status: u16,
    },
    /// Any other non-success status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// Request or response body was not the expected JSON.
    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl CommandError {
    /// Error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::FatalConfig,
            Self::Transient { .. } => ErrorCategory::TransientNetwork,
            Self::Request(_) | Self::Json(_) => ErrorCategory::Protocol,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::Status { .. } => ErrorCategory::Application,
        }
    }

    /// Whether the call may be retried.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// HTTP status, when the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status } | Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        let cause = if err.is_timeout() {
            Some(TransientCause::TimedOut)
        } else {
            classify_error_chain(&err)
        };
        match cause {
            Some(cause) => Self::Transient { cause, source: err },
            None => Self::Request(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(!CommandError::Config("missing".into()).is_retryable());
        assert!(!CommandError::Authentication { status: 401 }.is_retryable());
        assert!(
            !CommandError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn categories_and_status() {
        let err = CommandError::Status {
            status: 404,
            body: "not found".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Application);
        assert_eq!(err.status(), Some(404));
        assert_eq!(
            CommandError::Authentication { status: 403 }.category(),
            ErrorCategory::Authentication
        );
        assert_eq!(
            CommandError::Config(String::new()).category(),
            ErrorCategory::FatalConfig
        );
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(CommandError::from(json).category(), ErrorCategory::Protocol);
    }
}
