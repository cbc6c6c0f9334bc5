//! Connection errors.

use std::time::Duration;

use tether_core::ErrorCategory;
use thiserror::Error;

/// Why a connect attempt failed.
///
/// Cloneable so it can be carried in [`super::ConnectionState::Failed`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The peer could not be reached (refused, reset, DNS, TLS).
    #[error("unreachable: {0}")]
    Unreachable(String),
    /// The attempt did not complete in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    /// The handshake completed with something that is not our protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Credentials were rejected (HTTP 401/403 on upgrade).
    #[error("authentication rejected: {0}")]
    Authentication(String),
    /// The live URL is missing or unusable.
    #[error("invalid endpoint configuration: {0}")]
    Config(String),
}

impl ConnectError {
    /// Error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unreachable(_) | Self::Timeout(_) => ErrorCategory::TransientNetwork,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Config(_) => ErrorCategory::FatalConfig,
        }
    }

    /// Whether the manager schedules another attempt after this error.
    ///
    /// Handshake protocol errors are reconnected like network errors.
    /// Authentication and configuration errors end in `Failed`.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.category(),
            ErrorCategory::Authentication | ErrorCategory::FatalConfig
        )
    }
}

/// Failure to write an outbound frame.
#[derive(Debug, Error)]
pub enum SendError {
    /// No open transport.
    #[error("not connected")]
    NotConnected,
    /// The writer is not keeping up.
    #[error("outbound queue is full")]
    QueueFull,
    /// The frame could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    /// The manager task has stopped.
    #[error(transparent)]
    Gone(#[from] ManagerGone),
}

/// The manager task is no longer running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("connection manager has shut down")]
pub struct ManagerGone;
