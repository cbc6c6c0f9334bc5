//! Connection state and the snapshot published to observers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::errors::ConnectError;

/// Lifecycle state of the live connection. Exactly one holds at a time.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ConnectionState {
    /// No transport and no attempt scheduled.
    #[default]
    Disconnected,
    /// First attempt after `connect()` is in flight.
    Connecting,
    /// Transport is open.
    Connected {
        /// When the transport opened.
        since: DateTime<Utc>,
    },
    /// Waiting for, or running, retry `attempt` (1-based).
    Reconnecting {
        /// Retry number.
        attempt: u32,
        /// Backoff delay scheduled before this retry.
        next_delay: Duration,
    },
    /// Gave up. Terminal until an explicit `connect()`.
    Failed {
        /// The error that ended the last attempt.
        reason: ConnectError,
    },
}

impl ConnectionState {
    /// Whether the transport is open.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Reachability reported by the platform's path monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NetworkPath {
    /// A usable route exists.
    #[default]
    Satisfied,
    /// No route.
    Unsatisfied,
}

/// Foreground/background phase of the host app.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AppPhase {
    /// Visible and running.
    #[default]
    Foreground,
    /// Suspended by the OS.
    Background,
}

/// Read-only view of the manager, published on every change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Last time any inbound frame arrived.
    pub last_activity_at: Option<Instant>,
    /// Whether the app is backgrounded.
    pub suspended: bool,
    /// Last reported network path.
    pub network: NetworkPath,
}

/// Out-of-band notifications that need user action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionSignal {
    /// The peer rejected our credentials. Re-pairing is required.
    AuthenticationRequired {
        /// Rejection detail.
        message: String,
    },
}
