//! Live-connection and command-client settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ensure;
use crate::errors::Result;

/// Live connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Silence longer than this while connected forces a reconnect.
    pub heartbeat_timeout_ms: u64,
    /// How often the silence check runs.
    pub heartbeat_check_interval_ms: u64,
    /// First reconnect delay.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap.
    pub reconnect_max_delay_ms: u64,
    /// Failed retries before giving up in `Failed`.
    pub max_reconnect_attempts: u32,
    /// Upper bound on a single connect attempt.
    pub connect_timeout_ms: u64,
    /// Delay after returning to the foreground before reconnecting.
    pub foreground_grace_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 45_000,
            heartbeat_check_interval_ms: 45_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 5,
            connect_timeout_ms: 10_000,
            foreground_grace_ms: 500,
        }
    }
}

impl ConnectionSettings {
    /// Heartbeat timeout.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Heartbeat check interval.
    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_interval_ms)
    }

    /// Reconnect base delay.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Reconnect delay cap.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Connect attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Foreground grace delay.
    pub fn foreground_grace(&self) -> Duration {
        Duration::from_millis(self.foreground_grace_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure(self.heartbeat_timeout_ms > 0, "heartbeatTimeoutMs must be positive")?;
        ensure(
            self.heartbeat_check_interval_ms > 0,
            "heartbeatCheckIntervalMs must be positive",
        )?;
        ensure(
            self.reconnect_base_delay_ms <= self.reconnect_max_delay_ms,
            "reconnectBaseDelayMs must not exceed reconnectMaxDelayMs",
        )?;
        ensure(
            self.max_reconnect_attempts >= 1,
            "maxReconnectAttempts must be at least 1",
        )?;
        ensure(self.connect_timeout_ms > 0, "connectTimeoutMs must be positive")
    }
}

/// Command client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandSettings {
    /// Request timeout for loopback / private-LAN destinations.
    pub local_timeout_ms: u64,
    /// Request timeout for everything else.
    pub remote_timeout_ms: u64,
    /// Timeout of the dedicated health check.
    pub health_timeout_ms: u64,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base of the retry backoff.
    pub retry_base_delay_ms: u64,
    /// Backoff multiplier for local destinations.
    pub local_backoff_multiplier: f64,
    /// Backoff multiplier for remote destinations.
    pub remote_backoff_multiplier: f64,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            local_timeout_ms: 30_000,
            remote_timeout_ms: 120_000,
            health_timeout_ms: 5_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            local_backoff_multiplier: 1.0,
            remote_backoff_multiplier: 2.0,
        }
    }
}

impl CommandSettings {
    /// Local request timeout.
    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }

    /// Remote request timeout.
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    /// Health check timeout.
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Retry base delay.
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure(self.local_timeout_ms > 0, "localTimeoutMs must be positive")?;
        ensure(self.remote_timeout_ms > 0, "remoteTimeoutMs must be positive")?;
        ensure(self.health_timeout_ms > 0, "healthTimeoutMs must be positive")?;
        ensure(
            self.local_backoff_multiplier.is_finite() && self.local_backoff_multiplier >= 0.0,
            "localBackoffMultiplier must be a non-negative number",
        )?;
        ensure(
            self.remote_backoff_multiplier.is_finite() && self.remote_backoff_multiplier >= 0.0,
            "remoteBackoffMultiplier must be a non-negative number",
        )
    }
}
