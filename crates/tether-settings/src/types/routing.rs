//! Event routing and interaction settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::RuntimeKind;

use super::ensure;
use crate::errors::Result;

/// Event router settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterSettings {
    /// Runtime whose events are delivered at startup.
    pub selected_runtime: RuntimeKind,
    /// Envelopes an inactive session may buffer before the buffer is discarded.
    pub session_buffer_capacity: usize,
    /// Idle time after which an inactive session's buffer is discarded.
    pub session_buffer_ttl_ms: u64,
    /// Diagnostic entries kept for unknown sessions (oldest dropped first).
    pub quarantine_capacity: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            selected_runtime: RuntimeKind::Claude,
            session_buffer_capacity: 2_000,
            session_buffer_ttl_ms: 1_800_000,
            quarantine_capacity: 256,
        }
    }
}

impl RouterSettings {
    /// Session buffer TTL.
    pub fn session_buffer_ttl(&self) -> Duration {
        Duration::from_millis(self.session_buffer_ttl_ms)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        ensure(
            self.session_buffer_capacity >= 1,
            "sessionBufferCapacity must be at least 1",
        )?;
        ensure(self.session_buffer_ttl_ms > 0, "sessionBufferTtlMs must be positive")?;
        ensure(
            self.quarantine_capacity >= 1,
            "quarantineCapacity must be at least 1",
        )
    }
}

/// Permission and question handling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InteractionSettings {
    /// Resolve live permission requests without asking.
    pub auto_approve: bool,
    /// The only runtime auto-approve applies to.
    pub auto_approve_runtime: RuntimeKind,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            auto_approve: false,
            auto_approve_runtime: RuntimeKind::Claude,
        }
    }
}
