//! Settings types.
//!
//! All structs use `#[serde(rename_all = "camelCase", default)]`, so a
//! partial settings file only needs the keys it changes. Durations are
//! stored as milliseconds and exposed as [`std::time::Duration`] through
//! accessor methods.

mod network;
mod routing;

pub use network::{CommandSettings, ConnectionSettings};
pub use routing::{InteractionSettings, RouterSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the tether client.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Remote endpoints and credentials.
    pub endpoint: EndpointSettings,
    /// Live connection tuning.
    pub connection: ConnectionSettings,
    /// Command client tuning.
    pub command: CommandSettings,
    /// Event routing.
    pub router: RouterSettings,
    /// Permission/question handling.
    pub interaction: InteractionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ClientSettings {
    /// Reject values the components cannot operate with.
    ///
    /// A missing endpoint is deliberately not checked here; it surfaces as a
    /// configuration error on the first operation that needs it.
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        self.command.validate()?;
        self.router.validate()?;
        Ok(())
    }
}

/// Where the remote agent lives.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EndpointSettings {
    /// WebSocket URL of the live connection (`ws://` or `wss://`).
    pub live_url: String,
    /// Base URL of the command API (`http://` or `https://`).
    pub command_base_url: String,
    /// Bearer token issued at pairing time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

pub(crate) fn ensure(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(message.to_string()))
    }
}
