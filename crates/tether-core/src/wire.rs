//! Wire frames exchanged with the remote agent.
//!
//! Inbound frames are JSON objects of the form
//! `{type, session_id?, runtime?, tool_use_id?, payload?}`. They are decoded
//! into [`InboundFrame`] at the connection boundary, where tags are still
//! optional. The router promotes a frame to an immutable [`EventEnvelope`]
//! only when both the runtime and the session tag are present.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ErrorCategory;
use crate::ids::SessionId;

// ─────────────────────────────────────────────────────────────────────────────
// Tags
// ─────────────────────────────────────────────────────────────────────────────

/// The agent backend a session belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Claude agent runtime.
    Claude,
    /// Codex agent runtime.
    Codex,
    /// A runtime this client does not know about.
    #[serde(other)]
    Other,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Codex => write!(f, "codex"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for RuntimeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            other => Err(format!("unknown runtime: {other}")),
        }
    }
}

/// Inbound event type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Peer liveness signal.
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Terminal or stream output.
    #[serde(rename = "output")]
    Output,
    /// Conversation message.
    #[serde(rename = "message")]
    Message,
    /// Agent status change (busy, idle, ...).
    #[serde(rename = "status")]
    Status,
    /// Tool permission request.
    #[serde(rename = "permission.request")]
    PermissionRequest,
    /// Multiple-choice question for the user.
    #[serde(rename = "question")]
    Question,
    /// A permission was resolved somewhere else.
    #[serde(rename = "permission.resolved")]
    PermissionResolved,
    /// The remote side resolved which session a window is bound to.
    #[serde(rename = "session.resolved")]
    SessionResolved,
    /// The session ended.
    #[serde(rename = "session.ended")]
    SessionEnded,
    /// Any type this client does not recognise.
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Wire name of this type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Output => "output",
            Self::Message => "message",
            Self::Status => "status",
            Self::PermissionRequest => "permission.request",
            Self::Question => "question",
            Self::PermissionResolved => "permission.resolved",
            Self::SessionResolved => "session.resolved",
            Self::SessionEnded => "session.ended",
            Self::Unknown => "unknown",
        }
    }

    /// Lifecycle and recovery types that pass the runtime gate regardless
    /// of which runtime is selected.
    #[must_use]
    pub fn bypasses_runtime_gate(self) -> bool {
        matches!(
            self,
            Self::SessionResolved | Self::PermissionResolved | Self::SessionEnded
        )
    }

    /// Types that open a pending interaction.
    #[must_use]
    pub fn opens_interaction(self) -> bool {
        matches!(self, Self::PermissionRequest | Self::Question)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound
// ─────────────────────────────────────────────────────────────────────────────

/// A frame could not be decoded. Always a protocol error.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// Not valid JSON, or the wrong shape.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Binary frame that is not UTF-8.
    #[error("binary frame is not valid UTF-8")]
    NotUtf8,
}

impl FrameDecodeError {
    /// Always [`ErrorCategory::Protocol`].
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Protocol
    }
}

#[derive(Deserialize)]
struct WireFrame {
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    runtime: Option<RuntimeKind>,
    #[serde(default)]
    tool_use_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// A decoded inbound frame whose tags are not yet validated.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundFrame {
    /// Event type.
    pub event_type: EventType,
    /// Session tag, if the frame carried a non-empty one.
    pub session_id: Option<SessionId>,
    /// Runtime tag, if present.
    pub runtime: Option<RuntimeKind>,
    /// Tool-use correlation ID, if present.
    pub tool_use_id: Option<String>,
    /// Serialized JSON payload (`null` when absent).
    pub payload: Bytes,
    /// When the connection manager received the frame.
    pub received_at: DateTime<Utc>,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn decode(text: &str, received_at: DateTime<Utc>) -> Result<Self, FrameDecodeError> {
        let wire: WireFrame = serde_json::from_str(text)?;
        let payload = serde_json::to_vec(&wire.payload.unwrap_or(serde_json::Value::Null))?;
        Ok(Self {
            event_type: wire.event_type,
            session_id: wire.session_id.filter(|s| !s.is_empty()).map(SessionId::from),
            runtime: wire.runtime,
            tool_use_id: wire.tool_use_id.filter(|s| !s.is_empty()),
            payload: Bytes::from(payload),
            received_at,
        })
    }

    /// Decode a binary frame carrying UTF-8 JSON.
    pub fn decode_binary(data: &[u8], received_at: DateTime<Utc>) -> Result<Self, FrameDecodeError> {
        let text = std::str::from_utf8(data).map_err(|_| FrameDecodeError::NotUtf8)?;
        Self::decode(text, received_at)
    }
}

/// Which tag an untyped frame was missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MissingTag {
    /// No runtime tag.
    #[error("frame has no runtime tag")]
    Runtime,
    /// No session tag.
    #[error("frame has no session tag")]
    Session,
}

/// An immutable, fully tagged inbound event.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    runtime: RuntimeKind,
    session_id: SessionId,
    tool_use_id: Option<String>,
    event_type: EventType,
    payload: Bytes,
    received_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Build an envelope directly.
    #[must_use]
    pub fn new(
        runtime: RuntimeKind,
        session_id: SessionId,
        tool_use_id: Option<String>,
        event_type: EventType,
        payload: Bytes,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            runtime,
            session_id,
            tool_use_id,
            event_type,
            payload,
            received_at,
        }
    }

    /// Promote a frame. Fails closed when a tag is missing.
    pub fn from_frame(frame: InboundFrame) -> Result<Self, MissingTag> {
        let runtime = frame.runtime.ok_or(MissingTag::Runtime)?;
        let session_id = frame.session_id.ok_or(MissingTag::Session)?;
        Ok(Self {
            runtime,
            session_id,
            tool_use_id: frame.tool_use_id,
            event_type: frame.event_type,
            payload: frame.payload,
            received_at: frame.received_at,
        })
    }

    /// Runtime tag.
    pub fn runtime(&self) -> RuntimeKind {
        self.runtime
    }

    /// Session tag.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Tool-use correlation ID.
    pub fn tool_use_id(&self) -> Option<&str> {
        self.tool_use_id.as_deref()
    }

    /// Event type.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Raw JSON payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Receipt timestamp.
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Deserialize the payload.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outbound
// ─────────────────────────────────────────────────────────────────────────────

/// Allow or deny a permission request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Let the tool run.
    Allow,
    /// Reject the tool call.
    Deny,
}

/// How long a permission decision applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// This call only.
    Once,
    /// The rest of the session.
    Session,
}

/// Cursor movement in a terminal selection prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    /// Move selection up.
    Up,
    /// Move selection down.
    Down,
}

/// Hook-bridge permission response body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    /// Tool call being answered.
    pub tool_use_id: String,
    /// Allow or deny.
    pub decision: Decision,
    /// Once or for the session.
    pub scope: Scope,
}

/// A frame written to the live connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Move the terminal selection.
    Navigate {
        /// Target session.
        session_id: SessionId,
        /// Direction.
        direction: NavDirection,
    },
    /// Confirm the current terminal selection.
    Confirm {
        /// Target session.
        session_id: SessionId,
    },
    /// Free-text input.
    Input {
        /// Target session.
        session_id: SessionId,
        /// Text to send.
        text: String,
    },
    /// Permission response sent over the live connection.
    PermissionResponse(PermissionResponse),
}

impl OutboundFrame {
    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
