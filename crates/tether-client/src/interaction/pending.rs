//! The pending interaction built from a routed event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tether_core::{EventType, InteractionId, RuntimeKind, SessionId};
use tracing::warn;

use crate::router::{Liveness, RoutedEvent};

/// What the agent is asking for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    /// Tool permission.
    Permission,
    /// Multiple-choice question.
    Question,
}

/// How a response reaches the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// Cursor navigation and confirm over the live connection.
    Pty,
    /// One RPC keyed by `tool_use_id`.
    HookBridge,
}

/// An interaction awaiting a response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingInteraction {
    /// Identity used for replacement checks, dedupe, and resolution.
    pub id: InteractionId,
    /// Owning session.
    pub session_id: SessionId,
    /// Runtime the request came from.
    pub runtime: RuntimeKind,
    /// Permission or question.
    pub kind: InteractionKind,
    /// Tool call correlation, when the request carried one.
    pub tool_use_id: Option<String>,
    /// Transport for the response.
    pub mode: InteractionMode,
    /// Options in display order.
    pub options: Vec<String>,
    /// Prompt text, when provided.
    pub prompt: Option<String>,
    /// Whether the request was seen live or replayed.
    pub liveness: Liveness,
    /// The id was generated locally because the request carried none.
    pub minted_id: bool,
    /// When the request was received.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct InteractionPayload {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    options: Vec<OptionRepr>,
    #[serde(default, alias = "question", alias = "message")]
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OptionRepr {
    Label(String),
    Object { label: String },
}

impl OptionRepr {
    fn into_label(self) -> String {
        match self {
            Self::Label(label) | Self::Object { label } => label,
        }
    }
}

impl PendingInteraction {
    /// Build from a `permission.request` or `question` event.
    ///
    /// The id is the payload `request_id`, else the `tool_use_id`, else a
    /// fresh UUID v7, flagged in `minted_id`. Requests with a `tool_use_id`
    /// are answered over the hook bridge, the rest through the terminal.
    pub fn from_event(event: &RoutedEvent) -> Option<Self> {
        let envelope = &event.envelope;
        let kind = match envelope.event_type() {
            EventType::PermissionRequest => InteractionKind::Permission,
            EventType::Question => InteractionKind::Question,
            _ => return None,
        };

        let payload = match envelope.payload_json::<Option<InteractionPayload>>() {
            Ok(payload) => payload.unwrap_or_default(),
            Err(err) => {
                warn!(
                    session_id = %envelope.session_id(),
                    error = %err,
                    "unreadable interaction payload, using defaults"
                );
                InteractionPayload::default()
            }
        };

        let tool_use_id = envelope.tool_use_id().map(str::to_owned);
        let carried = payload
            .request_id
            .filter(|id| !id.is_empty())
            .or_else(|| tool_use_id.clone());
        let minted_id = carried.is_none();
        let id = carried.map_or_else(InteractionId::generate, InteractionId::from);
        let mode = if tool_use_id.is_some() {
            InteractionMode::HookBridge
        } else {
            InteractionMode::Pty
        };

        Some(Self {
            id,
            session_id: envelope.session_id().clone(),
            runtime: envelope.runtime(),
            kind,
            tool_use_id,
            mode,
            options: payload.options.into_iter().map(OptionRepr::into_label).collect(),
            prompt: payload.prompt,
            liveness: event.liveness,
            minted_id,
            created_at: envelope.received_at(),
        })
    }
}
