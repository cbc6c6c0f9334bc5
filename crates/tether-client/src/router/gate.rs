//! Tag validation and the runtime gate.

use tether_core::wire::{EventEnvelope, InboundFrame, MissingTag};
use tether_core::RuntimeKind;

/// Why a frame was not routed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No runtime tag.
    MissingRuntime,
    /// No session tag.
    MissingSession,
    /// Tagged with a runtime other than the selected one.
    RuntimeMismatch,
}

impl DropReason {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingRuntime => "missing_runtime",
            Self::MissingSession => "missing_session",
            Self::RuntimeMismatch => "runtime_mismatch",
        }
    }
}

impl From<MissingTag> for DropReason {
    fn from(tag: MissingTag) -> Self {
        match tag {
            MissingTag::Runtime => Self::MissingRuntime,
            MissingTag::Session => Self::MissingSession,
        }
    }
}

/// Promote a frame and apply the runtime gate.
///
/// Missing tags fail closed for every event type. Lifecycle types on the
/// allow-list skip only the runtime comparison.
pub fn admit(frame: InboundFrame, selected: RuntimeKind) -> Result<EventEnvelope, DropReason> {
    let envelope = EventEnvelope::from_frame(frame)?;
    if envelope.runtime() == selected || envelope.event_type().bypasses_runtime_gate() {
        Ok(envelope)
    } else {
        Err(DropReason::RuntimeMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn frame(json: &str) -> InboundFrame {
        InboundFrame::decode(json, Utc::now()).unwrap()
    }

    #[test]
    fn matching_runtime_passes() {
        let env = admit(
            frame(r#"{"type":"output","runtime":"claude","session_id":"s1"}"#),
            RuntimeKind::Claude,
        )
        .unwrap();
        assert_eq!(env.session_id().as_str(), "s1");
    }

    #[test]
    fn mismatch_is_dropped() {
        assert_eq!(
            admit(
                frame(r#"{"type":"output","runtime":"codex","session_id":"s1"}"#),
                RuntimeKind::Claude
            ),
            Err(DropReason::RuntimeMismatch)
        );
    }

    #[test]
    fn allow_list_bypasses_mismatch() {
        for kind in ["session.resolved", "permission.resolved", "session.ended"] {
            let json = format!(r#"{{"type":"{kind}","runtime":"codex","session_id":"s1"}}"#);
            assert!(admit(frame(&json), RuntimeKind::Claude).is_ok(), "{kind}");
        }
    }

    #[test]
    fn missing_tags_fail_closed_even_on_allow_list() {
        assert_eq!(
            admit(frame(r#"{"type":"output","session_id":"s1"}"#), RuntimeKind::Claude),
            Err(DropReason::MissingRuntime)
        );
        assert_eq!(
            admit(frame(r#"{"type":"session.ended","session_id":"s1"}"#), RuntimeKind::Claude),
            Err(DropReason::MissingRuntime)
        );
        assert_eq!(
            admit(frame(r#"{"type":"session.resolved","runtime":"claude"}"#), RuntimeKind::Claude),
            Err(DropReason::MissingSession)
        );
    }
}
