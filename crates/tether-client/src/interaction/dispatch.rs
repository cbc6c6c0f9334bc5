//! Response transports.
//!
//! Hook-bridge interactions are answered with one RPC keyed by
//! `tool_use_id`. Terminal interactions are answered by moving the prompt
//! cursor to the chosen option and confirming it.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::wire::PermissionResponse;
use tether_core::{Decision, ErrorCategory, InteractionId, NavDirection, OutboundFrame, Scope, SessionId};
use thiserror::Error;
use tracing::debug;

use super::machine::Response;
use super::pending::{InteractionMode, PendingInteraction};
use crate::command::{CommandClient, CommandError};
use crate::connection::{ConnectionHandle, SendError};

/// A response could not be delivered.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No interaction is pending for the session.
    #[error("no pending interaction for session {0}")]
    NoPending(SessionId),
    /// The interaction was already answered, or is being answered.
    #[error("interaction {0} is already resolved")]
    AlreadyResolved(InteractionId),
    /// A terminal prompt was replaced before the response was sent.
    #[error("interaction {0} is no longer on screen")]
    Superseded(InteractionId),
    /// No option matches the response.
    #[error("no option matches the response")]
    NoMatchingOption,
    /// The response kind cannot travel over this interaction's transport.
    #[error("{0}")]
    Unsupported(&'static str),
    /// Hook-bridge RPC failed.
    #[error("hook bridge: {0}")]
    HookBridge(#[from] CommandError),
    /// Terminal input could not be written.
    #[error("terminal input: {0}")]
    Terminal(#[from] SendError),
}

impl DispatchError {
    /// Error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HookBridge(err) => err.category(),
            Self::Terminal(SendError::Encode(_)) => ErrorCategory::Protocol,
            Self::Terminal(_) => ErrorCategory::TransientNetwork,
            _ => ErrorCategory::Application,
        }
    }
}

/// Sends hook-bridge permission responses.
#[async_trait]
pub trait HookBridge: Send + Sync {
    /// Deliver one permission response.
    async fn respond(&self, response: &PermissionResponse) -> Result<(), DispatchError>;
}

#[async_trait]
impl HookBridge for CommandClient {
    async fn respond(&self, response: &PermissionResponse) -> Result<(), DispatchError> {
        self.respond_permission(response).await?;
        Ok(())
    }
}

/// Writes frames to the live terminal session.
#[async_trait]
pub trait TerminalInput: Send + Sync {
    /// Write one frame.
    async fn send_frame(&self, frame: OutboundFrame) -> Result<(), DispatchError>;
}

#[async_trait]
impl TerminalInput for ConnectionHandle {
    async fn send_frame(&self, frame: OutboundFrame) -> Result<(), DispatchError> {
        self.send(frame).await?;
        Ok(())
    }
}

/// Routes a response to the transport the interaction requires.
#[derive(Clone)]
pub struct Dispatcher {
    hook_bridge: Arc<dyn HookBridge>,
    terminal: Arc<dyn TerminalInput>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher over the two transports.
    pub fn new(hook_bridge: Arc<dyn HookBridge>, terminal: Arc<dyn TerminalInput>) -> Self {
        Self {
            hook_bridge,
            terminal,
        }
    }

    /// Deliver `response` for `pending`.
    pub async fn dispatch(
        &self,
        pending: &PendingInteraction,
        response: &Response,
    ) -> Result<(), DispatchError> {
        match (pending.mode, pending.tool_use_id.as_deref()) {
            (InteractionMode::HookBridge, Some(tool_use_id)) => {
                let Response::Permission { decision, scope } = *response else {
                    return Err(DispatchError::Unsupported(
                        "option choices cannot be sent over the hook bridge",
                    ));
                };
                self.hook_bridge
                    .respond(&PermissionResponse {
                        tool_use_id: tool_use_id.to_owned(),
                        decision,
                        scope,
                    })
                    .await
            }
            _ => {
                let frames = navigation_plan(&pending.session_id, &pending.options, response)?;
                debug!(
                    session_id = %pending.session_id,
                    frames = frames.len(),
                    "sending terminal navigation"
                );
                for frame in frames {
                    self.terminal.send_frame(frame).await?;
                }
                Ok(())
            }
        }
    }
}

/// Frames that select the chosen option from a cursor on the first one.
pub fn navigation_plan(
    session_id: &SessionId,
    options: &[String],
    response: &Response,
) -> Result<Vec<OutboundFrame>, DispatchError> {
    let index = match *response {
        Response::Choice { index } if index < options.len() => index,
        Response::Choice { .. } => return Err(DispatchError::NoMatchingOption),
        Response::Permission { decision, scope } => {
            option_for(options, decision, scope).ok_or(DispatchError::NoMatchingOption)?
        }
    };
    let mut frames: Vec<OutboundFrame> = std::iter::repeat_with(|| OutboundFrame::Navigate {
        session_id: session_id.clone(),
        direction: NavDirection::Down,
    })
    .take(index)
    .collect();
    frames.push(OutboundFrame::Confirm {
        session_id: session_id.clone(),
    });
    Ok(frames)
}

/// Index of the terminal option matching a permission decision.
///
/// Labels are compared case-insensitively after any leading `1.` style
/// numbering. With no options, allow confirms the highlighted entry and deny
/// has nothing to select.
pub fn option_for(options: &[String], decision: Decision, scope: Scope) -> Option<usize> {
    if options.is_empty() {
        return (decision == Decision::Allow).then_some(0);
    }
    let labels: Vec<String> = options.iter().map(|o| normalize(o)).collect();
    let affirmative = |label: &str| ["yes", "allow", "approve"].iter().any(|p| label.starts_with(p));
    let persistent = |label: &str| {
        ["don't ask", "do not ask", "always", "session"]
            .iter()
            .any(|p| label.contains(p))
    };

    match (decision, scope) {
        (Decision::Deny, _) => labels
            .iter()
            .position(|l| ["no", "deny", "reject"].iter().any(|p| l.starts_with(p)))
            .or(Some(options.len() - 1)),
        (Decision::Allow, Scope::Session) => labels
            .iter()
            .position(|l| affirmative(l) && persistent(l))
            .or_else(|| labels.iter().position(|l| affirmative(l))),
        (Decision::Allow, Scope::Once) => labels
            .iter()
            .position(|l| affirmative(l) && !persistent(l))
            .or(Some(0)),
    }
}

fn normalize(label: &str) -> String {
    label
        .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c.is_whitespace())
        .to_lowercase()
}
