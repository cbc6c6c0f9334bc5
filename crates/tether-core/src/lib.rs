//! # tether-core
//!
//! Foundation types shared by every tether crate:
//!
//! - **Branded IDs**: `SessionId`, `InteractionId` as newtypes for type safety
//! - **Wire frames**: inbound JSON frames, routed `EventEnvelope`s, outbound commands
//! - **Errors**: the five-way `ErrorCategory` taxonomy and transport-message classification
//! - **Backoff**: reconnect and command-retry delay math
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod wire;

pub use errors::{ErrorCategory, TransientCause};
pub use ids::{InteractionId, SessionId};
pub use wire::{
    Decision, EventEnvelope, EventType, InboundFrame, NavDirection, OutboundFrame, RuntimeKind,
    Scope,
};
