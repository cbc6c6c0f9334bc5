//! Runtime- and session-scoped delivery of inbound events.
//!
//! Frames become [`EventEnvelope`]s here. A frame without a runtime or
//! session tag is dropped. An envelope then passes the runtime gate and
//! goes to one of three places:
//!
//! - the active session: delivered as [`Liveness::Live`];
//! - a registered but inactive session: appended to its replay buffer and
//!   delivered as [`Liveness::Replayed`] on activation, ahead of any newer
//!   live event;
//! - an unknown session: recorded in the quarantine ring and never
//!   delivered.
//!
//! [`EventEnvelope`]: tether_core::EventEnvelope

mod buffer;
mod gate;
mod quarantine;
mod routing;
mod task;

pub use buffer::SessionBuffer;
pub use gate::{DropReason, admit};
pub use quarantine::{Quarantine, QuarantineEntry};
pub use routing::{ActivationReport, EventRouter, Liveness, RouteOutcome, RoutedEvent};
pub use task::{RouterGone, RouterHandle};
