//! Permission and question handling.
//!
//! Each session has at most one [`PendingInteraction`]. A new request
//! replaces the old one. Resolution follows snapshot-then-dispatch: the
//! response is sent for the interaction captured when the decision was
//! made, and on completion the slot is cleared only if it still holds that
//! same interaction.
//!
//! ```text
//! Created ─▶ AutoApproveEvaluated ─▶ Responding ─▶ Resolved
//!    │                                   │
//!    └──────────── Replaced ◀────────────┘ (slot taken by a newer request)
//! ```

mod auto_approve;
mod dispatch;
mod machine;
mod pending;

pub use auto_approve::{AutoApproveLedger, is_eligible};
pub use dispatch::{
    DispatchError, Dispatcher, HookBridge, TerminalInput, navigation_plan, option_for,
};
pub use machine::{
    InteractionEvent, InteractionMachine, ResolutionOrigin, ResolutionRecord, Response,
};
pub use pending::{InteractionKind, InteractionMode, PendingInteraction};
