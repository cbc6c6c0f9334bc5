//! Auto-approve eligibility and per-process dedupe.

use std::collections::HashSet;

use tether_core::{InteractionId, RuntimeKind};

use super::pending::{InteractionKind, PendingInteraction};
use crate::router::Liveness;

/// Pure eligibility check.
///
/// True only when auto-approve is on and the request is a live permission
/// from the eligible runtime whose id came from the agent and has not been
/// auto-approved before. A locally generated id cannot be recognised on
/// redelivery, so such requests are left to the user.
pub fn is_eligible(
    enabled: bool,
    eligible_runtime: RuntimeKind,
    pending: &PendingInteraction,
    seen: &HashSet<InteractionId>,
) -> bool {
    enabled
        && pending.kind == InteractionKind::Permission
        && pending.runtime == eligible_runtime
        && pending.liveness == Liveness::Live
        && !pending.minted_id
        && !seen.contains(&pending.id)
}

/// Ids already considered for auto-approve in this process.
#[derive(Debug, Default)]
pub struct AutoApproveLedger {
    seen: HashSet<InteractionId>,
}

impl AutoApproveLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate eligibility and, when eligible, record the id so the same
    /// interaction never qualifies again.
    pub fn claim(
        &mut self,
        enabled: bool,
        eligible_runtime: RuntimeKind,
        pending: &PendingInteraction,
    ) -> bool {
        let eligible = is_eligible(enabled, eligible_runtime, pending, &self.seen);
        if eligible {
            let _ = self.seen.insert(pending.id.clone());
        }
        eligible
    }

    /// Whether `id` has been auto-approved.
    pub fn contains(&self, id: &InteractionId) -> bool {
        self.seen.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::pending::InteractionMode;
    use chrono::Utc;
    use tether_core::SessionId;

    fn pending(id: &str) -> PendingInteraction {
        PendingInteraction {
            id: InteractionId::from(id),
            session_id: SessionId::from("s1"),
            runtime: RuntimeKind::Claude,
            kind: InteractionKind::Permission,
            tool_use_id: Some(id.to_string()),
            mode: InteractionMode::HookBridge,
            options: vec![],
            prompt: None,
            liveness: Liveness::Live,
            minted_id: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn eligible_exactly_once_per_id() {
        let mut ledger = AutoApproveLedger::new();
        let x = pending("X");
        assert!(ledger.claim(true, RuntimeKind::Claude, &x));
        assert!(!ledger.claim(true, RuntimeKind::Claude, &x));
        assert!(ledger.contains(&x.id));
        assert!(ledger.claim(true, RuntimeKind::Claude, &pending("Y")));
    }

    #[test]
    fn each_condition_is_required() {
        let seen = HashSet::new();
        let base = pending("X");
        assert!(is_eligible(true, RuntimeKind::Claude, &base, &seen));
        assert!(!is_eligible(false, RuntimeKind::Claude, &base, &seen));
        assert!(!is_eligible(true, RuntimeKind::Codex, &base, &seen));

        let replayed = PendingInteraction {
            liveness: Liveness::Replayed,
            ..base.clone()
        };
        assert!(!is_eligible(true, RuntimeKind::Claude, &replayed, &seen));

        let question = PendingInteraction {
            kind: InteractionKind::Question,
            ..base.clone()
        };
        assert!(!is_eligible(true, RuntimeKind::Claude, &question, &seen));

        let minted = PendingInteraction {
            minted_id: true,
            ..base.clone()
        };
        assert!(!is_eligible(true, RuntimeKind::Claude, &minted, &seen));

        let seen: HashSet<_> = [InteractionId::from("X")].into_iter().collect();
        assert!(!is_eligible(true, RuntimeKind::Claude, &base, &seen));
    }

    #[test]
    fn ineligible_evaluation_does_not_consume_id() {
        let mut ledger = AutoApproveLedger::new();
        let x = pending("X");
        assert!(!ledger.claim(false, RuntimeKind::Claude, &x));
        assert!(ledger.claim(true, RuntimeKind::Claude, &x));
    }
}
