//! Property-based tests for audit chain state derivation
//!
//! Request state is derived by folding the event chain, so bugs here
//! corrupt the whole workflow. These tests check the invariants that must
//! hold for any event sequence, not just the ones the service happens to
//! produce.

use proptest::prelude::*;

use movement_approval::context::{ApprovalStatus, AuditEventKind, RequestContext};

// These property tests cover:
//
// 1. Base case - an empty chain is a draft
// 2. Idempotency - deriving twice gives the same answer
// 3. Terminal rejection - no later event resurrects a rejected request
// 4. Level monotonicity - granted levels never decrease as events append
// 5. Serialization correctness - the derived state survives CBOR
//
// Authorization and eligibility are service-layer concerns and are
// exercised in the integration scenarios instead.

/// Strategy to generate one audit event
fn event_kind_strategy() -> impl Strategy<Value = AuditEventKind> {
    prop_oneof![
        any::<u32>().prop_map(|h| AuditEventKind::Submitted {
            details_hash: format!("hash_{h}"),
        }),
        (1u32..6, prop::collection::vec("[a-z]{3,8}", 0..3)).prop_map(|(level, approvers)| {
            AuditEventKind::ApprovalRequested { level, approvers }
        }),
        (1u32..6, prop::option::of("[a-z ]{0,20}")).prop_map(|(level, comment)| {
            AuditEventKind::Approved { level, comment }
        }),
        "[a-z ]{1,20}".prop_map(|reason| AuditEventKind::Rejected { reason }),
        (1u32..6, prop::collection::vec("[a-z]{3,8}", 0..3)).prop_map(|(level, notified)| {
            AuditEventKind::Escalated { level, notified }
        }),
        Just(AuditEventKind::Posted),
    ]
}

fn chain_strategy() -> impl Strategy<Value = Vec<AuditEventKind>> {
    prop::collection::vec(event_kind_strategy(), 0..12)
}

fn context_from(events: &[AuditEventKind]) -> RequestContext {
    let mut ctx = RequestContext::new("mvr-prop");
    for kind in events {
        ctx.append("actor", kind.clone());
    }
    ctx
}

proptest! {
    #[test]
    fn empty_chain_is_always_draft(_seed in any::<u8>()) {
        let ctx = RequestContext::new("mvr-prop");
        prop_assert_eq!(ctx.current_status(), ApprovalStatus::Draft);
        prop_assert_eq!(ctx.current_level(), 0);
        prop_assert_eq!(ctx.pending_level(), 1);
        prop_assert_eq!(ctx.pending_approvers(), None);
    }

    #[test]
    fn derivation_is_idempotent(events in chain_strategy()) {
        let ctx = context_from(&events);
        prop_assert_eq!(ctx.current_status(), ctx.current_status());
        prop_assert_eq!(ctx.current_level(), ctx.current_level());
    }

    #[test]
    fn rejection_is_stable_under_later_events(
        events in chain_strategy(),
        later in chain_strategy(),
    ) {
        let mut ctx = context_from(&events);
        ctx.append("actor", AuditEventKind::Rejected { reason: "no".into() });
        for kind in later {
            ctx.append("actor", kind);
        }
        prop_assert_eq!(ctx.current_status(), ApprovalStatus::Rejected);
    }

    #[test]
    fn granted_levels_never_decrease(events in chain_strategy()) {
        let mut ctx = RequestContext::new("mvr-prop");
        let mut previous = ctx.current_level();
        for kind in events {
            ctx.append("actor", kind);
            let level = ctx.current_level();
            prop_assert!(level >= previous);
            previous = level;
        }
    }

    #[test]
    fn pending_level_is_always_one_past_granted(events in chain_strategy()) {
        let ctx = context_from(&events);
        prop_assert_eq!(ctx.pending_level(), ctx.current_level() + 1);
    }

    #[test]
    fn derived_state_survives_cbor(events in chain_strategy()) {
        let ctx = context_from(&events);
        let encoding = minicbor::to_vec(&ctx).unwrap();
        let decoded: RequestContext = minicbor::decode(&encoding).unwrap();
        prop_assert_eq!(decoded.current_status(), ctx.current_status());
        prop_assert_eq!(decoded.current_level(), ctx.current_level());
        prop_assert_eq!(decoded.history(), ctx.history());
    }

    #[test]
    fn escalation_widens_the_pending_approver_set(
        approvers in prop::collection::vec("[a-z]{3,8}", 1..4),
    ) {
        let mut ctx = RequestContext::new("mvr-prop");
        ctx.append("actor", AuditEventKind::Submitted { details_hash: "h".into() });
        ctx.append("system", AuditEventKind::ApprovalRequested {
            level: 1,
            approvers: approvers.clone(),
        });
        prop_assert_eq!(ctx.pending_approvers(), Some(approvers.clone()));
        prop_assert_eq!(ctx.current_status(), ApprovalStatus::Pending(1));

        ctx.append("system", AuditEventKind::Escalated {
            level: 1,
            notified: vec!["warehouseadmin".into()],
        });
        let mut widened = approvers.clone();
        widened.push("warehouseadmin".into());
        prop_assert_eq!(ctx.pending_approvers(), Some(widened));
        prop_assert_eq!(ctx.current_status(), ApprovalStatus::Escalated(1));
    }
}
