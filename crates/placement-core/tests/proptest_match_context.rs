// crates/placement-core/tests/proptest_match_context.rs
// ============================================================================
// Module: Match Context Property-Based Tests
// Description: Property tests for composition invariants.
// Purpose: Hold set laws and disjointness across arbitrary op sequences.
// ============================================================================

//! Property-based tests for match context invariants.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;

use placement_core::MatchContext;
use placement_core::ProviderId;
use placement_core::ProviderIdentity;
use placement_core::Uuid;
use proptest::prelude::*;

// ============================================================================
// SECTION: Strategies
// ============================================================================

/// One composition operation over a small candidate universe.
#[derive(Debug, Clone)]
enum Op {
    And(Vec<u64>),
    Or(Vec<u64>),
    Exclude(Vec<u64>),
}

fn candidate_set(ids: &[u64]) -> BTreeMap<ProviderId, ProviderIdentity> {
    ids.iter()
        .filter_map(|raw| ProviderId::from_raw(*raw))
        .map(|id| {
            (
                id,
                ProviderIdentity {
                    id,
                    uuid: Uuid::new(format!("uuid-{:04}", id.get())),
                },
            )
        })
        .collect()
}

fn id_vec_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1_u64 ..= 12, 0 .. 6)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        id_vec_strategy().prop_map(Op::And),
        id_vec_strategy().prop_map(Op::Or),
        id_vec_strategy().prop_map(Op::Exclude),
    ]
}

fn apply(context: &mut MatchContext, op: &Op) {
    match op {
        Op::And(ids) => {
            let _ = context.match_and(candidate_set(ids));
        }
        Op::Or(ids) => {
            let _ = context.match_or(candidate_set(ids));
        }
        Op::Exclude(ids) => context.exclude_or(candidate_set(ids)),
    }
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn matches_and_exclusions_stay_disjoint(ops in prop::collection::vec(op_strategy(), 0 .. 16)) {
        let mut context = MatchContext::new();
        for op in &ops {
            apply(&mut context, op);
            for id in context.matches().keys() {
                prop_assert!(!context.exclude().contains_key(id));
            }
        }
    }

    #[test]
    fn match_and_never_grows_a_started_set(seed in id_vec_strategy(), next in id_vec_strategy()) {
        let mut context = MatchContext::new();
        context.match_and(candidate_set(&seed));
        let before: Vec<u64> = context.matches().keys().map(|id| id.get()).collect();
        context.match_and(candidate_set(&next));
        for id in context.matches().keys() {
            prop_assert!(before.contains(&id.get()));
            prop_assert!(next.contains(&id.get()));
        }
    }

    #[test]
    fn match_or_never_shrinks_a_set(seed in id_vec_strategy(), next in id_vec_strategy()) {
        let mut context = MatchContext::new();
        context.match_or(candidate_set(&seed));
        let before: Vec<u64> = context.matches().keys().map(|id| id.get()).collect();
        context.match_or(candidate_set(&next));
        for id in &before {
            prop_assert!(context.matches().keys().any(|key| key.get() == *id));
        }
    }

    #[test]
    fn exclude_is_idempotent(ops in prop::collection::vec(op_strategy(), 0 .. 8), ids in id_vec_strategy()) {
        let mut context = MatchContext::new();
        for op in &ops {
            apply(&mut context, op);
        }
        context.exclude_or(candidate_set(&ids));
        let matches_after: Vec<u64> = context.matches().keys().map(|id| id.get()).collect();
        let exclude_after = context.exclude_ids();
        context.exclude_or(candidate_set(&ids));
        let matches_again: Vec<u64> = context.matches().keys().map(|id| id.get()).collect();
        prop_assert_eq!(matches_after, matches_again);
        prop_assert_eq!(exclude_after, context.exclude_ids());
    }

    #[test]
    fn iteration_order_is_ascending(ops in prop::collection::vec(op_strategy(), 0 .. 16)) {
        let mut context = MatchContext::new();
        for op in &ops {
            apply(&mut context, op);
        }
        let ids: Vec<u64> = context.matches().keys().map(|id| id.get()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        prop_assert_eq!(ids, sorted);
    }
}
