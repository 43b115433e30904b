// crates/placement-core/tests/match_context_unit.rs
// ============================================================================
// Module: Match Context Unit Tests
// Description: Composition algebra tests for the per-group match context.
// Purpose: Validate AND/OR/exclude semantics and the sentinel result type.
// ============================================================================

//! ## Overview
//! Unit-level tests for the candidate composition state:
//! - `match_and`/`match_or` seeding and set semantics
//! - `started_filtering` distinguishing "no filter yet" from "emptied"
//! - Exclusion precedence over matches (disjointness invariant)
//! - `ConstraintResult` sentinel behavior

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;

use placement_core::ConstraintResult;
use placement_core::MatchContext;
use placement_core::ProviderId;
use placement_core::ProviderIdentity;
use placement_core::Uuid;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn identity(raw: u64) -> ProviderIdentity {
    ProviderIdentity {
        id: ProviderId::from_raw(raw).expect("nonzero provider id"),
        uuid: Uuid::new(format!("uuid-{raw:04}")),
    }
}

fn candidate_set(ids: &[u64]) -> BTreeMap<ProviderId, ProviderIdentity> {
    ids.iter().map(|raw| (identity(*raw).id, identity(*raw))).collect()
}

fn ids_of(context: &MatchContext) -> Vec<u64> {
    context.matches().keys().map(|id| id.get()).collect()
}

// ============================================================================
// SECTION: Seeding Semantics
// ============================================================================

#[test]
fn match_and_seeds_before_filtering_starts() {
    let mut context = MatchContext::new();
    assert!(!context.started_filtering());
    assert!(context.match_and(candidate_set(&[1, 2, 3])));
    assert!(context.started_filtering());
    assert_eq!(ids_of(&context), vec![1, 2, 3]);
}

#[test]
fn match_or_seeds_before_filtering_starts() {
    let mut context = MatchContext::new();
    assert!(context.match_or(candidate_set(&[4, 5])));
    assert!(context.started_filtering());
    assert_eq!(ids_of(&context), vec![4, 5]);
}

#[test]
fn empty_seed_still_starts_filtering() {
    let mut context = MatchContext::new();
    assert!(!context.match_and(candidate_set(&[])));
    assert!(context.started_filtering());
    assert!(!context.has_matches());
}

// ============================================================================
// SECTION: Set Semantics
// ============================================================================

#[test]
fn match_and_intersects_after_start() {
    let mut context = MatchContext::new();
    context.match_and(candidate_set(&[1, 2, 3]));
    assert!(context.match_and(candidate_set(&[2, 3, 4])));
    assert_eq!(ids_of(&context), vec![2, 3]);
}

#[test]
fn match_and_empty_intersection_reports_failure() {
    let mut context = MatchContext::new();
    context.match_and(candidate_set(&[1, 2]));
    assert!(!context.match_and(candidate_set(&[3, 4])));
    assert!(!context.has_matches());
    assert!(context.started_filtering());
}

#[test]
fn match_or_unions_after_start() {
    let mut context = MatchContext::new();
    context.match_or(candidate_set(&[1]));
    assert!(context.match_or(candidate_set(&[3])));
    assert_eq!(ids_of(&context), vec![1, 3]);
}

// ============================================================================
// SECTION: Exclusions
// ============================================================================

#[test]
fn exclude_or_does_not_start_filtering() {
    let mut context = MatchContext::new();
    context.exclude_or(candidate_set(&[9]));
    assert!(!context.started_filtering());
    assert_eq!(context.exclude_ids(), vec![ProviderId::from_raw(9).expect("nonzero")]);
}

#[test]
fn exclude_or_removes_existing_matches() {
    let mut context = MatchContext::new();
    context.match_and(candidate_set(&[1, 2, 3]));
    context.exclude_or(candidate_set(&[2]));
    assert_eq!(ids_of(&context), vec![1, 3]);
}

#[test]
fn excluded_providers_never_rejoin() {
    let mut context = MatchContext::new();
    context.exclude_or(candidate_set(&[2]));
    context.match_and(candidate_set(&[1, 2, 3]));
    assert_eq!(ids_of(&context), vec![1, 3]);
    context.match_or(candidate_set(&[2, 4]));
    assert_eq!(ids_of(&context), vec![1, 3, 4]);
}

#[test]
fn empty_exclusion_changes_nothing() {
    let mut context = MatchContext::new();
    context.match_and(candidate_set(&[1, 2]));
    let before = context.matches().clone();
    context.exclude_or(candidate_set(&[]));
    assert_eq!(context.matches(), &before);
    assert!(context.exclude().is_empty());
}

// ============================================================================
// SECTION: Constraint Result
// ============================================================================

#[test]
fn matched_constructor_enforces_disjointness() {
    let result = ConstraintResult::matched(candidate_set(&[1, 2, 3]), candidate_set(&[2]));
    let ConstraintResult::Matched { matches, exclude } = result else {
        panic!("expected matched result");
    };
    assert!(matches.keys().all(|id| !exclude.contains_key(id)));
    assert_eq!(matches.len(), 2);
}

#[test]
fn sentinels_are_distinct() {
    assert_ne!(ConstraintResult::NoMatches, ConstraintResult::NoExclude);
    let empty = ConstraintResult::matched(BTreeMap::new(), BTreeMap::new());
    assert_ne!(empty, ConstraintResult::NoMatches);
}
