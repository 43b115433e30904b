// crates/placement-core/tests/solver_unit.rs
// ============================================================================
// Module: Solver and Engine Unit Tests
// Description: Composition, selection, and coordination over a fake catalog.
// Purpose: Validate the constraint algebra, group options, and retry ladder.
// ============================================================================

//! ## Overview
//! Unit-level tests for the solving pipeline over the in-memory fake:
//! - Request validation (empty groups, inverted ranges, forward isolation)
//! - Capability algebra: OR across constraints, AND within, forbid-only
//! - Exclusion propagation into capacity queries
//! - Group options: single provider, split placement, isolation
//! - Deterministic tie-break and repeatability
//! - The retry ladder (contention, conflict, capacity-at-commit)

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::time::Duration;
use std::time::Instant;

use common::FakeCatalog;
use placement_core::CapabilityConstraint;
use placement_core::CatalogError;
use placement_core::Claim;
use placement_core::ClaimEngine;
use placement_core::ClaimError;
use placement_core::ClaimRequest;
use placement_core::ClaimRequestGroup;
use placement_core::ClaimRequestGroupOptions;
use placement_core::ClaimWindow;
use placement_core::ConsumerIdentity;
use placement_core::EngineConfig;
use placement_core::RequestContext;
use placement_core::ResourceClassCode;
use placement_core::ResourceConstraint;
use placement_core::RetryPolicy;
use placement_core::Timestamp;
use placement_core::Uuid;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const CPU: &str = "runm.cpu.shared";
const MEMORY: &str = "runm.memory.bytes";
const AVX: &str = "hw.cpu.x86.avx";
const VMX: &str = "hw.cpu.x86.vmx";
const SSD: &str = "storage.disk.ssd";

fn catalog() -> FakeCatalog {
    FakeCatalog::new(&[CPU, MEMORY], &[AVX, VMX, SSD], &["east", "west"])
}

fn engine(catalog: FakeCatalog) -> ClaimEngine<FakeCatalog> {
    let config = EngineConfig {
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            multiplier: 2,
        },
        ..EngineConfig::default()
    };
    ClaimEngine::new(catalog, config)
}

fn window(claim: i64, release: i64) -> ClaimWindow {
    ClaimWindow {
        claim_time: Timestamp::from_unix_seconds(claim),
        release_time: Timestamp::from_unix_seconds(release),
    }
}

fn cpu_constraint(min: u64, max: u64) -> ResourceConstraint {
    ResourceConstraint {
        resource_class: ResourceClassCode::new(CPU),
        min_amount: min,
        max_amount: max,
        capabilities: None,
    }
}

fn simple_group(constraints: Vec<ResourceConstraint>) -> ClaimRequestGroup {
    ClaimRequestGroup {
        options: ClaimRequestGroupOptions::default(),
        resource_constraints: constraints,
        capability_constraints: Vec::new(),
        provider_group_constraints: None,
        distance_constraints: Vec::new(),
    }
}

fn request(groups: Vec<ClaimRequestGroup>) -> ClaimRequest {
    ClaimRequest {
        consumer: ConsumerIdentity::named("tester"),
        window: window(100, 200),
        request_groups: groups,
    }
}

fn run(engine: &ClaimEngine<FakeCatalog>, request: &ClaimRequest) -> Vec<Claim> {
    engine
        .process_claim_request(&RequestContext::unbounded(), request)
        .expect("claim processing")
}

fn chosen_uuid(claim: &Claim, item: usize) -> &str {
    claim.allocation.items[item].provider.uuid.as_str()
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn rejects_inverted_window() {
    let engine = engine(catalog());
    let mut claim_request = request(vec![simple_group(vec![cpu_constraint(1, 1)])]);
    claim_request.window = window(200, 100);
    let error = engine
        .process_claim_request(&RequestContext::unbounded(), &claim_request)
        .expect_err("inverted window");
    assert!(matches!(error, ClaimError::Validation(_)));
}

#[test]
fn rejects_group_without_resources() {
    let engine = engine(catalog());
    let claim_request = request(vec![simple_group(Vec::new())]);
    let error = engine
        .process_claim_request(&RequestContext::unbounded(), &claim_request)
        .expect_err("no resources");
    assert!(matches!(error, ClaimError::Validation(_)));
}

#[test]
fn rejects_inverted_amount_range() {
    let engine = engine(catalog());
    let claim_request = request(vec![simple_group(vec![cpu_constraint(5, 2)])]);
    let error = engine
        .process_claim_request(&RequestContext::unbounded(), &claim_request)
        .expect_err("min over max");
    assert!(matches!(error, ClaimError::Validation(_)));
}

#[test]
fn rejects_forward_isolation_reference() {
    let engine = engine(catalog());
    let mut group = simple_group(vec![cpu_constraint(1, 1)]);
    group.options.isolate_from = vec![0];
    let claim_request = request(vec![group]);
    let error = engine
        .process_claim_request(&RequestContext::unbounded(), &claim_request)
        .expect_err("self reference");
    assert!(matches!(error, ClaimError::Validation(_)));
}

#[test]
fn rejects_unknown_resource_class() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let claim_request = request(vec![simple_group(vec![ResourceConstraint::exact(
        ResourceClassCode::new("runm.cpu.imaginary"),
        1,
    )])]);
    let error = engine
        .process_claim_request(&RequestContext::unbounded(), &claim_request)
        .expect_err("unknown code");
    assert!(matches!(error, ClaimError::UnknownCode { .. }));
}

#[test]
fn expired_deadline_cancels_before_catalog_work() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let claim_request = request(vec![simple_group(vec![cpu_constraint(1, 1)])]);
    let ctx = RequestContext::with_deadline(Instant::now() - Duration::from_millis(1));
    let error =
        engine.process_claim_request(&ctx, &claim_request).expect_err("expired deadline");
    assert!(matches!(error, ClaimError::Cancelled(_)));
    assert!(engine.store().allocations().is_empty());
}

// ============================================================================
// SECTION: Basic Placement
// ============================================================================

#[test]
fn places_single_resource_on_single_provider() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(2, 2)])]));
    assert_eq!(claims.len(), 1);
    let claim = &claims[0];
    assert_eq!(claim.allocation.items.len(), 1);
    assert_eq!(claim.allocation.items[0].used, 2);
    assert_eq!(claim.item_to_group.get(&0), Some(&0));
    assert_eq!(engine.store().allocations().len(), 1);
}

#[test]
fn no_placement_returns_empty_list_not_error() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 4.0)]);
    let engine = engine(fake);
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(6, 6)])]));
    assert!(claims.is_empty());
    assert!(engine.store().allocations().is_empty());
}

#[test]
fn lowest_provider_id_wins_the_tie_break() {
    let mut fake = catalog();
    fake.add_provider(7, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(3, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(5, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(1, 1)])]));
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0003");
}

#[test]
fn repeated_requests_pick_the_same_provider() {
    let mut fake = catalog();
    fake.add_provider(2, &[], &[], &[(CPU, 64.0)]);
    fake.add_provider(4, &[], &[], &[(CPU, 64.0)]);
    let engine = engine(fake);
    let claim_request = request(vec![simple_group(vec![cpu_constraint(1, 1)])]);
    let first = run(&engine, &claim_request);
    let second = run(&engine, &claim_request);
    assert_eq!(chosen_uuid(&first[0], 0), chosen_uuid(&second[0], 0));
}

// ============================================================================
// SECTION: Capability Algebra
// ============================================================================

#[test]
fn require_clause_filters_to_capable_providers() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(2, &[AVX], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![cpu_constraint(2, 2)]);
    group.capability_constraints = vec![CapabilityConstraint {
        require: vec![AVX.into()],
        any: Vec::new(),
        forbid: Vec::new(),
    }];
    let claims = run(&engine, &request(vec![group]));
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0002");
}

#[test]
fn forbid_only_with_no_match_is_a_no_op() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(2, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![cpu_constraint(1, 1)]);
    group.capability_constraints = vec![CapabilityConstraint {
        require: Vec::new(),
        any: Vec::new(),
        forbid: vec![VMX.into()],
    }];
    let claims = run(&engine, &request(vec![group]));
    assert_eq!(claims.len(), 1);
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0001");
}

#[test]
fn forbidden_providers_never_receive_items() {
    let mut fake = catalog();
    fake.add_provider(1, &[VMX], &[], &[(CPU, 64.0)]);
    fake.add_provider(2, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![cpu_constraint(1, 1)]);
    group.capability_constraints = vec![CapabilityConstraint {
        require: Vec::new(),
        any: Vec::new(),
        forbid: vec![VMX.into()],
    }];
    let claims = run(&engine, &request(vec![group]));
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0002");
}

#[test]
fn capability_constraints_compose_with_or() {
    let mut fake = catalog();
    fake.add_provider(1, &[AVX], &[], &[(CPU, 8.0)]);
    fake.add_provider(2, &[SSD], &[], &[(CPU, 8.0)]);
    fake.add_provider(3, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![cpu_constraint(1, 1)]);
    group.capability_constraints = vec![
        CapabilityConstraint {
            require: vec![AVX.into()],
            any: Vec::new(),
            forbid: Vec::new(),
        },
        CapabilityConstraint {
            require: vec![SSD.into()],
            any: Vec::new(),
            forbid: Vec::new(),
        },
    ];
    // Either alternative is acceptable; the tie-break picks the lowest id
    // from the union {1, 2}.
    let claims = run(&engine, &request(vec![group]));
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0001");
}

#[test]
fn unmatched_positive_clause_fails_the_group() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![cpu_constraint(1, 1)]);
    group.capability_constraints = vec![CapabilityConstraint {
        require: vec![AVX.into()],
        any: Vec::new(),
        forbid: Vec::new(),
    }];
    let claims = run(&engine, &request(vec![group]));
    assert!(claims.is_empty());
}

#[test]
fn resource_scoped_capabilities_filter_the_capacity_query() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 64.0)]);
    fake.add_provider(2, &[AVX], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let mut constraint = cpu_constraint(2, 2);
    constraint.capabilities = Some(CapabilityConstraint {
        require: vec![AVX.into()],
        any: Vec::new(),
        forbid: Vec::new(),
    });
    let claims = run(&engine, &request(vec![simple_group(vec![constraint])]));
    assert_eq!(chosen_uuid(&claims[0], 0), "prov-0002");
}

// ============================================================================
// SECTION: Multi-Group Placement
// ============================================================================

#[test]
fn isolated_groups_land_on_distinct_providers() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(2, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let first = simple_group(vec![cpu_constraint(1, 1)]);
    let mut second = simple_group(vec![cpu_constraint(1, 1)]);
    second.options.isolate_from = vec![0];
    let claims = run(&engine, &request(vec![first, second]));
    let claim = &claims[0];
    assert_eq!(claim.allocation.items.len(), 2);
    assert_ne!(chosen_uuid(claim, 0), chosen_uuid(claim, 1));
    assert_eq!(claim.item_to_group.get(&0), Some(&0));
    assert_eq!(claim.item_to_group.get(&1), Some(&1));
}

#[test]
fn isolation_with_one_provider_yields_no_placement() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let first = simple_group(vec![cpu_constraint(1, 1)]);
    let mut second = simple_group(vec![cpu_constraint(1, 1)]);
    second.options.isolate_from = vec![0];
    let claims = run(&engine, &request(vec![first, second]));
    assert!(claims.is_empty());
}

#[test]
fn single_provider_group_emits_all_items_on_one_provider() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0), (MEMORY, 1024.0)]);
    fake.add_provider(2, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    let group = simple_group(vec![
        cpu_constraint(2, 2),
        ResourceConstraint::exact(ResourceClassCode::new(MEMORY), 512),
    ]);
    let claims = run(&engine, &request(vec![group]));
    let claim = &claims[0];
    assert_eq!(claim.allocation.items.len(), 2);
    assert_eq!(chosen_uuid(claim, 0), chosen_uuid(claim, 1));
    assert_eq!(chosen_uuid(claim, 0), "prov-0001");
}

#[test]
fn split_group_still_composes_resources_with_and() {
    let mut fake = catalog();
    // Provider 1 posts only cpu, provider 2 only memory. Resource
    // constraints AND at the group level, so even a split group needs
    // providers surviving every capacity query.
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    fake.add_provider(2, &[], &[], &[(MEMORY, 1024.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![
        cpu_constraint(2, 2),
        ResourceConstraint::exact(ResourceClassCode::new(MEMORY), 512),
    ]);
    group.options.single_provider = false;
    let claims = run(&engine, &request(vec![group]));
    assert!(claims.is_empty(), "group-wide AND still requires a common provider");
}

#[test]
fn split_group_picks_per_resource_lowest_provider() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0), (MEMORY, 1024.0)]);
    fake.add_provider(2, &[], &[], &[(CPU, 8.0), (MEMORY, 1024.0)]);
    let engine = engine(fake);
    let mut group = simple_group(vec![
        cpu_constraint(2, 2),
        ResourceConstraint::exact(ResourceClassCode::new(MEMORY), 512),
    ]);
    group.options.single_provider = false;
    let claims = run(&engine, &request(vec![group]));
    let claim = &claims[0];
    assert_eq!(chosen_uuid(claim, 0), "prov-0001");
    assert_eq!(chosen_uuid(claim, 1), "prov-0001");
}

// ============================================================================
// SECTION: Retry Ladder
// ============================================================================

#[test]
fn contention_is_retried_and_then_succeeds() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    engine
        .store()
        .inject_persist_failure(CatalogError::Retryable("database is locked".to_string()));
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(1, 1)])]));
    assert_eq!(claims.len(), 1);
    assert_eq!(engine.stats().retries, 1);
}

#[test]
fn contention_exhaustion_surfaces_the_retry_count() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    for _ in 0 .. 4 {
        engine
            .store()
            .inject_persist_failure(CatalogError::Retryable("database is locked".to_string()));
    }
    let error = engine
        .process_claim_request(
            &RequestContext::unbounded(),
            &request(vec![simple_group(vec![cpu_constraint(1, 1)])]),
        )
        .expect_err("exhausted retries");
    let ClaimError::Store(CatalogError::Retryable(reason)) = error else {
        panic!("expected retryable store error");
    };
    assert!(reason.contains("gave up after 3 retries"));
}

#[test]
fn conflict_is_retried_once() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    engine
        .store()
        .inject_persist_failure(CatalogError::Conflict("duplicate allocation".to_string()));
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(1, 1)])]));
    assert_eq!(claims.len(), 1);

    engine
        .store()
        .inject_persist_failure(CatalogError::Conflict("duplicate allocation".to_string()));
    engine
        .store()
        .inject_persist_failure(CatalogError::Conflict("duplicate allocation".to_string()));
    let error = engine
        .process_claim_request(
            &RequestContext::unbounded(),
            &request(vec![simple_group(vec![cpu_constraint(1, 1)])]),
        )
        .expect_err("second conflict surfaces");
    assert!(matches!(error, ClaimError::Conflict { retries: 1 }));
}

#[test]
fn capacity_race_retries_once_at_minimum_amounts() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    engine.store().inject_persist_failure(CatalogError::CapacityExceeded {
        provider: Uuid::new("prov-0001"),
        resource_class: ResourceClassCode::new(CPU),
    });
    let claims = run(&engine, &request(vec![simple_group(vec![cpu_constraint(2, 6)])]));
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].allocation.items[0].used, 2);
}

#[test]
fn capacity_race_without_a_range_surfaces() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 8.0)]);
    let engine = engine(fake);
    engine.store().inject_persist_failure(CatalogError::CapacityExceeded {
        provider: Uuid::new("prov-0001"),
        resource_class: ResourceClassCode::new(CPU),
    });
    let error = engine
        .process_claim_request(
            &RequestContext::unbounded(),
            &request(vec![simple_group(vec![cpu_constraint(4, 4)])]),
        )
        .expect_err("no range to fall back to");
    assert!(matches!(error, ClaimError::CapacityExceeded { .. }));
}

// ============================================================================
// SECTION: Telemetry
// ============================================================================

#[test]
fn stats_classify_outcomes() {
    let mut fake = catalog();
    fake.add_provider(1, &[], &[], &[(CPU, 4.0)]);
    let engine = engine(fake);
    let _ = run(&engine, &request(vec![simple_group(vec![cpu_constraint(1, 1)])]));
    let _ = run(&engine, &request(vec![simple_group(vec![cpu_constraint(32, 32)])]));
    let _ = engine.process_claim_request(
        &RequestContext::unbounded(),
        &request(vec![simple_group(vec![cpu_constraint(9, 1)])]),
    );
    let stats = engine.stats();
    assert_eq!(stats.requested, 3);
    assert_eq!(stats.granted, 1);
    assert_eq!(stats.no_placement, 1);
    assert_eq!(stats.rejected, 1);
}
