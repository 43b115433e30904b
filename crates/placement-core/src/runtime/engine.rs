// crates/placement-core/src/runtime/engine.rs
// ============================================================================
// Module: Claim Engine
// Description: Top-level claim coordination, persistence, and retry ladder.
// Purpose: Solve request groups, assemble allocations, and persist claims.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The claim engine is the single canonical execution path for placement.
//! It validates the request, solves each request group in order, assembles
//! one allocation with the item-to-group index map, and persists it
//! transactionally. "No placement" is a successful outcome returning an
//! empty claim list; retryable contention is absorbed by a bounded
//! exponential backoff ladder, and a capacity race at commit time is
//! retried once at the request's minimum amounts when it carries a range.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use thiserror::Error;

use crate::core::Allocation;
use crate::core::Claim;
use crate::core::ClaimRequest;
use crate::core::ProviderId;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogMetadata;
use crate::interfaces::CatalogStore;
use crate::interfaces::CodeKind;
use crate::runtime::builder::GroupPlacement;
use crate::runtime::builder::build_group_placement;
use crate::runtime::cache::CatalogCache;
use crate::runtime::solver::GroupSolver;
use crate::runtime::telemetry::ClaimOutcome;
use crate::runtime::telemetry::EngineStats;
use crate::runtime::telemetry::EngineStatsSnapshot;

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request cancellation context.
///
/// # Invariants
/// - Deadline expiry is checked at every catalog query boundary; no partial
///   state survives a cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    /// Optional absolute deadline.
    deadline: Option<Instant>,
}

impl RequestContext {
    /// Creates a context without a deadline.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { deadline: None }
    }

    /// Creates a context expiring after the given timeout.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Creates a context with an absolute deadline.
    #[must_use]
    pub const fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Returns whether a deadline is set.
    #[must_use]
    pub const fn has_deadline(&self) -> bool {
        self.deadline.is_some()
    }

    /// Checks the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::Cancelled`] when the deadline has passed.
    pub fn check_deadline(&self) -> Result<(), ClaimError> {
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(ClaimError::Cancelled("request deadline exceeded".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Backoff ladder for retryable catalog contention.
///
/// # Invariants
/// - The n-th retry (1-based) sleeps `base_delay * multiplier^(n-1)`
///   before re-running the claim; the defaults give 10, 40, 160 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum whole-claim retries for retryable errors.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per subsequent retry.
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Returns the backoff delay before the given 1-based retry.
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
            multiplier: 4,
        }
    }
}

/// Claim engine configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Candidate fan-out cap per catalog query.
    pub candidate_limit: usize,
    /// Retry ladder for contention.
    pub retry: RetryPolicy,
    /// Default per-claim timeout applied when the caller sets no deadline.
    pub claim_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidate_limit: 50,
            retry: RetryPolicy::default(),
            claim_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Claim processing errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling. "No placement" is not
///   an error; it is an empty claim list.
#[derive(Debug, Error)]
pub enum ClaimError {
    /// Request violates the claim schema.
    #[error("invalid claim request: {0}")]
    Validation(String),
    /// A code in the request is not present in the catalog.
    #[error("unknown {kind} code: {code}")]
    UnknownCode {
        /// Code namespace.
        kind: CodeKind,
        /// The unresolved code.
        code: String,
    },
    /// The capacity re-check failed at commit even after the bounded retry.
    #[error("capacity exceeded after {retries} retries")]
    CapacityExceeded {
        /// Capacity retries performed before surfacing.
        retries: u32,
    },
    /// A unique-constraint conflict persisted after its retry.
    #[error("catalog conflict after {retries} retries")]
    Conflict {
        /// Conflict retries performed before surfacing.
        retries: u32,
    },
    /// Deadline exceeded or the caller cancelled.
    #[error("claim cancelled: {0}")]
    Cancelled(String),
    /// Any other catalog failure.
    #[error("catalog store failure: {0}")]
    Store(CatalogError),
}

impl From<CatalogError> for ClaimError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::UnknownCode { kind, code } => Self::UnknownCode { kind, code },
            other => Self::Store(other),
        }
    }
}

// ============================================================================
// SECTION: Claim Engine
// ============================================================================

/// Claim coordinator over a catalog store.
///
/// # Invariants
/// - One engine serves many concurrent request threads; per-request state
///   is never shared.
#[derive(Debug)]
pub struct ClaimEngine<S> {
    /// Catalog backend.
    store: S,
    /// Engine configuration.
    config: EngineConfig,
    /// One-shot catalog metadata cache.
    cache: CatalogCache,
    /// Claim processing counters.
    stats: EngineStats,
}

impl<S: CatalogStore> ClaimEngine<S> {
    /// Creates an engine over a catalog store.
    #[must_use]
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            cache: CatalogCache::new(),
            stats: EngineStats::new(),
        }
    }

    /// Returns the underlying catalog store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns a snapshot of the engine's processing counters.
    #[must_use]
    pub fn stats(&self) -> EngineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Solves and persists a claim request.
    ///
    /// Returns one claim on success and an empty list when no provider set
    /// satisfies the request.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] per the error table: validation and unknown
    /// codes fail before catalog work; capacity, conflict, and contention
    /// failures surface after their bounded retries; deadline expiry
    /// surfaces as `Cancelled`.
    pub fn process_claim_request(
        &self,
        ctx: &RequestContext,
        request: &ClaimRequest,
    ) -> Result<Vec<Claim>, ClaimError> {
        let started = Instant::now();
        let ctx = if ctx.has_deadline() {
            *ctx
        } else {
            RequestContext::with_timeout(self.config.claim_timeout)
        };
        let mut retries: u64 = 0;
        let result = self.process_inner(&ctx, request, &mut retries);
        let outcome = match &result {
            Ok(claims) if claims.is_empty() => ClaimOutcome::NoPlacement,
            Ok(_) => ClaimOutcome::Granted,
            Err(ClaimError::Validation(_) | ClaimError::UnknownCode { .. }) => {
                ClaimOutcome::Rejected
            }
            Err(ClaimError::Cancelled(_)) => ClaimOutcome::Cancelled,
            Err(_) => ClaimOutcome::Failed,
        };
        self.stats.record_outcome(outcome, started.elapsed(), retries);
        result
    }

    /// Runs the validation, solve, and persist pipeline with the retry
    /// ladder around retryable failures.
    fn process_inner(
        &self,
        ctx: &RequestContext,
        request: &ClaimRequest,
        retries: &mut u64,
    ) -> Result<Vec<Claim>, ClaimError> {
        validate_claim_request(request)?;
        let metadata = self.cache.get_or_load(&self.store)?;
        let mut conflict_retried = false;
        let mut contention_retries: u32 = 0;
        loop {
            match self.attempt_claim(ctx, request, metadata) {
                Ok(claims) => return Ok(claims),
                Err(ClaimError::Store(CatalogError::Retryable(reason))) => {
                    if contention_retries >= self.config.retry.max_retries {
                        return Err(ClaimError::Store(CatalogError::Retryable(format!(
                            "{reason} (gave up after {contention_retries} retries)"
                        ))));
                    }
                    contention_retries += 1;
                    *retries += 1;
                    thread::sleep(self.config.retry.delay_before(contention_retries));
                }
                Err(ClaimError::Store(CatalogError::Conflict(_))) => {
                    if conflict_retried {
                        return Err(ClaimError::Conflict { retries: 1 });
                    }
                    conflict_retried = true;
                    *retries += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    /// One full solve-build-persist attempt.
    fn attempt_claim(
        &self,
        ctx: &RequestContext,
        request: &ClaimRequest,
        metadata: &CatalogMetadata,
    ) -> Result<Vec<Claim>, ClaimError> {
        let solver = GroupSolver::new(&self.store, metadata, self.config.candidate_limit);
        let mut placements: Vec<GroupPlacement> = Vec::with_capacity(request.request_groups.len());
        for group in &request.request_groups {
            ctx.check_deadline()?;
            let Some(solution) = solver.solve(ctx, &request.window, group)? else {
                return Ok(Vec::new());
            };
            let isolated = isolation_set(&placements, &group.options.isolate_from);
            let Some(placement) = build_group_placement(group, &solution, &isolated) else {
                return Ok(Vec::new());
            };
            placements.push(placement);
        }

        let (allocation, item_to_group) = assemble_allocation(request, &placements);
        ctx.check_deadline()?;
        match self.store.persist_allocation(&allocation) {
            Ok(_) => Ok(vec![Claim {
                allocation,
                item_to_group,
            }]),
            Err(CatalogError::CapacityExceeded { .. }) if request_has_range(request) => {
                let reduced = reduce_to_minimums(request, allocation);
                ctx.check_deadline()?;
                match self.store.persist_allocation(&reduced) {
                    Ok(_) => Ok(vec![Claim {
                        allocation: reduced,
                        item_to_group,
                    }]),
                    Err(CatalogError::CapacityExceeded { .. }) => {
                        Err(ClaimError::CapacityExceeded { retries: 1 })
                    }
                    Err(other) => Err(other.into()),
                }
            }
            Err(CatalogError::CapacityExceeded { .. }) => {
                Err(ClaimError::CapacityExceeded { retries: 0 })
            }
            Err(other) => Err(other.into()),
        }
    }
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates the structural claim request invariants.
///
/// # Errors
///
/// Returns [`ClaimError::Validation`] naming the first violation.
pub fn validate_claim_request(request: &ClaimRequest) -> Result<(), ClaimError> {
    if !request.window.is_well_formed() {
        return Err(ClaimError::Validation(
            "claim_time must precede release_time".to_string(),
        ));
    }
    if request.request_groups.is_empty() {
        return Err(ClaimError::Validation("request has no request groups".to_string()));
    }
    for (group_index, group) in request.request_groups.iter().enumerate() {
        if group.resource_constraints.is_empty() {
            return Err(ClaimError::Validation(format!(
                "request group {group_index} has no resource constraints"
            )));
        }
        for constraint in &group.resource_constraints {
            if constraint.min_amount > constraint.max_amount {
                return Err(ClaimError::Validation(format!(
                    "resource constraint {} in group {group_index}: min_amount {} exceeds \
                     max_amount {}",
                    constraint.resource_class, constraint.min_amount, constraint.max_amount
                )));
            }
        }
        for isolated in &group.options.isolate_from {
            if *isolated >= group_index {
                return Err(ClaimError::Validation(format!(
                    "group {group_index} isolate_from {isolated} must reference an earlier group"
                )));
            }
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Assembly Helpers
// ============================================================================

/// Collects the providers chosen by the groups named in `isolate_from`.
fn isolation_set(placements: &[GroupPlacement], isolate_from: &[usize]) -> BTreeSet<ProviderId> {
    let mut isolated = BTreeSet::new();
    for index in isolate_from {
        if let Some(placement) = placements.get(*index) {
            isolated.extend(placement.chosen.iter().copied());
        }
    }
    isolated
}

/// Concatenates group placements into one allocation plus the item index to
/// request group map.
fn assemble_allocation(
    request: &ClaimRequest,
    placements: &[GroupPlacement],
) -> (Allocation, BTreeMap<usize, usize>) {
    let mut items = Vec::new();
    let mut item_to_group = BTreeMap::new();
    for (group_index, placement) in placements.iter().enumerate() {
        for item in &placement.items {
            item_to_group.insert(items.len(), group_index);
            items.push(item.clone());
        }
    }
    (
        Allocation {
            consumer: request.consumer.clone(),
            window: request.window,
            items,
        },
        item_to_group,
    )
}

/// Returns whether any resource constraint permits a `min < max` range.
fn request_has_range(request: &ClaimRequest) -> bool {
    request
        .request_groups
        .iter()
        .any(|group| group.resource_constraints.iter().any(|constraint| constraint.has_range()))
}

/// Re-emits the allocation with each item's `used` dropped to its
/// constraint's `min_amount`.
///
/// Items appear in group order, one per resource constraint, so the walk
/// mirrors the builder's emission order.
fn reduce_to_minimums(request: &ClaimRequest, mut allocation: Allocation) -> Allocation {
    let mut item_index = 0;
    for group in &request.request_groups {
        for constraint in &group.resource_constraints {
            if let Some(item) = allocation.items.get_mut(item_index) {
                item.used = constraint.min_amount;
            }
            item_index += 1;
        }
    }
    allocation
}
