// crates/placement-core/src/runtime/mod.rs
// ============================================================================
// Module: Placement Runtime
// Description: Constraint composition, selection, and claim coordination.
// Purpose: Execute claim requests against a catalog backend.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Runtime modules implement the solving pipeline: the match context
//! composition algebra, the per-group solver, the allocation builder, the
//! claim engine with its retry ladder, the one-shot metadata cache, and the
//! engine telemetry counters. All entry points call into the same engine
//! logic to keep placement deterministic.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod builder;
pub mod cache;
pub mod context;
pub mod engine;
pub mod solver;
pub mod telemetry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use builder::GroupPlacement;
pub use builder::build_group_placement;
pub use cache::CatalogCache;
pub use context::ConstraintResult;
pub use context::MatchContext;
pub use engine::ClaimEngine;
pub use engine::ClaimError;
pub use engine::EngineConfig;
pub use engine::RequestContext;
pub use engine::RetryPolicy;
pub use engine::validate_claim_request;
pub use solver::GroupSolution;
pub use solver::GroupSolver;
pub use telemetry::CLAIM_LATENCY_BUCKETS_MS;
pub use telemetry::ClaimOutcome;
pub use telemetry::EngineStats;
pub use telemetry::EngineStatsSnapshot;
