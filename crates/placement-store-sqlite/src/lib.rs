// crates/placement-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Catalog Store
// Description: Durable CatalogStore backend using SQLite WAL.
// Purpose: Provide persistence and candidate queries for the placement engine.
// Dependencies: placement-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`placement_core::CatalogStore`]: the
//! relational catalog of providers, inventories, capabilities, groups, and
//! allocations, plus the parameterized candidate queries the solver composes
//! over. Allocation persistence runs inside an immediate transaction whose
//! last step re-evaluates the time-windowed capacity invariant, so
//! concurrent claims serialize on the write connection and exactly one of
//! two conflicting claims wins.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod catalog;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::SqliteCatalog;
pub use catalog::SqliteCatalogConfig;
pub use catalog::SqliteCatalogError;
pub use catalog::SqliteCatalogStatsSnapshot;
pub use catalog::SqliteJournalMode;
pub use catalog::SqliteSyncMode;
