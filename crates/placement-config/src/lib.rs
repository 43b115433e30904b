// crates/placement-config/src/lib.rs
// ============================================================================
// Module: Placement Config Library
// Description: Descriptor model, validation, and catalog loading.
// Purpose: Parse deployment/claim YAML and load catalogs reproducibly.
// Dependencies: placement-core, serde, serde_yaml, sha2, time
// ============================================================================

//! ## Overview
//! This crate carries the declarative outer shell of the placement engine:
//! the deployment descriptor (topology layout plus per-site inventory
//! profiles), the claim descriptor (the YAML rendering of a claim
//! request), and the loader that seeds and populates any
//! [`placement_core::CatalogStore`]. Descriptor identity is derived, never
//! random, so repeated loads address the same rows.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod claim;
pub mod deployment;
pub mod identity;
pub mod loader;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Descriptor parse and validation errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// YAML or file read failure.
    #[error("descriptor parse error: {0}")]
    Parse(String),
    /// Parsed descriptor violates its invariants.
    #[error("descriptor validation error: {0}")]
    Validation(String),
}

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use claim::CapabilitySpec;
pub use claim::ClaimDescriptor;
pub use claim::ConsumerSpec;
pub use claim::DistanceSpec;
pub use claim::GroupConstraintSpec;
pub use claim::OptionsSpec;
pub use claim::RequestGroupSpec;
pub use claim::ResourceSpec;
pub use claim::TimeSpec;
pub use deployment::DeploymentDescriptor;
pub use deployment::InventorySpec;
pub use deployment::LayoutSpec;
pub use deployment::ProfileSpec;
pub use deployment::ProviderGroupSpec;
pub use deployment::TopologyName;
pub use identity::derive_uuid;
pub use loader::DeploymentSummary;
pub use loader::LoaderError;
pub use loader::load_deployment;
pub use loader::well_known_seed;
