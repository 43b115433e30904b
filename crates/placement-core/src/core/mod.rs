// crates/placement-core/src/core/mod.rs
// ============================================================================
// Module: Placement Core Types
// Description: Canonical catalog, request, and time structures.
// Purpose: Provide stable, serializable types for the placement engine.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Core types define the catalog data model (providers, inventories,
//! allocations), the claim request shapes, and the time window model. These
//! types are the canonical source of truth for any derived surfaces.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod catalog;
pub mod identifiers;
pub mod request;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::Allocation;
pub use catalog::AllocationItem;
pub use catalog::AllocationReceipt;
pub use catalog::CapabilitySeed;
pub use catalog::CatalogSeed;
pub use catalog::Claim;
pub use catalog::ConsumerIdentity;
pub use catalog::DistanceTypeSeed;
pub use catalog::Inventory;
pub use catalog::InventoryError;
pub use catalog::Partition;
pub use catalog::Provider;
pub use catalog::ProviderDistanceSpec;
pub use catalog::ProviderGroup;
pub use catalog::ProviderIdentity;
pub use catalog::ProviderRegistration;
pub use catalog::ResourceClassSeed;
pub use identifiers::AllocationId;
pub use identifiers::CapabilityCode;
pub use identifiers::CapabilityId;
pub use identifiers::ConsumerId;
pub use identifiers::DistanceCode;
pub use identifiers::DistanceTypeCode;
pub use identifiers::DistanceTypeId;
pub use identifiers::PartitionId;
pub use identifiers::ProviderGroupId;
pub use identifiers::ProviderId;
pub use identifiers::ResourceClassCode;
pub use identifiers::ResourceClassId;
pub use identifiers::Uuid;
pub use request::CapabilityConstraint;
pub use request::ClaimRequest;
pub use request::ClaimRequestGroup;
pub use request::ClaimRequestGroupOptions;
pub use request::DistanceConstraint;
pub use request::ProviderGroupConstraint;
pub use request::ResourceConstraint;
pub use time::ClaimWindow;
pub use time::Timestamp;
