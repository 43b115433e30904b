// crates/placement-core/src/core/catalog.rs
// ============================================================================
// Module: Catalog Entities
// Description: Providers, inventories, consumers, allocations, and claims.
// Purpose: Define the persistent data model the placement engine solves over.
// Dependencies: crate::core::{identifiers, time}, serde, thiserror
// ============================================================================

//! ## Overview
//! These types mirror the relational catalog: providers publish inventories
//! of resource classes plus capability and group memberships; allocations
//! record consumer usage over a time window. An [`Allocation`] exclusively
//! owns its items; a [`Claim`] exclusively owns its allocation until it is
//! returned to the caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::AllocationId;
use crate::core::identifiers::CapabilityCode;
use crate::core::identifiers::DistanceCode;
use crate::core::identifiers::DistanceTypeCode;
use crate::core::identifiers::PartitionId;
use crate::core::identifiers::ProviderGroupId;
use crate::core::identifiers::ProviderId;
use crate::core::identifiers::ResourceClassCode;
use crate::core::identifiers::Uuid;
use crate::core::time::ClaimWindow;

// ============================================================================
// SECTION: Providers
// ============================================================================

/// Minimal provider identity flowing through candidate sets.
///
/// # Invariants
/// - `id` and `uuid` refer to the same catalog row.
/// - Ordering is `(id, uuid)` ascending; the deterministic tie-break for
///   otherwise-equal candidates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderIdentity {
    /// Internal provider identifier.
    pub id: ProviderId,
    /// External provider identity.
    pub uuid: Uuid,
}

impl PartialOrd for ProviderIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProviderIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id).then_with(|| self.uuid.cmp(&other.uuid))
    }
}

/// Full provider snapshot as read from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provider {
    /// Internal provider identifier.
    pub id: ProviderId,
    /// External provider identity.
    pub uuid: Uuid,
    /// Human-readable provider name (topology-derived, e.g. `east-row0-rack1-node3`).
    pub name: String,
    /// Partition the provider belongs to.
    pub partition_id: PartitionId,
    /// Generation counter bumped on inventory change.
    pub generation: u64,
}

impl Provider {
    /// Returns the provider's candidate identity.
    #[must_use]
    pub fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            id: self.id,
            uuid: self.uuid.clone(),
        }
    }
}

/// Partition snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Internal partition identifier.
    pub id: PartitionId,
    /// External partition identity.
    pub uuid: Uuid,
    /// Human-readable partition name.
    pub name: String,
}

/// Provider group snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderGroup {
    /// Internal provider group identifier.
    pub id: ProviderGroupId,
    /// External provider group identity.
    pub uuid: Uuid,
    /// Topology-derived group name (`site`, `site-rowR`, or `site-rowR-rackK`).
    pub name: String,
}

// ============================================================================
// SECTION: Inventory
// ============================================================================

/// A provider's posted supply of one resource class.
///
/// # Invariants
/// - `reserved <= total`, `min_unit <= max_unit <= total`, `step_size >= 1`,
///   `allocation_ratio >= 1.0`; enforced by [`Inventory::validate`] at the
///   catalog registration boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Resource class this row supplies.
    pub resource_class: ResourceClassCode,
    /// Total posted units.
    pub total: u64,
    /// Units withheld from placement.
    pub reserved: u64,
    /// Smallest allocatable amount.
    pub min_unit: u64,
    /// Largest allocatable amount.
    pub max_unit: u64,
    /// Allocation amounts must be multiples of this.
    pub step_size: u64,
    /// Overcommit multiplier applied to `total - reserved`.
    pub allocation_ratio: f64,
}

impl Inventory {
    /// Creates an inventory row with the conventional defaults
    /// (`reserved = 0`, `min_unit = 1`, `max_unit = total`, `step_size = 1`,
    /// `allocation_ratio = 1.0`).
    #[must_use]
    pub fn with_total(resource_class: ResourceClassCode, total: u64) -> Self {
        Self {
            resource_class,
            total,
            reserved: 0,
            min_unit: 1,
            max_unit: total,
            step_size: 1,
            allocation_ratio: 1.0,
        }
    }

    /// Validates the inventory invariants.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError`] naming the violated bound.
    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.reserved > self.total {
            return Err(InventoryError::ReservedExceedsTotal {
                resource_class: self.resource_class.clone(),
                reserved: self.reserved,
                total: self.total,
            });
        }
        if self.min_unit > self.max_unit || self.max_unit > self.total {
            return Err(InventoryError::UnitBounds {
                resource_class: self.resource_class.clone(),
                min_unit: self.min_unit,
                max_unit: self.max_unit,
                total: self.total,
            });
        }
        if self.step_size < 1 {
            return Err(InventoryError::StepSize {
                resource_class: self.resource_class.clone(),
            });
        }
        if self.allocation_ratio < 1.0 {
            return Err(InventoryError::AllocationRatio {
                resource_class: self.resource_class.clone(),
                allocation_ratio: self.allocation_ratio,
            });
        }
        Ok(())
    }

    /// Returns `(total - reserved) * allocation_ratio`, the real-valued
    /// upper bound on summed usage in any overlapping window.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Capacity bounds are approximate by design of the ratio.")]
    pub fn effective_capacity(&self) -> f64 {
        (self.total.saturating_sub(self.reserved)) as f64 * self.allocation_ratio
    }
}

/// Inventory invariant violations.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InventoryError {
    /// `reserved` exceeds `total`.
    #[error("inventory for {resource_class}: reserved {reserved} exceeds total {total}")]
    ReservedExceedsTotal {
        /// Resource class of the offending row.
        resource_class: ResourceClassCode,
        /// Reserved units.
        reserved: u64,
        /// Total units.
        total: u64,
    },
    /// `min_unit <= max_unit <= total` does not hold.
    #[error(
        "inventory for {resource_class}: unit bounds min {min_unit} / max {max_unit} / total {total}"
    )]
    UnitBounds {
        /// Resource class of the offending row.
        resource_class: ResourceClassCode,
        /// Smallest allocatable amount.
        min_unit: u64,
        /// Largest allocatable amount.
        max_unit: u64,
        /// Total units.
        total: u64,
    },
    /// `step_size` below 1.
    #[error("inventory for {resource_class}: step_size must be >= 1")]
    StepSize {
        /// Resource class of the offending row.
        resource_class: ResourceClassCode,
    },
    /// `allocation_ratio` below 1.0.
    #[error("inventory for {resource_class}: allocation_ratio {allocation_ratio} must be >= 1.0")]
    AllocationRatio {
        /// Resource class of the offending row.
        resource_class: ResourceClassCode,
        /// Offending ratio.
        allocation_ratio: f64,
    },
}

// ============================================================================
// SECTION: Consumers
// ============================================================================

/// Consumer identity supplied with a claim request.
///
/// # Invariants
/// - When `uuid` is absent the catalog derives identity from `name` on
///   first claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerIdentity {
    /// Human-readable consumer name.
    pub name: String,
    /// Optional external identity; assigned on first claim when absent.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Optional owning project.
    #[serde(default)]
    pub project: Option<String>,
    /// Optional owning user.
    #[serde(default)]
    pub user: Option<String>,
}

impl ConsumerIdentity {
    /// Creates a consumer identity from a name alone.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: None,
            project: None,
            user: None,
        }
    }
}

// ============================================================================
// SECTION: Allocations
// ============================================================================

/// One provider/resource-class usage record inside an allocation.
///
/// # Invariants
/// - The provider has an inventory row for `resource_class`.
/// - Immutable once the owning allocation is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationItem {
    /// Provider the usage is placed on.
    pub provider: ProviderIdentity,
    /// Resource class consumed.
    pub resource_class: ResourceClassCode,
    /// Amount consumed for the allocation's window.
    pub used: u64,
}

/// A committed record of consumer usage over a time window.
///
/// # Invariants
/// - The allocation exclusively owns its items.
/// - For every `(provider, resource_class)` and instant inside `window`,
///   summed `used` across overlapping allocations stays within effective
///   capacity; the catalog re-checks this at persist time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Consumer the allocation belongs to.
    pub consumer: ConsumerIdentity,
    /// Half-open usage window.
    pub window: ClaimWindow,
    /// Usage records, in request-group order.
    pub items: Vec<AllocationItem>,
}

/// Persisted allocation handle returned by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationReceipt {
    /// Identifier of the persisted allocation row.
    pub allocation_id: AllocationId,
}

// ============================================================================
// SECTION: Claims
// ============================================================================

/// Result of a solved claim request.
///
/// # Invariants
/// - `item_to_group` maps every item index in `allocation.items` to the
///   request group that produced it.
/// - The claim exclusively owns its allocation until returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// The materialized allocation.
    pub allocation: Allocation,
    /// Item index to request group index.
    pub item_to_group: BTreeMap<usize, usize>,
}

// ============================================================================
// SECTION: Seeds and Registrations
// ============================================================================

/// Seed row for a resource class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClassSeed {
    /// Resource class code.
    pub code: ResourceClassCode,
    /// Human-readable description.
    pub description: String,
}

/// Seed row for a capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySeed {
    /// Capability code.
    pub code: CapabilityCode,
    /// Human-readable description.
    pub description: String,
}

/// Seed rows for a distance type and its ordered codes.
///
/// # Invariants
/// - `distances` is ordered nearest to furthest; list position becomes the
///   catalog `position` ordinal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceTypeSeed {
    /// Distance type code.
    pub code: DistanceTypeCode,
    /// Distance codes, nearest first.
    pub distances: Vec<DistanceCode>,
}

/// Full enum seed applied once at catalog load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSeed {
    /// Resource classes to seed.
    pub resource_classes: Vec<ResourceClassSeed>,
    /// Capabilities to seed.
    pub capabilities: Vec<CapabilitySeed>,
    /// Distance types and their ordered codes.
    pub distance_types: Vec<DistanceTypeSeed>,
}

/// Distance edge from a provider to a provider group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDistanceSpec {
    /// Target provider group name.
    pub group: String,
    /// Distance type code.
    pub distance_type: DistanceTypeCode,
    /// Distance code within the type.
    pub distance: DistanceCode,
}

/// Everything needed to register one provider atomically.
///
/// # Invariants
/// - `groups` name provider groups already registered in the catalog.
/// - `inventories` pass [`Inventory::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRegistration {
    /// Provider name.
    pub name: String,
    /// External provider identity.
    pub uuid: Uuid,
    /// Partition the provider belongs to (by uuid).
    pub partition: Uuid,
    /// Posted inventory rows.
    pub inventories: Vec<Inventory>,
    /// Capability codes the provider advertises.
    pub capabilities: Vec<CapabilityCode>,
    /// Names of provider groups the provider is a member of.
    pub groups: Vec<String>,
    /// Distance edges to provider groups.
    pub distances: Vec<ProviderDistanceSpec>,
}
