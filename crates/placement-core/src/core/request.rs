// crates/placement-core/src/core/request.rs
// ============================================================================
// Module: Claim Request Model
// Description: Declarative constraint shapes for placement requests.
// Purpose: Describe resources, capabilities, topology, and adjacency wants.
// Dependencies: crate::core::{catalog, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A claim request carries ordered request groups. Each group bundles
//! resource constraints (AND), capability constraints (OR between them, AND
//! within one), optional provider group constraints, optional distance
//! constraints, and group options controlling provider selection. Groups are
//! solved independently and combined by the allocation builder.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::catalog::ConsumerIdentity;
use crate::core::identifiers::CapabilityCode;
use crate::core::identifiers::DistanceTypeCode;
use crate::core::identifiers::ResourceClassCode;
use crate::core::identifiers::Uuid;
use crate::core::time::ClaimWindow;

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// Capability wants: require all, accept any-of, reject all.
///
/// # Invariants
/// - Any field may be empty; an all-empty constraint contributes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityConstraint {
    /// Capabilities every matched provider must have.
    #[serde(default)]
    pub require: Vec<CapabilityCode>,
    /// Capabilities of which a matched provider must have at least one.
    #[serde(default)]
    pub any: Vec<CapabilityCode>,
    /// Capabilities no matched provider may have.
    #[serde(default)]
    pub forbid: Vec<CapabilityCode>,
}

impl CapabilityConstraint {
    /// Returns whether all clauses are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.any.is_empty() && self.forbid.is_empty()
    }

    /// Returns whether the constraint has a positive (require/any) clause.
    #[must_use]
    pub fn has_positive_clause(&self) -> bool {
        !self.require.is_empty() || !self.any.is_empty()
    }
}

/// A request for an amount range of one resource class.
///
/// # Invariants
/// - `min_amount <= max_amount`; validated at the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConstraint {
    /// Resource class code requested.
    pub resource_class: ResourceClassCode,
    /// Lower bound of the acceptable amount.
    pub min_amount: u64,
    /// Upper bound of the acceptable amount; attempted first.
    pub max_amount: u64,
    /// Optional capability constraint scoped to this resource alone.
    #[serde(default)]
    pub capabilities: Option<CapabilityConstraint>,
}

impl ResourceConstraint {
    /// Creates a fixed-amount constraint (`min == max`).
    #[must_use]
    pub fn exact(resource_class: ResourceClassCode, amount: u64) -> Self {
        Self {
            resource_class,
            min_amount: amount,
            max_amount: amount,
            capabilities: None,
        }
    }

    /// Returns whether the constraint permits a range (`min < max`).
    #[must_use]
    pub const fn has_range(&self) -> bool {
        self.min_amount < self.max_amount
    }
}

/// Provider group membership wants, by group name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderGroupConstraint {
    /// Groups every matched provider must belong to.
    #[serde(default)]
    pub require_groups: Vec<String>,
    /// Groups no matched provider may belong to.
    #[serde(default)]
    pub forbid_groups: Vec<String>,
    /// Groups of which a matched provider must belong to at least one.
    #[serde(default)]
    pub any_groups: Vec<String>,
}

impl ProviderGroupConstraint {
    /// Returns whether all clauses are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require_groups.is_empty() && self.forbid_groups.is_empty() && self.any_groups.is_empty()
    }
}

/// Adjacency want relative to a reference provider.
///
/// # Invariants
/// - Positions are ordinals from the seeded distance ordering; `minimum`
///   defaults to 0 and `maximum` to unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceConstraint {
    /// Reference provider (by uuid) distances are measured against.
    pub provider: Uuid,
    /// Distance type the bound applies to.
    pub distance_type: DistanceTypeCode,
    /// Minimum acceptable distance position.
    #[serde(default)]
    pub minimum: Option<u32>,
    /// Maximum acceptable distance position.
    #[serde(default)]
    pub maximum: Option<u32>,
}

// ============================================================================
// SECTION: Request Groups
// ============================================================================

/// Options governing provider selection for one request group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequestGroupOptions {
    /// All resource constraints in the group must land on a single provider.
    #[serde(default = "default_single_provider")]
    pub single_provider: bool,
    /// Indexes of earlier groups whose chosen providers must be avoided.
    #[serde(default)]
    pub isolate_from: Vec<usize>,
}

/// Returns the default for [`ClaimRequestGroupOptions::single_provider`].
const fn default_single_provider() -> bool {
    true
}

impl Default for ClaimRequestGroupOptions {
    fn default() -> Self {
        Self {
            single_provider: default_single_provider(),
            isolate_from: Vec::new(),
        }
    }
}

/// One independently-solved bundle of constraints.
///
/// # Invariants
/// - Carries at least one resource constraint; validated at the engine
///   boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequestGroup {
    /// Selection options.
    #[serde(default)]
    pub options: ClaimRequestGroupOptions,
    /// Resource constraints, ANDed.
    pub resource_constraints: Vec<ResourceConstraint>,
    /// Capability constraints, ORed between each other.
    #[serde(default)]
    pub capability_constraints: Vec<CapabilityConstraint>,
    /// Optional group membership constraint.
    #[serde(default)]
    pub provider_group_constraints: Option<ProviderGroupConstraint>,
    /// Adjacency constraints, ANDed.
    #[serde(default)]
    pub distance_constraints: Vec<DistanceConstraint>,
}

/// A full claim request over a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Consumer the resulting allocation belongs to.
    pub consumer: ConsumerIdentity,
    /// Requested usage window.
    pub window: ClaimWindow,
    /// Ordered request groups.
    pub request_groups: Vec<ClaimRequestGroup>,
}
