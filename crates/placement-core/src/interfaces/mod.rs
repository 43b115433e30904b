// crates/placement-core/src/interfaces/mod.rs
// ============================================================================
// Module: Placement Interfaces
// Description: Backend-agnostic contracts between the solver and the catalog.
// Purpose: Define the query and persistence surfaces the engine runs against.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how the placement engine talks to a catalog backend
//! without embedding backend-specific details. Candidate queries return
//! provider identities in ascending id order so composition and tie-breaks
//! stay deterministic. Implementations must fail closed on missing or
//! invalid data.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::Allocation;
use crate::core::AllocationReceipt;
use crate::core::CapabilityCode;
use crate::core::CapabilityId;
use crate::core::CatalogSeed;
use crate::core::ClaimWindow;
use crate::core::DistanceCode;
use crate::core::DistanceTypeCode;
use crate::core::DistanceTypeId;
use crate::core::Inventory;
use crate::core::Partition;
use crate::core::Provider;
use crate::core::ProviderGroup;
use crate::core::ProviderGroupId;
use crate::core::ProviderId;
use crate::core::ProviderIdentity;
use crate::core::ProviderRegistration;
use crate::core::ResourceClassCode;
use crate::core::ResourceClassId;
use crate::core::Uuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Catalog code namespaces for unknown-code errors.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeKind {
    /// Resource class codes.
    ResourceClass,
    /// Capability codes.
    Capability,
    /// Distance type codes.
    DistanceType,
    /// Distance codes within a type.
    Distance,
    /// Provider group names.
    ProviderGroup,
}

impl fmt::Display for CodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ResourceClass => "resource class",
            Self::Capability => "capability",
            Self::DistanceType => "distance type",
            Self::Distance => "distance",
            Self::ProviderGroup => "provider group",
        };
        f.write_str(label)
    }
}

/// Catalog backend errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `Retryable` marks
///   contention the coordinator may back off and retry.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Unique constraint violated (duplicate uuid or allocation row).
    #[error("catalog conflict: {0}")]
    Conflict(String),
    /// Inventory invariant violated at registration.
    #[error("invalid inventory: {0}")]
    InvalidInventory(String),
    /// Post-insert capacity re-check failed.
    #[error("capacity exceeded on provider {provider} for {resource_class}")]
    CapacityExceeded {
        /// Provider uuid that ran out of capacity.
        provider: Uuid,
        /// Resource class that was over-committed.
        resource_class: ResourceClassCode,
    },
    /// Code not present in the catalog.
    #[error("unknown {kind} code: {code}")]
    UnknownCode {
        /// Code namespace.
        kind: CodeKind,
        /// The unresolved code.
        code: String,
    },
    /// Referenced row does not exist.
    #[error("catalog row not found: {0}")]
    NotFound(String),
    /// Transient contention (busy/locked/serialization failure).
    #[error("catalog contention: {0}")]
    Retryable(String),
    /// Any other database failure.
    #[error("catalog database error: {0}")]
    Db(String),
}

// ============================================================================
// SECTION: Query Shapes
// ============================================================================

/// Capability clause resolved to catalog ids for query composition.
///
/// # Invariants
/// - Id lists are deduplicated by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCapabilityConstraint {
    /// Capabilities every candidate must have (all of).
    pub require: Vec<CapabilityId>,
    /// Capabilities a candidate must have at least one of.
    pub any: Vec<CapabilityId>,
    /// Capabilities no candidate may have.
    pub forbid: Vec<CapabilityId>,
}

impl ResolvedCapabilityConstraint {
    /// Returns whether all clauses are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.require.is_empty() && self.any.is_empty() && self.forbid.is_empty()
    }
}

/// Capacity-in-window candidate query.
///
/// # Invariants
/// - `window` is well-formed; `limit` bounds the result fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityQuery {
    /// Resource class the amount is requested from.
    pub resource_class: ResourceClassId,
    /// Requested amount (upper bound of the constraint's range).
    pub amount: u64,
    /// Requested usage window; usage of overlapping allocations counts.
    pub window: ClaimWindow,
    /// Optional resource-scoped capability clause composed into the query.
    pub capabilities: Option<ResolvedCapabilityConstraint>,
    /// Providers to leave out of the candidate set.
    pub exclude: Vec<ProviderId>,
    /// Maximum number of candidates returned.
    pub limit: usize,
}

/// Group membership candidate query (require ALL and/or any-of).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMembershipQuery {
    /// Groups every candidate must belong to.
    pub require: Vec<ProviderGroupId>,
    /// Groups a candidate must belong to at least one of.
    pub any: Vec<ProviderGroupId>,
    /// Providers to leave out of the candidate set.
    pub exclude: Vec<ProviderId>,
    /// Maximum number of candidates returned.
    pub limit: usize,
}

/// Distance-bounded candidate query relative to a reference provider.
///
/// # Invariants
/// - Candidates are providers whose distance edge to some group containing
///   the reference provider has `position` within `[min_position,
///   max_position]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceQuery {
    /// Reference provider distances are measured against.
    pub reference: ProviderId,
    /// Distance type the bound applies to.
    pub distance_type: DistanceTypeId,
    /// Minimum acceptable position (inclusive).
    pub min_position: u32,
    /// Maximum acceptable position (inclusive).
    pub max_position: u32,
    /// Providers to leave out of the candidate set.
    pub exclude: Vec<ProviderId>,
    /// Maximum number of candidates returned.
    pub limit: usize,
}

// ============================================================================
// SECTION: Catalog Metadata
// ============================================================================

/// Code-to-id maps loaded once per engine (read-through cache payload).
///
/// # Invariants
/// - Snapshot of seeded rows; seeded enums are immutable after load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogMetadata {
    /// Resource class code to id.
    pub resource_classes: BTreeMap<ResourceClassCode, ResourceClassId>,
    /// Capability code to id.
    pub capabilities: BTreeMap<CapabilityCode, CapabilityId>,
    /// Distance type code to id.
    pub distance_types: BTreeMap<DistanceTypeCode, DistanceTypeId>,
    /// `(distance type, distance)` to ordinal position, nearest = 0.
    pub distance_positions: BTreeMap<(DistanceTypeCode, DistanceCode), u32>,
    /// Provider group name to id.
    pub provider_groups: BTreeMap<String, ProviderGroupId>,
}

impl CatalogMetadata {
    /// Resolves a resource class code.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCode`] when the code is not seeded.
    pub fn resource_class_id(&self, code: &ResourceClassCode) -> Result<ResourceClassId, CatalogError> {
        self.resource_classes.get(code).copied().ok_or_else(|| CatalogError::UnknownCode {
            kind: CodeKind::ResourceClass,
            code: code.as_str().to_string(),
        })
    }

    /// Resolves a capability code.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCode`] when the code is not seeded.
    pub fn capability_id(&self, code: &CapabilityCode) -> Result<CapabilityId, CatalogError> {
        self.capabilities.get(code).copied().ok_or_else(|| CatalogError::UnknownCode {
            kind: CodeKind::Capability,
            code: code.as_str().to_string(),
        })
    }

    /// Resolves a distance type code.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCode`] when the code is not seeded.
    pub fn distance_type_id(&self, code: &DistanceTypeCode) -> Result<DistanceTypeId, CatalogError> {
        self.distance_types.get(code).copied().ok_or_else(|| CatalogError::UnknownCode {
            kind: CodeKind::DistanceType,
            code: code.as_str().to_string(),
        })
    }

    /// Resolves a provider group name.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCode`] when the group is not registered.
    pub fn provider_group_id(&self, name: &str) -> Result<ProviderGroupId, CatalogError> {
        self.provider_groups.get(name).copied().ok_or_else(|| CatalogError::UnknownCode {
            kind: CodeKind::ProviderGroup,
            code: name.to_string(),
        })
    }

    /// Resolves a whole capability constraint into ids, deduplicated.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownCode`] for the first unresolved code.
    pub fn resolve_capabilities(
        &self,
        require: &[CapabilityCode],
        any: &[CapabilityCode],
        forbid: &[CapabilityCode],
    ) -> Result<ResolvedCapabilityConstraint, CatalogError> {
        let mut resolved = ResolvedCapabilityConstraint::default();
        for code in require {
            let id = self.capability_id(code)?;
            if !resolved.require.contains(&id) {
                resolved.require.push(id);
            }
        }
        for code in any {
            let id = self.capability_id(code)?;
            if !resolved.any.contains(&id) {
                resolved.any.push(id);
            }
        }
        for code in forbid {
            let id = self.capability_id(code)?;
            if !resolved.forbid.contains(&id) {
                resolved.forbid.push(id);
            }
        }
        Ok(resolved)
    }
}

// ============================================================================
// SECTION: Catalog Queries
// ============================================================================

/// Read-side candidate queries the solver composes over.
///
/// Implementations return candidates ordered by ascending provider id and
/// bounded by the query's limit.
pub trait CatalogQueries {
    /// Providers with capacity for the queried amount in the window.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_with_capacity(
        &self,
        query: &CapacityQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Providers holding ALL of the supplied capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_with_all_capabilities(
        &self,
        require: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Providers holding ANY of the supplied capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_with_any_capabilities(
        &self,
        any: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Providers satisfying group membership requirements.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_in_groups(
        &self,
        query: &GroupMembershipQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Providers belonging to at least one of the supplied groups
    /// (the exclusion set for forbidden groups).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_in_any_group(
        &self,
        groups: &[ProviderGroupId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Providers within a distance position band of the reference provider.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the query fails.
    fn providers_within_distance(
        &self,
        query: &DistanceQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError>;

    /// Looks up a provider's candidate identity by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the lookup fails.
    fn provider_identity_by_uuid(
        &self,
        uuid: &Uuid,
    ) -> Result<Option<ProviderIdentity>, CatalogError>;
}

// ============================================================================
// SECTION: Catalog Store
// ============================================================================

/// Durable catalog persistence: seeding, registration, and allocations.
///
/// The store is the single source of truth; every write happens inside one
/// backend transaction.
pub trait CatalogStore: CatalogQueries {
    /// Idempotently seeds resource classes, capabilities, and distances.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when seeding fails.
    fn seed(&self, seed: &CatalogSeed) -> Result<(), CatalogError>;

    /// Gets or creates a partition by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the write fails.
    fn register_partition(&self, name: &str, uuid: &Uuid) -> Result<Partition, CatalogError>;

    /// Gets or creates a provider group by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the write fails.
    fn register_provider_group(
        &self,
        name: &str,
        uuid: &Uuid,
    ) -> Result<ProviderGroup, CatalogError>;

    /// Atomically registers a provider with inventories, capabilities,
    /// group memberships, and distance edges.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Conflict`] on duplicate uuid,
    /// [`CatalogError::InvalidInventory`] on invariant violation, and
    /// [`CatalogError::UnknownCode`] for unseeded codes.
    fn register_provider(
        &self,
        registration: &ProviderRegistration,
    ) -> Result<Provider, CatalogError>;

    /// Transactionally replaces a provider's inventory and bumps its
    /// generation.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when validation or the write fails.
    fn replace_inventory(
        &self,
        provider: &Uuid,
        inventories: &[Inventory],
    ) -> Result<Provider, CatalogError>;

    /// Reads a provider snapshot by uuid.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the read fails.
    fn provider_by_uuid(&self, uuid: &Uuid) -> Result<Option<Provider>, CatalogError>;

    /// Atomically persists an allocation, re-checking the capacity
    /// invariant inside the same transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::CapacityExceeded`] when the post-insert
    /// re-check fails, [`CatalogError::Retryable`] on contention.
    fn persist_allocation(&self, allocation: &Allocation) -> Result<AllocationReceipt, CatalogError>;

    /// Loads the code-to-id metadata snapshot for the engine cache.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the read fails.
    fn load_metadata(&self) -> Result<CatalogMetadata, CatalogError>;

    /// Sums allocated usage for a provider and resource class across
    /// allocations overlapping the window.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the read fails.
    fn usage_in_window(
        &self,
        provider: ProviderId,
        resource_class: ResourceClassId,
        window: &ClaimWindow,
    ) -> Result<u64, CatalogError>;
}
