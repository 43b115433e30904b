// crates/placement-config/src/loader.rs
// ============================================================================
// Module: Catalog Loader
// Description: Seeds enums and registers an expanded deployment.
// Purpose: Take a deployment descriptor from YAML to catalog rows.
// Dependencies: placement-core, crate::{deployment, identity}
// ============================================================================

//! ## Overview
//! The loader owns the well-known enum seed (resource classes,
//! capabilities, distance types with their orderings) and the apply path:
//! seed, register the partition, register every provider group, then
//! register every provider with inventories, capabilities, memberships,
//! and distance edges. Codes referenced by the descriptor but missing from
//! the well-known seed are added with a descriptor-sourced description so
//! a load never trips over its own vocabulary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use placement_core::CapabilityCode;
use placement_core::CapabilitySeed;
use placement_core::CatalogError;
use placement_core::CatalogSeed;
use placement_core::CatalogStore;
use placement_core::DistanceCode;
use placement_core::DistanceTypeCode;
use placement_core::DistanceTypeSeed;
use placement_core::ResourceClassCode;
use placement_core::ResourceClassSeed;
use thiserror::Error;

use crate::DescriptorError;
use crate::deployment::DISTANCE_DATACENTER;
use crate::deployment::DISTANCE_REMOTE;
use crate::deployment::DeploymentDescriptor;
use crate::deployment::NETWORK_DISTANCE_TYPE;
use crate::identity::derive_uuid;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading a deployment into a catalog.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Descriptor parse or validation failure.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    /// Catalog write failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

// ============================================================================
// SECTION: Well-Known Seed
// ============================================================================

/// Returns the well-known enum seed for a fresh catalog.
#[must_use]
pub fn well_known_seed() -> CatalogSeed {
    CatalogSeed {
        resource_classes: vec![
            resource_class("runm.cpu.shared", "Shared (overcommittable) CPU core"),
            resource_class("runm.cpu.dedicated", "Dedicated CPU core"),
            resource_class("runm.memory.bytes", "Bytes of RAM"),
            resource_class("runm.block_storage.bytes", "Bytes of block storage"),
            resource_class("runm.gpu.virtual", "Virtual GPU context"),
        ],
        capabilities: vec![
            capability("hw.cpu.x86.avx", "x86 AVX instructions"),
            capability("hw.cpu.x86.avx2", "x86 AVX2 instructions"),
            capability("hw.cpu.x86.vmx", "x86 VMX virtualization"),
            capability("hw.gpu.compute", "GPU compute offload"),
            capability("storage.disk.ssd", "Solid-state local disk"),
            capability("storage.disk.hdd", "Spinning local disk"),
        ],
        distance_types: vec![
            DistanceTypeSeed {
                code: DistanceTypeCode::new(NETWORK_DISTANCE_TYPE),
                distances: vec![
                    DistanceCode::new(DISTANCE_DATACENTER),
                    DistanceCode::new(DISTANCE_REMOTE),
                ],
            },
            DistanceTypeSeed {
                code: DistanceTypeCode::new("failure"),
                distances: vec![
                    DistanceCode::new("shared-rack"),
                    DistanceCode::new("shared-row"),
                    DistanceCode::new("shared-site"),
                    DistanceCode::new("separate-site"),
                ],
            },
            DistanceTypeSeed {
                code: DistanceTypeCode::new("storage"),
                distances: vec![
                    DistanceCode::new("local"),
                    DistanceCode::new("san"),
                    DistanceCode::new("remote"),
                ],
            },
        ],
    }
}

/// Builds one resource class seed row.
fn resource_class(code: &str, description: &str) -> ResourceClassSeed {
    ResourceClassSeed {
        code: ResourceClassCode::new(code),
        description: description.to_string(),
    }
}

/// Builds one capability seed row.
fn capability(code: &str, description: &str) -> CapabilitySeed {
    CapabilitySeed {
        code: CapabilityCode::new(code),
        description: description.to_string(),
    }
}

// ============================================================================
// SECTION: Deployment Load
// ============================================================================

/// Counts reported by a deployment load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentSummary {
    /// Provider groups registered (or already present).
    pub groups: usize,
    /// Providers registered.
    pub providers: usize,
}

/// Seeds the catalog and registers the expanded deployment.
///
/// The partition is derived from `partition_name`; repeated loads of the
/// same descriptor re-register nothing new for groups (get-or-create) and
/// conflict on providers, which callers treat as already-loaded.
///
/// # Errors
///
/// Returns [`LoaderError`] when expansion or any catalog write fails.
pub fn load_deployment<S: CatalogStore>(
    store: &S,
    descriptor: &DeploymentDescriptor,
    partition_name: &str,
) -> Result<DeploymentSummary, LoaderError> {
    let mut seed = well_known_seed();
    for profile in descriptor.profiles.values() {
        for code in profile.inventory.keys() {
            if !seed.resource_classes.iter().any(|row| row.code.as_str() == code) {
                seed.resource_classes.push(resource_class(code, "Deployment resource class"));
            }
        }
        for code in &profile.capabilities {
            if !seed.capabilities.iter().any(|row| row.code.as_str() == code) {
                seed.capabilities.push(capability(code, "Deployment capability"));
            }
        }
    }
    store.seed(&seed)?;

    let partition =
        store.register_partition(partition_name, &derive_uuid("partition", partition_name))?;
    let groups = descriptor.provider_groups();
    for group in &groups {
        store.register_provider_group(&group.name, &group.uuid)?;
    }
    let registrations = descriptor.provider_registrations(&partition.uuid)?;
    for registration in &registrations {
        store.register_provider(registration)?;
    }
    Ok(DeploymentSummary {
        groups: groups.len(),
        providers: registrations.len(),
    })
}
