// crates/placement-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: SQLite Catalog Test Fixtures
// Description: Temp-file store setup, seeding, and provider registration.
// Purpose: Shared scaffolding for catalog and scenario tests.
// ============================================================================

//! Shared fixtures: a temp-file catalog, a small enum seed, and compact
//! registration helpers.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only assertions and helpers are permitted."
)]

use placement_core::CapabilityCode;
use placement_core::CapabilitySeed;
use placement_core::CatalogSeed;
use placement_core::CatalogStore;
use placement_core::DistanceCode;
use placement_core::DistanceTypeCode;
use placement_core::DistanceTypeSeed;
use placement_core::Inventory;
use placement_core::Provider;
use placement_core::ProviderDistanceSpec;
use placement_core::ProviderRegistration;
use placement_core::ResourceClassCode;
use placement_core::ResourceClassSeed;
use placement_core::Uuid;
use placement_store_sqlite::SqliteCatalog;
use placement_store_sqlite::SqliteCatalogConfig;
use tempfile::TempDir;

/// Shared resource class code under test.
pub const CPU: &str = "runm.cpu.shared";
/// Shared resource class code under test.
pub const MEMORY: &str = "runm.memory.bytes";
/// Capability code under test.
pub const AVX: &str = "hw.cpu.x86.avx";
/// Capability code under test.
pub const VMX: &str = "hw.cpu.x86.vmx";
/// Capability code under test.
pub const SSD: &str = "storage.disk.ssd";
/// Distance type used in fixtures.
pub const NETWORK: &str = "network";

/// Opens a fresh catalog in a temp directory.
pub fn temp_catalog() -> (TempDir, SqliteCatalog) {
    let dir = TempDir::new().expect("temp dir");
    let config = SqliteCatalogConfig::for_path(dir.path().join("catalog.db"));
    let catalog = SqliteCatalog::new(&config).expect("catalog init");
    (dir, catalog)
}

/// Returns the fixture enum seed.
pub fn fixture_seed() -> CatalogSeed {
    CatalogSeed {
        resource_classes: vec![
            ResourceClassSeed {
                code: ResourceClassCode::new(CPU),
                description: "Shared CPU".to_string(),
            },
            ResourceClassSeed {
                code: ResourceClassCode::new(MEMORY),
                description: "Bytes of RAM".to_string(),
            },
        ],
        capabilities: vec![
            CapabilitySeed {
                code: CapabilityCode::new(AVX),
                description: "AVX".to_string(),
            },
            CapabilitySeed {
                code: CapabilityCode::new(VMX),
                description: "VMX".to_string(),
            },
            CapabilitySeed {
                code: CapabilityCode::new(SSD),
                description: "SSD".to_string(),
            },
        ],
        distance_types: vec![DistanceTypeSeed {
            code: DistanceTypeCode::new(NETWORK),
            distances: vec![
                DistanceCode::new("datacenter"),
                DistanceCode::new("remote"),
            ],
        }],
    }
}

/// Seeds the fixture enums and a partition plus groups.
pub fn seed_catalog(catalog: &SqliteCatalog, groups: &[&str]) {
    catalog.seed(&fixture_seed()).expect("seed");
    catalog
        .register_partition("part0", &Uuid::new("partition-0000"))
        .expect("partition");
    for group in groups {
        catalog
            .register_provider_group(group, &Uuid::new(format!("group-{group}")))
            .expect("group");
    }
}

/// Registers a provider with simple `(code, total)` inventory rows.
pub fn register_provider(
    catalog: &SqliteCatalog,
    name: &str,
    capabilities: &[&str],
    groups: &[&str],
    inventory: &[(&str, u64)],
) -> Provider {
    register_provider_with_distances(catalog, name, capabilities, groups, inventory, &[])
}

/// Registers a provider including distance edges `(group, code)`.
pub fn register_provider_with_distances(
    catalog: &SqliteCatalog,
    name: &str,
    capabilities: &[&str],
    groups: &[&str],
    inventory: &[(&str, u64)],
    distances: &[(&str, &str)],
) -> Provider {
    let registration = ProviderRegistration {
        name: name.to_string(),
        uuid: Uuid::new(format!("uuid-{name}")),
        partition: Uuid::new("partition-0000"),
        inventories: inventory
            .iter()
            .map(|(code, total)| Inventory::with_total(ResourceClassCode::new(*code), *total))
            .collect(),
        capabilities: capabilities.iter().map(|code| CapabilityCode::new(*code)).collect(),
        groups: groups.iter().map(|name| (*name).to_string()).collect(),
        distances: distances
            .iter()
            .map(|(group, code)| ProviderDistanceSpec {
                group: (*group).to_string(),
                distance_type: DistanceTypeCode::new(NETWORK),
                distance: DistanceCode::new(*code),
            })
            .collect(),
    };
    catalog.register_provider(&registration).expect("provider registration")
}
