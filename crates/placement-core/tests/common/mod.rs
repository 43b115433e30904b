// crates/placement-core/tests/common/mod.rs
// ============================================================================
// Module: Solver Test Fixtures
// Description: In-memory fake catalog for solver and engine tests.
// Purpose: Exercise composition and coordination without a database.
// ============================================================================

//! In-memory [`CatalogStore`] fake. Candidate queries filter over plain
//! vectors with the same ordering and exclusion contracts as the SQL
//! backend; persistence enforces the windowed capacity invariant against a
//! mutex-held allocation log. Failure injection lets tests drive the
//! engine's retry ladder deterministically.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    dead_code,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use placement_core::Allocation;
use placement_core::AllocationId;
use placement_core::AllocationReceipt;
use placement_core::CapabilityCode;
use placement_core::CapabilityId;
use placement_core::CapacityQuery;
use placement_core::CatalogError;
use placement_core::CatalogMetadata;
use placement_core::CatalogQueries;
use placement_core::CatalogSeed;
use placement_core::CatalogStore;
use placement_core::ClaimWindow;
use placement_core::DistanceQuery;
use placement_core::DistanceTypeCode;
use placement_core::DistanceTypeId;
use placement_core::GroupMembershipQuery;
use placement_core::Inventory;
use placement_core::Partition;
use placement_core::Provider;
use placement_core::ProviderGroup;
use placement_core::ProviderGroupId;
use placement_core::ProviderId;
use placement_core::ProviderIdentity;
use placement_core::ProviderRegistration;
use placement_core::ResolvedCapabilityConstraint;
use placement_core::ResourceClassCode;
use placement_core::ResourceClassId;
use placement_core::Uuid;

/// One provider row in the fake catalog.
struct FakeProvider {
    identity: ProviderIdentity,
    capabilities: BTreeSet<CapabilityId>,
    groups: BTreeSet<ProviderGroupId>,
    /// Effective capacity per resource class.
    inventory: BTreeMap<ResourceClassId, f64>,
}

/// Distance edge from a provider to a named group.
struct FakeDistance {
    provider: ProviderId,
    group: ProviderGroupId,
    distance_type: DistanceTypeId,
    position: u32,
}

/// In-memory catalog fake with failure injection.
pub struct FakeCatalog {
    metadata: CatalogMetadata,
    providers: Vec<FakeProvider>,
    distances: Vec<FakeDistance>,
    allocations: Mutex<Vec<Allocation>>,
    injected_failures: Mutex<VecDeque<CatalogError>>,
}

impl FakeCatalog {
    /// Creates a fake catalog with sequentially-numbered codes.
    pub fn new(resource_classes: &[&str], capabilities: &[&str], groups: &[&str]) -> Self {
        let mut metadata = CatalogMetadata::default();
        for (index, code) in resource_classes.iter().enumerate() {
            metadata.resource_classes.insert(
                ResourceClassCode::new(*code),
                ResourceClassId::from_raw(index as u64 + 1).expect("nonzero id"),
            );
        }
        for (index, code) in capabilities.iter().enumerate() {
            metadata.capabilities.insert(
                CapabilityCode::new(*code),
                CapabilityId::from_raw(index as u64 + 1).expect("nonzero id"),
            );
        }
        for (index, name) in groups.iter().enumerate() {
            metadata.provider_groups.insert(
                (*name).to_string(),
                ProviderGroupId::from_raw(index as u64 + 1).expect("nonzero id"),
            );
        }
        metadata
            .distance_types
            .insert(DistanceTypeCode::new("network"), DistanceTypeId::from_raw(1).expect("nonzero"));
        Self {
            metadata,
            providers: Vec::new(),
            distances: Vec::new(),
            allocations: Mutex::new(Vec::new()),
            injected_failures: Mutex::new(VecDeque::new()),
        }
    }

    /// Adds a provider with capabilities, groups, and inventory capacities.
    pub fn add_provider(
        &mut self,
        raw_id: u64,
        capabilities: &[&str],
        groups: &[&str],
        inventory: &[(&str, f64)],
    ) {
        let identity = ProviderIdentity {
            id: ProviderId::from_raw(raw_id).expect("nonzero provider id"),
            uuid: Uuid::new(format!("prov-{raw_id:04}")),
        };
        let capabilities = capabilities
            .iter()
            .map(|code| self.capability_id(code))
            .collect();
        let groups = groups.iter().map(|name| self.group_id(name)).collect();
        let inventory = inventory
            .iter()
            .map(|(code, capacity)| (self.resource_class_id(code), *capacity))
            .collect();
        self.providers.push(FakeProvider {
            identity,
            capabilities,
            groups,
            inventory,
        });
        self.providers.sort_by(|a, b| a.identity.id.cmp(&b.identity.id));
    }

    /// Adds a distance edge from a provider to a group.
    pub fn add_distance(&mut self, provider: u64, group: &str, position: u32) {
        self.distances.push(FakeDistance {
            provider: ProviderId::from_raw(provider).expect("nonzero provider id"),
            group: self.group_id(group),
            distance_type: DistanceTypeId::from_raw(1).expect("nonzero"),
            position,
        });
    }

    /// Queues an error returned by the next `persist_allocation` call.
    pub fn inject_persist_failure(&self, error: CatalogError) {
        self.injected_failures.lock().expect("failures lock").push_back(error);
    }

    /// Returns the committed allocations.
    pub fn allocations(&self) -> Vec<Allocation> {
        self.allocations.lock().expect("allocations lock").clone()
    }

    /// Resolves a resource class code.
    pub fn resource_class_id(&self, code: &str) -> ResourceClassId {
        *self
            .metadata
            .resource_classes
            .get(&ResourceClassCode::new(code))
            .expect("known resource class")
    }

    /// Resolves a capability code.
    pub fn capability_id(&self, code: &str) -> CapabilityId {
        *self.metadata.capabilities.get(&CapabilityCode::new(code)).expect("known capability")
    }

    /// Resolves a group name.
    pub fn group_id(&self, name: &str) -> ProviderGroupId {
        *self.metadata.provider_groups.get(name).expect("known group")
    }

    /// Sums committed usage overlapping the window.
    fn usage(&self, provider: ProviderId, resource_class: ResourceClassId, window: &ClaimWindow) -> u64 {
        let allocations = self.allocations.lock().expect("allocations lock");
        allocations
            .iter()
            .filter(|allocation| allocation.window.overlaps(window))
            .flat_map(|allocation| allocation.items.iter())
            .filter(|item| {
                item.provider.id == provider
                    && self
                        .metadata
                        .resource_classes
                        .get(&item.resource_class)
                        .is_some_and(|id| *id == resource_class)
            })
            .map(|item| item.used)
            .sum()
    }

    /// Applies ordering, exclusion, and limit to a filtered candidate list.
    fn select<F: Fn(&FakeProvider) -> bool>(
        &self,
        predicate: F,
        exclude: &[ProviderId],
        limit: usize,
    ) -> Vec<ProviderIdentity> {
        self.providers
            .iter()
            .filter(|provider| !exclude.contains(&provider.identity.id))
            .filter(|provider| predicate(provider))
            .map(|provider| provider.identity.clone())
            .take(limit)
            .collect()
    }
}

impl CatalogQueries for FakeCatalog {
    fn providers_with_capacity(
        &self,
        query: &CapacityQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        Ok(self.select(
            |provider| {
                let Some(capacity) = provider.inventory.get(&query.resource_class) else {
                    return false;
                };
                if let Some(capabilities) = &query.capabilities
                    && !satisfies_capabilities(provider, capabilities)
                {
                    return false;
                }
                let used =
                    self.usage(provider.identity.id, query.resource_class, &query.window);
                #[allow(clippy::cast_precision_loss, reason = "Test capacities are small.")]
                let needed = (query.amount + used) as f64;
                *capacity >= needed
            },
            &query.exclude,
            query.limit,
        ))
    }

    fn providers_with_all_capabilities(
        &self,
        require: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        Ok(self.select(
            |provider| require.iter().all(|id| provider.capabilities.contains(id)),
            exclude,
            limit,
        ))
    }

    fn providers_with_any_capabilities(
        &self,
        any: &[CapabilityId],
        exclude: &[ProviderId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        Ok(self.select(
            |provider| any.iter().any(|id| provider.capabilities.contains(id)),
            exclude,
            limit,
        ))
    }

    fn providers_in_groups(
        &self,
        query: &GroupMembershipQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        Ok(self.select(
            |provider| {
                query.require.iter().all(|id| provider.groups.contains(id))
                    && (query.any.is_empty()
                        || query.any.iter().any(|id| provider.groups.contains(id)))
            },
            &query.exclude,
            query.limit,
        ))
    }

    fn providers_in_any_group(
        &self,
        groups: &[ProviderGroupId],
        limit: usize,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        Ok(self.select(
            |provider| groups.iter().any(|id| provider.groups.contains(id)),
            &[],
            limit,
        ))
    }

    fn providers_within_distance(
        &self,
        query: &DistanceQuery,
    ) -> Result<Vec<ProviderIdentity>, CatalogError> {
        let Some(reference) =
            self.providers.iter().find(|provider| provider.identity.id == query.reference)
        else {
            return Ok(Vec::new());
        };
        let reference_groups = reference.groups.clone();
        Ok(self.select(
            |provider| {
                self.distances.iter().any(|edge| {
                    edge.provider == provider.identity.id
                        && edge.distance_type == query.distance_type
                        && reference_groups.contains(&edge.group)
                        && edge.position >= query.min_position
                        && edge.position <= query.max_position
                })
            },
            &query.exclude,
            query.limit,
        ))
    }

    fn provider_identity_by_uuid(
        &self,
        uuid: &Uuid,
    ) -> Result<Option<ProviderIdentity>, CatalogError> {
        Ok(self
            .providers
            .iter()
            .find(|provider| provider.identity.uuid == *uuid)
            .map(|provider| provider.identity.clone()))
    }
}

impl CatalogStore for FakeCatalog {
    fn seed(&self, _seed: &CatalogSeed) -> Result<(), CatalogError> {
        Ok(())
    }

    fn register_partition(&self, _name: &str, _uuid: &Uuid) -> Result<Partition, CatalogError> {
        Err(CatalogError::Db("registration not supported by the fake".to_string()))
    }

    fn register_provider_group(
        &self,
        _name: &str,
        _uuid: &Uuid,
    ) -> Result<ProviderGroup, CatalogError> {
        Err(CatalogError::Db("registration not supported by the fake".to_string()))
    }

    fn register_provider(
        &self,
        _registration: &ProviderRegistration,
    ) -> Result<Provider, CatalogError> {
        Err(CatalogError::Db("registration not supported by the fake".to_string()))
    }

    fn replace_inventory(
        &self,
        _provider: &Uuid,
        _inventories: &[Inventory],
    ) -> Result<Provider, CatalogError> {
        Err(CatalogError::Db("registration not supported by the fake".to_string()))
    }

    fn provider_by_uuid(&self, _uuid: &Uuid) -> Result<Option<Provider>, CatalogError> {
        Ok(None)
    }

    fn persist_allocation(
        &self,
        allocation: &Allocation,
    ) -> Result<AllocationReceipt, CatalogError> {
        if let Some(error) = self.injected_failures.lock().expect("failures lock").pop_front() {
            return Err(error);
        }
        let mut touched: BTreeMap<(ProviderId, ResourceClassId), (Uuid, ResourceClassCode)> =
            BTreeMap::new();
        for item in &allocation.items {
            let resource_class = self
                .metadata
                .resource_classes
                .get(&item.resource_class)
                .copied()
                .ok_or_else(|| CatalogError::UnknownCode {
                    kind: placement_core::CodeKind::ResourceClass,
                    code: item.resource_class.as_str().to_string(),
                })?;
            touched.insert(
                (item.provider.id, resource_class),
                (item.provider.uuid.clone(), item.resource_class.clone()),
            );
        }
        for ((provider_id, resource_class), (provider_uuid, code)) in &touched {
            let provider = self
                .providers
                .iter()
                .find(|provider| provider.identity.id == *provider_id)
                .ok_or_else(|| CatalogError::NotFound(format!("provider {provider_uuid}")))?;
            let capacity = provider.inventory.get(resource_class).copied().unwrap_or(0.0);
            let committed = self.usage(*provider_id, *resource_class, &allocation.window);
            let pending: u64 = allocation
                .items
                .iter()
                .filter(|item| {
                    item.provider.id == *provider_id && item.resource_class == *code
                })
                .map(|item| item.used)
                .sum();
            #[allow(clippy::cast_precision_loss, reason = "Test capacities are small.")]
            let needed = (committed + pending) as f64;
            if needed > capacity {
                return Err(CatalogError::CapacityExceeded {
                    provider: provider_uuid.clone(),
                    resource_class: code.clone(),
                });
            }
        }
        let mut allocations = self.allocations.lock().expect("allocations lock");
        allocations.push(allocation.clone());
        let id = AllocationId::from_raw(allocations.len() as u64).expect("nonzero allocation id");
        Ok(AllocationReceipt { allocation_id: id })
    }

    fn load_metadata(&self) -> Result<CatalogMetadata, CatalogError> {
        Ok(self.metadata.clone())
    }

    fn usage_in_window(
        &self,
        provider: ProviderId,
        resource_class: ResourceClassId,
        window: &ClaimWindow,
    ) -> Result<u64, CatalogError> {
        Ok(self.usage(provider, resource_class, window))
    }
}

/// Mirrors the SQL capability composition for the fake's capacity query.
fn satisfies_capabilities(
    provider: &FakeProvider,
    capabilities: &ResolvedCapabilityConstraint,
) -> bool {
    capabilities.require.iter().all(|id| provider.capabilities.contains(id))
        && (capabilities.any.is_empty()
            || capabilities.any.iter().any(|id| provider.capabilities.contains(id)))
        && !capabilities.forbid.iter().any(|id| provider.capabilities.contains(id))
}
