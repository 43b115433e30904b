// crates/placement-config/src/deployment.rs
// ============================================================================
// Module: Deployment Descriptor
// Description: YAML topology layout, inventory profiles, and expansion.
// Purpose: Turn a declarative site/row/rack/node layout into catalog rows.
// Dependencies: placement-core, serde, serde_yaml
// ============================================================================

//! ## Overview
//! A deployment descriptor names sites and a uniform row/rack/node fan-out,
//! plus inventory profiles keyed per site. Expansion produces the provider
//! groups (`site`, `site-rowR`, `site-rowR-rackK`), one provider per node
//! (`site-rowR-rackK-nodeN`) carrying its site's profile, and the network
//! distance matrix: a provider is `datacenter` to groups in its own site
//! and `remote` to groups in other sites.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use placement_core::DistanceCode;
use placement_core::DistanceTypeCode;
use placement_core::Inventory;
use placement_core::ProviderDistanceSpec;
use placement_core::ProviderRegistration;
use placement_core::ResourceClassCode;
use placement_core::Uuid;
use serde::Deserialize;

use crate::DescriptorError;
use crate::identity::derive_uuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Distance type used for the generated topology matrix.
pub const NETWORK_DISTANCE_TYPE: &str = "network";
/// Distance code for groups in the same site.
pub const DISTANCE_DATACENTER: &str = "datacenter";
/// Distance code for groups in other sites.
pub const DISTANCE_REMOTE: &str = "remote";
/// Uuid namespace for provider groups.
const GROUP_NAMESPACE: &str = "provider-group";
/// Uuid namespace for providers.
const PROVIDER_NAMESPACE: &str = "provider";

// ============================================================================
// SECTION: Descriptor Shapes
// ============================================================================

/// Site/row/rack/node fan-out for a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayoutSpec {
    /// Site names, the top of the topology.
    pub sites: Vec<String>,
    /// Rows per site.
    #[serde(default)]
    pub rows_per_site: u32,
    /// Racks per row.
    #[serde(default)]
    pub racks_per_row: u32,
    /// Nodes (providers) per rack.
    #[serde(default)]
    pub nodes_per_rack: u32,
}

/// One inventory row in a profile, with conventional defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InventorySpec {
    /// Total posted units.
    pub total: u64,
    /// Units withheld from placement (default 0).
    #[serde(default)]
    pub reserved: Option<u64>,
    /// Smallest allocatable amount (default 1).
    #[serde(default)]
    pub min_unit: Option<u64>,
    /// Largest allocatable amount (default `total`).
    #[serde(default)]
    pub max_unit: Option<u64>,
    /// Allocation step (default 1).
    #[serde(default)]
    pub step_size: Option<u64>,
    /// Overcommit ratio (default 1.0).
    #[serde(default)]
    pub allocation_ratio: Option<f64>,
}

impl InventorySpec {
    /// Materializes the inventory row for a resource class code.
    #[must_use]
    pub fn to_inventory(&self, resource_class: ResourceClassCode) -> Inventory {
        Inventory {
            resource_class,
            total: self.total,
            reserved: self.reserved.unwrap_or(0),
            min_unit: self.min_unit.unwrap_or(1),
            max_unit: self.max_unit.unwrap_or(self.total),
            step_size: self.step_size.unwrap_or(1),
            allocation_ratio: self.allocation_ratio.unwrap_or(1.0),
        }
    }
}

/// Inventory and capabilities applied to every node of the listed sites.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileSpec {
    /// Sites the profile applies to.
    pub sites: Vec<String>,
    /// Inventory rows keyed by resource class code.
    pub inventory: BTreeMap<String, InventorySpec>,
    /// Capability codes every node of these sites advertises.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Full deployment descriptor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeploymentDescriptor {
    /// Topology fan-out.
    pub layout: LayoutSpec,
    /// Profiles keyed by profile name.
    pub profiles: BTreeMap<String, ProfileSpec>,
}

/// Provider group produced by expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderGroupSpec {
    /// Topology-derived group name.
    pub name: String,
    /// Derived stable uuid.
    pub uuid: Uuid,
}

// ============================================================================
// SECTION: Parsing and Validation
// ============================================================================

impl DeploymentDescriptor {
    /// Parses a descriptor from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] on malformed YAML and
    /// [`DescriptorError::Validation`] when the parsed descriptor is
    /// inconsistent.
    pub fn from_yaml_str(text: &str) -> Result<Self, DescriptorError> {
        let descriptor: Self =
            serde_yaml::from_str(text).map_err(|err| DescriptorError::Parse(err.to_string()))?;
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Parses a descriptor from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError`] when the file cannot be read or parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, DescriptorError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| DescriptorError::Parse(format!("read {}: {err}", path.display())))?;
        Self::from_yaml_str(&text)
    }

    /// Validates descriptor consistency.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Validation`] when a profile names an
    /// unknown site or a site is covered by zero or several profiles.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.layout.sites.is_empty() {
            return Err(DescriptorError::Validation("layout has no sites".to_string()));
        }
        let mut covered: BTreeMap<&str, &str> = BTreeMap::new();
        for (profile_name, profile) in &self.profiles {
            for site in &profile.sites {
                if !self.layout.sites.contains(site) {
                    return Err(DescriptorError::Validation(format!(
                        "profile {profile_name} names unknown site {site}"
                    )));
                }
                if let Some(previous) = covered.insert(site, profile_name) {
                    return Err(DescriptorError::Validation(format!(
                        "site {site} is covered by profiles {previous} and {profile_name}"
                    )));
                }
            }
        }
        for site in &self.layout.sites {
            if !covered.contains_key(site.as_str()) {
                return Err(DescriptorError::Validation(format!(
                    "site {site} has no inventory profile"
                )));
            }
        }
        Ok(())
    }

    /// Returns the profile covering a site.
    #[must_use]
    pub fn profile_for_site(&self, site: &str) -> Option<&ProfileSpec> {
        self.profiles.values().find(|profile| profile.sites.iter().any(|name| name == site))
    }
}

// ============================================================================
// SECTION: Expansion
// ============================================================================

impl DeploymentDescriptor {
    /// Expands the layout into site, row, and rack provider groups.
    #[must_use]
    pub fn provider_groups(&self) -> Vec<ProviderGroupSpec> {
        let mut groups = Vec::new();
        for site in &self.layout.sites {
            groups.push(group_spec(site.clone()));
            for row in 0 .. self.layout.rows_per_site {
                groups.push(group_spec(format!("{site}-row{row}")));
                for rack in 0 .. self.layout.racks_per_row {
                    groups.push(group_spec(format!("{site}-row{row}-rack{rack}")));
                }
            }
        }
        groups
    }

    /// Expands the layout into one provider registration per node.
    ///
    /// Every provider joins its site, row, and rack groups, carries its
    /// site profile's inventory and capabilities, and gets a network
    /// distance edge to every group in the deployment.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Validation`] when a site has no profile
    /// (which [`DeploymentDescriptor::validate`] also rejects).
    pub fn provider_registrations(
        &self,
        partition: &Uuid,
    ) -> Result<Vec<ProviderRegistration>, DescriptorError> {
        let all_groups = self.provider_groups();
        let mut registrations = Vec::new();
        for site in &self.layout.sites {
            let profile = self.profile_for_site(site).ok_or_else(|| {
                DescriptorError::Validation(format!("site {site} has no inventory profile"))
            })?;
            let inventories: Vec<Inventory> = profile
                .inventory
                .iter()
                .map(|(code, spec)| spec.to_inventory(ResourceClassCode::new(code.clone())))
                .collect();
            let capabilities =
                profile.capabilities.iter().map(|code| code.clone().into()).collect::<Vec<_>>();
            for row in 0 .. self.layout.rows_per_site {
                for rack in 0 .. self.layout.racks_per_row {
                    let own_groups = vec![
                        site.clone(),
                        format!("{site}-row{row}"),
                        format!("{site}-row{row}-rack{rack}"),
                    ];
                    for node in 0 .. self.layout.nodes_per_rack {
                        let name = format!("{site}-row{row}-rack{rack}-node{node}");
                        let distances = distance_edges(site, &all_groups);
                        registrations.push(ProviderRegistration {
                            uuid: derive_uuid(PROVIDER_NAMESPACE, &name),
                            name,
                            partition: partition.clone(),
                            inventories: inventories.clone(),
                            capabilities: capabilities.clone(),
                            groups: own_groups.clone(),
                            distances,
                        });
                    }
                }
            }
        }
        Ok(registrations)
    }
}

/// Builds a group spec with its derived uuid.
fn group_spec(name: String) -> ProviderGroupSpec {
    ProviderGroupSpec {
        uuid: derive_uuid(GROUP_NAMESPACE, &name),
        name,
    }
}

/// Computes the network distance edges from one provider to every group,
/// classified by site alone: same site is `datacenter`, anything else is
/// `remote`.
fn distance_edges(site: &str, all_groups: &[ProviderGroupSpec]) -> Vec<ProviderDistanceSpec> {
    all_groups
        .iter()
        .map(|group| {
            let code = if TopologyName::parse(&group.name)
                .is_some_and(|parsed| parsed.site == site)
            {
                DISTANCE_DATACENTER
            } else {
                DISTANCE_REMOTE
            };
            ProviderDistanceSpec {
                group: group.name.clone(),
                distance_type: DistanceTypeCode::new(NETWORK_DISTANCE_TYPE),
                distance: DistanceCode::new(code),
            }
        })
        .collect()
}

// ============================================================================
// SECTION: Topology Names
// ============================================================================

/// Parsed topology name parts (`site[-rowR[-rackK[-nodeN]]]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyName {
    /// Site segment.
    pub site: String,
    /// Row ordinal when present.
    pub row: Option<u32>,
    /// Rack ordinal when present.
    pub rack: Option<u32>,
    /// Node ordinal when present.
    pub node: Option<u32>,
}

impl TopologyName {
    /// Parses a topology name, returning `None` on a malformed segment.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('-');
        let site = parts.next()?.to_string();
        if site.is_empty() {
            return None;
        }
        let row = match parts.next() {
            None => None,
            Some(part) => Some(part.strip_prefix("row")?.parse().ok()?),
        };
        let rack = match parts.next() {
            None => None,
            Some(part) => Some(part.strip_prefix("rack")?.parse().ok()?),
        };
        let node = match parts.next() {
            None => None,
            Some(part) => Some(part.strip_prefix("node")?.parse().ok()?),
        };
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            site,
            row,
            rack,
            node,
        })
    }

    /// Returns whether the name addresses a whole site.
    #[must_use]
    pub const fn is_site(&self) -> bool {
        self.row.is_none()
    }

    /// Returns whether the name addresses a row.
    #[must_use]
    pub const fn is_row(&self) -> bool {
        self.row.is_some() && self.rack.is_none()
    }

    /// Returns whether the name addresses a rack.
    #[must_use]
    pub const fn is_rack(&self) -> bool {
        self.rack.is_some() && self.node.is_none()
    }
}
