// crates/placement-config/src/claim.rs
// ============================================================================
// Module: Claim Descriptor
// Description: YAML claim request shape mirroring the engine's input object.
// Purpose: Parse declarative claim requests for tools and fixtures.
// Dependencies: placement-core, serde, serde_yaml, time
// ============================================================================

//! ## Overview
//! A claim descriptor is the YAML rendering of a claim request: a consumer,
//! a time window, and request groups whose `resources` map resource class
//! codes to amount ranges. Either `min` or `max` may be omitted and
//! defaults to the other. Times accept integer epoch seconds or RFC 3339
//! strings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use placement_core::CapabilityConstraint;
use placement_core::ClaimRequest;
use placement_core::ClaimRequestGroup;
use placement_core::ClaimRequestGroupOptions;
use placement_core::ClaimWindow;
use placement_core::ConsumerIdentity;
use placement_core::DistanceConstraint;
use placement_core::DistanceTypeCode;
use placement_core::ProviderGroupConstraint;
use placement_core::ResourceClassCode;
use placement_core::ResourceConstraint;
use placement_core::Timestamp;
use placement_core::Uuid;
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::DescriptorError;

// ============================================================================
// SECTION: Descriptor Shapes
// ============================================================================

/// A point in time: epoch seconds or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TimeSpec {
    /// Unix epoch seconds.
    Epoch(i64),
    /// RFC 3339 date-time text.
    Text(String),
}

impl TimeSpec {
    /// Resolves the value into a timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Validation`] when the text form does not
    /// parse as RFC 3339.
    pub fn resolve(&self) -> Result<Timestamp, DescriptorError> {
        match self {
            Self::Epoch(seconds) => Ok(Timestamp::from_unix_seconds(*seconds)),
            Self::Text(text) => {
                let parsed = OffsetDateTime::parse(text, &Rfc3339).map_err(|err| {
                    DescriptorError::Validation(format!("time {text}: {err}"))
                })?;
                Ok(Timestamp::from_unix_seconds(parsed.unix_timestamp()))
            }
        }
    }
}

/// Consumer identity: a bare name or the full shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ConsumerSpec {
    /// Bare consumer name.
    Name(String),
    /// Full consumer identity.
    Full {
        /// Consumer name.
        name: String,
        /// Optional external identity.
        #[serde(default)]
        uuid: Option<String>,
        /// Optional owning project.
        #[serde(default)]
        project: Option<String>,
        /// Optional owning user.
        #[serde(default)]
        user: Option<String>,
    },
}

impl ConsumerSpec {
    /// Materializes the consumer identity.
    #[must_use]
    pub fn to_identity(&self) -> ConsumerIdentity {
        match self {
            Self::Name(name) => ConsumerIdentity::named(name.clone()),
            Self::Full {
                name,
                uuid,
                project,
                user,
            } => ConsumerIdentity {
                name: name.clone(),
                uuid: uuid.clone().map(Uuid::new),
                project: project.clone(),
                user: user.clone(),
            },
        }
    }
}

/// Capability clause lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CapabilitySpec {
    /// Capabilities every matched provider must have.
    #[serde(default)]
    pub require: Vec<String>,
    /// Capabilities of which at least one must be present.
    #[serde(default)]
    pub any: Vec<String>,
    /// Capabilities that must not be present.
    #[serde(default)]
    pub forbid: Vec<String>,
}

impl CapabilitySpec {
    /// Materializes the capability constraint.
    #[must_use]
    pub fn to_constraint(&self) -> CapabilityConstraint {
        CapabilityConstraint {
            require: self.require.iter().map(|code| code.clone().into()).collect(),
            any: self.any.iter().map(|code| code.clone().into()).collect(),
            forbid: self.forbid.iter().map(|code| code.clone().into()).collect(),
        }
    }
}

/// One resource request: an amount range plus optional scoped capabilities.
///
/// # Invariants
/// - At least one of `min`/`max` is present; the absent one defaults to
///   the other.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceSpec {
    /// Lower bound of the amount range.
    #[serde(default)]
    pub min: Option<u64>,
    /// Upper bound of the amount range.
    #[serde(default)]
    pub max: Option<u64>,
    /// Optional capability clause scoped to this resource.
    #[serde(default)]
    pub capabilities: Option<CapabilitySpec>,
}

/// Provider group membership clause lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GroupConstraintSpec {
    /// Groups every matched provider must belong to.
    #[serde(default)]
    pub require: Vec<String>,
    /// Groups of which at least one membership is needed.
    #[serde(default)]
    pub any: Vec<String>,
    /// Groups no matched provider may belong to.
    #[serde(default)]
    pub forbid: Vec<String>,
}

/// Adjacency clause relative to a reference provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DistanceSpec {
    /// Reference provider uuid.
    pub provider: String,
    /// Distance type code.
    pub distance_type: String,
    /// Minimum acceptable distance position.
    #[serde(default)]
    pub minimum: Option<u32>,
    /// Maximum acceptable distance position.
    #[serde(default)]
    pub maximum: Option<u32>,
}

/// Group selection options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OptionsSpec {
    /// Whether all resources must land on one provider (default true).
    #[serde(default)]
    pub single_provider: Option<bool>,
    /// Indexes of earlier groups to be isolated from.
    #[serde(default)]
    pub isolate_from: Vec<usize>,
}

/// One request group in descriptor form.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RequestGroupSpec {
    /// Resource requests keyed by resource class code.
    pub resources: BTreeMap<String, ResourceSpec>,
    /// Group-level capability constraints (OR between entries).
    #[serde(default)]
    pub capabilities: Vec<CapabilitySpec>,
    /// Optional provider group membership constraint.
    #[serde(default)]
    pub provider_groups: Option<GroupConstraintSpec>,
    /// Adjacency constraints.
    #[serde(default)]
    pub distances: Vec<DistanceSpec>,
    /// Selection options.
    #[serde(default)]
    pub options: Option<OptionsSpec>,
}

/// Full claim descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimDescriptor {
    /// Consumer identity.
    pub consumer: ConsumerSpec,
    /// Window start.
    pub claim_time: TimeSpec,
    /// Window end.
    pub release_time: TimeSpec,
    /// Ordered request groups.
    pub request_groups: Vec<RequestGroupSpec>,
}

// ============================================================================
// SECTION: Parsing and Conversion
// ============================================================================

impl ClaimDescriptor {
    /// Parses a descriptor from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Parse`] on malformed YAML.
    pub fn from_yaml_str(text: &str) -> Result<Self, DescriptorError> {
        serde_yaml::from_str(text).map_err(|err| DescriptorError::Parse(err.to_string()))
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

    /// Converts the descriptor into the engine's claim request.
    ///
    /// Resource constraints are emitted in resource class code order, which
    /// keeps repeated conversions deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::Validation`] when a resource request has
    /// neither `min` nor `max` or a time does not parse.
    pub fn to_claim_request(&self) -> Result<ClaimRequest, DescriptorError> {
        let claim_time = self.claim_time.resolve()?;
        let release_time = self.release_time.resolve()?;
        let mut request_groups = Vec::with_capacity(self.request_groups.len());
        for (group_index, group) in self.request_groups.iter().enumerate() {
            let mut resource_constraints = Vec::with_capacity(group.resources.len());
            for (code, resource) in &group.resources {
                let (Some(min_amount), Some(max_amount)) = (
                    resource.min.or(resource.max),
                    resource.max.or(resource.min),
                ) else {
                    return Err(DescriptorError::Validation(format!(
                        "resource {code} in group {group_index} needs min or max"
                    )));
                };
                resource_constraints.push(ResourceConstraint {
                    resource_class: ResourceClassCode::new(code.clone()),
                    min_amount,
                    max_amount,
                    capabilities: resource
                        .capabilities
                        .as_ref()
                        .map(CapabilitySpec::to_constraint),
                });
            }
            let options = group.options.as_ref().map_or_else(
                ClaimRequestGroupOptions::default,
                |options| ClaimRequestGroupOptions {
                    single_provider: options.single_provider.unwrap_or(true),
                    isolate_from: options.isolate_from.clone(),
                },
            );
            request_groups.push(ClaimRequestGroup {
                options,
                resource_constraints,
                capability_constraints: group
                    .capabilities
                    .iter()
                    .map(CapabilitySpec::to_constraint)
                    .collect(),
                provider_group_constraints: group.provider_groups.as_ref().map(|spec| {
                    ProviderGroupConstraint {
                        require_groups: spec.require.clone(),
                        forbid_groups: spec.forbid.clone(),
                        any_groups: spec.any.clone(),
                    }
                }),
                distance_constraints: group
                    .distances
                    .iter()
                    .map(|spec| DistanceConstraint {
                        provider: Uuid::new(spec.provider.clone()),
                        distance_type: DistanceTypeCode::new(spec.distance_type.clone()),
                        minimum: spec.minimum,
                        maximum: spec.maximum,
                    })
                    .collect(),
            });
        }
        Ok(ClaimRequest {
            consumer: self.consumer.to_identity(),
            window: ClaimWindow {
                claim_time,
                release_time,
            },
            request_groups,
        })
    }
}
