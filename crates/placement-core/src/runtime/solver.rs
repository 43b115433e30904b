// crates/placement-core/src/runtime/solver.rs
// ============================================================================
// Module: Request Group Solver
// Description: Composes per-constraint candidate sets for one request group.
// Purpose: Turn a request group's constraints into a surviving provider set.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! The solver walks one request group's constraints in a fixed order:
//! capability constraints (OR between them, require AND any AND NOT forbid
//! within one), provider group constraints, distance constraints, and
//! finally resource constraints (AND). Exclusions accumulated along the way
//! are pushed into every subsequent catalog query so forbidden providers
//! never appear in a candidate set. Any AND that empties the running match
//! set fails the group fast; the caller reports no placement, not an error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::CapabilityConstraint;
use crate::core::ClaimRequestGroup;
use crate::core::ClaimWindow;
use crate::core::ProviderGroupId;
use crate::core::ProviderId;
use crate::core::ProviderIdentity;
use crate::interfaces::CapacityQuery;
use crate::interfaces::CatalogError;
use crate::interfaces::CatalogMetadata;
use crate::interfaces::CatalogQueries;
use crate::interfaces::DistanceQuery;
use crate::interfaces::GroupMembershipQuery;
use crate::runtime::context::ConstraintResult;
use crate::runtime::context::MatchContext;
use crate::runtime::engine::ClaimError;
use crate::runtime::engine::RequestContext;

// ============================================================================
// SECTION: Group Solution
// ============================================================================

/// Surviving candidates for one request group.
///
/// # Invariants
/// - `resource_matches[i]` is the candidate set returned for the group's
///   i-th resource constraint before intersection; the builder uses it to
///   split constraints across providers when `single_provider` is off.
#[derive(Debug, Clone)]
pub struct GroupSolution {
    /// Final composition state for the group.
    pub context: MatchContext,
    /// Per-resource-constraint candidate sets, in constraint order.
    pub resource_matches: Vec<BTreeMap<ProviderId, ProviderIdentity>>,
}

// ============================================================================
// SECTION: Solver
// ============================================================================

/// Per-request solver borrowing the catalog and metadata snapshot.
#[derive(Debug)]
pub struct GroupSolver<'a, S> {
    /// Catalog query surface.
    catalog: &'a S,
    /// Code-to-id snapshot.
    metadata: &'a CatalogMetadata,
    /// Candidate fan-out cap per query.
    limit: usize,
}

impl<'a, S: CatalogQueries> GroupSolver<'a, S> {
    /// Creates a solver over a catalog and metadata snapshot.
    #[must_use]
    pub const fn new(catalog: &'a S, metadata: &'a CatalogMetadata, limit: usize) -> Self {
        Self {
            catalog,
            metadata,
            limit,
        }
    }

    /// Solves one request group, returning `None` when no provider set
    /// satisfies every constraint.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError`] on unknown codes, catalog failures, or an
    /// expired deadline.
    pub fn solve(
        &self,
        ctx: &RequestContext,
        window: &ClaimWindow,
        group: &ClaimRequestGroup,
    ) -> Result<Option<GroupSolution>, ClaimError> {
        let mut context = MatchContext::new();
        if !self.apply_capability_constraints(ctx, group, &mut context)? {
            return Ok(None);
        }
        if !self.apply_provider_group_constraints(ctx, group, &mut context)? {
            return Ok(None);
        }
        if !self.apply_distance_constraints(ctx, group, &mut context)? {
            return Ok(None);
        }
        let Some(resource_matches) =
            self.apply_resource_constraints(ctx, window, group, &mut context)?
        else {
            return Ok(None);
        };
        Ok(Some(GroupSolution {
            context,
            resource_matches,
        }))
    }

    /// Applies the group-level capability constraints (OR between them).
    ///
    /// Returns false when the constraints reject every provider.
    fn apply_capability_constraints(
        &self,
        ctx: &RequestContext,
        group: &ClaimRequestGroup,
        context: &mut MatchContext,
    ) -> Result<bool, ClaimError> {
        if group.capability_constraints.is_empty() {
            return Ok(true);
        }
        let mut positive = false;
        for constraint in &group.capability_constraints {
            ctx.check_deadline()?;
            match self.evaluate_capability_constraint(constraint, &context.exclude_ids())? {
                ConstraintResult::NoExclude => {}
                ConstraintResult::NoMatches => positive = true,
                ConstraintResult::Matched { matches, exclude } => {
                    context.exclude_or(exclude);
                    if constraint.has_positive_clause() {
                        positive = true;
                        context.match_or(matches);
                    }
                }
            }
        }
        if positive && !context.has_matches() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Evaluates one capability constraint: require AND any AND NOT forbid.
    ///
    /// A constraint with no clauses, or with only a forbid clause matching
    /// no provider, is `NoExclude`; a positive clause matching nothing is
    /// `NoMatches`.
    fn evaluate_capability_constraint(
        &self,
        constraint: &CapabilityConstraint,
        exclude: &[ProviderId],
    ) -> Result<ConstraintResult, ClaimError> {
        if constraint.is_empty() {
            return Ok(ConstraintResult::NoExclude);
        }
        let resolved = self.metadata.resolve_capabilities(
            &constraint.require,
            &constraint.any,
            &constraint.forbid,
        )?;
        let mut matches: Option<BTreeMap<ProviderId, ProviderIdentity>> = None;
        if !resolved.require.is_empty() {
            let found = identity_map(self.catalog.providers_with_all_capabilities(
                &resolved.require,
                exclude,
                self.limit,
            )?);
            if found.is_empty() {
                return Ok(ConstraintResult::NoMatches);
            }
            matches = Some(found);
        }
        if !resolved.any.is_empty() {
            let found = identity_map(self.catalog.providers_with_any_capabilities(
                &resolved.any,
                exclude,
                self.limit,
            )?);
            if found.is_empty() {
                return Ok(ConstraintResult::NoMatches);
            }
            matches = Some(match matches {
                Some(mut existing) => {
                    existing.retain(|id, _| found.contains_key(id));
                    if existing.is_empty() {
                        return Ok(ConstraintResult::NoMatches);
                    }
                    existing
                }
                None => found,
            });
        }
        // The exclusion set must be complete, so the forbid lookup is
        // unbounded.
        let excluded = if resolved.forbid.is_empty() {
            BTreeMap::new()
        } else {
            identity_map(self.catalog.providers_with_any_capabilities(
                &resolved.forbid,
                &[],
                usize::MAX,
            )?)
        };
        match matches {
            None if excluded.is_empty() => Ok(ConstraintResult::NoExclude),
            None => Ok(ConstraintResult::matched(BTreeMap::new(), excluded)),
            Some(found) => Ok(ConstraintResult::matched(found, excluded)),
        }
    }

    /// Applies the optional provider group membership constraint.
    ///
    /// Returns false when membership requirements reject every provider.
    fn apply_provider_group_constraints(
        &self,
        ctx: &RequestContext,
        group: &ClaimRequestGroup,
        context: &mut MatchContext,
    ) -> Result<bool, ClaimError> {
        let Some(constraint) = &group.provider_group_constraints else {
            return Ok(true);
        };
        if constraint.is_empty() {
            return Ok(true);
        }
        let require = resolve_group_names(self.metadata, &constraint.require_groups)?;
        let any = resolve_group_names(self.metadata, &constraint.any_groups)?;
        let forbid = resolve_group_names(self.metadata, &constraint.forbid_groups)?;
        if !forbid.is_empty() {
            ctx.check_deadline()?;
            let excluded =
                identity_map(self.catalog.providers_in_any_group(&forbid, usize::MAX)?);
            context.exclude_or(excluded);
            if context.started_filtering() && !context.has_matches() {
                return Ok(false);
            }
        }
        if !require.is_empty() || !any.is_empty() {
            ctx.check_deadline()?;
            let query = GroupMembershipQuery {
                require,
                any,
                exclude: context.exclude_ids(),
                limit: self.limit,
            };
            let found = identity_map(self.catalog.providers_in_groups(&query)?);
            if !context.match_and(found) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Applies the group's distance constraints (AND).
    ///
    /// Returns false when a distance band rejects every provider.
    fn apply_distance_constraints(
        &self,
        ctx: &RequestContext,
        group: &ClaimRequestGroup,
        context: &mut MatchContext,
    ) -> Result<bool, ClaimError> {
        for constraint in &group.distance_constraints {
            ctx.check_deadline()?;
            let distance_type = self.metadata.distance_type_id(&constraint.distance_type)?;
            let Some(reference) = self.catalog.provider_identity_by_uuid(&constraint.provider)?
            else {
                return Err(ClaimError::Store(CatalogError::NotFound(format!(
                    "distance reference provider {}",
                    constraint.provider
                ))));
            };
            let query = DistanceQuery {
                reference: reference.id,
                distance_type,
                min_position: constraint.minimum.unwrap_or(0),
                max_position: constraint.maximum.unwrap_or(u32::MAX),
                exclude: context.exclude_ids(),
                limit: self.limit,
            };
            let found = identity_map(self.catalog.providers_within_distance(&query)?);
            if !context.match_and(found) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Applies the group's resource constraints (AND), recording each
    /// constraint's own candidate set for the builder.
    ///
    /// Returns `None` when a capacity query rejects every provider.
    fn apply_resource_constraints(
        &self,
        ctx: &RequestContext,
        window: &ClaimWindow,
        group: &ClaimRequestGroup,
        context: &mut MatchContext,
    ) -> Result<Option<Vec<BTreeMap<ProviderId, ProviderIdentity>>>, ClaimError> {
        let mut resource_matches = Vec::with_capacity(group.resource_constraints.len());
        for constraint in &group.resource_constraints {
            ctx.check_deadline()?;
            let resource_class = self.metadata.resource_class_id(&constraint.resource_class)?;
            let capabilities = match &constraint.capabilities {
                Some(scoped) if !scoped.is_empty() => Some(self.metadata.resolve_capabilities(
                    &scoped.require,
                    &scoped.any,
                    &scoped.forbid,
                )?),
                _ => None,
            };
            let query = CapacityQuery {
                resource_class,
                amount: constraint.max_amount,
                window: *window,
                capabilities,
                exclude: context.exclude_ids(),
                limit: self.limit,
            };
            let found = identity_map(self.catalog.providers_with_capacity(&query)?);
            resource_matches.push(found.clone());
            if !context.match_and(found) {
                return Ok(None);
            }
        }
        Ok(Some(resource_matches))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Keys a candidate list by provider id.
fn identity_map(providers: Vec<ProviderIdentity>) -> BTreeMap<ProviderId, ProviderIdentity> {
    providers.into_iter().map(|identity| (identity.id, identity)).collect()
}

/// Resolves provider group names through the metadata snapshot.
fn resolve_group_names(
    metadata: &CatalogMetadata,
    names: &[String],
) -> Result<Vec<ProviderGroupId>, ClaimError> {
    let mut ids = Vec::with_capacity(names.len());
    for name in names {
        let id = metadata.provider_group_id(name)?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
