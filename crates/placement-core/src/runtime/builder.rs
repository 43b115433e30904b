// crates/placement-core/src/runtime/builder.rs
// ============================================================================
// Module: Allocation Builder
// Description: Concrete provider selection and allocation item emission.
// Purpose: Turn a solved candidate set into allocation items per group options.
// Dependencies: crate::{core, runtime}
// ============================================================================

//! ## Overview
//! The builder converts a group's surviving candidates into allocation
//! items. With `single_provider` (the default) every resource constraint in
//! the group lands on one provider: the lowest `(id, uuid)` candidate.
//! Without it, each resource constraint independently picks the lowest
//! candidate that posts inventory for that resource class. Providers chosen
//! by groups named in `isolate_from` are removed before selection. Items
//! carry `used = max_amount`; the coordinator may re-emit with `min_amount`
//! when capacity is exceeded at persist time.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::core::AllocationItem;
use crate::core::ClaimRequestGroup;
use crate::core::ProviderId;
use crate::core::ProviderIdentity;
use crate::runtime::solver::GroupSolution;

// ============================================================================
// SECTION: Group Placement
// ============================================================================

/// Items emitted for one request group plus the providers they landed on.
///
/// # Invariants
/// - `items` is in the group's resource constraint order, one item per
///   constraint.
/// - With `single_provider`, `chosen` has exactly one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPlacement {
    /// Allocation items in resource constraint order.
    pub items: Vec<AllocationItem>,
    /// Providers the group's items were placed on.
    pub chosen: BTreeSet<ProviderId>,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Selects providers for a solved group under its options.
///
/// Returns `None` when isolation or per-constraint selection leaves no
/// eligible provider; the caller reports no placement.
#[must_use]
pub fn build_group_placement(
    group: &ClaimRequestGroup,
    solution: &GroupSolution,
    isolated: &BTreeSet<ProviderId>,
) -> Option<GroupPlacement> {
    if group.options.single_provider {
        let chosen = select_lowest(solution.context.matches(), isolated)?;
        let items = group
            .resource_constraints
            .iter()
            .map(|constraint| AllocationItem {
                provider: chosen.clone(),
                resource_class: constraint.resource_class.clone(),
                used: constraint.max_amount,
            })
            .collect();
        return Some(GroupPlacement {
            items,
            chosen: BTreeSet::from([chosen.id]),
        });
    }

    let mut items = Vec::with_capacity(group.resource_constraints.len());
    let mut chosen_ids = BTreeSet::new();
    for (index, constraint) in group.resource_constraints.iter().enumerate() {
        let per_constraint = solution.resource_matches.get(index)?;
        // Selection stays within the group's overall intersection so a
        // split placement still honors every group-level constraint.
        let eligible: BTreeMap<ProviderId, ProviderIdentity> = per_constraint
            .iter()
            .filter(|(id, _)| solution.context.matches().contains_key(*id))
            .map(|(id, identity)| (*id, identity.clone()))
            .collect();
        let chosen = select_lowest(&eligible, isolated)?;
        chosen_ids.insert(chosen.id);
        items.push(AllocationItem {
            provider: chosen,
            resource_class: constraint.resource_class.clone(),
            used: constraint.max_amount,
        });
    }
    Some(GroupPlacement {
        items,
        chosen: chosen_ids,
    })
}

/// Picks the lowest `(id, uuid)` candidate not in the isolated set.
fn select_lowest(
    candidates: &BTreeMap<ProviderId, ProviderIdentity>,
    isolated: &BTreeSet<ProviderId>,
) -> Option<ProviderIdentity> {
    candidates
        .values()
        .filter(|identity| !isolated.contains(&identity.id))
        .min()
        .cloned()
}
