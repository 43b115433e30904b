// crates/placement-core/src/runtime/context.rs
// ============================================================================
// Module: Match Context
// Description: Per-group candidate set composition state.
// Purpose: AND/OR-compose constraint candidate sets and track exclusions.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! A [`MatchContext`] accumulates the surviving candidate providers for one
//! request group as constraints are applied. `started_filtering`
//! distinguishes "no filter applied yet" from "filter applied, result
//! empty" so an untouched context never reads as a failed group.
//! [`ConstraintResult`] is the tagged sum that replaces sentinel objects:
//! `NoMatches` aborts a group, `NoExclude` contributes nothing without
//! failing, and `Matched` carries candidate and exclusion sets.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use crate::core::ProviderId;
use crate::core::ProviderIdentity;

// ============================================================================
// SECTION: Constraint Result
// ============================================================================

/// Outcome of evaluating one constraint against the catalog.
///
/// # Invariants
/// - In `Matched`, `matches` and `exclude` are disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintResult {
    /// The constraint rejected every provider; the group cannot be placed.
    NoMatches,
    /// The constraint contributed nothing (for example a forbid-only clause
    /// matching no provider) and must not fail the group.
    NoExclude,
    /// The constraint produced candidates and/or exclusions.
    Matched {
        /// Candidate providers keyed by id.
        matches: BTreeMap<ProviderId, ProviderIdentity>,
        /// Providers to subtract from this and subsequent candidate sets.
        exclude: BTreeMap<ProviderId, ProviderIdentity>,
    },
}

impl ConstraintResult {
    /// Builds a `Matched` result enforcing the disjointness invariant by
    /// removing excluded providers from the match set.
    #[must_use]
    pub fn matched(
        mut matches: BTreeMap<ProviderId, ProviderIdentity>,
        exclude: BTreeMap<ProviderId, ProviderIdentity>,
    ) -> Self {
        for id in exclude.keys() {
            matches.remove(id);
        }
        Self::Matched { matches, exclude }
    }
}

// ============================================================================
// SECTION: Match Context
// ============================================================================

/// Candidate composition state for one request group.
///
/// # Invariants
/// - `matches` and `exclude` are disjoint at every step.
/// - `started_filtering` flips to true on the first `match_and`/`match_or`
///   and never resets.
/// - Owned by a single request; no interior synchronization.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    /// Running candidate set keyed by provider id.
    matches: BTreeMap<ProviderId, ProviderIdentity>,
    /// Providers barred from matching, keyed by provider id.
    exclude: BTreeMap<ProviderId, ProviderIdentity>,
    /// Whether any positive filter has been applied yet.
    started_filtering: bool,
}

impl MatchContext {
    /// Creates an empty context with filtering not started.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unions a candidate set into the running matches.
    ///
    /// Before filtering starts this sets the match set. Excluded providers
    /// are dropped from the incoming set. Returns true iff the running set
    /// is non-empty afterwards.
    pub fn match_or(&mut self, new: BTreeMap<ProviderId, ProviderIdentity>) -> bool {
        self.started_filtering = true;
        for (id, identity) in new {
            if !self.exclude.contains_key(&id) {
                self.matches.insert(id, identity);
            }
        }
        !self.matches.is_empty()
    }

    /// Intersects a candidate set with the running matches.
    ///
    /// Before filtering starts this sets the match set. Excluded providers
    /// are dropped from the incoming set. Returns true iff the running set
    /// is non-empty afterwards.
    pub fn match_and(&mut self, mut new: BTreeMap<ProviderId, ProviderIdentity>) -> bool {
        for id in self.exclude.keys() {
            new.remove(id);
        }
        if self.started_filtering {
            self.matches.retain(|id, _| new.contains_key(id));
        } else {
            self.matches = new;
            self.started_filtering = true;
        }
        !self.matches.is_empty()
    }

    /// Unions providers into the exclusion set and removes them from the
    /// running matches. Does not start filtering.
    pub fn exclude_or(&mut self, new: BTreeMap<ProviderId, ProviderIdentity>) {
        for (id, identity) in new {
            self.matches.remove(&id);
            self.exclude.insert(id, identity);
        }
    }

    /// Returns whether any positive filter has been applied.
    #[must_use]
    pub const fn started_filtering(&self) -> bool {
        self.started_filtering
    }

    /// Returns whether the running candidate set is non-empty.
    #[must_use]
    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    /// Returns the running candidate set.
    #[must_use]
    pub const fn matches(&self) -> &BTreeMap<ProviderId, ProviderIdentity> {
        &self.matches
    }

    /// Returns the exclusion set.
    #[must_use]
    pub const fn exclude(&self) -> &BTreeMap<ProviderId, ProviderIdentity> {
        &self.exclude
    }

    /// Returns the exclusion ids in ascending order for query plumbing.
    #[must_use]
    pub fn exclude_ids(&self) -> Vec<ProviderId> {
        self.exclude.keys().copied().collect()
    }

    /// Consumes the context, yielding the final candidate set.
    #[must_use]
    pub fn into_matches(self) -> BTreeMap<ProviderId, ProviderIdentity> {
        self.matches
    }
}
