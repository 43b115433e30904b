// crates/placement-core/src/core/time.rs
// ============================================================================
// Module: Placement Time Model
// Description: Epoch-second timestamps and half-open claim windows.
// Purpose: Provide deterministic time values for capacity accounting.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Allocations reserve capacity over half-open `[claim_time, release_time)`
//! windows measured in integer unix epoch seconds. Storing integers keeps
//! window arithmetic deterministic across database backends. The engine never
//! reads wall-clock time for window math; callers supply both ends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp in unix epoch seconds.
///
/// # Invariants
/// - Values are explicitly provided by callers; no validation is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from unix epoch seconds.
    #[must_use]
    pub const fn from_unix_seconds(seconds: i64) -> Self {
        Self(seconds)
    }

    /// Returns the timestamp as unix epoch seconds.
    #[must_use]
    pub const fn unix_seconds(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Claim Window
// ============================================================================

/// Half-open time window `[claim_time, release_time)` for an allocation.
///
/// # Invariants
/// - A well-formed window has `claim_time < release_time`; construction via
///   [`ClaimWindow::new`] enforces this, raw literals must call
///   [`ClaimWindow::is_well_formed`] before capacity math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimWindow {
    /// Inclusive start of the window.
    pub claim_time: Timestamp,
    /// Exclusive end of the window.
    pub release_time: Timestamp,
}

impl ClaimWindow {
    /// Creates a window, returning `None` unless `claim_time < release_time`.
    #[must_use]
    pub fn new(claim_time: Timestamp, release_time: Timestamp) -> Option<Self> {
        let window = Self {
            claim_time,
            release_time,
        };
        window.is_well_formed().then_some(window)
    }

    /// Returns whether `claim_time < release_time`.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.claim_time.unix_seconds() < self.release_time.unix_seconds()
    }

    /// Returns whether two half-open windows overlap.
    ///
    /// Overlap is `self.claim < other.release && self.release > other.claim`.
    /// Windows that merely touch (one releases exactly when the other claims)
    /// do not overlap.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.claim_time.unix_seconds() < other.release_time.unix_seconds()
            && self.release_time.unix_seconds() > other.claim_time.unix_seconds()
    }

    /// Returns whether the window contains the given instant.
    #[must_use]
    pub const fn contains(&self, at: Timestamp) -> bool {
        self.claim_time.unix_seconds() <= at.unix_seconds()
            && at.unix_seconds() < self.release_time.unix_seconds()
    }
}

impl fmt::Display for ClaimWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.claim_time, self.release_time)
    }
}
