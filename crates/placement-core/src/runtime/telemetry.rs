// crates/placement-core/src/runtime/telemetry.rs
// ============================================================================
// Module: Engine Telemetry
// Description: Observability counters for claim processing.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module exposes a thin metrics surface for claim counters and latency
//! histograms. It is intentionally dependency-light so deployments can plug
//! in Prometheus or OpenTelemetry without redesign. Labels carry no request
//! payloads.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Latency buckets in milliseconds for claim processing histograms.
pub const CLAIM_LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000];

/// Number of histogram slots (buckets plus overflow).
const HISTOGRAM_SLOTS: usize = CLAIM_LATENCY_BUCKETS_MS.len() + 1;

// ============================================================================
// SECTION: Outcomes
// ============================================================================

/// Claim processing outcome classification.
///
/// # Invariants
/// - Variants are stable for telemetry labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClaimOutcome {
    /// A claim was produced and persisted.
    Granted,
    /// No provider set satisfied the request (empty claim list).
    NoPlacement,
    /// The request failed validation or code resolution.
    Rejected,
    /// The request was cancelled at a deadline boundary.
    Cancelled,
    /// The request failed in the catalog after retries.
    Failed,
}

// ============================================================================
// SECTION: Counters
// ============================================================================

/// Internal mutable counters before snapshot serialization.
#[derive(Debug, Default)]
struct EngineCounters {
    /// Claims received.
    requested: u64,
    /// Claims granted.
    granted: u64,
    /// Claims that found no placement.
    no_placement: u64,
    /// Claims rejected before solving.
    rejected: u64,
    /// Claims cancelled at a deadline boundary.
    cancelled: u64,
    /// Claims failed in the catalog after retries.
    failed: u64,
    /// Whole-claim retries driven by contention or capacity races.
    retries: u64,
    /// Latency histogram counts (length = buckets + 1).
    latency_histogram: [u64; HISTOGRAM_SLOTS],
    /// Cumulative claim processing time in milliseconds.
    total_duration_ms: u64,
}

/// Serializable snapshot of engine counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    /// Claims received.
    pub requested: u64,
    /// Claims granted.
    pub granted: u64,
    /// Claims that found no placement.
    pub no_placement: u64,
    /// Claims rejected before solving.
    pub rejected: u64,
    /// Claims cancelled at a deadline boundary.
    pub cancelled: u64,
    /// Claims failed in the catalog after retries.
    pub failed: u64,
    /// Whole-claim retries driven by contention or capacity races.
    pub retries: u64,
    /// Latency bucket upper bounds in milliseconds.
    pub latency_buckets_ms: Vec<u64>,
    /// Latency histogram counts (length = `latency_buckets_ms.len() + 1`).
    pub latency_histogram: Vec<u64>,
    /// Cumulative claim processing time in milliseconds.
    pub total_duration_ms: u64,
}

/// Shared engine counters with interior locking.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Counter state guarded for concurrent request threads.
    inner: Mutex<EngineCounters>,
}

impl EngineStats {
    /// Creates zeroed stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one claim outcome with its processing duration.
    pub fn record_outcome(&self, outcome: ClaimOutcome, duration: Duration, retries: u64) {
        let Ok(mut counters) = self.inner.lock() else {
            return;
        };
        counters.requested = counters.requested.saturating_add(1);
        counters.retries = counters.retries.saturating_add(retries);
        match outcome {
            ClaimOutcome::Granted => counters.granted = counters.granted.saturating_add(1),
            ClaimOutcome::NoPlacement => {
                counters.no_placement = counters.no_placement.saturating_add(1);
            }
            ClaimOutcome::Rejected => counters.rejected = counters.rejected.saturating_add(1),
            ClaimOutcome::Cancelled => counters.cancelled = counters.cancelled.saturating_add(1),
            ClaimOutcome::Failed => counters.failed = counters.failed.saturating_add(1),
        }
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        counters.total_duration_ms = counters.total_duration_ms.saturating_add(millis);
        let slot = CLAIM_LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(CLAIM_LATENCY_BUCKETS_MS.len());
        counters.latency_histogram[slot] = counters.latency_histogram[slot].saturating_add(1);
    }

    /// Returns a serializable snapshot of the counters.
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let counters = match self.inner.lock() {
            Ok(counters) => counters,
            Err(poisoned) => poisoned.into_inner(),
        };
        EngineStatsSnapshot {
            requested: counters.requested,
            granted: counters.granted,
            no_placement: counters.no_placement,
            rejected: counters.rejected,
            cancelled: counters.cancelled,
            failed: counters.failed,
            retries: counters.retries,
            latency_buckets_ms: CLAIM_LATENCY_BUCKETS_MS.to_vec(),
            latency_histogram: counters.latency_histogram.to_vec(),
            total_duration_ms: counters.total_duration_ms,
        }
    }
}
