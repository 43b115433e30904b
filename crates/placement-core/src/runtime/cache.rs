// crates/placement-core/src/runtime/cache.rs
// ============================================================================
// Module: Catalog Metadata Cache
// Description: One-shot read-through cache of code-to-id maps.
// Purpose: Resolve catalog codes without a round trip per constraint.
// Dependencies: crate::interfaces
// ============================================================================

//! ## Overview
//! Code-to-id lookups (resource classes, capabilities, distances, provider
//! groups) are read-mostly and immutable after catalog load. Each engine
//! owns one cache populated through a one-shot gate on first use; there is
//! no process-wide singleton. Concurrent first callers may race the load,
//! in which case one snapshot wins and the others are discarded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::OnceLock;

use crate::interfaces::CatalogError;
use crate::interfaces::CatalogMetadata;
use crate::interfaces::CatalogStore;

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Per-engine metadata cache with one-shot initialization.
#[derive(Debug, Default)]
pub struct CatalogCache {
    /// One-shot gate holding the loaded snapshot.
    gate: OnceLock<CatalogMetadata>,
}

impl CatalogCache {
    /// Creates an unpopulated cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached snapshot, loading it from the store on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when the initial load fails; a failed load
    /// leaves the gate unset so a later call can retry.
    pub fn get_or_load<S: CatalogStore>(&self, store: &S) -> Result<&CatalogMetadata, CatalogError> {
        if let Some(metadata) = self.gate.get() {
            return Ok(metadata);
        }
        let loaded = store.load_metadata()?;
        Ok(self.gate.get_or_init(|| loaded))
    }

    /// Returns the cached snapshot when already populated.
    #[must_use]
    pub fn get(&self) -> Option<&CatalogMetadata> {
        self.gate.get()
    }
}
