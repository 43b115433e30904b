// crates/placement-config/src/identity.rs
// ============================================================================
// Module: Descriptor Identity
// Description: Deterministic uuid derivation for descriptor-created rows.
// Purpose: Make repeated catalog loads reproducible byte for byte.
// Dependencies: placement-core, sha2
// ============================================================================

//! ## Overview
//! Descriptor loads must be reproducible: loading the same deployment twice
//! has to address the same partitions, groups, and providers. Identity is
//! therefore derived, not random: the uuid of a descriptor-created row is
//! the first 16 bytes of `SHA-256("<namespace>:<name>")` rendered as 32 hex
//! characters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use placement_core::Uuid;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Hex alphabet for uuid rendering.
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Derives a stable 32-hex-character uuid from a namespaced name.
#[must_use]
pub fn derive_uuid(namespace: &str, name: &str) -> Uuid {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut rendered = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        rendered.push(char::from(HEX[usize::from(byte >> 4)]));
        rendered.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    Uuid::new(rendered)
}
