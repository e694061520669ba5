//! Key material with automatic zeroization

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a derived key in bytes (256 bits)
pub const DERIVED_KEY_LEN: usize = 32;

/// Argon2-derived AES-256 key - automatically zeroed when dropped
///
/// Only the cache entry that produced it owns one; the bytes never leave the crate.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; DERIVED_KEY_LEN],
}

impl DerivedKey {
    /// Create a new derived key from raw bytes
    pub fn new(key: [u8; DERIVED_KEY_LEN]) -> Self {
        Self { key }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; DERIVED_KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Raw AES key supplied by older direct-key call sites - zeroed when dropped
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct LegacyKey {
    key: Vec<u8>,
}

impl LegacyKey {
    /// Create from a slice; must be a valid AES key length (16, 24 or 32 bytes)
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        match slice.len() {
            16 | 24 | 32 => Some(Self { key: slice.to_vec() }),
            _ => None,
        }
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.key
    }
}

impl Clone for LegacyKey {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
        }
    }
}

impl std::fmt::Debug for LegacyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyKey")
            .field("len", &self.key.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}
