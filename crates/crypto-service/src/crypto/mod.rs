//! Cryptographic primitives for password-based encryption
//!
//! This module provides:
//! - AES-256-GCM envelopes keyed by Argon2id
//! - The deprecated AES-CBC scheme for reading old data
//! - Key material handling with zeroize

mod encryption;
pub(crate) mod key_derivation;
mod legacy;
mod secure_memory;

pub use encryption::{AeadCodec, Envelope, NONCE_LEN, SALT_LEN, SEPARATOR, TAG_LEN};
pub use key_derivation::{
    Argon2Kdf, CostParameters, KeyDerivation, MAX_ITERATIONS, MAX_LANES, MAX_MEMORY_COST,
};
pub use legacy::{LegacyCodec, LegacyEncryptedData, LEGACY_DEFAULT_SALT, LEGACY_ITERATIONS};
pub use secure_memory::{DerivedKey, LegacyKey, DERIVED_KEY_LEN};
