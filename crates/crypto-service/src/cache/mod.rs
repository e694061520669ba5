//! Derived-key caching
//!
//! Argon2 derivation is deliberately expensive, so keys are cached per
//! password fingerprint, salt and cost parameters.

mod cache_key;
mod derived_key_cache;

pub use cache_key::{CacheKey, Fingerprinter, PasswordFingerprint};
pub use derived_key_cache::{DerivedKeyCache, DEFAULT_IDLE_TTL};

#[cfg(test)]
pub(crate) use derived_key_cache::tests::CountingKdf;
