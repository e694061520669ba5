//! Cache index for derived keys

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::CostParameters;
use crate::error::{CryptoError, Result};

type HmacSha256 = Hmac<Sha256>;

/// One-way password digest used in place of the password itself
pub type PasswordFingerprint = [u8; 32];

/// Keyed password fingerprinting
///
/// The HMAC key is random per instance, so fingerprints held in memory
/// cannot be matched against a precomputed password dictionary.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Fingerprinter {
    key: [u8; 32],
}

impl Fingerprinter {
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    pub fn fingerprint(&self, password: &str) -> Result<PasswordFingerprint> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .map_err(|e| CryptoError::Security(format!("Fingerprint init failed: {}", e)))?;
        mac.update(password.as_bytes());
        Ok(mac.finalize().into_bytes().into())
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fingerprinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fingerprinter").finish_non_exhaustive()
    }
}

/// Immutable cache index: password fingerprint, salt and cost parameters
///
/// Equal iff all five fields are equal. The hash is computed once at construction.
#[derive(Clone)]
pub struct CacheKey {
    fingerprint: PasswordFingerprint,
    salt: Box<[u8]>,
    params: CostParameters,
    hash: u64,
}

impl CacheKey {
    pub fn new(fingerprint: PasswordFingerprint, salt: &[u8], params: CostParameters) -> Self {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        salt.hash(&mut hasher);
        params.hash(&mut hasher);

        Self {
            fingerprint,
            salt: salt.into(),
            params,
            hash: hasher.finish(),
        }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn params(&self) -> &CostParameters {
        &self.params
    }

    pub fn memory_cost(&self) -> u32 {
        self.params.memory_cost
    }

    pub fn iterations(&self) -> u32 {
        self.params.iterations
    }

    pub fn lanes(&self) -> u32 {
        self.params.lanes
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.fingerprint == other.fingerprint
            && self.salt == other.salt
            && self.params == other.params
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheKey")
            .field("fingerprint", &"[REDACTED]")
            .field("salt_len", &self.salt.len())
            .field("params", &self.params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn params() -> CostParameters {
        CostParameters::new(8192, 1, 1)
    }

    #[test]
    fn test_fingerprint_stable_per_instance() {
        let fp = Fingerprinter::new();
        assert_eq!(fp.fingerprint("pw").unwrap(), fp.fingerprint("pw").unwrap());
        assert_ne!(fp.fingerprint("pw").unwrap(), fp.fingerprint("pw2").unwrap());
    }

    #[test]
    fn test_fingerprint_keyed() {
        // Two instances use different HMAC keys
        let a = Fingerprinter::new();
        let b = Fingerprinter::new();
        assert_ne!(a.fingerprint("pw").unwrap(), b.fingerprint("pw").unwrap());
    }

    #[test]
    fn test_equality_covers_all_fields() {
        let fp = [1u8; 32];
        let base = CacheKey::new(fp, b"salt-one", params());

        assert_eq!(base, CacheKey::new(fp, b"salt-one", params()));
        assert_ne!(base, CacheKey::new([2u8; 32], b"salt-one", params()));
        assert_ne!(base, CacheKey::new(fp, b"salt-two", params()));
        assert_ne!(base, CacheKey::new(fp, b"salt-one", CostParameters::new(16384, 1, 1)));
        assert_ne!(base, CacheKey::new(fp, b"salt-one", CostParameters::new(8192, 2, 1)));
        assert_ne!(base, CacheKey::new(fp, b"salt-one", CostParameters::new(8192, 1, 2)));
    }

    #[test]
    fn test_usable_as_hash_key() {
        let fp = [3u8; 32];
        let mut set = HashSet::new();
        set.insert(CacheKey::new(fp, b"abc", params()));
        set.insert(CacheKey::new(fp, b"abc", params()));
        set.insert(CacheKey::new(fp, b"abd", params()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_accessors() {
        let key = CacheKey::new([0u8; 32], b"salt", CostParameters::new(1024, 2, 3));
        assert_eq!(key.salt(), b"salt");
        assert_eq!(key.memory_cost(), 1024);
        assert_eq!(key.iterations(), 2);
        assert_eq!(key.lanes(), 3);
    }
}
