//! Expire-after-access cache of derived keys with single-flight computation

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{mapref::entry::Entry, DashMap};
use once_cell::sync::OnceCell;
use tracing::debug;

use super::CacheKey;
use crate::crypto::{DerivedKey, KeyDerivation};
use crate::error::{CryptoError, Result};

/// Idle period after which an entry is dropped
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(10 * 60);

const SWEEP_EVERY_LOOKUPS: u64 = 256;

/// One cache entry. The cell is filled at most once; concurrent readers block on it.
struct CacheSlot {
    key: OnceCell<Arc<DerivedKey>>,
    last_access_ms: AtomicU64,
}

impl CacheSlot {
    fn new(now_ms: u64) -> Self {
        Self {
            key: OnceCell::new(),
            last_access_ms: AtomicU64::new(now_ms),
        }
    }

    fn touch(&self, now_ms: u64) {
        self.last_access_ms.fetch_max(now_ms, Ordering::Relaxed);
    }

    fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_access_ms.load(Ordering::Relaxed)) >= ttl_ms
    }
}

/// Maps `CacheKey` to the Argon2 output for that key
///
/// The map is sharded and the shard lock is released before the KDF runs,
/// so lookups for distinct keys never wait on each other's derivation.
pub struct DerivedKeyCache {
    kdf: Arc<dyn KeyDerivation>,
    entries: DashMap<CacheKey, Arc<CacheSlot>>,
    idle_ttl: Duration,
    epoch: Instant,
    lookups: AtomicU64,
}

impl DerivedKeyCache {
    pub fn new(kdf: Arc<dyn KeyDerivation>) -> Self {
        Self::with_idle_ttl(kdf, DEFAULT_IDLE_TTL)
    }

    pub fn with_idle_ttl(kdf: Arc<dyn KeyDerivation>, idle_ttl: Duration) -> Self {
        Self {
            kdf,
            entries: DashMap::new(),
            idle_ttl,
            epoch: Instant::now(),
            lookups: AtomicU64::new(0),
        }
    }

    /// Return the cached key for `key`, deriving it from `password` on a miss
    pub fn get_or_compute(&self, key: &CacheKey, password: &str) -> Result<Arc<DerivedKey>> {
        self.get_or_compute_at(key, password, Instant::now())
    }

    fn get_or_compute_at(
        &self,
        key: &CacheKey,
        password: &str,
        now: Instant,
    ) -> Result<Arc<DerivedKey>> {
        let now_ms = self.ticks(now);
        let ttl_ms = self.ttl_ms();

        let slot = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now_ms, ttl_ms) {
                    occupied.insert(Arc::new(CacheSlot::new(now_ms)));
                }
                Arc::clone(occupied.get())
            }
            Entry::Vacant(vacant) => {
                Arc::clone(vacant.insert(Arc::new(CacheSlot::new(now_ms))).value())
            }
        };
        slot.touch(now_ms);

        let mut computed = false;
        let derived = slot
            .key
            .get_or_try_init(|| {
                computed = true;
                self.kdf
                    .derive(password, key.salt(), key.params())
                    .map(Arc::new)
            })
            .map_err(|e| CryptoError::Io(format!("Key derivation failed: {}", e)))?;

        if computed {
            debug!(entries = self.entries.len(), "Derived key cache miss");
        } else {
            debug!("Derived key cache hit");
        }

        self.sweep_if_needed(now_ms, ttl_ms);
        Ok(Arc::clone(derived))
    }

    /// Drop every entry. Callers already holding a key keep it.
    pub fn invalidate_all(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        debug!(dropped, "Invalidated derived key cache");
    }

    /// Remove entries idle for longer than the TTL
    pub fn purge_expired(&self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&self, now: Instant) {
        let now_ms = self.ticks(now);
        let ttl_ms = self.ttl_ms();
        self.entries.retain(|_, slot| !slot.is_expired(now_ms, ttl_ms));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_if_needed(&self, now_ms: u64, ttl_ms: u64) {
        let seen = self.lookups.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % SWEEP_EVERY_LOOKUPS != 0 {
            return;
        }
        self.entries.retain(|_, slot| !slot.is_expired(now_ms, ttl_ms));
    }

    fn ticks(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.epoch).as_millis() as u64
    }

    fn ttl_ms(&self) -> u64 {
        self.idle_ttl.as_millis() as u64
    }
}

impl std::fmt::Debug for DerivedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyCache")
            .field("entries", &self.entries.len())
            .field("idle_ttl", &self.idle_ttl)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::crypto::{CostParameters, DERIVED_KEY_LEN};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::thread;

    /// KDF stub that counts invocations and sleeps to widen race windows
    #[derive(Default)]
    pub(crate) struct CountingKdf {
        pub(crate) calls: AtomicUsize,
        pub(crate) delay: Duration,
    }

    impl CountingKdf {
        pub(crate) fn with_delay(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl KeyDerivation for CountingKdf {
        fn derive(&self, password: &str, salt: &[u8], _params: &CostParameters) -> Result<DerivedKey> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            let mut key = [0u8; DERIVED_KEY_LEN];
            for (i, b) in password.bytes().chain(salt.iter().copied()).enumerate() {
                key[i % DERIVED_KEY_LEN] ^= b;
            }
            Ok(DerivedKey::new(key))
        }
    }

    struct FailingKdf;

    impl KeyDerivation for FailingKdf {
        fn derive(&self, _: &str, _: &[u8], _: &CostParameters) -> Result<DerivedKey> {
            Err(CryptoError::Security("boom".to_string()))
        }
    }

    fn cache_key(salt: &[u8]) -> CacheKey {
        CacheKey::new([5u8; 32], salt, CostParameters::new(8192, 1, 1))
    }

    #[test]
    fn test_second_lookup_is_a_hit() {
        let kdf = Arc::new(CountingKdf::default());
        let cache = DerivedKeyCache::new(kdf.clone());
        let key = cache_key(b"salt-a");

        let first = cache.get_or_compute(&key, "pw").unwrap();
        let second = cache.get_or_compute(&key, "pw").unwrap();

        assert_eq!(kdf.calls(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_same_key_computes_once() {
        let kdf = Arc::new(CountingKdf::with_delay(Duration::from_millis(50)));
        let cache = DerivedKeyCache::new(kdf.clone());
        let key = cache_key(b"shared");
        let barrier = Barrier::new(8);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    barrier.wait();
                    cache.get_or_compute(&key, "pw").unwrap();
                });
            }
        });

        assert_eq!(kdf.calls(), 1);
    }

    #[test]
    fn test_distinct_keys_do_not_serialize() {
        let kdf = Arc::new(CountingKdf::with_delay(Duration::from_millis(200)));
        let cache = DerivedKeyCache::new(kdf.clone());
        let barrier = Barrier::new(4);

        let started = Instant::now();
        thread::scope(|s| {
            for i in 0..4u8 {
                let cache = &cache;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    cache.get_or_compute(&cache_key(&[i; 16]), "pw").unwrap();
                });
            }
        });

        assert_eq!(kdf.calls(), 4);
        // Four serialized derivations would take at least 800ms
        assert!(started.elapsed() < Duration::from_millis(700));
    }

    #[test]
    fn test_expires_after_idle_period() {
        let kdf = Arc::new(CountingKdf::default());
        let cache = DerivedKeyCache::new(kdf.clone());
        let key = cache_key(b"idle");
        let start = Instant::now();

        cache.get_or_compute_at(&key, "pw", start).unwrap();
        cache
            .get_or_compute_at(&key, "pw", start + Duration::from_secs(9 * 60))
            .unwrap();
        assert_eq!(kdf.calls(), 1);

        // Access at 9 minutes refreshed the entry, so 18 minutes is still warm
        cache
            .get_or_compute_at(&key, "pw", start + Duration::from_secs(18 * 60))
            .unwrap();
        assert_eq!(kdf.calls(), 1);

        cache
            .get_or_compute_at(&key, "pw", start + Duration::from_secs(29 * 60))
            .unwrap();
        assert_eq!(kdf.calls(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let kdf = Arc::new(CountingKdf::default());
        let cache = DerivedKeyCache::with_idle_ttl(kdf, Duration::from_secs(60));
        let start = Instant::now();

        cache.get_or_compute_at(&cache_key(b"a"), "pw", start).unwrap();
        cache
            .get_or_compute_at(&cache_key(b"b"), "pw", start + Duration::from_secs(50))
            .unwrap();

        cache.purge_expired_at(start + Duration::from_secs(90));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_all_forces_recompute() {
        let kdf = Arc::new(CountingKdf::default());
        let cache = DerivedKeyCache::new(kdf.clone());
        let key = cache_key(b"flush");

        let held = cache.get_or_compute(&key, "pw").unwrap();
        cache.invalidate_all();
        assert!(cache.is_empty());

        let fresh = cache.get_or_compute(&key, "pw").unwrap();
        assert_eq!(kdf.calls(), 2);
        // The previously fetched key is still usable
        assert_eq!(held.as_bytes(), fresh.as_bytes());
    }

    #[test]
    fn test_failed_derivation_is_not_cached() {
        let cache = DerivedKeyCache::new(Arc::new(FailingKdf));
        let key = cache_key(b"fail");

        let err = cache.get_or_compute(&key, "pw").unwrap_err();
        assert!(matches!(err, CryptoError::Io(_)));
        assert!(cache.get_or_compute(&key, "pw").is_err());
    }
}
