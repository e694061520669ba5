//! Encryption service orchestration

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::DerivedKeyCache;
use crate::crypto::{AeadCodec, Argon2Kdf, KeyDerivation, LegacyCodec, LegacyKey};
use crate::error::{CryptoError, Result};
use crate::settings::CostParameterSource;

/// How a piece of data should be decrypted
///
/// Only `Aead` is the current scheme. The legacy variants exist for data
/// written before it and must be chosen explicitly by the caller.
#[derive(Debug, Clone, Copy)]
pub enum EncryptionRequest<'a> {
    /// Current `$`-delimited AES-GCM envelope
    Aead { password: &'a str },
    /// Legacy password token, with the salt it was written with (`None` = default salt)
    LegacyPassword {
        password: &'a str,
        salt: Option<&'a [u8]>,
    },
    /// Legacy token written directly under a raw AES key
    LegacyRawKey { key: &'a LegacyKey },
}

/// Password-based encryption façade
///
/// Owns the derived-key cache; encrypt and decrypt are otherwise stateless.
/// Safe to share between threads behind an `Arc`.
pub struct EncryptionService {
    settings: Arc<dyn CostParameterSource>,
    cache: Arc<DerivedKeyCache>,
    aead: AeadCodec,
    legacy: LegacyCodec,
}

impl EncryptionService {
    /// Create a service deriving keys with Argon2id
    pub fn new(settings: Arc<dyn CostParameterSource>) -> Self {
        Self::with_kdf(settings, Arc::new(Argon2Kdf))
    }

    /// Create a service with a custom key derivation function
    pub fn with_kdf(settings: Arc<dyn CostParameterSource>, kdf: Arc<dyn KeyDerivation>) -> Self {
        let cache = Arc::new(DerivedKeyCache::new(kdf));
        Self {
            settings,
            aead: AeadCodec::new(Arc::clone(&cache)),
            cache,
            legacy: LegacyCodec,
        }
    }

    /// Encrypt `plaintext` with the currently configured cost parameters
    pub fn encrypt(&self, plaintext: &str, password: &str) -> Result<String> {
        ensure_password(password)?;
        let params = self.settings.cost_parameters();
        self.aead.encode(plaintext, password, &params)
    }

    /// Decrypt a current-format envelope
    ///
    /// Returns `CryptoError::LegacyFormatDetected` for legacy tokens; retrying
    /// with a legacy request through `decrypt_with` is the caller's decision.
    pub fn decrypt(&self, envelope: &str, password: &str) -> Result<String> {
        ensure_password(password)?;
        self.aead.decode(envelope, password).inspect_err(|e| {
            if e.is_legacy_format() {
                debug!("Envelope is in the legacy format");
            }
        })
    }

    /// Decrypt with an explicitly chosen scheme
    pub fn decrypt_with(&self, data: &str, request: EncryptionRequest<'_>) -> Result<String> {
        match request {
            EncryptionRequest::Aead { password } => self.decrypt(data, password),
            EncryptionRequest::LegacyPassword { password, salt } => {
                ensure_password(password)?;
                self.legacy.decrypt(data, password, salt)
            }
            EncryptionRequest::LegacyRawKey { key } => self.legacy.decrypt_with_key(data, key),
        }
    }

    /// Decrypt a legacy password token and re-encrypt it in the current format
    pub fn migrate_legacy(&self, token: &str, password: &str, salt: Option<&[u8]>) -> Result<String> {
        let plaintext = self.decrypt_with(token, EncryptionRequest::LegacyPassword { password, salt })?;
        let envelope = self.encrypt(&plaintext, password)?;
        info!("Re-encrypted legacy data in the current format");
        Ok(envelope)
    }

    /// React to a configuration change
    ///
    /// Re-reads the cost parameters and flushes the key cache. Operations
    /// already holding a key finish with it; later calls see the empty cache.
    pub fn reload_configuration(&self) {
        if let Err(e) = self.settings.refresh() {
            warn!("Keeping previous crypto settings, reload failed: {}", e);
        }
        self.cache.invalidate_all();
        info!(
            params = ?self.settings.cost_parameters(),
            "Crypto configuration reloaded"
        );
    }

    /// Legacy codec, for callers that opted into the deprecated scheme
    pub fn legacy(&self) -> &LegacyCodec {
        &self.legacy
    }

    /// Number of derived keys currently cached
    pub fn cached_keys(&self) -> usize {
        self.cache.len()
    }
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("params", &self.settings.cost_parameters())
            .field("cache", &self.cache)
            .finish()
    }
}

fn ensure_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    Ok(())
}
