//! AES-256-GCM authenticated encryption
//!
//! Envelope format: `{nonce}${salt}${memory}${iterations}${lanes}${ciphertext}`
//! - nonce: 12 bytes (96 bits), Base64
//! - salt: 16 bytes (128 bits), Base64
//! - memory, iterations, lanes: Argon2id cost parameters, plain decimal
//! - ciphertext: variable length with the 16-byte auth tag appended, Base64
//!
//! `$` never occurs in standard Base64, so splitting is unambiguous.

use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::{CostParameters, DerivedKey};
use crate::cache::{CacheKey, DerivedKeyCache, Fingerprinter};
use crate::error::{CryptoError, Result};

pub const SEPARATOR: char = '$';
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;
pub const TAG_LEN: usize = 16;

/// Argon2 refuses shorter salts
const MIN_SALT_LEN: usize = 8;
/// Shortest single token worth classifying as legacy data
const MIN_TOKEN_LEN: usize = 2;
const FIELD_COUNT: usize = 6;

/// Parsed current-format envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    pub salt: Vec<u8>,
    pub params: CostParameters,
    /// Ciphertext with the auth tag appended
    pub ciphertext: Vec<u8>,
}

impl std::fmt::Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            BASE64.encode(self.nonce),
            BASE64.encode(&self.salt),
            self.params.memory_cost,
            self.params.iterations,
            self.params.lanes,
            BASE64.encode(&self.ciphertext),
            sep = SEPARATOR,
        )
    }
}

impl Envelope {
    /// Parse the `$`-delimited format
    ///
    /// A single token without separators yields `LegacyFormatDetected`
    /// (or `MalformedData` if it cannot be legacy data either). Every other
    /// field count than 6 is malformed.
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(SEPARATOR).collect();
        match parts.len() {
            1 => return Err(classify_single_token(s)),
            FIELD_COUNT => {}
            n => {
                debug!(fields = n, "Rejecting envelope with wrong field count");
                return Err(CryptoError::malformed(format!(
                    "expected {} fields, got {}",
                    FIELD_COUNT, n
                )));
            }
        }

        let nonce_bytes = decode_field("nonce", parts[0])?;
        let salt = decode_field("salt", parts[1])?;
        let params = CostParameters::new(
            parse_cost("memory", parts[2])?,
            parse_cost("iterations", parts[3])?,
            parse_cost("lanes", parts[4])?,
        );
        let ciphertext = decode_field("ciphertext", parts[5])?;

        let nonce: [u8; NONCE_LEN] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::malformed(format!(
                "invalid nonce length: expected {}, got {}",
                NONCE_LEN,
                nonce_bytes.len()
            ))
        })?;
        if salt.len() < MIN_SALT_LEN {
            return Err(CryptoError::malformed(format!(
                "salt too short: {} bytes",
                salt.len()
            )));
        }
        params
            .to_argon2()
            .map_err(|e| CryptoError::malformed(format!("invalid cost parameters: {}", e)))?;
        // Checked before any key derivation is spent on it
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::malformed(format!(
                "ciphertext too short: {} bytes",
                ciphertext.len()
            )));
        }

        Ok(Self {
            nonce,
            salt,
            params,
            ciphertext,
        })
    }
}

fn classify_single_token(token: &str) -> CryptoError {
    // Same normalisation as the legacy decoder applies
    let token = token.trim();
    if token.len() < MIN_TOKEN_LEN {
        debug!("Data is too short to be decrypted");
        return CryptoError::malformed("data too short");
    }
    if let Err(e) = BASE64.decode(token) {
        return CryptoError::malformed(format!("not Base64: {}", e));
    }
    CryptoError::LegacyFormatDetected
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::malformed(format!("invalid {} Base64: {}", name, e)))
}

fn parse_cost(name: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|e| CryptoError::malformed(format!("invalid {} value {:?}: {}", name, value, e)))
}

/// Current-format codec
///
/// Keys come from the shared `DerivedKeyCache`; the password itself only
/// reaches the KDF, the cache index holds a keyed fingerprint.
#[derive(Debug)]
pub struct AeadCodec {
    cache: Arc<DerivedKeyCache>,
    fingerprinter: Fingerprinter,
}

impl AeadCodec {
    pub fn new(cache: Arc<DerivedKeyCache>) -> Self {
        Self {
            cache,
            fingerprinter: Fingerprinter::new(),
        }
    }

    /// Encrypt `plaintext` under a fresh salt and nonce
    pub fn encode(&self, plaintext: &str, password: &str, params: &CostParameters) -> Result<String> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        let key = self.derived_key(password, &salt, *params)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Security(e.to_string()))?;

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CryptoError::Security(e.to_string()))?;

        let envelope = Envelope {
            nonce,
            salt: salt.to_vec(),
            params: *params,
            ciphertext,
        };
        Ok(envelope.to_string())
    }

    /// Decrypt an envelope using the cost parameters it carries
    pub fn decode(&self, envelope: &str, password: &str) -> Result<String> {
        let envelope = Envelope::parse(envelope)?;
        self.open(&envelope, password)
    }

    /// Decrypt an already parsed envelope
    pub fn open(&self, envelope: &Envelope, password: &str) -> Result<String> {
        let key = self.derived_key(password, &envelope.salt, envelope.params)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::Security(e.to_string()))?;

        // Any cipher failure here is reported as a bad password
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&envelope.nonce), envelope.ciphertext.as_slice())
            .map_err(|_| CryptoError::BadPassword)?;

        String::from_utf8(plaintext)
            .map_err(|e| CryptoError::malformed(format!("invalid UTF-8: {}", e)))
    }

    fn derived_key(
        &self,
        password: &str,
        salt: &[u8],
        params: CostParameters,
    ) -> Result<Arc<DerivedKey>> {
        let cache_key = CacheKey::new(self.fingerprinter.fingerprint(password)?, salt, params);
        self.cache.get_or_compute(&cache_key, password)
    }
}
