//! Password-based key derivation using Argon2id

use std::time::Instant;

use argon2::{Algorithm, Argon2, Params, Version};
use tracing::debug;

use super::secure_memory::{DerivedKey, DERIVED_KEY_LEN};
use crate::error::{CryptoError, Result};

/// Largest accepted memory cost in KiB (1 GiB)
pub const MAX_MEMORY_COST: u32 = 1024 * 1024;
/// Largest accepted iteration count
pub const MAX_ITERATIONS: u32 = 64;
/// Largest accepted lane count
pub const MAX_LANES: u32 = 64;

/// Argon2id cost parameters
///
/// Embedded in every envelope so decryption never depends on the live configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CostParameters {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub iterations: u32,
    /// Parallelism (default: 4)
    pub lanes: u32,
}

impl Default for CostParameters {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MB
            iterations: 3,
            lanes: 4,
        }
    }
}

impl CostParameters {
    pub fn new(memory_cost: u32, iterations: u32, lanes: u32) -> Self {
        Self {
            memory_cost,
            iterations,
            lanes,
        }
    }

    /// Build the Argon2 parameter set, rejecting degenerate or oversized values
    ///
    /// The ceilings apply to envelopes read back from storage too, so a
    /// corrupt cost field cannot request an unbounded allocation.
    pub fn to_argon2(&self) -> std::result::Result<Params, String> {
        if self.memory_cost > MAX_MEMORY_COST {
            return Err(format!(
                "memory cost {} KiB exceeds {} KiB",
                self.memory_cost, MAX_MEMORY_COST
            ));
        }
        if self.iterations > MAX_ITERATIONS {
            return Err(format!(
                "iterations {} exceed {}",
                self.iterations, MAX_ITERATIONS
            ));
        }
        if self.lanes > MAX_LANES {
            return Err(format!("lanes {} exceed {}", self.lanes, MAX_LANES));
        }
        Params::new(
            self.memory_cost,
            self.iterations,
            self.lanes,
            Some(DERIVED_KEY_LEN), // Output length: 32 bytes = 256 bits
        )
        .map_err(|e| e.to_string())
    }

    /// Check the parameters are usable by Argon2id
    pub fn validate(&self) -> Result<()> {
        self.to_argon2()
            .map(|_| ())
            .map_err(|e| CryptoError::InvalidConfiguration(format!("{}: {:?}", e, self)))
    }
}

/// A deterministic password-to-key function
///
/// Implementations are intentionally slow; go through `DerivedKeyCache`
/// rather than calling them per operation.
pub trait KeyDerivation: Send + Sync {
    fn derive(&self, password: &str, salt: &[u8], params: &CostParameters) -> Result<DerivedKey>;
}

/// Argon2id (v0x13) producing a 256-bit key
#[derive(Debug, Default, Clone, Copy)]
pub struct Argon2Kdf;

impl KeyDerivation for Argon2Kdf {
    fn derive(&self, password: &str, salt: &[u8], params: &CostParameters) -> Result<DerivedKey> {
        let argon2_params = params
            .to_argon2()
            .map_err(|e| CryptoError::Security(format!("Invalid Argon2 parameters: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

        let started = Instant::now();
        let mut key_bytes = [0u8; DERIVED_KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), salt, &mut key_bytes)
            .map_err(|e| CryptoError::Security(format!("Key derivation failed: {}", e)))?;

        debug!(
            memory_cost = params.memory_cost,
            iterations = params.iterations,
            lanes = params.lanes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Derived Argon2id key"
        );

        Ok(DerivedKey::new(key_bytes))
    }
}
