//! # crypto-service
//!
//! Password-based encryption of application data including:
//! - Self-describing AES-256-GCM envelopes keyed by Argon2id
//! - A derived-key cache with single-flight computation and idle expiry
//! - Read support for the deprecated AES-CBC scheme
//! - Reloadable KDF cost configuration
//!
//! ```no_run
//! use std::sync::Arc;
//! use crypto_service::{CostParameters, EncryptionService};
//!
//! let service = EncryptionService::new(Arc::new(CostParameters::default()));
//! let envelope = service.encrypt("api-token", "hunter2")?;
//! assert_eq!(service.decrypt(&envelope, "hunter2")?, "api-token");
//! # Ok::<(), crypto_service::CryptoError>(())
//! ```

pub mod cache;
pub mod crypto;
pub mod error;
pub mod settings;
mod service;

pub use error::{CryptoError, Result};
pub use service::{EncryptionRequest, EncryptionService};
pub use cache::{CacheKey, DerivedKeyCache};
pub use crypto::{
    AeadCodec, Argon2Kdf, CostParameters, DerivedKey, Envelope, KeyDerivation, LegacyCodec,
    LegacyEncryptedData, LegacyKey,
};
pub use settings::{CostParameterSource, CryptoSettings, SettingsManager, SharedCostParameters};
