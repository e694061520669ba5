//! Error types for crypto-service

use thiserror::Error;

/// Result type alias for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Crypto error types
///
/// Callers are expected to branch on the variant: `BadPassword` maps to
/// "incorrect password" messaging, `MalformedData` and
/// `LegacyFormatDetected` to integrity or migration handling.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Malformed encrypted data: {0}")]
    MalformedData(String),

    /// The input is a single opaque token produced by the legacy scheme.
    /// Not destructive: the caller decides whether to retry via the legacy codec.
    #[error("Data was encrypted with the legacy scheme")]
    LegacyFormatDetected,

    /// Authentication failed. Wrong password and tampered ciphertext are
    /// deliberately indistinguishable.
    #[error("Bad password or corrupted data")]
    BadPassword,

    #[error("Security error: {0}")]
    Security(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration file error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Configuration format error: {0}")]
    ConfigFormat(#[from] serde_json::Error),
}

impl CryptoError {
    /// Whether this error signals legacy-format data rather than a failure
    pub fn is_legacy_format(&self) -> bool {
        matches!(self, CryptoError::LegacyFormatDetected)
    }

    /// Whether this error means authentication failed (wrong password or tampering)
    pub fn is_bad_password(&self) -> bool {
        matches!(self, CryptoError::BadPassword)
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CryptoError::MalformedData(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_is_not_bad_password() {
        let err = CryptoError::LegacyFormatDetected;
        assert!(err.is_legacy_format());
        assert!(!err.is_bad_password());
    }

    #[test]
    fn test_display_does_not_leak_cause() {
        let msg = CryptoError::BadPassword.to_string();
        assert_eq!(msg, "Bad password or corrupted data");
    }
}
