//! Deprecated AES-CBC scheme, kept so stored data stays readable
//!
//! Token format: a single Base64 string of the AES-CBC ciphertext
//! (PKCS#7 padding, all-zero IV). Password keys come from
//! PBKDF2-HMAC-SHA1 with 1000 rounds, 128-bit output, and either a
//! caller-supplied salt or the fixed default salt below.
//!
//! Nothing here authenticates the ciphertext. A wrong password usually
//! fails the padding check, but can still produce garbage. Data read
//! through this path should be re-encrypted with `AeadCodec`.

use std::io::Read;

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use tracing::warn;
use zeroize::Zeroizing;

use super::LegacyKey;
use crate::error::{CryptoError, Result};

/// PBKDF2 rounds of the legacy scheme
pub const LEGACY_ITERATIONS: u32 = 1000;

/// Salt used when the caller has none
pub const LEGACY_DEFAULT_SALT: [u8; 16] = [
    0x5a, 0x31, 0xc7, 0x08, 0x9e, 0x42, 0xb3, 0x6d, 0x17, 0xf0, 0x2c, 0x84, 0x63, 0xa9, 0x5e, 0xd1,
];

const LEGACY_KEY_LEN: usize = 16;
const LEGACY_SALT_LEN: usize = 16;
const BLOCK_LEN: usize = 16;
const ZERO_IV: [u8; BLOCK_LEN] = [0u8; BLOCK_LEN];

/// Legacy ciphertext together with the salt it was produced with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEncryptedData {
    /// Base64 ciphertext token
    pub data: String,
    /// `None` means the fixed default salt was used
    pub salt: Option<Vec<u8>>,
}

/// Codec for the deprecated format
///
/// Never invoked automatically; callers opt in after seeing
/// `CryptoError::LegacyFormatDetected`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyCodec;

impl LegacyCodec {
    /// Decrypt a password-protected legacy token
    pub fn decrypt(&self, token: &str, password: &str, salt: Option<&[u8]>) -> Result<String> {
        warn!("Decrypting data with the deprecated legacy scheme");
        let key = derive_legacy_key(password, salt)?;
        let plaintext = cbc_decrypt(key.as_slice(), &decode_token(token)?)?;
        Ok(into_text(plaintext))
    }

    /// Decrypt a `LegacyEncryptedData` produced by `encrypt_with_password`
    pub fn decrypt_with_password(&self, data: &LegacyEncryptedData, password: &str) -> Result<String> {
        self.decrypt(&data.data, password, data.salt.as_deref())
    }

    /// Decrypt a token produced directly under a raw AES key
    pub fn decrypt_with_key(&self, token: &str, key: &LegacyKey) -> Result<String> {
        warn!("Decrypting data with a raw legacy key");
        let plaintext = cbc_decrypt(key.as_bytes(), &decode_token(token)?)?;
        Ok(into_text(plaintext))
    }

    /// Decrypt raw (not Base64) ciphertext bytes read from `reader`
    pub fn decrypt_stream<R: Read>(&self, mut reader: R, key: &LegacyKey) -> Result<Vec<u8>> {
        let mut ciphertext = Vec::new();
        reader
            .read_to_end(&mut ciphertext)
            .map_err(|e| CryptoError::Io(e.to_string()))?;
        check_block_aligned(&ciphertext)?;
        cbc_decrypt(key.as_bytes(), &ciphertext)
    }

    /// Encrypt under a password with an explicit or default salt
    #[deprecated(note = "legacy format is read-only; encrypt with EncryptionService::encrypt")]
    pub fn encrypt(&self, data: &str, password: &str, salt: Option<&[u8]>) -> Result<String> {
        let key = derive_legacy_key(password, salt)?;
        let ciphertext = cbc_encrypt(key.as_slice(), data.as_bytes())?;
        Ok(BASE64.encode(ciphertext))
    }

    /// Encrypt under a password; with `use_salt` a random salt is generated and returned
    #[deprecated(note = "legacy format is read-only; encrypt with EncryptionService::encrypt")]
    pub fn encrypt_with_password(
        &self,
        data: &str,
        password: &str,
        use_salt: bool,
    ) -> Result<LegacyEncryptedData> {
        let salt = use_salt.then(|| {
            let mut salt = vec![0u8; LEGACY_SALT_LEN];
            OsRng.fill_bytes(&mut salt);
            salt
        });
        #[allow(deprecated)]
        let data = self.encrypt(data, password, salt.as_deref())?;
        Ok(LegacyEncryptedData { data, salt })
    }

    #[deprecated(note = "legacy format is read-only; encrypt with EncryptionService::encrypt")]
    pub fn encrypt_with_key(&self, data: &str, key: &LegacyKey) -> Result<String> {
        let ciphertext = cbc_encrypt(key.as_bytes(), data.as_bytes())?;
        Ok(BASE64.encode(ciphertext))
    }

    #[deprecated(note = "legacy format is read-only; encrypt with EncryptionService::encrypt")]
    pub fn encrypt_stream<R: Read>(&self, mut reader: R, key: &LegacyKey) -> Result<Vec<u8>> {
        let mut plaintext = Zeroizing::new(Vec::new());
        reader
            .read_to_end(&mut plaintext)
            .map_err(|e| CryptoError::Io(e.to_string()))?;
        cbc_encrypt(key.as_bytes(), &plaintext)
    }
}

fn derive_legacy_key(password: &str, salt: Option<&[u8]>) -> Result<Zeroizing<[u8; LEGACY_KEY_LEN]>> {
    if password.is_empty() {
        return Err(CryptoError::EmptyPassword);
    }
    let salt = salt.unwrap_or(&LEGACY_DEFAULT_SALT[..]);
    let mut key = Zeroizing::new([0u8; LEGACY_KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), salt, LEGACY_ITERATIONS, key.as_mut_slice());
    Ok(key)
}

fn decode_token(token: &str) -> Result<Vec<u8>> {
    let ciphertext = BASE64
        .decode(token.trim())
        .map_err(|e| CryptoError::malformed(format!("invalid legacy Base64: {}", e)))?;
    check_block_aligned(&ciphertext)?;
    Ok(ciphertext)
}

fn check_block_aligned(ciphertext: &[u8]) -> Result<()> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::malformed(format!(
            "legacy ciphertext length {} is not a positive multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }
    Ok(())
}

/// Invalid UTF-8 is replaced rather than rejected; without a MAC it is
/// indistinguishable from a lucky-padding wrong password anyway.
fn into_text(plaintext: Vec<u8>) -> String {
    match String::from_utf8(plaintext) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

fn cbc_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        n => {
            return Err(CryptoError::Security(format!(
                "unsupported AES key length: {}",
                n
            )))
        }
    };
    Ok(ciphertext)
}

fn cbc_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let padded = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, &ZERO_IV)
            .map_err(|e| CryptoError::Security(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        n => {
            return Err(CryptoError::Security(format!(
                "unsupported AES key length: {}",
                n
            )))
        }
    };
    // Bad padding is the only signal this mode gives for a wrong key
    padded.map_err(|_| CryptoError::BadPassword)
}
