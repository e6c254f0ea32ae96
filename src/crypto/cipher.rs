//! AES-256-GCM helpers for the credential payload fields.
//!
//! Each encrypted field travels with its own IV, both base64. Decryption
//! output is zeroizing - callers copy what they need and let it drop.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD, Engine};
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-GCM nonce length in bytes.
pub const IV_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("field is not valid base64")]
    Encoding,

    #[error("IV must be {IV_LEN} bytes, got {0}")]
    BadIvLength(usize),

    #[error("decryption failed")]
    Decryption,

    #[error("encryption failed")]
    Encryption,
}

/// Decrypt one base64 ciphertext field with its base64 IV.
pub fn decrypt_field(
    key: &[u8; 32],
    ciphertext_base64: &str,
    iv_base64: &str,
) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    let ciphertext = STANDARD
        .decode(ciphertext_base64)
        .map_err(|_| CipherError::Encoding)?;
    let iv = STANDARD
        .decode(iv_base64)
        .map_err(|_| CipherError::Encoding)?;
    if iv.len() != IV_LEN {
        return Err(CipherError::BadIvLength(iv.len()));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
        .map_err(|_| CipherError::Decryption)?;
    Ok(Zeroizing::new(plaintext))
}

/// Encrypt one field, returning (ciphertext, iv) as base64.
/// The scanning-device side of the exchange; also exercised by tests.
pub fn encrypt_field(
    key: &[u8; 32],
    plaintext: &[u8],
    iv: &[u8; IV_LEN],
) -> Result<(String, String), CipherError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CipherError::Encryption)?;
    Ok((STANDARD.encode(ciphertext), STANDARD.encode(iv)))
}
