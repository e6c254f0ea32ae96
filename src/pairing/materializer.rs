//! Turns a completed credential exchange into an authenticated session.
//!
//! Decrypts the private key and signature with the session's pairing key,
//! then proves the decrypted material actually belongs to the embedded user:
//! the X25519 public derived from the private key must equal `user.public_key`
//! and the Ed25519 verifying key must equal `user.public_signature`, compared
//! in constant time. A mismatch means the counterpart sent someone else's
//! keys (or garbage) - fatal for the attempt.

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::SigningKey;
use subtle::ConstantTimeEq;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::crypto::{decrypt_field, CipherError};
use crate::pairing::messages::AuthCredentialsMessage;
use crate::types::AuthenticatedUser;

#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Field was not decodable at all - a malformed message, protocol class.
    #[error("credential field encoding invalid")]
    Encoding,

    /// AEAD rejected the ciphertext - wrong pairing key or tampering.
    #[error("credential decryption failed")]
    Decryption,

    /// Decrypted keys do not match the embedded user's public material.
    #[error("decrypted key material does not match user identity")]
    KeyMismatch,
}

impl From<CipherError> for MaterializeError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Encoding | CipherError::BadIvLength(_) => MaterializeError::Encoding,
            CipherError::Decryption | CipherError::Encryption => MaterializeError::Decryption,
        }
    }
}

/// Decrypt and integrity-check a credentials message against the pairing key.
pub fn materialize(
    msg: &AuthCredentialsMessage,
    pairing_key: &[u8; 32],
) -> Result<AuthenticatedUser, MaterializeError> {
    let private_key = decrypt_key_field(
        pairing_key,
        &msg.encrypted_private_key,
        &msg.encrypted_private_key_iv,
    )?;
    let private_signature = decrypt_key_field(
        pairing_key,
        &msg.encrypted_private_signature,
        &msg.encrypted_private_signature_iv,
    )?;

    // Re-derive public material and compare against the identity the server
    // vouched for. Constant-time: these are key bytes.
    let derived_public = PublicKey::from(&StaticSecret::from(*private_key));
    let expected_public = decode_public(&msg.user.public_key)?;
    if !bool::from(derived_public.as_bytes().ct_eq(&expected_public)) {
        return Err(MaterializeError::KeyMismatch);
    }

    let derived_verifying = SigningKey::from_bytes(&private_signature).verifying_key();
    let expected_verifying = decode_public(&msg.user.public_signature)?;
    if !bool::from(derived_verifying.as_bytes().ct_eq(&expected_verifying)) {
        return Err(MaterializeError::KeyMismatch);
    }

    Ok(AuthenticatedUser::new(
        msg.auth_token.clone(),
        *private_key,
        *private_signature,
        msg.user.clone(),
    ))
}

fn decrypt_key_field(
    key: &[u8; 32],
    ciphertext_base64: &str,
    iv_base64: &str,
) -> Result<Zeroizing<[u8; 32]>, MaterializeError> {
    let plaintext = decrypt_field(key, ciphertext_base64, iv_base64)?;
    if plaintext.len() != 32 {
        // Decrypted fine but is not a key - treat as tampering
        return Err(MaterializeError::Decryption);
    }
    let mut out = Zeroizing::new([0u8; 32]);
    out.copy_from_slice(&plaintext);
    Ok(out)
}

fn decode_public(field_base64: &str) -> Result<[u8; 32], MaterializeError> {
    let bytes = STANDARD
        .decode(field_base64)
        .map_err(|_| MaterializeError::Encoding)?;
    if bytes.len() != 32 {
        return Err(MaterializeError::Encoding);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
