//! Ephemeral key agreement for one pairing attempt.
//!
//! The displaying device embeds its ephemeral X25519 public key in the QR
//! payload; the scanning device answers with its own in the
//! session-initialization message. Both sides derive the same AES-256 key:
//!
//!   key = BLAKE3("SAFEHILL_PAIRING_v1" || x25519(secret, their_public) || session_id)
//!
//! The agreement lives for a single session; the secret is dropped with it.

use base64::{engine::general_purpose::STANDARD, Engine};
use blake3::Hasher;
use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

// Domain separation for the pairing key derivation
const DOMAIN_PAIRING: &[u8] = b"SAFEHILL_PAIRING_v1";

#[derive(Debug, Error)]
pub enum AgreementError {
    #[error("peer public key is not valid base64")]
    Encoding,

    #[error("peer public key must be 32 bytes, got {0}")]
    KeyLength(usize),
}

/// One side's ephemeral X25519 key pair, alive for a single pairing session.
pub struct EphemeralAgreement {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralAgreement {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Base64 public key, as it appears in the QR payload or the
    /// session-initialization message.
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Run the DH against the peer's base64 public key and derive the
    /// session's AES-256 key. The caller drops the agreement once a key has
    /// been derived; the ephemeral secret never outlives its session.
    pub fn derive_pairing_key(
        &self,
        peer_public_base64: &str,
        session_id: &str,
    ) -> Result<Zeroizing<[u8; 32]>, AgreementError> {
        let peer_bytes = STANDARD
            .decode(peer_public_base64)
            .map_err(|_| AgreementError::Encoding)?;
        if peer_bytes.len() != 32 {
            return Err(AgreementError::KeyLength(peer_bytes.len()));
        }
        let mut peer = [0u8; 32];
        peer.copy_from_slice(&peer_bytes);

        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));

        let mut hasher = Hasher::new();
        hasher.update(DOMAIN_PAIRING);
        hasher.update(shared.as_bytes());
        hasher.update(session_id.as_bytes());
        Ok(Zeroizing::new(*hasher.finalize().as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_same_key() {
        let display = EphemeralAgreement::generate();
        let scanner = EphemeralAgreement::generate();
        let display_pub = display.public_key_base64();
        let scanner_pub = scanner.public_key_base64();

        let k1 = display.derive_pairing_key(&scanner_pub, "sess-1").unwrap();
        let k2 = scanner.derive_pairing_key(&display_pub, "sess-1").unwrap();
        assert_eq!(*k1, *k2);
    }

    #[test]
    fn test_session_id_separates_keys() {
        let a = EphemeralAgreement::generate();
        let b = EphemeralAgreement::generate();
        let b_pub = b.public_key_base64();

        // Same DH inputs, different session ids -> different keys
        let k1 = a.derive_pairing_key(&b_pub, "sess-1").unwrap();
        let k2 = a.derive_pairing_key(&b_pub, "sess-2").unwrap();
        assert_ne!(*k1, *k2);
    }

    #[test]
    fn test_rejects_bad_peer_key() {
        let a = EphemeralAgreement::generate();
        assert!(matches!(
            a.derive_pairing_key("!!not-base64!!", "s"),
            Err(AgreementError::Encoding)
        ));

        let short = STANDARD.encode([0u8; 16]);
        assert!(matches!(
            a.derive_pairing_key(&short, "s"),
            Err(AgreementError::KeyLength(16))
        ));
    }
}
