//! User identity and session types.
//!
//! `UserIdentity` and `ServerEncryptionKeys` are wire DTOs (camelCase JSON, key
//! material base64-encoded as issued by the server). `AuthenticatedUser` is the
//! decrypted session: it holds raw secret key bytes, zeroized on drop, and is
//! deliberately not serializable.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A platform user as the server describes them.
///
/// `identifier` is globally unique and immutable. `public_key` (X25519) and
/// `public_signature` (Ed25519) are base64-encoded and immutable once issued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub identifier: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub public_key: String,
    pub public_signature: String,
}

/// Process-wide server key material, fetched once per session and cached.
/// Used to verify and derive shared secrets during key exchange.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEncryptionKeys {
    pub public_key: String,
    pub public_signature: String,
    pub encryption_protocol_salt: String,
}

/// The authenticated session produced by a completed pairing exchange.
///
/// Secret key material lives only here, only for the session's lifetime, and
/// is wiped on drop. Never serialized, never logged - `Debug` redacts.
pub struct AuthenticatedUser {
    auth_token: Zeroizing<String>,
    private_key: Zeroizing<[u8; 32]>,
    private_signature: Zeroizing<[u8; 32]>,
    pub user: UserIdentity,
}

impl AuthenticatedUser {
    pub fn new(
        auth_token: String,
        private_key: [u8; 32],
        private_signature: [u8; 32],
        user: UserIdentity,
    ) -> Self {
        Self {
            auth_token: Zeroizing::new(auth_token),
            private_key: Zeroizing::new(private_key),
            private_signature: Zeroizing::new(private_signature),
            user,
        }
    }

    /// Session auth token. Borrow only, wiped with the rest of the session.
    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Raw X25519 private key bytes. Borrow only - the session owns them.
    pub fn private_key(&self) -> &[u8; 32] {
        &self.private_key
    }

    /// Raw Ed25519 signing key bytes.
    pub fn private_signature(&self) -> &[u8; 32] {
        &self.private_signature
    }
}

impl std::fmt::Debug for AuthenticatedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedUser")
            .field("auth_token", &"<redacted>")
            .field("private_key", &"<redacted>")
            .field("private_signature", &"<redacted>")
            .field("user", &self.user)
            .finish()
    }
}
