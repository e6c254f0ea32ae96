//! Wire messages for the pairing exchange.
//!
//! Two payload kinds arrive on the key-exchange channel, JSON with camelCase
//! fields. Anything that does not parse into [`PairingMessage`] is protocol
//! noise: ignored by the channel, counted by the session.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::types::UserIdentity;

/// Sent by the scanning device after reading the QR code. Carries the
/// scanner's ephemeral X25519 public key so both sides can derive the
/// pairing key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSessionInitializationMessage {
    pub session_id: String,
    pub requestor_ip: String,
    pub public_key: String,
}

/// Sent by the scanning device once the user approves: the account's private
/// key and signature, AES-256-GCM encrypted under the pairing key, each field
/// with its own IV.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCredentialsMessage {
    pub session_id: String,
    pub encrypted_private_key: String,
    pub encrypted_private_key_iv: String,
    pub encrypted_private_signature: String,
    pub encrypted_private_signature_iv: String,
    pub auth_token: String,
    pub user: UserIdentity,
}

/// Typed union of everything the channel can deliver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PairingMessage {
    SessionInitialization(AuthSessionInitializationMessage),
    Credentials(AuthCredentialsMessage),
}

impl PairingMessage {
    /// Parse a raw channel frame. `None` means noise, not an error - shared
    /// channels carry stale and foreign traffic.
    pub fn parse(frame: &str) -> Option<Self> {
        serde_json::from_str(frame).ok()
    }

    pub fn session_id(&self) -> &str {
        match self {
            PairingMessage::SessionInitialization(m) => &m.session_id,
            PairingMessage::Credentials(m) => &m.session_id,
        }
    }
}

/// What the initiating device renders as a QR code: the session id, its
/// ephemeral public key, and where to reach the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodePayload {
    pub session_id: String,
    pub public_key: String,
    pub relay_url: String,
}

impl QrCodePayload {
    /// Compact QR-friendly encoding: base64url of the JSON payload.
    pub fn encode(&self) -> String {
        // Serialization of a plain struct of strings cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}
