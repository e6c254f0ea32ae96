//! Safehill client core.
//!
//! Two subsystems, independent of the presentation layer that consumes them:
//!
//! - **Pairing**: QR-code-initiated cross-device login. The displaying device
//!   creates a [`pairing::PairingSession`], shows its QR payload, and receives
//!   session-initialization and credential messages over a
//!   [`pairing::KeyExchangeChannel`]. Key material travels encrypted under an
//!   ephemeral X25519 agreement and is decrypted into an
//!   [`types::AuthenticatedUser`].
//! - **Claim resolution**: content-addressed asset deduplication. Upload intents
//!   are fingerprinted per resolution tier ([`fingerprint::fingerprint`]),
//!   searched against the known corpus ([`fingerprint::find_matches`]), and
//!   resolved into an allow / new-version / blocked decision
//!   ([`fingerprint::ClaimResolver`]).

use std::time::Duration;

/// How long a pairing session stays alive before it expires.
/// Measured on a monotonic clock from session creation.
pub const PAIRING_TTL: Duration = Duration::from_secs(300);

/// Malformed or out-of-session messages tolerated per pairing session
/// before the session fails with a protocol violation.
pub const PROTOCOL_ERROR_THRESHOLD: u32 = 16;

/// How long fetched server encryption keys stay cached.
pub const SERVER_KEYS_TTL: Duration = Duration::from_secs(300);

pub mod crypto;
pub mod fingerprint;
pub mod pairing;
pub mod server;
pub mod types;
pub mod upload;

// Re-export commonly used items from submodules
pub use fingerprint::{ClaimConflict, ClaimResolver, Decision};
pub use pairing::{KeyExchangeChannel, PairingSession, PairingState};

pub use types::*;
