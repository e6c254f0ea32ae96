//! Pairing session state machine.
//!
//! One instance per QR-code login attempt, owned by the initiating device
//! until terminal. Pure state machine: the async driver in `channel.rs` feeds
//! it messages and clock ticks; nothing here blocks.
//!
//!   Init -> AwaitingScan -> KeyExchangePending -> Authenticated
//!                 |                  |
//!                 +---- Expired / Cancelled / Failed(reason) ----+
//!
//! The channel may replay or reorder messages. Transitions are idempotent:
//! a duplicate in the same state is a no-op, a mismatched session id is
//! ignored outright (shared channels carry foreign traffic). Malformed and
//! out-of-session traffic is counted; past a threshold the session fails.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::EphemeralAgreement;
use crate::pairing::materializer::{materialize, MaterializeError};
use crate::pairing::messages::{PairingMessage, QrCodePayload};
use crate::types::AuthenticatedUser;
use crate::{PAIRING_TTL, PROTOCOL_ERROR_THRESHOLD};

/// Why a session reached `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingFailure {
    /// Credentials did not decrypt under the session's pairing key.
    DecryptionError,
    /// Decrypted key material did not match the embedded user identity.
    KeyMismatch,
    /// Too much malformed or out-of-session traffic.
    ProtocolViolation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingState {
    Init,
    AwaitingScan,
    KeyExchangePending,
    Authenticated,
    Expired,
    Cancelled,
    Failed(PairingFailure),
}

impl PairingState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingState::Authenticated
                | PairingState::Expired
                | PairingState::Cancelled
                | PairingState::Failed(_)
        )
    }
}

/// One cross-device login attempt.
pub struct PairingSession {
    session_id: String,
    requestor_ip: String,
    state: PairingState,
    created_at: DateTime<Utc>,
    started: Instant,
    ttl: Duration,
    /// Consumed by the DH when the initialization message arrives.
    agreement: Option<EphemeralAgreement>,
    /// Kept for the QR payload after the agreement is consumed.
    public_key_base64: String,
    /// Derived pairing key, present only in KeyExchangePending.
    pairing_key: Option<Zeroizing<[u8; 32]>>,
    /// Handed out exactly once after authentication.
    authenticated: Option<AuthenticatedUser>,
    protocol_errors: u32,
}

impl PairingSession {
    /// Create a session and move it to `AwaitingScan`: generate the session
    /// id and ephemeral key pair, record the requestor's IP, start the TTL.
    pub fn new(requestor_ip: impl Into<String>) -> Self {
        Self::with_ttl(requestor_ip, PAIRING_TTL)
    }

    pub fn with_ttl(requestor_ip: impl Into<String>, ttl: Duration) -> Self {
        let mut id_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let agreement = EphemeralAgreement::generate();
        let public_key_base64 = agreement.public_key_base64();

        Self {
            session_id: hex::encode(id_bytes),
            requestor_ip: requestor_ip.into(),
            state: PairingState::AwaitingScan,
            created_at: Utc::now(),
            started: Instant::now(),
            ttl,
            agreement: Some(agreement),
            public_key_base64,
            pairing_key: None,
            authenticated: None,
            protocol_errors: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn requestor_ip(&self) -> &str {
        &self.requestor_ip
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Monotonic deadline. The driver sleeps until this.
    pub fn expires_at(&self) -> Instant {
        self.started + self.ttl
    }

    /// What the initiating device renders for the scanner.
    pub fn qr_payload(&self, relay_url: impl Into<String>) -> QrCodePayload {
        QrCodePayload {
            session_id: self.session_id.clone(),
            public_key: self.public_key_base64.clone(),
            relay_url: relay_url.into(),
        }
    }

    /// Advance the clock. Expires the session if the TTL has elapsed and no
    /// terminal state was reached first. Returns the (possibly new) state.
    pub fn tick(&mut self, now: Instant) -> PairingState {
        if !self.state.is_terminal() && now >= self.expires_at() {
            debug!("pairing session {} expired", self.session_id);
            self.state = PairingState::Expired;
            self.wipe();
        }
        self.state
    }

    /// Feed one channel message through the state machine.
    pub fn handle_message(&mut self, msg: &PairingMessage) -> PairingState {
        self.tick(Instant::now());
        if self.state.is_terminal() {
            // Late or replayed traffic after the attempt settled
            debug!(
                "pairing session {}: message after terminal state {:?}",
                self.session_id, self.state
            );
            return self.state;
        }

        // Foreign traffic on a shared channel is not our business
        if msg.session_id() != self.session_id {
            return self.state;
        }

        match (self.state, msg) {
            (PairingState::AwaitingScan, PairingMessage::SessionInitialization(init)) => {
                // Agreement is always present in AwaitingScan
                let Some(agreement) = self.agreement.as_ref() else {
                    return self.state;
                };
                match agreement.derive_pairing_key(&init.public_key, &self.session_id) {
                    Ok(key) => {
                        self.pairing_key = Some(key);
                        self.agreement = None;
                        self.state = PairingState::KeyExchangePending;
                        debug!("pairing session {}: key exchange pending", self.session_id);
                    }
                    Err(err) => {
                        // Bad peer key is protocol noise; the QR stays valid,
                        // keep waiting for a well-formed scan
                        warn!("pairing session {}: bad peer key: {err}", self.session_id);
                        self.note_protocol_noise();
                    }
                }
            }

            (PairingState::KeyExchangePending, PairingMessage::Credentials(creds)) => {
                // Key is always present in KeyExchangePending
                let Some(key) = self.pairing_key.as_deref() else {
                    return self.state;
                };
                match materialize(creds, key) {
                    Ok(user) => {
                        self.authenticated = Some(user);
                        self.state = PairingState::Authenticated;
                        self.pairing_key = None;
                    }
                    Err(MaterializeError::Encoding) => {
                        // Malformed message; a well-formed one may still come
                        self.note_protocol_noise();
                    }
                    Err(MaterializeError::Decryption) => {
                        self.state = PairingState::Failed(PairingFailure::DecryptionError);
                        self.wipe();
                    }
                    Err(MaterializeError::KeyMismatch) => {
                        self.state = PairingState::Failed(PairingFailure::KeyMismatch);
                        self.wipe();
                    }
                }
            }

            // Duplicate initialization while key exchange is pending: no-op
            (PairingState::KeyExchangePending, PairingMessage::SessionInitialization(_)) => {}

            // Credentials before initialization: cannot decrypt yet, out of order
            (PairingState::AwaitingScan, PairingMessage::Credentials(_)) => {
                self.note_protocol_noise();
            }

            // Init is never observable (constructor leaves it immediately)
            // and terminal states returned above
            _ => {}
        }

        self.state
    }

    /// Count one malformed or out-of-session event. The channel calls this
    /// for unparseable frames; the state machine for out-of-order payloads.
    pub fn note_protocol_noise(&mut self) -> PairingState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.protocol_errors += 1;
        if self.protocol_errors > PROTOCOL_ERROR_THRESHOLD {
            warn!(
                "pairing session {}: protocol error threshold exceeded",
                self.session_id
            );
            self.state = PairingState::Failed(PairingFailure::ProtocolViolation);
            self.wipe();
        }
        self.state
    }

    /// Explicit user cancellation. Idempotent; terminal states stay put.
    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = PairingState::Cancelled;
        }
        self.wipe();
    }

    /// Take the authenticated session. Yields once, after `Authenticated`.
    pub fn take_authenticated(&mut self) -> Option<AuthenticatedUser> {
        self.authenticated.take()
    }

    /// Drop ephemeral secrets. Zeroizing containers wipe on drop.
    fn wipe(&mut self) {
        self.agreement = None;
        self.pairing_key = None;
    }

    /// True once no ephemeral secret material remains in the session.
    #[cfg(test)]
    pub(crate) fn secrets_wiped(&self) -> bool {
        self.agreement.is_none() && self.pairing_key.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::materializer::tests::{credentials_for, valid_credentials};
    use crate::pairing::messages::AuthSessionInitializationMessage;

    /// Simulates the scanning device: reads the QR payload, derives the
    /// pairing key, returns the init message plus the key for encrypting
    /// credentials.
    fn scan(session: &PairingSession) -> (PairingMessage, [u8; 32]) {
        let payload = session.qr_payload("wss://relay.test/pairing");
        let scanner = EphemeralAgreement::generate();
        let scanner_pub = scanner.public_key_base64();
        let key = scanner
            .derive_pairing_key(&payload.public_key, &payload.session_id)
            .unwrap();
        let init = PairingMessage::SessionInitialization(AuthSessionInitializationMessage {
            session_id: payload.session_id.clone(),
            requestor_ip: session.requestor_ip().to_string(),
            public_key: scanner_pub,
        });
        (init, *key)
    }

    #[test]
    fn test_happy_path_authenticates() {
        let mut session = PairingSession::new("203.0.113.7");
        assert_eq!(session.state(), PairingState::AwaitingScan);

        let (init, key) = scan(&session);
        assert_eq!(
            session.handle_message(&init),
            PairingState::KeyExchangePending
        );

        let creds = PairingMessage::Credentials(valid_credentials(&key, session.session_id()));
        assert_eq!(session.handle_message(&creds), PairingState::Authenticated);

        let auth = session.take_authenticated().unwrap();
        assert_eq!(auth.user.identifier, "user-1");
        // Yields exactly once
        assert!(session.take_authenticated().is_none());
    }

    #[test]
    fn test_mismatched_session_id_never_transitions() {
        let mut session = PairingSession::new("203.0.113.7");
        let (init, key) = scan(&session);

        // Foreign init: ignored, still awaiting scan
        let foreign_init = PairingMessage::SessionInitialization(
            AuthSessionInitializationMessage {
                session_id: "someone-elses-session".into(),
                requestor_ip: "198.51.100.1".into(),
                public_key: EphemeralAgreement::generate().public_key_base64(),
            },
        );
        assert_eq!(
            session.handle_message(&foreign_init),
            PairingState::AwaitingScan
        );

        session.handle_message(&init);

        // Foreign credentials: ignored, still pending
        let foreign_creds =
            PairingMessage::Credentials(valid_credentials(&key, "someone-elses-session"));
        assert_eq!(
            session.handle_message(&foreign_creds),
            PairingState::KeyExchangePending
        );
    }

    #[test]
    fn test_duplicate_messages_are_noops() {
        let mut session = PairingSession::new("203.0.113.7");
        let (init, key) = scan(&session);

        session.handle_message(&init);
        // Replayed init in KeyExchangePending: no-op, no failure
        assert_eq!(
            session.handle_message(&init),
            PairingState::KeyExchangePending
        );

        let creds = PairingMessage::Credentials(valid_credentials(&key, session.session_id()));
        session.handle_message(&creds);
        // Replayed credentials after authentication: terminal, rejected
        assert_eq!(session.handle_message(&creds), PairingState::Authenticated);
    }

    #[test]
    fn test_ttl_elapsed_always_expires() {
        let mut session = PairingSession::with_ttl("203.0.113.7", Duration::from_secs(300));
        let (init, key) = scan(&session);
        session.handle_message(&init);

        // t0 + 310s: past the 300s TTL
        let late = session.expires_at() + Duration::from_secs(10);
        assert_eq!(session.tick(late), PairingState::Expired);
        assert!(session.secrets_wiped());

        // Pending credentials arrive after expiry: rejected
        let creds = PairingMessage::Credentials(valid_credentials(&key, session.session_id()));
        assert_eq!(session.handle_message(&creds), PairingState::Expired);
        assert!(session.take_authenticated().is_none());
    }

    #[test]
    fn test_expiry_beats_zero_ttl_messages() {
        let mut session = PairingSession::with_ttl("203.0.113.7", Duration::ZERO);
        let (init, _) = scan(&session);
        // handle_message ticks first, so the session is already expired
        assert_eq!(session.handle_message(&init), PairingState::Expired);
    }

    #[test]
    fn test_wrong_key_fails_with_decryption_error() {
        let mut session = PairingSession::new("203.0.113.7");
        let (init, _key) = scan(&session);
        session.handle_message(&init);

        // Credentials encrypted under a key the session never derived
        let wrong_key = [0xEEu8; 32];
        let creds = PairingMessage::Credentials(valid_credentials(&wrong_key, session.session_id()));
        assert_eq!(
            session.handle_message(&creds),
            PairingState::Failed(PairingFailure::DecryptionError)
        );
        assert!(session.take_authenticated().is_none());

        // No retry: a later valid message is rejected
        let late = PairingMessage::Credentials(valid_credentials(&wrong_key, session.session_id()));
        assert_eq!(
            session.handle_message(&late),
            PairingState::Failed(PairingFailure::DecryptionError)
        );
    }

    #[test]
    fn test_key_mismatch_fails_hard() {
        let mut session = PairingSession::new("203.0.113.7");
        let (init, key) = scan(&session);
        session.handle_message(&init);

        // Correctly encrypted, but the user's public key belongs to a
        // different key pair
        let mut msg = credentials_for(&key, session.session_id(), [0x55u8; 32], [0x66u8; 32]);
        msg.user.public_key = {
            use base64::{engine::general_purpose::STANDARD, Engine};
            STANDARD.encode([0u8; 32])
        };
        assert_eq!(
            session.handle_message(&PairingMessage::Credentials(msg)),
            PairingState::Failed(PairingFailure::KeyMismatch)
        );
    }

    #[test]
    fn test_credentials_before_init_are_out_of_order_noise() {
        let mut session = PairingSession::new("203.0.113.7");
        let key = [0x42u8; 32];
        let creds = PairingMessage::Credentials(valid_credentials(&key, session.session_id()));
        // Cannot decrypt yet - stays awaiting scan, counted as noise
        assert_eq!(session.handle_message(&creds), PairingState::AwaitingScan);
    }

    #[test]
    fn test_protocol_noise_threshold_escalates() {
        let mut session = PairingSession::new("203.0.113.7");
        for _ in 0..PROTOCOL_ERROR_THRESHOLD {
            assert_eq!(session.note_protocol_noise(), PairingState::AwaitingScan);
        }
        assert_eq!(
            session.note_protocol_noise(),
            PairingState::Failed(PairingFailure::ProtocolViolation)
        );
    }

    #[test]
    fn test_malformed_credentials_do_not_fail_the_session() {
        let mut session = PairingSession::new("203.0.113.7");
        let (init, key) = scan(&session);
        session.handle_message(&init);

        let mut bad = valid_credentials(&key, session.session_id());
        bad.encrypted_private_key = "!!garbage!!".into();
        // Encoding failure is protocol noise, not a cryptographic failure
        assert_eq!(
            session.handle_message(&PairingMessage::Credentials(bad)),
            PairingState::KeyExchangePending
        );

        // A well-formed message can still complete the exchange
        let good = PairingMessage::Credentials(valid_credentials(&key, session.session_id()));
        assert_eq!(session.handle_message(&good), PairingState::Authenticated);
    }

    #[test]
    fn test_cancel_is_idempotent_and_wipes() {
        // Cancel mid key exchange: the derived pairing key must not survive
        let mut session = PairingSession::new("203.0.113.7");
        let (init, _key) = scan(&session);
        session.handle_message(&init);

        session.cancel();
        assert_eq!(session.state(), PairingState::Cancelled);
        assert!(session.secrets_wiped());
        session.cancel();
        assert_eq!(session.state(), PairingState::Cancelled);

        // Cancel never overrides a settled attempt
        let mut done = PairingSession::new("203.0.113.7");
        let (init, key) = scan(&done);
        done.handle_message(&init);
        let creds = PairingMessage::Credentials(valid_credentials(&key, done.session_id()));
        done.handle_message(&creds);
        done.cancel();
        assert_eq!(done.state(), PairingState::Authenticated);
    }

    #[test]
    fn test_qr_payload_carries_session_material() {
        let session = PairingSession::new("203.0.113.7");
        let payload = session.qr_payload("wss://relay.test/pairing");
        assert_eq!(payload.session_id, session.session_id());
        assert!(!payload.public_key.is_empty());
        let roundtrip = QrCodePayload::decode(&payload.encode()).unwrap();
        assert_eq!(roundtrip, payload);
    }
}
