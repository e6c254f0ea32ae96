//! Key-exchange channel and pairing driver.
//!
//! [`KeyExchangeChannel`] owns a background task holding the WebSocket to the
//! pairing relay. Parsed frames arrive on an mpsc receiver; `close()` signals
//! the task and is idempotent. Transient disconnects are absorbed here: the
//! task reconnects with capped exponential backoff while the session's TTL
//! keeps running on its own monotonic deadline. A disconnect that outlasts
//! the TTL is just an expiry.
//!
//! [`PairingCoordinator`] enforces the one-live-session-per-display rule:
//! starting a new attempt cancels any prior unterminated one.

use std::time::{Duration, Instant};

use futures::StreamExt;
use log::debug;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::pairing::messages::{PairingMessage, QrCodePayload};
use crate::pairing::session::{PairingFailure, PairingSession, PairingState};
use crate::types::AuthenticatedUser;

/// Reconnect backoff bounds for the channel task.
const RECONNECT_BACKOFF_START: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PairingError {
    #[error("pairing session expired")]
    Expired,

    #[error("pairing session cancelled")]
    Cancelled,

    #[error("no pairing session started")]
    NotStarted,

    #[error("pairing failed: {0:?}")]
    Failed(PairingFailure),
}

/// What the channel delivers to the driver.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A well-formed pairing message (session id not yet checked).
    Message(PairingMessage),
    /// An unparseable frame. The session counts these.
    ProtocolNoise,
    /// The socket dropped; the task is reconnecting.
    Disconnected,
}

/// Handle to one relay connection scoped to a session id.
pub struct KeyExchangeChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl KeyExchangeChannel {
    /// Connect to the relay for `session_id`. Spawns the socket task; initial
    /// connection failures are retried like any other disconnect, so this
    /// never blocks on the network.
    pub fn connect(relay_url: &str, session_id: &str) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let url = format!("{relay_url}?session={session_id}");

        tokio::spawn(channel_task(url, shutdown_rx, event_tx));

        Self {
            events: event_rx,
            shutdown: Some(shutdown_tx),
        }
    }

    /// Assemble a channel from a scripted event source. Test seam.
    #[cfg(test)]
    pub(crate) fn from_events(events: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            events,
            shutdown: None,
        }
    }

    /// Next event, or `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Release the socket and task. Safe to call any number of times.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.events.close();
    }
}

impl Drop for KeyExchangeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background socket loop: connect, forward frames, reconnect on failure.
async fn channel_task(
    url: String,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let mut backoff = RECONNECT_BACKOFF_START;
    loop {
        let attempt = tokio::select! {
            _ = &mut shutdown => return,
            res = connect_async(url.as_str()) => res,
        };

        match attempt {
            Ok((mut stream, _response)) => {
                debug!("key exchange channel connected");
                backoff = RECONNECT_BACKOFF_START;
                loop {
                    tokio::select! {
                        _ = &mut shutdown => {
                            let _ = stream.close(None).await;
                            return;
                        }
                        frame = stream.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                let event = match PairingMessage::parse(text.as_str()) {
                                    Some(msg) => ChannelEvent::Message(msg),
                                    None => ChannelEvent::ProtocolNoise,
                                };
                                if events.send(event).is_err() {
                                    return;
                                }
                            }
                            // Pings and pongs handled by the protocol layer;
                            // binary frames are not part of this exchange
                            Some(Ok(Message::Close(_))) | None => {
                                if events.send(ChannelEvent::Disconnected).is_err() {
                                    return;
                                }
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                debug!("key exchange channel read error: {err}");
                                if events.send(ChannelEvent::Disconnected).is_err() {
                                    return;
                                }
                                break;
                            }
                        }
                    }
                }
            }
            Err(err) => {
                debug!("key exchange channel connect failed: {err}");
                if events.send(ChannelEvent::Disconnected).is_err() {
                    return;
                }
            }
        }

        // Backoff before the next attempt; shutdown wins the race
        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(RECONNECT_BACKOFF_CAP);
    }
}

/// Drive one session over one channel until a terminal state. Non-blocking
/// subscription: suspends on the channel, never polls. Disconnect events are
/// absorbed - the TTL deadline is the only clock that ends the wait.
pub async fn drive(
    session: &mut PairingSession,
    channel: &mut KeyExchangeChannel,
) -> Result<AuthenticatedUser, PairingError> {
    let deadline = tokio::time::Instant::from_std(session.expires_at());

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                session.tick(Instant::now());
                channel.close();
                return Err(PairingError::Expired);
            }
            event = channel.recv() => match event {
                Some(ChannelEvent::Message(msg)) => {
                    match session.handle_message(&msg) {
                        PairingState::Authenticated => {
                            channel.close();
                            if let Some(user) = session.take_authenticated() {
                                return Ok(user);
                            }
                        }
                        PairingState::Failed(reason) => {
                            channel.close();
                            return Err(PairingError::Failed(reason));
                        }
                        PairingState::Expired => {
                            channel.close();
                            return Err(PairingError::Expired);
                        }
                        PairingState::Cancelled => {
                            channel.close();
                            return Err(PairingError::Cancelled);
                        }
                        _ => {}
                    }
                }
                Some(ChannelEvent::ProtocolNoise) => {
                    if let PairingState::Failed(reason) = session.note_protocol_noise() {
                        channel.close();
                        return Err(PairingError::Failed(reason));
                    }
                }
                Some(ChannelEvent::Disconnected) => {
                    debug!("pairing channel reconnecting; session timer unaffected");
                }
                None => {
                    // Channel gone for good; nothing can arrive, wait out the TTL
                    tokio::time::sleep_until(deadline).await;
                    session.tick(Instant::now());
                    return Err(PairingError::Expired);
                }
            }
        }
    }
}

/// Owns the single live pairing attempt for one QR display surface.
pub struct PairingCoordinator {
    relay_url: String,
    active: Option<PairingSession>,
}

impl PairingCoordinator {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            active: None,
        }
    }

    /// Start a fresh attempt, cancelling any prior unterminated one so a
    /// stale counterpart can never deliver credentials into a dead session.
    pub fn begin(&mut self, requestor_ip: impl Into<String>) -> QrCodePayload {
        if let Some(prev) = self.active.as_mut() {
            prev.cancel();
        }
        let session = PairingSession::new(requestor_ip);
        let payload = session.qr_payload(&self.relay_url);
        self.active = Some(session);
        payload
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.session_id())
    }

    /// Run the active attempt to completion over a live relay connection.
    pub async fn run(&mut self) -> Result<AuthenticatedUser, PairingError> {
        let relay_url = self.relay_url.clone();
        let session = self.active.as_mut().ok_or(PairingError::NotStarted)?;
        let mut channel = KeyExchangeChannel::connect(&relay_url, session.session_id());
        let result = drive(session, &mut channel).await;
        self.active = None;
        result
    }

    /// Run the active attempt over an externally supplied channel.
    pub async fn run_with_channel(
        &mut self,
        mut channel: KeyExchangeChannel,
    ) -> Result<AuthenticatedUser, PairingError> {
        let session = self.active.as_mut().ok_or(PairingError::NotStarted)?;
        let result = drive(session, &mut channel).await;
        self.active = None;
        result
    }

    /// Cancel the active attempt, releasing its secrets. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(session) = self.active.as_mut() {
            session.cancel();
        }
        self.active = None;
    }
}
