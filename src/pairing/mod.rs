pub mod channel;
pub mod materializer;
pub mod messages;
pub mod session;

pub use channel::{drive, ChannelEvent, KeyExchangeChannel, PairingCoordinator, PairingError};
pub use materializer::{materialize, MaterializeError};
pub use messages::{
    AuthCredentialsMessage, AuthSessionInitializationMessage, PairingMessage, QrCodePayload,
};
pub use session::{PairingFailure, PairingSession, PairingState};
