//! Multiplexed session layer for the weft protocol stack.
//!
//! This crate implements the stateful protocol logic: reliable
//! request/response channels multiplexed over one transport connection, the
//! two-phase init agreement, and the session that sequences the full
//! bring-up (transport open → init negotiation → handshake → feed
//! bootstrap) before either peer treats the connection as usable.

pub mod channel;
pub mod error;
pub mod init;
pub mod session;

pub use channel::{Channel, ChannelHandle, DEFAULT_RESPONSE_TIMEOUT};
pub use error::{BoxError, ProtocolError};
pub use init::{DEFAULT_INIT_TIMEOUT, INIT_CHANNEL_NAME};
pub use session::{
    KeyResolver, LocalContext, Session, SessionConfig, SessionEvent, SessionHandle, SessionStats,
};
