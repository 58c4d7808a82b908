//! Protocol error taxonomy.
//!
//! Every failure carries enough context to identify the failing stage and
//! channel. Stage failures during bring-up (init, handshake, feed bootstrap)
//! are unrecoverable and destroy the transport; per-request failures surface
//! through the `send` future that issued the request.

use weft_core::WireError;
use weft_transport::TransportError;

/// Boxed error type for user-supplied hook failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// `start` was called more than once, or a channel was attached after start.
    #[error("session already started")]
    AlreadyStarted,

    /// An operation was attempted on a destroyed transport.
    #[error("stream closed")]
    StreamClosed,

    /// Feed key resolution or feed creation failed.
    #[error("connection invalid: {0}")]
    ConnectionInvalid(String),

    /// A session-level handshake callback failed.
    #[error("handshake failed: {source}")]
    HandshakeFailed {
        #[source]
        source: BoxError,
    },

    /// The init agreement resolved to break, or timed out.
    #[error("init negotiation failed")]
    InitInvalid,

    /// An inbound message named a channel no extension is registered for.
    #[error("no extension registered for channel {0:?}")]
    ExtensionMissing(String),

    /// A channel with this name is already attached to the session.
    #[error("extension {channel:?} already registered")]
    DuplicateExtension { channel: String },

    /// The channel name collides with a reserved built-in channel.
    #[error("channel name {0:?} is reserved")]
    ReservedExtension(String),

    /// A channel's init hook failed.
    #[error("extension {channel:?} init failed: {source}")]
    ExtensionInitFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// A channel's handshake hook failed.
    #[error("extension {channel:?} handshake failed: {source}")]
    ExtensionHandshakeFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// A channel's feed hook failed.
    #[error("extension {channel:?} feed hook failed: {source}")]
    ExtensionFeedFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// A channel's close hook failed during teardown.
    #[error("extension {channel:?} close failed: {source}")]
    ExtensionCloseFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// The remote message handler answered with an error envelope.
    #[error("remote error: {message}")]
    ResponseFailed {
        code: Option<String>,
        message: String,
    },

    /// No correlated response arrived within the response deadline.
    #[error("no response within the deadline")]
    ResponseTimeout,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
