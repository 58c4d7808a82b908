//! Transport seam for the weft session protocol.
//!
//! The session layer consumes a duplex, multiplexed byte connection through
//! the [`Transport`] trait: declared named sub-channels, per-name opaque
//! payload delivery, a one-shot handshake event, feed announcements, and
//! destruction. [`MemoryTransport`] is an in-process implementation used by
//! tests and demos; network transports implement the same trait elsewhere.

pub mod error;
pub mod feed;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_core::{DiscoveryKey, FeedKey};

pub use error::TransportError;
pub use feed::Feed;
pub use memory::MemoryTransport;

/// Events surfaced by a transport to its owning session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport-level handshake completed. Fired once per connection.
    Handshake {
        /// Opaque application payload supplied by the remote peer.
        remote_payload: Option<Vec<u8>>,
    },
    /// A payload arrived on a named sub-channel.
    Message { channel: String, payload: Vec<u8> },
    /// The remote peer announced a feed by discovery key.
    Feed { discovery_key: DiscoveryKey },
    /// The connection was destroyed (locally or by the peer).
    Closed,
}

/// A duplex, multiplexed connection between two peers.
///
/// Sub-channel names must be declared in a single [`open`](Transport::open)
/// call before any traffic flows; both peers are expected to register the
/// same declared set.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Declare the ordered sub-channel name list and open the connection.
    async fn open(&self, channels: &[String]) -> Result<(), TransportError>;

    /// Send an opaque payload on a declared sub-channel.
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Create the feed backed by `public_key`, announcing `discovery_key`
    /// to the remote peer.
    async fn create_feed(
        &self,
        discovery_key: DiscoveryKey,
        public_key: FeedKey,
    ) -> Result<Feed, TransportError>;

    /// Set the opaque application payload exchanged at handshake time.
    /// Must be called before [`open`](Transport::open) to take effect.
    fn set_handshake_payload(&self, payload: Vec<u8>);

    /// Take the event stream. Yields `None` after the first call.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    /// Destroy the connection, notifying both peers. Idempotent.
    async fn destroy(&self);

    /// Whether the connection has been destroyed.
    fn is_destroyed(&self) -> bool;
}
