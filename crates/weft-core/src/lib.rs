//! Wire-level types and codecs for the weft session protocol.
//!
//! This crate is the dependency leaf of the workspace: key and id newtypes,
//! the frame codec (the tagged union of message shapes exchanged over a
//! channel), and the channel envelope that carries correlation metadata.
//! No I/O and no async, just pure data.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod types;

pub use envelope::{ChannelEnvelope, EnvelopeKind};
pub use error::WireError;
pub use frame::Frame;
pub use types::{DiscoveryKey, FeedKey, SessionId};
