//! In-process transport pair for tests and demos.
//!
//! [`MemoryTransport::pair`] yields the two endpoints of one logical duplex
//! connection. Each endpoint owns an event queue fed by its peer; the
//! transport-level handshake fires on both endpoints once both have opened.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_core::{DiscoveryKey, FeedKey};

use crate::error::TransportError;
use crate::feed::Feed;
use crate::{Transport, TransportEvent};

/// Event queue depth per endpoint.
const EVENT_QUEUE_DEPTH: usize = 64;

/// State shared by both endpoints of a pair.
struct PairState {
    destroyed: bool,
    declared: [Option<Vec<String>>; 2],
    handshake_payload: [Option<Vec<u8>>; 2],
}

/// One endpoint of an in-process duplex connection.
pub struct MemoryTransport {
    side: usize,
    state: Arc<Mutex<PairState>>,
    to_self: mpsc::Sender<TransportEvent>,
    to_peer: mpsc::Sender<TransportEvent>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl MemoryTransport {
    /// Create a connected pair of endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (tx_b, rx_b) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let state = Arc::new(Mutex::new(PairState {
            destroyed: false,
            declared: [None, None],
            handshake_payload: [None, None],
        }));

        let a = Self {
            side: 0,
            state: state.clone(),
            to_self: tx_a.clone(),
            to_peer: tx_b.clone(),
            events: Mutex::new(Some(rx_a)),
        };
        let b = Self {
            side: 1,
            state,
            to_self: tx_b,
            to_peer: tx_a,
            events: Mutex::new(Some(rx_b)),
        };
        (a, b)
    }

    fn peer_side(&self) -> usize {
        1 - self.side
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, channels: &[String]) -> Result<(), TransportError> {
        let handshakes = {
            let mut state = self.state.lock().expect("pair state poisoned");
            if state.destroyed {
                return Err(TransportError::Closed);
            }
            state.declared[self.side] = Some(channels.to_vec());

            if state.declared[self.peer_side()].is_some() {
                // Both sides opened: fire the handshake on each endpoint,
                // carrying the other side's application payload.
                Some((
                    state.handshake_payload[self.peer_side()].clone(),
                    state.handshake_payload[self.side].clone(),
                ))
            } else {
                None
            }
        };

        if let Some((payload_for_self, payload_for_peer)) = handshakes {
            tracing::debug!(side = self.side, "memory transport handshake");
            let _ = self
                .to_self
                .send(TransportEvent::Handshake {
                    remote_payload: payload_for_self,
                })
                .await;
            let _ = self
                .to_peer
                .send(TransportEvent::Handshake {
                    remote_payload: payload_for_peer,
                })
                .await;
        }
        Ok(())
    }

    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        {
            let state = self.state.lock().expect("pair state poisoned");
            if state.destroyed {
                return Err(TransportError::Closed);
            }
            let declared = state.declared[self.side]
                .as_ref()
                .ok_or(TransportError::NotOpened)?;
            if !declared.iter().any(|name| name == channel) {
                return Err(TransportError::UndeclaredChannel(channel.to_string()));
            }
        }

        self.to_peer
            .send(TransportEvent::Message {
                channel: channel.to_string(),
                payload,
            })
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn create_feed(
        &self,
        discovery_key: DiscoveryKey,
        public_key: FeedKey,
    ) -> Result<Feed, TransportError> {
        {
            let state = self.state.lock().expect("pair state poisoned");
            if state.destroyed {
                return Err(TransportError::Closed);
            }
            if state.declared[self.side].is_none() {
                return Err(TransportError::NotOpened);
            }
        }

        if self
            .to_peer
            .send(TransportEvent::Feed { discovery_key })
            .await
            .is_err()
        {
            tracing::debug!(%discovery_key, "feed announcement dropped; peer event stream gone");
        }
        Ok(Feed::new(public_key, discovery_key))
    }

    fn set_handshake_payload(&self, payload: Vec<u8>) {
        let mut state = self.state.lock().expect("pair state poisoned");
        state.handshake_payload[self.side] = Some(payload);
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events.lock().expect("event slot poisoned").take()
    }

    async fn destroy(&self) {
        {
            let mut state = self.state.lock().expect("pair state poisoned");
            if state.destroyed {
                return;
            }
            state.destroyed = true;
        }
        tracing::debug!(side = self.side, "memory transport destroyed");
        let _ = self.to_self.send(TransportEvent::Closed).await;
        let _ = self.to_peer.send(TransportEvent::Closed).await;
    }

    fn is_destroyed(&self) -> bool {
        self.state.lock().expect("pair state poisoned").destroyed
    }
}
