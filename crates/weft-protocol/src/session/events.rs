//! Observable session events and traffic statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Diagnostic events emitted over the session's broadcast stream.
///
/// The stream is best-effort: a lagging subscriber drops events rather than
/// backpressuring the protocol.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The full bring-up sequence completed; the session is connected.
    Handshake,
    /// Every channel's init hook and the init agreement resolved.
    ExtensionsInitialized,
    /// Every channel's handshake hook ran.
    ExtensionsHandshake,
    /// An envelope was handed to the transport.
    ChannelSend { channel: String, bytes: usize },
    /// An envelope arrived for a channel.
    ChannelReceive { channel: String, bytes: usize },
    /// A channel-local recoverable failure (handler error, bad envelope).
    ChannelError { channel: String, message: String },
    /// A session-fatal failure; teardown follows.
    Error { message: String },
    /// Teardown completed.
    Closed,
}

/// Point-in-time traffic counters for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub tx_messages: u64,
    pub rx_messages: u64,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

/// Live counters behind the [`SessionStats`] snapshot.
#[derive(Debug, Default)]
pub(crate) struct TrafficCounters {
    tx_messages: AtomicU64,
    rx_messages: AtomicU64,
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
}

impl TrafficCounters {
    pub(crate) fn record_tx(&self, bytes: usize) {
        self.tx_messages.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rx(&self, bytes: usize) {
        self.rx_messages.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        SessionStats {
            tx_messages: self.tx_messages.load(Ordering::Relaxed),
            rx_messages: self.rx_messages.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = TrafficCounters::default();
        counters.record_tx(10);
        counters.record_tx(5);
        counters.record_rx(7);
        assert_eq!(
            counters.snapshot(),
            SessionStats {
                tx_messages: 2,
                rx_messages: 1,
                tx_bytes: 15,
                rx_bytes: 7,
            }
        );
    }
}
