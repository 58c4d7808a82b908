//! Tracking of in-flight correlated requests.
//!
//! [`PendingRequests`] is the single point of mutual exclusion for request
//! resolution: a request resolves exactly once, by whichever of response
//! arrival, timeout expiry, or transport destruction removes its slot first.
//! This struct is deliberately decoupled from I/O: it only maps correlation
//! ids to waiters and hands out outcomes.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use weft_core::Frame;

use crate::error::ProtocolError;

type Waiter = oneshot::Sender<Result<Frame, ProtocolError>>;

/// In-flight outbound requests awaiting a correlated response.
pub(crate) struct PendingRequests {
    /// `None` once the owning session was torn down; late registrations
    /// must fail fast instead of waiting forever.
    slots: Mutex<Option<HashMap<u32, Waiter>>>,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Register a waiter for a correlation id.
    pub(crate) fn register(&self, correlation: u32, waiter: Waiter) -> Result<(), ProtocolError> {
        match self.slots.lock().expect("pending table poisoned").as_mut() {
            Some(slots) => {
                slots.insert(correlation, waiter);
                Ok(())
            }
            None => Err(ProtocolError::StreamClosed),
        }
    }

    /// Resolve a correlation id with an outcome. Returns `false` if no waiter
    /// was registered (already resolved, timed out, or never existed).
    pub(crate) fn resolve(&self, correlation: u32, outcome: Result<Frame, ProtocolError>) -> bool {
        let waiter = self
            .slots
            .lock()
            .expect("pending table poisoned")
            .as_mut()
            .and_then(|slots| slots.remove(&correlation));
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Drop a waiter without resolving it (timeout expiry or send failure).
    pub(crate) fn forget(&self, correlation: u32) {
        if let Some(slots) = self.slots.lock().expect("pending table poisoned").as_mut() {
            slots.remove(&correlation);
        }
    }

    /// Reject every outstanding request and refuse new registrations.
    pub(crate) fn shutdown(&self) {
        let slots = self.slots.lock().expect("pending table poisoned").take();
        if let Some(slots) = slots {
            let outstanding = slots.len();
            if outstanding > 0 {
                tracing::debug!(outstanding, "rejecting in-flight requests");
            }
            for (_, waiter) in slots {
                let _ = waiter.send(Err(ProtocolError::StreamClosed));
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots
            .lock()
            .expect("pending table poisoned")
            .as_ref()
            .map_or(0, HashMap::len)
    }
}
