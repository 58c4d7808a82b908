//! Two-phase continue/break init agreement.
//!
//! Both peers run their channels' init hooks independently, and either side
//! may fail. Without an agreement one peer could proceed to a live handshake
//! while the other is about to abort, leaving the connection in an
//! inconsistent state. The negotiator runs over a reserved built-in channel:
//! each side sends a oneway continue (or break) signal, and only proceeds
//! once it has observed the remote's signal too.
//!
//! ```text
//! LOCAL                                   REMOTE
//!   | all init hooks ok                     |
//!   |------------- "continue" ------------->|
//!   |<------------ "continue" --------------|  → both proceed to handshake
//!   |                                       |
//!   | an init hook failed                   |
//!   |-------------- "break" --------------->|  → remote fails InitInvalid
//! ```
//!
//! The negotiator is deliberately decoupled from I/O: signal transmission is
//! passed in as a closure, and the remote signal arrives through
//! [`record_signal`](InitNegotiator::record_signal).

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::ProtocolError;

/// Reserved channel name carrying init signals. Not user-addressable.
pub const INIT_CHANNEL_NAME: &str = "@init";

/// Default bound on waiting for the remote's init signal.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// The reserved continue token. Any other payload counts as a break.
pub(crate) const CONTINUE_TOKEN: &[u8] = b"continue";
pub(crate) const BREAK_TOKEN: &[u8] = b"break";

/// Resolution state of the remote peer's init signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteInit {
    Unknown,
    Continue,
    Break,
}

/// One negotiator per session, created with it, opened before any user
/// channel and shut down as teardown begins.
pub(crate) struct InitNegotiator {
    timeout: Duration,
    remote: watch::Sender<RemoteInit>,
}

impl InitNegotiator {
    pub(crate) fn new(timeout: Duration) -> Self {
        let (remote, _) = watch::channel(RemoteInit::Unknown);
        Self { timeout, remote }
    }

    #[cfg(test)]
    pub(crate) fn remote_state(&self) -> RemoteInit {
        *self.remote.borrow()
    }

    /// Record the remote peer's signal and wake any suspended agreement wait.
    /// The first signal wins; later signals are ignored.
    pub(crate) fn record_signal(&self, token: &[u8]) {
        let signal = if token == CONTINUE_TOKEN {
            RemoteInit::Continue
        } else {
            RemoteInit::Break
        };
        let recorded = self.remote.send_if_modified(|state| {
            if *state == RemoteInit::Unknown {
                *state = signal;
                true
            } else {
                false
            }
        });
        if recorded {
            tracing::debug!(?signal, "init: remote signal observed");
        }
    }

    /// Resolve an unobserved remote signal to break when the underlying
    /// channel closes, so an abrupt disconnect cannot hang the agreement.
    pub(crate) fn on_closed(&self) {
        self.remote.send_if_modified(|state| {
            if *state == RemoteInit::Unknown {
                *state = RemoteInit::Break;
                true
            } else {
                false
            }
        });
    }

    /// Run the local half of the agreement: send the continue signal, then
    /// resolve against the remote's signal: immediately if it was already
    /// observed, otherwise after suspending until it arrives or the timeout
    /// elapses. Called exactly once per session, after every local init hook
    /// succeeded.
    pub(crate) async fn continue_agreement<F, Fut>(&self, send_token: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&'static [u8]) -> Fut,
        Fut: Future<Output = Result<(), ProtocolError>>,
    {
        // A failed send does not abort the agreement: the remote's already
        // queued signal (or the channel closing) still resolves the wait,
        // and the timeout bounds it either way.
        if let Err(e) = send_token(CONTINUE_TOKEN).await {
            tracing::debug!(error = %e, "init: continue signal dropped");
        }

        let mut remote = self.remote.subscribe();
        let decided = tokio::time::timeout(
            self.timeout,
            remote.wait_for(|state| *state != RemoteInit::Unknown),
        )
        .await;

        match decided {
            Err(_) => {
                tracing::warn!("init: timed out waiting for remote signal");
                Err(ProtocolError::InitInvalid)
            }
            Ok(Err(_)) => Err(ProtocolError::InitInvalid),
            Ok(Ok(state)) => match *state {
                RemoteInit::Continue => Ok(()),
                _ => Err(ProtocolError::InitInvalid),
            },
        }
    }

    /// Best-effort break signal, used when a local init hook failed. Send
    /// failures are swallowed, since the connection may already be unusable.
    pub(crate) async fn break_agreement<F, Fut>(&self, send_token: F)
    where
        F: FnOnce(&'static [u8]) -> Fut,
        Fut: Future<Output = Result<(), ProtocolError>>,
    {
        if let Err(e) = send_token(BREAK_TOKEN).await {
            tracing::debug!(error = %e, "init: break signal dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn send_ok(_token: &'static [u8]) -> Result<(), ProtocolError> {
        Ok(())
    }

    #[tokio::test]
    async fn continue_resolves_immediately_when_signal_already_observed() {
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator.record_signal(CONTINUE_TOKEN);
        negotiator.continue_agreement(send_ok).await.unwrap();
    }

    #[tokio::test]
    async fn continue_waits_for_late_signal() {
        let negotiator = Arc::new(InitNegotiator::new(DEFAULT_INIT_TIMEOUT));
        let waiter = negotiator.clone();
        let signaller = tokio::spawn(async move {
            tokio::task::yield_now().await;
            waiter.record_signal(CONTINUE_TOKEN);
        });
        negotiator.continue_agreement(send_ok).await.unwrap();
        signaller.await.unwrap();
    }

    #[tokio::test]
    async fn break_signal_fails_agreement() {
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator.record_signal(BREAK_TOKEN);
        match negotiator.continue_agreement(send_ok).await {
            Err(ProtocolError::InitInvalid) => {}
            other => panic!("expected InitInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn any_non_continue_payload_counts_as_break() {
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator.record_signal(b"definitely not the token");
        assert_eq!(negotiator.remote_state(), RemoteInit::Break);
    }

    #[tokio::test(start_paused = true)]
    async fn continue_times_out_without_remote_signal() {
        let negotiator = InitNegotiator::new(Duration::from_secs(5));
        match negotiator.continue_agreement(send_ok).await {
            Err(ProtocolError::InitInvalid) => {}
            other => panic!("expected InitInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn channel_close_resolves_waiter_as_break() {
        let negotiator = Arc::new(InitNegotiator::new(DEFAULT_INIT_TIMEOUT));
        let closer = negotiator.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            closer.on_closed();
        });
        match negotiator.continue_agreement(send_ok).await {
            Err(ProtocolError::InitInvalid) => {}
            other => panic!("expected InitInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn first_signal_wins() {
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator.record_signal(CONTINUE_TOKEN);
        negotiator.record_signal(BREAK_TOKEN);
        assert_eq!(negotiator.remote_state(), RemoteInit::Continue);
    }

    #[tokio::test]
    async fn failed_send_still_resolves_from_remote_signal() {
        // The local continue could not be transmitted, but the remote's break
        // was already observed: the agreement must fail as break, not as a
        // send error.
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator.record_signal(BREAK_TOKEN);
        let result = negotiator
            .continue_agreement(|_| async { Err(ProtocolError::StreamClosed) })
            .await;
        match result {
            Err(ProtocolError::InitInvalid) => {}
            other => panic!("expected InitInvalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn break_agreement_swallows_send_failure() {
        let negotiator = InitNegotiator::new(DEFAULT_INIT_TIMEOUT);
        negotiator
            .break_agreement(|_| async { Err(ProtocolError::StreamClosed) })
            .await;
    }
}
