//! Reliable request/response channels multiplexed over one session.
//!
//! A [`Channel`] is built by application code with its lifecycle hooks, then
//! attached to a [`Session`](crate::session::Session) by name. Attaching
//! yields a [`ChannelHandle`] used to send correlated requests and oneway
//! messages; the session drives the hooks at the defined bring-up stages and
//! routes inbound envelopes back to the channel.

pub mod constants;
pub(crate) mod pending;

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use weft_core::{ChannelEnvelope, DiscoveryKey, EnvelopeKind, Frame};

use crate::error::{BoxError, ProtocolError};
use crate::session::events::SessionEvent;
use crate::session::{SessionHandle, SessionShared};

use pending::PendingRequests;

pub use constants::DEFAULT_RESPONSE_TIMEOUT;

pub(crate) type HookFuture = BoxFuture<'static, Result<(), BoxError>>;
pub(crate) type MessageFuture = BoxFuture<'static, Result<Frame, BoxError>>;

type LifecycleHook = Box<dyn Fn(SessionHandle) -> HookFuture + Send + Sync>;
type FeedHook = Box<dyn Fn(SessionHandle, DiscoveryKey) -> HookFuture + Send + Sync>;
type MessageHook = Box<dyn Fn(SessionHandle, Frame) -> MessageFuture + Send + Sync>;

/// User-supplied hooks for one channel. All optional, all async.
#[derive(Default)]
pub(crate) struct Hooks {
    on_init: Option<LifecycleHook>,
    on_handshake: Option<LifecycleHook>,
    on_close: Option<LifecycleHook>,
    on_feed: Option<FeedHook>,
    on_message: Option<MessageHook>,
}

/// A channel under construction, not yet attached to a session.
///
/// Binding happens at [`Session::attach`](crate::session::Session::attach),
/// which consumes the builder, so a channel can be bound to at most
/// one session, exactly once.
pub struct Channel {
    name: String,
    response_timeout: Duration,
    hooks: Hooks,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            hooks: Hooks::default(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deadline for correlated responses on this channel.
    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Hook run during the session init stage, before the continue/break
    /// agreement. A failure here aborts the whole bring-up.
    #[must_use]
    pub fn on_init<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.on_init = Some(Box::new(move |session| hook(session).boxed()));
        self
    }

    /// Hook run during the session handshake stage, after init agreement.
    #[must_use]
    pub fn on_handshake<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.on_handshake = Some(Box::new(move |session| hook(session).boxed()));
        self
    }

    /// Hook run during session teardown. Failures are logged, not re-thrown.
    #[must_use]
    pub fn on_close<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.on_close = Some(Box::new(move |session| hook(session).boxed()));
        self
    }

    /// Hook run for every inbound feed announcement once a feed exists.
    #[must_use]
    pub fn on_feed<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle, DiscoveryKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks.on_feed = Some(Box::new(move |session, dk| hook(session, dk).boxed()));
        self
    }

    /// Handler for inbound messages. Its return value becomes the response
    /// envelope; an error becomes an error envelope with the message
    /// preserved verbatim; the peer always receives a well-formed response.
    #[must_use]
    pub fn on_message<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(SessionHandle, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Frame, BoxError>> + Send + 'static,
    {
        self.hooks.on_message = Some(Box::new(move |session, frame| hook(session, frame).boxed()));
        self
    }

    pub(crate) fn into_inner(self) -> Arc<ChannelInner> {
        Arc::new(ChannelInner {
            name: self.name,
            response_timeout: self.response_timeout,
            hooks: self.hooks,
            next_correlation: AtomicU32::new(1),
            pending: PendingRequests::new(),
            session: OnceLock::new(),
        })
    }
}

/// Cloneable handle to an attached channel.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl ChannelHandle {
    pub(crate) fn new(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Send a correlated request and await the peer's response.
    ///
    /// Resolves with the decoded response frame, or fails with
    /// [`ProtocolError::ResponseFailed`] when the peer's handler errored,
    /// [`ProtocolError::ResponseTimeout`] when no response arrived within
    /// the channel's deadline, or [`ProtocolError::StreamClosed`] when the
    /// transport was destroyed.
    pub async fn send(&self, payload: impl Into<Frame>) -> Result<Frame, ProtocolError> {
        self.inner.request(payload.into()).await
    }

    /// Send a message without awaiting acknowledgment. Returns once the
    /// bytes are handed to the transport.
    pub async fn send_oneway(&self, payload: impl Into<Frame>) -> Result<(), ProtocolError> {
        self.inner.oneway(payload.into()).await
    }
}

/// Shared channel state after attach.
pub(crate) struct ChannelInner {
    name: String,
    response_timeout: Duration,
    hooks: Hooks,
    next_correlation: AtomicU32,
    pending: PendingRequests,
    session: OnceLock<Weak<SessionShared>>,
}

impl ChannelInner {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Bind to the owning session. The first bind wins; the builder is
    /// consumed at attach so a second bind cannot occur.
    pub(crate) fn bind(&self, shared: &Arc<SessionShared>) {
        let _ = self.session.set(Arc::downgrade(shared));
    }

    fn shared(&self) -> Result<Arc<SessionShared>, ProtocolError> {
        self.session
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ProtocolError::StreamClosed)
    }

    async fn request(&self, frame: Frame) -> Result<Frame, ProtocolError> {
        let shared = self.shared()?;
        shared.ensure_live()?;

        let correlation = self.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (waiter, outcome) = tokio::sync::oneshot::channel();
        self.pending.register(correlation, waiter)?;

        let envelope = ChannelEnvelope {
            kind: EnvelopeKind::Request,
            correlation,
            payload: frame.encode(),
        };
        if let Err(e) = shared.send_envelope(&self.name, &envelope).await {
            self.pending.forget(correlation);
            return Err(e);
        }

        match tokio::time::timeout(self.response_timeout, outcome).await {
            Err(_) => {
                self.pending.forget(correlation);
                tracing::debug!(channel = %self.name, correlation, "request timed out");
                Err(ProtocolError::ResponseTimeout)
            }
            // The waiter was dropped without an outcome: teardown raced us.
            Ok(Err(_)) => Err(ProtocolError::StreamClosed),
            Ok(Ok(outcome)) => outcome,
        }
    }

    async fn oneway(&self, frame: Frame) -> Result<(), ProtocolError> {
        let shared = self.shared()?;
        shared.ensure_live()?;
        let envelope = ChannelEnvelope {
            kind: EnvelopeKind::Oneway,
            correlation: 0,
            payload: frame.encode(),
        };
        shared.send_envelope(&self.name, &envelope).await
    }

    /// Route an inbound transport payload for this channel.
    pub(crate) fn handle_inbound(self: Arc<Self>, shared: &Arc<SessionShared>, payload: Vec<u8>) {
        let envelope = match ChannelEnvelope::unpack(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(channel = %self.name, error = %e, "dropping undecodable envelope");
                shared.emit(SessionEvent::ChannelError {
                    channel: self.name.clone(),
                    message: e.to_string(),
                });
                return;
            }
        };

        shared.emit(SessionEvent::ChannelReceive {
            channel: self.name.clone(),
            bytes: payload.len(),
        });

        match envelope.kind {
            EnvelopeKind::Response => self.resolve_response(envelope),
            EnvelopeKind::Request | EnvelopeKind::Oneway => {
                let respond = envelope.kind == EnvelopeKind::Request;
                let channel = self.clone();
                let shared = shared.clone();
                tokio::spawn(async move {
                    channel
                        .dispatch_message(&shared, envelope.correlation, &envelope.payload, respond)
                        .await;
                });
            }
        }
    }

    fn resolve_response(&self, envelope: ChannelEnvelope) {
        let outcome = match Frame::decode(&envelope.payload) {
            Err(e) => Err(ProtocolError::Wire(e)),
            Ok(Frame::Fault { code, message }) => Err(ProtocolError::ResponseFailed { code, message }),
            Ok(frame) => Ok(frame),
        };
        if !self.pending.resolve(envelope.correlation, outcome) {
            tracing::debug!(
                channel = %self.name,
                correlation = envelope.correlation,
                "response for unknown correlation"
            );
        }
    }

    /// Run the user message handler for an inbound request or oneway message.
    async fn dispatch_message(
        &self,
        shared: &Arc<SessionShared>,
        correlation: u32,
        payload: &[u8],
        respond: bool,
    ) {
        let outcome = match Frame::decode(payload) {
            Ok(frame) => match &self.hooks.on_message {
                Some(hook) => hook(SessionHandle::new(shared.clone()), frame).await,
                None => Err(BoxError::from("no message handler registered")),
            },
            Err(e) => Err(BoxError::from(e.to_string())),
        };

        let reply = match outcome {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(channel = %self.name, error = %e, "message handler failed");
                shared.emit(SessionEvent::ChannelError {
                    channel: self.name.clone(),
                    message: e.to_string(),
                });
                if !respond {
                    return;
                }
                Frame::fault(e.to_string())
            }
        };

        if !respond {
            return;
        }

        let envelope = ChannelEnvelope {
            kind: EnvelopeKind::Response,
            correlation,
            payload: reply.encode(),
        };
        if let Err(e) = shared.send_envelope(&self.name, &envelope).await {
            tracing::debug!(channel = %self.name, error = %e, "response dropped");
        }
    }

    // ---- Lifecycle hooks, invoked by the session at bring-up stages ----

    pub(crate) async fn run_on_init(&self, shared: &Arc<SessionShared>) -> Result<(), ProtocolError> {
        shared.ensure_live()?;
        if let Some(hook) = &self.hooks.on_init {
            hook(SessionHandle::new(shared.clone()))
                .await
                .map_err(|source| ProtocolError::ExtensionInitFailed {
                    channel: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub(crate) async fn run_on_handshake(
        &self,
        shared: &Arc<SessionShared>,
    ) -> Result<(), ProtocolError> {
        shared.ensure_live()?;
        if let Some(hook) = &self.hooks.on_handshake {
            hook(SessionHandle::new(shared.clone()))
                .await
                .map_err(|source| ProtocolError::ExtensionHandshakeFailed {
                    channel: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub(crate) async fn run_on_feed(
        &self,
        shared: &Arc<SessionShared>,
        discovery_key: DiscoveryKey,
    ) -> Result<(), ProtocolError> {
        shared.ensure_live()?;
        if let Some(hook) = &self.hooks.on_feed {
            hook(SessionHandle::new(shared.clone()), discovery_key)
                .await
                .map_err(|source| ProtocolError::ExtensionFeedFailed {
                    channel: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Run the close hook. The transport is already destroyed at this point,
    /// so unlike the other hooks this one does not gate on liveness.
    pub(crate) async fn run_on_close(
        &self,
        shared: &Arc<SessionShared>,
    ) -> Result<(), ProtocolError> {
        if let Some(hook) = &self.hooks.on_close {
            hook(SessionHandle::new(shared.clone()))
                .await
                .map_err(|source| ProtocolError::ExtensionCloseFailed {
                    channel: self.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Reject all in-flight requests. Called once during teardown.
    pub(crate) fn shutdown_pending(&self) {
        self.pending.shutdown();
    }
}
