//! Session orchestration: staged connection bring-up and message routing.
//!
//! A session owns one transport connection, a named set of user channels,
//! and the built-in init negotiator. Bring-up is strictly sequential: no
//! stage begins until the previous fully resolved.
//!
//! ```text
//! constructed → starting → opening channels → transport handshake
//!     → init hooks + continue/break agreement → handshake hooks
//!     → connected (+ feed bootstrap) → closed
//! ```
//!
//! Failures in the init, handshake, and feed stages are unrecoverable for
//! the connection: they destroy the transport, which cascades into teardown
//! of every channel. Failures inside inbound message handlers are local and
//! recovered. Teardown itself is best-effort.

pub mod config;
pub mod events;
pub(crate) mod registry;

use std::any::Any;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{broadcast, mpsc, watch};

use weft_core::{ChannelEnvelope, DiscoveryKey, EnvelopeKind, Frame, SessionId};
use weft_transport::{Feed, Transport, TransportError, TransportEvent};

use crate::channel::{Channel, ChannelHandle, ChannelInner, HookFuture};
use crate::error::{BoxError, ProtocolError};
use crate::init::{INIT_CHANNEL_NAME, InitNegotiator};

use registry::ChannelRegistry;

pub use config::{KeyResolver, SessionConfig};
pub use events::{SessionEvent, SessionStats};

/// Broadcast buffer for diagnostic events.
const EVENT_BUFFER: usize = 64;

type SessionHook = Box<dyn Fn(SessionHandle) -> HookFuture + Send + Sync>;

/// Opaque local-only context attached to a session. Never transmitted.
pub type LocalContext = Arc<dyn Any + Send + Sync>;

/// State shared between the session, its channels, and the event pump.
pub(crate) struct SessionShared {
    /// Self-reference so `&self` methods can hand out owning handles.
    self_ref: Weak<SessionShared>,
    id: SessionId,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    negotiator: InitNegotiator,
    registry: Mutex<ChannelRegistry>,
    handshake_hooks: Mutex<Vec<SessionHook>>,

    connected: AtomicBool,
    initiator: AtomicBool,
    teardown_started: AtomicBool,
    destroyed: watch::Sender<bool>,
    handshake_seen: watch::Sender<bool>,
    announced: watch::Sender<Option<DiscoveryKey>>,

    session_data: Mutex<Option<Vec<u8>>>,
    remote_session_data: Mutex<Option<Vec<u8>>>,
    local_context: Mutex<Option<LocalContext>>,
    feed: Mutex<Option<Feed>>,

    counters: events::TrafficCounters,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionShared {
    /// Upgrade the self-reference. Cannot fail while a method runs on a
    /// live session.
    fn arc(&self) -> Arc<SessionShared> {
        self.self_ref.upgrade().expect("session shared self-reference")
    }

    /// Fail with `StreamClosed` if the transport is no longer usable.
    pub(crate) fn ensure_live(&self) -> Result<(), ProtocolError> {
        if *self.destroyed.borrow() || self.transport.is_destroyed() {
            return Err(ProtocolError::StreamClosed);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn channels_in_order(&self) -> Vec<Arc<ChannelInner>> {
        self.registry.lock().expect("registry poisoned").in_order()
    }

    /// Pack and transmit an envelope on a named sub-channel.
    pub(crate) async fn send_envelope(
        &self,
        channel: &str,
        envelope: &ChannelEnvelope,
    ) -> Result<(), ProtocolError> {
        self.ensure_live()?;
        let bytes = envelope.pack();
        let len = bytes.len();
        self.transport
            .send(channel, bytes)
            .await
            .map_err(|e| match e {
                TransportError::Closed => ProtocolError::StreamClosed,
                other => ProtocolError::Transport(other),
            })?;
        self.counters.record_tx(len);
        self.emit(SessionEvent::ChannelSend {
            channel: channel.to_string(),
            bytes: len,
        });
        Ok(())
    }

    /// Transmit an init signal on the reserved channel.
    async fn send_init_token(&self, token: &[u8]) -> Result<(), ProtocolError> {
        let envelope = ChannelEnvelope {
            kind: EnvelopeKind::Oneway,
            correlation: 0,
            payload: Frame::Raw(token.to_vec()).encode(),
        };
        self.send_envelope(INIT_CHANNEL_NAME, &envelope).await
    }

    /// Record an inbound init signal. Undecodable payloads count as break.
    fn handle_init_message(&self, payload: &[u8]) {
        let token = ChannelEnvelope::unpack(payload)
            .ok()
            .and_then(|envelope| Frame::decode(&envelope.payload).ok())
            .and_then(|frame| frame.as_bytes().map(<[u8]>::to_vec))
            .unwrap_or_default();
        self.negotiator.record_signal(&token);
    }

    /// Suspend until the transport handshake fires or the session dies.
    async fn await_handshake(&self) -> Result<(), ProtocolError> {
        self.ensure_live()?;
        let mut handshake = self.handshake_seen.subscribe();
        let mut destroyed = self.destroyed.subscribe();
        tokio::select! {
            seen = handshake.wait_for(|seen| *seen) => {
                seen.map(|_| ()).map_err(|_| ProtocolError::StreamClosed)
            }
            _ = destroyed.wait_for(|dead| *dead) => Err(ProtocolError::StreamClosed),
        }
    }

    /// Suspend until the remote announces a discovery key or the session dies.
    async fn await_feed_announcement(&self) -> Result<DiscoveryKey, ProtocolError> {
        self.ensure_live()?;
        let mut announced = self.announced.subscribe();
        let mut destroyed = self.destroyed.subscribe();
        tokio::select! {
            slot = announced.wait_for(|slot| slot.is_some()) => match slot {
                Ok(slot) => (*slot).ok_or(ProtocolError::StreamClosed),
                Err(_) => Err(ProtocolError::StreamClosed),
            },
            _ = destroyed.wait_for(|dead| *dead) => Err(ProtocolError::StreamClosed),
        }
    }

    /// Resolve the discovery key and create the data feed.
    async fn bootstrap_feed(
        &self,
        discovery_key: DiscoveryKey,
        dispatch_hooks: bool,
    ) -> Result<(), ProtocolError> {
        let key = (self.config.resolve_key)(discovery_key)
            .await
            .map_err(|e| ProtocolError::ConnectionInvalid(e.to_string()))?;
        let feed = self
            .transport
            .create_feed(discovery_key, key)
            .await
            .map_err(|e| ProtocolError::ConnectionInvalid(e.to_string()))?;
        tracing::info!(session = %self.id, discovery_key = %discovery_key, "feed created");
        *self.feed.lock().expect("feed slot poisoned") = Some(feed);
        if dispatch_hooks {
            self.dispatch_feed(discovery_key).await?;
        }
        Ok(())
    }

    /// Run every channel's feed hook in registration order.
    async fn dispatch_feed(&self, discovery_key: DiscoveryKey) -> Result<(), ProtocolError> {
        let shared = self.arc();
        for channel in self.channels_in_order() {
            channel.run_on_feed(&shared, discovery_key).await?;
        }
        Ok(())
    }

    /// Destroy the transport and close everything. Idempotent; best-effort.
    pub(crate) async fn teardown(&self) {
        if self.teardown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(session = %self.id, "session teardown");
        self.transport.destroy().await;
        // send_replace stores the value even with no subscribed waiters.
        self.destroyed.send_replace(true);
        self.connected.store(false, Ordering::SeqCst);

        // The negotiator is shut first so a pending agreement wait resolves
        // instead of hanging until its timeout.
        self.negotiator.on_closed();

        let shared = self.arc();
        for channel in self.channels_in_order() {
            channel.shutdown_pending();
            if let Err(e) = channel.run_on_close(&shared).await {
                tracing::warn!(session = %self.id, error = %e, "close hook failed");
                self.emit(SessionEvent::ChannelError {
                    channel: channel.name().to_string(),
                    message: e.to_string(),
                });
            }
        }
        self.emit(SessionEvent::Closed);
    }

    /// Fatal-failure path: surface the error, then tear down.
    async fn fail(&self, error: ProtocolError) -> ProtocolError {
        tracing::warn!(session = %self.id, error = %error, "session failed");
        self.emit(SessionEvent::Error {
            message: error.to_string(),
        });
        self.teardown().await;
        error
    }
}

/// Routes transport events for the lifetime of the connection.
async fn pump(shared: Arc<SessionShared>, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Handshake { remote_payload } => {
                tracing::debug!(session = %shared.id, "transport handshake");
                *shared
                    .remote_session_data
                    .lock()
                    .expect("session data poisoned") = remote_payload;
                shared.handshake_seen.send_replace(true);
            }
            TransportEvent::Message { channel, payload } => {
                shared.counters.record_rx(payload.len());
                if channel == INIT_CHANNEL_NAME {
                    shared.handle_init_message(&payload);
                    continue;
                }
                let target = shared
                    .registry
                    .lock()
                    .expect("registry poisoned")
                    .get(&channel);
                match target {
                    Some(target) => target.handle_inbound(&shared, payload),
                    None => {
                        let _ = shared.fail(ProtocolError::ExtensionMissing(channel)).await;
                        break;
                    }
                }
            }
            TransportEvent::Feed { discovery_key } => {
                let _ = shared.announced.send_if_modified(|slot| {
                    if slot.is_none() {
                        *slot = Some(discovery_key);
                        true
                    } else {
                        false
                    }
                });
                let have_feed = shared.feed.lock().expect("feed slot poisoned").is_some();
                if have_feed {
                    if let Err(e) = shared.dispatch_feed(discovery_key).await {
                        let _ = shared.fail(e).await;
                        break;
                    }
                }
            }
            TransportEvent::Closed => {
                tracing::debug!(session = %shared.id, "transport closed");
                shared.teardown().await;
                break;
            }
        }
    }
    // End of stream without a closed event still tears the session down.
    shared.teardown().await;
}

/// Handle passed to channel hooks and message handlers.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Application payload the remote peer supplied at handshake time.
    #[must_use]
    pub fn remote_session_data(&self) -> Option<Vec<u8>> {
        self.shared
            .remote_session_data
            .lock()
            .expect("session data poisoned")
            .clone()
    }

    #[must_use]
    pub fn local_context(&self) -> Option<LocalContext> {
        self.shared
            .local_context
            .lock()
            .expect("local context poisoned")
            .clone()
    }

    pub fn set_local_context(&self, context: LocalContext) {
        *self
            .shared
            .local_context
            .lock()
            .expect("local context poisoned") = Some(context);
    }

    /// Look up an attached channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<ChannelHandle> {
        self.shared
            .registry
            .lock()
            .expect("registry poisoned")
            .get(name)
            .map(ChannelHandle::new)
    }

    #[must_use]
    pub fn feed(&self) -> Option<Feed> {
        self.shared.feed.lock().expect("feed slot poisoned").clone()
    }
}

/// A session over one transport connection.
///
/// Construct, attach channels, then call [`start`](Session::start) exactly
/// once. The session is destroyed when the transport closes: locally via
/// [`close`](Session::close), remotely, or by a bring-up failure.
pub struct Session {
    shared: Arc<SessionShared>,
    started: AtomicBool,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let id = SessionId::random();
        let negotiator = InitNegotiator::new(config.init_timeout);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (destroyed, _) = watch::channel(false);
        let (handshake_seen, _) = watch::channel(false);
        let (announced, _) = watch::channel(None);
        Self {
            shared: Arc::new_cyclic(|self_ref| SessionShared {
                self_ref: self_ref.clone(),
                id,
                transport,
                config,
                negotiator,
                registry: Mutex::new(ChannelRegistry::new()),
                handshake_hooks: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                initiator: AtomicBool::new(false),
                teardown_started: AtomicBool::new(false),
                destroyed,
                handshake_seen,
                announced,
                session_data: Mutex::new(None),
                remote_session_data: Mutex::new(None),
                local_context: Mutex::new(None),
                feed: Mutex::new(None),
                counters: events::TrafficCounters::default(),
                events,
            }),
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Attach a channel. Must happen before [`start`](Session::start); at
    /// most one channel per name.
    pub fn attach(&self, channel: Channel) -> Result<ChannelHandle, ProtocolError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyStarted);
        }
        if channel.name() == INIT_CHANNEL_NAME {
            return Err(ProtocolError::ReservedExtension(channel.name().to_string()));
        }
        let inner = channel.into_inner();
        inner.bind(&self.shared);
        self.shared
            .registry
            .lock()
            .expect("registry poisoned")
            .insert(inner.clone())?;
        tracing::debug!(session = %self.shared.id, channel = inner.name(), "channel attached");
        Ok(ChannelHandle::new(inner))
    }

    /// Look up an attached channel by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<ChannelHandle> {
        self.shared
            .registry
            .lock()
            .expect("registry poisoned")
            .get(name)
            .map(ChannelHandle::new)
    }

    /// Detach a channel by name. Must happen before [`start`](Session::start).
    /// Returns whether a channel with that name was attached.
    pub fn detach(&self, name: &str) -> Result<bool, ProtocolError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyStarted);
        }
        let removed = self
            .shared
            .registry
            .lock()
            .expect("registry poisoned")
            .remove(name)
            .is_some();
        Ok(removed)
    }

    /// Set the opaque payload exchanged with the peer at the transport
    /// handshake. Takes effect if set before [`start`](Session::start).
    pub fn set_session_data(&self, data: Vec<u8>) {
        *self
            .shared
            .session_data
            .lock()
            .expect("session data poisoned") = Some(data);
    }

    #[must_use]
    pub fn session_data(&self) -> Option<Vec<u8>> {
        self.shared
            .session_data
            .lock()
            .expect("session data poisoned")
            .clone()
    }

    /// Application payload the remote peer supplied at handshake time.
    /// Available once the transport handshake completed.
    #[must_use]
    pub fn remote_session_data(&self) -> Option<Vec<u8>> {
        self.shared
            .remote_session_data
            .lock()
            .expect("session data poisoned")
            .clone()
    }

    /// Attach arbitrary local-only data to the session. Never transmitted.
    pub fn set_local_context(&self, context: LocalContext) {
        *self
            .shared
            .local_context
            .lock()
            .expect("local context poisoned") = Some(context);
    }

    #[must_use]
    pub fn local_context(&self) -> Option<LocalContext> {
        self.shared
            .local_context
            .lock()
            .expect("local context poisoned")
            .clone()
    }

    /// Register an additional session-level handshake callback, run before
    /// the channels' handshake hooks. A failure aborts the bring-up.
    pub fn on_handshake<F, Fut>(&self, hook: F)
    where
        F: Fn(SessionHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        use futures::FutureExt;
        self.shared
            .handshake_hooks
            .lock()
            .expect("handshake hooks poisoned")
            .push(Box::new(move |session| hook(session).boxed()));
    }

    /// Subscribe to the diagnostic event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Whether this side supplied a discovery key at start and therefore
    /// initiates feed creation.
    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.shared.initiator.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn feed(&self) -> Option<Feed> {
        self.shared.feed.lock().expect("feed slot poisoned").clone()
    }

    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    /// Drive the full bring-up sequence. Called exactly once.
    ///
    /// Resolves once the session is connected (and, for the initiator, the
    /// feed is created). Any stage failure destroys the transport and
    /// resolves with the stage's error.
    pub async fn start(&self, discovery_key: Option<DiscoveryKey>) -> Result<(), ProtocolError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ProtocolError::AlreadyStarted);
        }
        let shared = &self.shared;
        shared.ensure_live()?;
        shared
            .initiator
            .store(discovery_key.is_some(), Ordering::SeqCst);
        tracing::debug!(
            session = %shared.id,
            initiator = discovery_key.is_some(),
            channels = shared.registry.lock().expect("registry poisoned").len(),
            "session starting"
        );

        if let Some(data) = self.session_data() {
            shared.transport.set_handshake_payload(data);
        }

        // The pump owns the transport event stream from before open, so no
        // early event can be lost.
        let events = shared
            .transport
            .take_events()
            .ok_or(ProtocolError::AlreadyStarted)?;
        tokio::spawn(pump(shared.clone(), events));

        // Open: the negotiator first, then every user channel in
        // registration order; the declared name set is sorted so both peers
        // agree on it regardless of attach order.
        let mut names = shared
            .registry
            .lock()
            .expect("registry poisoned")
            .names_in_order();
        names.insert(0, INIT_CHANNEL_NAME.to_string());
        names.sort();
        if let Err(e) = shared.transport.open(&names).await {
            return Err(shared.fail(ProtocolError::Transport(e)).await);
        }

        // Transport handshake.
        if let Err(e) = shared.await_handshake().await {
            return Err(shared.fail(e).await);
        }

        // Init stage: every channel's init hook, sequentially, in
        // registration order; then the continue/break agreement.
        let channels = shared.channels_in_order();
        for channel in &channels {
            if let Err(e) = channel.run_on_init(shared).await {
                shared
                    .negotiator
                    .break_agreement(|token| shared.send_init_token(token))
                    .await;
                return Err(shared.fail(e).await);
            }
        }
        shared.emit(SessionEvent::ExtensionsInitialized);
        if let Err(e) = shared
            .negotiator
            .continue_agreement(|token| shared.send_init_token(token))
            .await
        {
            return Err(shared.fail(e).await);
        }

        // Handshake stage: session-level callbacks first, then channels.
        let hooks = mem::take(
            &mut *shared
                .handshake_hooks
                .lock()
                .expect("handshake hooks poisoned"),
        );
        for hook in &hooks {
            if let Err(source) = hook(SessionHandle::new(shared.clone())).await {
                return Err(shared.fail(ProtocolError::HandshakeFailed { source }).await);
            }
        }
        for channel in &channels {
            if let Err(e) = channel.run_on_handshake(shared).await {
                return Err(shared.fail(e).await);
            }
        }
        shared.connected.store(true, Ordering::SeqCst);
        tracing::info!(session = %shared.id, "session connected");
        shared.emit(SessionEvent::Handshake);
        shared.emit(SessionEvent::ExtensionsHandshake);

        // Feed bootstrap. The initiator resolves its own discovery key
        // before start returns; the other side waits for the remote's
        // announcement without blocking start.
        match discovery_key {
            Some(discovery_key) => {
                if let Err(e) = shared.bootstrap_feed(discovery_key, false).await {
                    return Err(shared.fail(e).await);
                }
            }
            None => {
                let shared = shared.clone();
                tokio::spawn(async move {
                    let discovery_key = match shared.await_feed_announcement().await {
                        Ok(discovery_key) => discovery_key,
                        Err(_) => return,
                    };
                    if let Err(e) = shared.bootstrap_feed(discovery_key, true).await {
                        let _ = shared.fail(e).await;
                    }
                });
            }
        }

        Ok(())
    }

    /// Destroy the transport and close every channel.
    pub async fn close(&self) {
        self.shared.teardown().await;
    }
}
