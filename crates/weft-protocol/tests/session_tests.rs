//! Tests for the session bring-up sequence: stage ordering, init agreement
//! propagation, session data exchange, and feed bootstrap.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft_core::{ChannelEnvelope, DiscoveryKey, EnvelopeKind, FeedKey, Frame};
use weft_protocol::{Channel, ProtocolError, Session, SessionConfig, SessionEvent};
use weft_transport::{MemoryTransport, Transport};

type Trace = Arc<Mutex<Vec<String>>>;

fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(trace: &Trace, entry: impl Into<String>) {
    trace.lock().unwrap().push(entry.into());
}

/// A channel that records its init/handshake hook invocations.
fn tracing_channel(name: &str, log: Trace) -> Channel {
    let init_log = log.clone();
    let init_name = name.to_string();
    let handshake_name = name.to_string();
    Channel::new(name)
        .on_init(move |_session| {
            let log = init_log.clone();
            let name = init_name.clone();
            async move {
                record(&log, format!("init:{name}"));
                Ok(())
            }
        })
        .on_handshake(move |_session| {
            let log = log.clone();
            let name = handshake_name.clone();
            async move {
                record(&log, format!("handshake:{name}"));
                Ok(())
            }
        })
}

#[tokio::test]
async fn bring_up_runs_hooks_in_registration_order() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_log = trace();
    let b_log = trace();
    for name in ["zeta", "alpha", "mid"] {
        a.attach(tracing_channel(name, a_log.clone())).unwrap();
        b.attach(tracing_channel(name, b_log.clone())).unwrap();
    }

    let session_log = a_log.clone();
    a.on_handshake(move |_session| {
        let log = session_log.clone();
        async move {
            record(&log, "session-handshake");
            Ok(())
        }
    });

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    assert!(a.is_connected());
    assert!(b.is_connected());
    assert!(!a.is_initiator());

    // Registration order, not alphabetical order; init fully precedes
    // handshake; the session-level hook runs before the channel hooks.
    assert_eq!(
        *a_log.lock().unwrap(),
        [
            "init:zeta",
            "init:alpha",
            "init:mid",
            "session-handshake",
            "handshake:zeta",
            "handshake:alpha",
            "handshake:mid",
        ]
    );
    assert_eq!(
        *b_log.lock().unwrap(),
        [
            "init:zeta",
            "init:alpha",
            "init:mid",
            "handshake:zeta",
            "handshake:alpha",
            "handshake:mid",
        ]
    );
}

#[tokio::test]
async fn init_failure_breaks_the_peer() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_log = trace();
    let b_log = trace();
    let fail_log = a_log.clone();
    a.attach(
        Channel::new("fragile")
            .on_init(move |_session| {
                let log = fail_log.clone();
                async move {
                    record(&log, "init:fragile");
                    Err("local setup failed".into())
                }
            })
            .on_handshake({
                let log = a_log.clone();
                move |_session| {
                    let log = log.clone();
                    async move {
                        record(&log, "handshake:fragile");
                        Ok(())
                    }
                }
            }),
    )
    .unwrap();
    b.attach(tracing_channel("fragile", b_log.clone())).unwrap();

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));

    match ra {
        Err(ProtocolError::ExtensionInitFailed { channel, source }) => {
            assert_eq!(channel, "fragile");
            assert_eq!(source.to_string(), "local setup failed");
        }
        other => panic!("expected ExtensionInitFailed, got {other:?}"),
    }
    match rb {
        Err(ProtocolError::InitInvalid) => {}
        other => panic!("expected InitInvalid, got {other:?}"),
    }

    // Neither side reached the handshake stage.
    assert!(!a.is_connected());
    assert!(!b.is_connected());
    assert!(!a_log.lock().unwrap().iter().any(|e| e.starts_with("handshake")));
    assert!(!b_log.lock().unwrap().iter().any(|e| e.starts_with("handshake")));
}

#[tokio::test(start_paused = true)]
async fn init_agreement_times_out_against_a_silent_peer() {
    common::init_tracing();
    let (ta, tb) = MemoryTransport::pair();
    let tb = Arc::new(tb);
    let a = Session::new(Arc::new(ta));
    a.attach(Channel::new("quiet")).unwrap();

    // The peer opens the transport but never answers the init signal.
    let b_side = async {
        tb.open(&["@init".to_string(), "quiet".to_string()])
            .await
            .unwrap();
    };

    let (ra, ()) = tokio::join!(a.start(None), b_side);
    match ra {
        Err(ProtocolError::InitInvalid) => {}
        other => panic!("expected InitInvalid, got {other:?}"),
    }
    assert!(!a.is_connected());
}

#[tokio::test]
async fn session_data_is_exchanged_at_handshake() {
    common::init_tracing();
    let (a, b) = common::session_pair();
    a.set_session_data(b"metadata-from-a".to_vec());
    b.set_session_data(b"metadata-from-b".to_vec());

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.remote_session_data().as_deref(), Some(&b"metadata-from-b"[..]));
    assert_eq!(b.remote_session_data().as_deref(), Some(&b"metadata-from-a"[..]));
    assert_eq!(a.session_data().as_deref(), Some(&b"metadata-from-a"[..]));
}

#[tokio::test]
async fn local_context_is_never_part_of_the_wire_exchange() {
    common::init_tracing();
    let (a, b) = common::session_pair();
    a.set_local_context(Arc::new("only here".to_string()));

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    let context = a.local_context().unwrap();
    assert_eq!(
        context.downcast_ref::<String>().map(String::as_str),
        Some("only here")
    );
    assert!(b.local_context().is_none());
    assert!(b.remote_session_data().is_none());
}

#[tokio::test]
async fn start_twice_fails_fast() {
    common::init_tracing();
    let (a, b) = common::session_pair();
    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    match a.start(None).await {
        Err(ProtocolError::AlreadyStarted) => {}
        other => panic!("expected AlreadyStarted, got {other:?}"),
    }
}

#[tokio::test]
async fn attach_after_start_fails() {
    common::init_tracing();
    let (a, b) = common::session_pair();
    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    match a.attach(Channel::new("late")) {
        Err(ProtocolError::AlreadyStarted) => {}
        other => panic!("expected AlreadyStarted, got {other:?}"),
    }
}

#[tokio::test]
async fn detached_channels_take_no_part_in_bring_up() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_log = trace();
    a.attach(tracing_channel("keep", a_log.clone())).unwrap();
    a.attach(tracing_channel("drop", a_log.clone())).unwrap();
    assert!(a.detach("drop").unwrap());
    assert!(!a.detach("drop").unwrap());
    b.attach(tracing_channel("keep", trace())).unwrap();

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    assert_eq!(*a_log.lock().unwrap(), ["init:keep", "handshake:keep"]);
    assert!(a.channel("drop").is_none());
}

#[tokio::test]
async fn reserved_and_duplicate_names_are_rejected() {
    common::init_tracing();
    let (a, _b) = common::session_pair();

    match a.attach(Channel::new("@init")) {
        Err(ProtocolError::ReservedExtension(name)) => assert_eq!(name, "@init"),
        other => panic!("expected ReservedExtension, got {other:?}"),
    }

    a.attach(Channel::new("twice")).unwrap();
    match a.attach(Channel::new("twice")) {
        Err(ProtocolError::DuplicateExtension { channel }) => assert_eq!(channel, "twice"),
        other => panic!("expected DuplicateExtension, got {other:?}"),
    }
}

#[tokio::test]
async fn message_for_unregistered_channel_destroys_the_session() {
    common::init_tracing();
    let (ta, tb) = MemoryTransport::pair();
    let tb = Arc::new(tb);
    let a = Session::new(Arc::new(ta));
    a.attach(Channel::new("known")).unwrap();
    let mut events = a.subscribe();

    let tb_side = tb.clone();
    let b_side = async move {
        // Declare a superset including a channel the session never attached.
        tb_side
            .open(&[
                "@init".to_string(),
                "ghost".to_string(),
                "known".to_string(),
            ])
            .await
            .unwrap();
        // Satisfy the init agreement so the session comes up.
        let cont = ChannelEnvelope {
            kind: EnvelopeKind::Oneway,
            correlation: 0,
            payload: Frame::Raw(b"continue".to_vec()).encode(),
        };
        tb_side.send("@init", cont.pack()).await.unwrap();
    };

    let (ra, ()) = tokio::join!(a.start(None), b_side);
    ra.unwrap();
    assert!(a.is_connected());

    // Poke the channel the session knows nothing about.
    let poke = ChannelEnvelope {
        kind: EnvelopeKind::Oneway,
        correlation: 0,
        payload: Frame::from("boo").encode(),
    };
    tb.send("ghost", poke.pack()).await.unwrap();

    // The session surfaces the failure and tears down.
    let mut saw_error = false;
    let mut saw_closed = false;
    while let Ok(event) = events.recv().await {
        match event {
            SessionEvent::Error { message } => {
                assert!(message.contains("ghost"), "unexpected error: {message}");
                saw_error = true;
            }
            SessionEvent::Closed => {
                saw_closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_error);
    assert!(saw_closed);
    assert!(!a.is_connected());
    assert!(tb.is_destroyed());
}

#[tokio::test(start_paused = true)]
async fn initiator_bootstraps_the_feed_and_peer_follows() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_feeds = trace();
    let b_feeds = trace();
    let log = a_feeds.clone();
    a.attach(Channel::new("data").on_feed(move |_session, dk| {
        let log = log.clone();
        async move {
            record(&log, format!("feed:{dk}"));
            Ok(())
        }
    }))
    .unwrap();
    let log = b_feeds.clone();
    b.attach(Channel::new("data").on_feed(move |_session, dk| {
        let log = log.clone();
        async move {
            record(&log, format!("feed:{dk}"));
            Ok(())
        }
    }))
    .unwrap();

    let dk = DiscoveryKey::new([0x07; 32]);
    let (ra, rb) = tokio::join!(a.start(Some(dk)), b.start(None));
    ra.unwrap();
    rb.unwrap();

    assert!(a.is_initiator());
    assert!(!b.is_initiator());

    // The initiator has its feed before start resolves; identity resolution
    // maps the discovery key straight to the public key.
    let a_feed = a.feed().unwrap();
    assert_eq!(a_feed.public_key().to_bytes(), dk.to_bytes());

    // The other side bootstraps from the announcement shortly after.
    tokio::time::timeout(Duration::from_secs(1), async {
        while b.feed().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer never bootstrapped its feed");
    assert_eq!(b.feed().unwrap().discovery_key(), &dk);

    // Both sides observed the announcement through their feed hooks.
    tokio::time::timeout(Duration::from_secs(1), async {
        while a_feeds.lock().unwrap().is_empty() || b_feeds.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("feed hooks never ran");
    assert_eq!(*b_feeds.lock().unwrap(), [format!("feed:{dk}")]);
}

#[tokio::test]
async fn failing_key_resolution_destroys_the_initiator() {
    common::init_tracing();
    let config_a = SessionConfig {
        resolve_key: SessionConfig::resolver(|_dk| async move {
            Err("no such key in the registry".into())
        }),
        ..SessionConfig::default()
    };
    let (a, b) = common::session_pair_with(config_a, SessionConfig::default());

    let dk = DiscoveryKey::new([0x21; 32]);
    let (ra, rb) = tokio::join!(a.start(Some(dk)), b.start(None));

    match ra {
        Err(ProtocolError::ConnectionInvalid(message)) => {
            assert!(message.contains("no such key"), "unexpected: {message}");
        }
        other => panic!("expected ConnectionInvalid, got {other:?}"),
    }
    // The peer came up fine and then observes the teardown.
    rb.unwrap();
    assert!(a.feed().is_none());
    assert!(!a.is_connected());
}

#[tokio::test]
async fn custom_resolver_maps_discovery_key_to_public_key() {
    common::init_tracing();
    let config_a = SessionConfig {
        resolve_key: SessionConfig::resolver(|_dk| async move { Ok(FeedKey::new([0xEE; 32])) }),
        ..SessionConfig::default()
    };
    let (a, b) = common::session_pair_with(config_a, SessionConfig::default());

    let (ra, rb) = tokio::join!(a.start(Some(DiscoveryKey::new([0x33; 32]))), b.start(None));
    ra.unwrap();
    rb.unwrap();

    assert_eq!(a.feed().unwrap().public_key().to_bytes(), [0xEE; 32]);
}

#[tokio::test]
async fn close_runs_close_hooks_and_emits_closed() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_log = trace();
    let log = a_log.clone();
    a.attach(Channel::new("tidy").on_close(move |_session| {
        let log = log.clone();
        async move {
            record(&log, "close:tidy");
            Ok(())
        }
    }))
    .unwrap();
    b.attach(Channel::new("tidy")).unwrap();

    let mut events = a.subscribe();
    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    a.close().await;
    assert!(!a.is_connected());
    assert_eq!(*a_log.lock().unwrap(), ["close:tidy"]);

    let mut saw_closed = false;
    while let Ok(event) = events.recv().await {
        if matches!(event, SessionEvent::Closed) {
            saw_closed = true;
            break;
        }
    }
    assert!(saw_closed);
}

#[tokio::test]
async fn teardown_is_best_effort_across_failing_close_hooks() {
    common::init_tracing();
    let (a, b) = common::session_pair();

    let a_log = trace();
    let log = a_log.clone();
    a.attach(Channel::new("first").on_close(move |_session| {
        let log = log.clone();
        async move {
            record(&log, "close:first");
            Err("cleanup failed".into())
        }
    }))
    .unwrap();
    let log = a_log.clone();
    a.attach(Channel::new("second").on_close(move |_session| {
        let log = log.clone();
        async move {
            record(&log, "close:second");
            Ok(())
        }
    }))
    .unwrap();
    b.attach(Channel::new("first")).unwrap();
    b.attach(Channel::new("second")).unwrap();

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    a.close().await;

    // The failing hook did not prevent the second channel from closing.
    assert_eq!(*a_log.lock().unwrap(), ["close:first", "close:second"]);
}

#[tokio::test]
async fn stats_count_traffic_in_both_directions() {
    common::init_tracing();
    let (a, b) = common::session_pair();
    a.attach(Channel::new("buffer")).unwrap();
    b.attach(
        Channel::new("buffer")
            .on_message(|_session, _frame| async move { Ok(Frame::from("reply")) }),
    )
    .unwrap();

    let (ra, rb) = tokio::join!(a.start(None), b.start(None));
    ra.unwrap();
    rb.unwrap();

    let handle = a.channel("buffer").unwrap();
    handle.send("question").await.unwrap();

    let a_stats = a.stats();
    // At least the init continue and the request went out; at least the
    // remote continue and the response came in.
    assert!(a_stats.tx_messages >= 2, "stats: {a_stats:?}");
    assert!(a_stats.rx_messages >= 2, "stats: {a_stats:?}");
    assert!(a_stats.tx_bytes > 0);
    assert!(a_stats.rx_bytes > 0);
}
