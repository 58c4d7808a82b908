//! Shared test support: tracing setup and session-pair plumbing.

use std::sync::Arc;

use weft_protocol::{Session, SessionConfig};
use weft_transport::MemoryTransport;

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` to avoid panicking when called from multiple tests.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Build a session pair over an in-process transport pair.
pub fn session_pair() -> (Session, Session) {
    let (a, b) = MemoryTransport::pair();
    (Session::new(Arc::new(a)), Session::new(Arc::new(b)))
}

/// Build a session pair with explicit configurations.
#[allow(dead_code)]
pub fn session_pair_with(config_a: SessionConfig, config_b: SessionConfig) -> (Session, Session) {
    let (a, b) = MemoryTransport::pair();
    (
        Session::with_config(Arc::new(a), config_a),
        Session::with_config(Arc::new(b), config_b),
    )
}
