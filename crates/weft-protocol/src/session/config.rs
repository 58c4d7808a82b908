//! Session configuration knobs.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use weft_core::{DiscoveryKey, FeedKey};

use crate::error::BoxError;
use crate::init::DEFAULT_INIT_TIMEOUT;

/// Async resolver mapping a discovery key to the feed's backing public key.
pub type KeyResolver =
    Arc<dyn Fn(DiscoveryKey) -> BoxFuture<'static, Result<FeedKey, BoxError>> + Send + Sync>;

/// Tunable session behavior.
///
/// The response deadline for correlated requests is configured per channel
/// (see [`Channel::response_timeout`](crate::channel::Channel::response_timeout));
/// it is deliberately independent from the init timeout.
pub struct SessionConfig {
    /// Bound on waiting for the remote's init signal.
    pub init_timeout: Duration,
    /// Discovery-key-to-public-key resolution used at feed bootstrap.
    pub resolve_key: KeyResolver,
}

impl SessionConfig {
    /// Wrap an async closure as a [`KeyResolver`].
    pub fn resolver<F, Fut>(resolve: F) -> KeyResolver
    where
        F: Fn(DiscoveryKey) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FeedKey, BoxError>> + Send + 'static,
    {
        Arc::new(move |discovery_key| resolve(discovery_key).boxed())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            // Identity resolution: the discovery key already is the public key.
            resolve_key: Self::resolver(|discovery_key| async move {
                Ok(FeedKey::new(discovery_key.to_bytes()))
            }),
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("init_timeout", &self.init_timeout)
            .field("resolve_key", &"<fn>")
            .finish()
    }
}
