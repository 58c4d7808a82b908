//! Handle to a bootstrapped data feed.

use weft_core::{DiscoveryKey, FeedKey};

/// A bulk-data channel bound to a resolved public key.
///
/// The feed's own replication protocol lives outside this workspace; this
/// handle only records the binding selected by the session bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    public_key: FeedKey,
    discovery_key: DiscoveryKey,
}

impl Feed {
    pub fn new(public_key: FeedKey, discovery_key: DiscoveryKey) -> Self {
        Self {
            public_key,
            discovery_key,
        }
    }

    #[must_use]
    pub fn public_key(&self) -> &FeedKey {
        &self.public_key
    }

    #[must_use]
    pub fn discovery_key(&self) -> &DiscoveryKey {
        &self.discovery_key
    }
}
