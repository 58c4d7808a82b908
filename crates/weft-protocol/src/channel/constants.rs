//! Channel-layer defaults.

use std::time::Duration;

/// Default deadline for a correlated response. Callers override this
/// per channel via [`Channel::response_timeout`](super::Channel::response_timeout).
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
