//! Newtype wrappers for protocol byte-array fields.
//!
//! These types provide type safety, preventing accidental mixing of
//! identifiers that share the same underlying byte representation.

use core::fmt;

/// Helper to write lowercase hex without allocating.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Error returned when constructing a fixed-size key from a wrongly-sized slice.
#[derive(Debug, thiserror::Error)]
#[error("invalid length: expected {expected} bytes, got {actual}")]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

/// An 8-byte random identifier for the local endpoint of a session.
///
/// Used for diagnostics and self-detection only; never interpreted by the
/// remote peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct SessionId(pub(crate) [u8; 8]);

impl SessionId {
    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random session id.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

impl AsRef<[u8]> for SessionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId(")?;
        fmt_hex(&self.0, f)?;
        write!(f, ")")
    }
}

/// A 32-byte discovery key, used to locate the backing key of a feed before
/// the feed exists locally.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct DiscoveryKey(pub(crate) [u8; 32]);

impl DiscoveryKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a random discovery key. Mostly useful in tests and demos.
    pub fn random() -> Self {
        Self(rand::random())
    }

    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl AsRef<[u8]> for DiscoveryKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for DiscoveryKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for DiscoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DiscoveryKey(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// A 32-byte public key backing a data feed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct FeedKey(pub(crate) [u8; 32]);

impl FeedKey {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl AsRef<[u8]> for FeedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for FeedKey {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedKey(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}
