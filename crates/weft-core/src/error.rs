//! Wire codec error types.

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("envelope too short: {actual} bytes (minimum {minimum})")]
    EnvelopeTooShort { actual: usize, minimum: usize },

    #[error("envelope length mismatch: header says {expected} payload bytes but got {actual}")]
    EnvelopeLengthMismatch { expected: usize, actual: usize },

    #[error("unknown envelope kind: {0:#06x}")]
    UnknownEnvelopeKind(u16),

    #[error("frame decode error: {0}")]
    FrameDecode(String),

    #[error("unknown frame tag: {0}")]
    UnknownFrameTag(u64),
}
