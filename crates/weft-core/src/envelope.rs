//! Channel envelope packing and unpacking.
//!
//! The envelope is the wire format for all channel-layer messaging. It wraps
//! an encoded frame with a 10-byte header:
//! `kind(u16) || correlation(u32) || length(u32)`, all big-endian, followed
//! by the payload bytes.

use crate::error::WireError;

/// How the payload of an envelope relates to the request/response protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EnvelopeKind {
    /// Fire-and-forget message; no response is expected.
    Oneway = 0x01,
    /// Correlated request; the peer must answer with a `Response`.
    Request = 0x02,
    /// Answer to a previously received `Request` with the same correlation id.
    Response = 0x03,
}

impl EnvelopeKind {
    pub fn from_u16(value: u16) -> Result<Self, WireError> {
        match value {
            0x01 => Ok(Self::Oneway),
            0x02 => Ok(Self::Request),
            0x03 => Ok(Self::Response),
            other => Err(WireError::UnknownEnvelopeKind(other)),
        }
    }
}

/// A channel envelope carrying a correlated, typed message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEnvelope {
    /// Request/response role of this envelope.
    pub kind: EnvelopeKind,
    /// Correlation id tying a response back to its request. Zero for oneway.
    pub correlation: u32,
    /// Encoded frame bytes.
    pub payload: Vec<u8>,
}

impl ChannelEnvelope {
    /// Header overhead in bytes.
    pub const OVERHEAD: usize = 10;

    /// Pack the envelope into its wire format.
    ///
    /// Layout: `kind(2) || correlation(4) || data_length(4) || payload`
    #[must_use]
    pub fn pack(&self) -> Vec<u8> {
        let len = self.payload.len() as u32;
        let mut buf = Vec::with_capacity(Self::OVERHEAD + self.payload.len());
        buf.extend_from_slice(&(self.kind as u16).to_be_bytes());
        buf.extend_from_slice(&self.correlation.to_be_bytes());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        tracing::trace!(
            kind = ?self.kind,
            correlation = self.correlation,
            payload_len = self.payload.len(),
            "packed envelope"
        );

        buf
    }

    /// Unpack an envelope from its wire format.
    pub fn unpack(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < Self::OVERHEAD {
            return Err(WireError::EnvelopeTooShort {
                actual: data.len(),
                minimum: Self::OVERHEAD,
            });
        }

        let kind = EnvelopeKind::from_u16(u16::from_be_bytes([data[0], data[1]]))?;
        let correlation = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);
        let length = u32::from_be_bytes([data[6], data[7], data[8], data[9]]) as usize;

        if data.len() != Self::OVERHEAD + length {
            return Err(WireError::EnvelopeLengthMismatch {
                expected: length,
                actual: data.len() - Self::OVERHEAD,
            });
        }

        let payload = data[Self::OVERHEAD..].to_vec();

        tracing::trace!(
            correlation,
            payload_len = payload.len(),
            "unpacked envelope"
        );

        Ok(Self {
            kind,
            correlation,
            payload,
        })
    }
}
