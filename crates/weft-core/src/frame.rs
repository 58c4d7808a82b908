//! Frame codec: the tagged union of message shapes carried by a channel.
//!
//! Every payload crossing a channel (raw bytes, an application-level error,
//! or a structured user message) shares one wire representation: a msgpack
//! array whose first element is the shape tag. This lets arbitrary binary
//! payloads and schema'd payloads travel over the same envelope.

use rmpv::Value;

use crate::error::WireError;

/// Shape tag for an opaque byte payload.
const TAG_RAW: u64 = 0;
/// Shape tag for an application-error payload.
const TAG_FAULT: u64 = 1;
/// Shape tag for a structured user-schema payload.
const TAG_VALUE: u64 = 2;

/// A single channel message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Opaque bytes, delivered unchanged.
    Raw(Vec<u8>),
    /// An application-level failure reported by the remote message handler.
    Fault {
        code: Option<String>,
        message: String,
    },
    /// A structured message under a user-defined schema.
    Value(Value),
}

impl Frame {
    /// Build a fault frame with no code.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::Fault {
            code: None,
            message: message.into(),
        }
    }

    /// The raw bytes of this frame, if it is a `Raw` payload.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Encode to msgpack bytes: `[tag, ...fields]`.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let arr = match self {
            Self::Raw(bytes) => Value::Array(vec![
                Value::from(TAG_RAW),
                Value::Binary(bytes.clone()),
            ]),
            Self::Fault { code, message } => Value::Array(vec![
                Value::from(TAG_FAULT),
                code.as_deref().map_or(Value::Nil, |c| Value::String(c.into())),
                Value::String(message.as_str().into()),
            ]),
            Self::Value(value) => Value::Array(vec![Value::from(TAG_VALUE), value.clone()]),
        };
        let mut buf = Vec::new();
        rmpv::encode::write_value(&mut buf, &arr).expect("msgpack encoding to Vec never fails");
        buf
    }

    /// Decode from msgpack bytes.
    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let value = rmpv::decode::read_value(&mut &data[..])
            .map_err(|e| WireError::FrameDecode(format!("msgpack decode error: {e}")))?;

        let arr = match value {
            Value::Array(a) if !a.is_empty() => a,
            _ => return Err(WireError::FrameDecode("expected non-empty array".into())),
        };

        let tag = arr[0]
            .as_u64()
            .ok_or_else(|| WireError::FrameDecode("expected integer tag".into()))?;

        match tag {
            TAG_RAW => {
                let bytes = match arr.into_iter().nth(1) {
                    Some(Value::Binary(b)) => b,
                    _ => return Err(WireError::FrameDecode("expected binary payload".into())),
                };
                Ok(Self::Raw(bytes))
            }
            TAG_FAULT => {
                if arr.len() != 3 {
                    return Err(WireError::FrameDecode("expected 3-element fault".into()));
                }
                let mut fields = arr.into_iter().skip(1);
                let code = match fields.next() {
                    Some(Value::Nil) => None,
                    Some(Value::String(s)) => Some(
                        s.into_str()
                            .ok_or_else(|| WireError::FrameDecode("invalid utf-8 code".into()))?,
                    ),
                    _ => return Err(WireError::FrameDecode("expected nil or string code".into())),
                };
                let message = match fields.next() {
                    Some(Value::String(s)) => s
                        .into_str()
                        .ok_or_else(|| WireError::FrameDecode("invalid utf-8 message".into()))?,
                    _ => return Err(WireError::FrameDecode("expected string message".into())),
                };
                Ok(Self::Fault { code, message })
            }
            TAG_VALUE => {
                let value = arr
                    .into_iter()
                    .nth(1)
                    .ok_or_else(|| WireError::FrameDecode("expected value payload".into()))?;
                Ok(Self::Value(value))
            }
            other => Err(WireError::UnknownFrameTag(other)),
        }
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Raw(bytes)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self::Raw(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Frame {
    fn from(bytes: &[u8; N]) -> Self {
        Self::Raw(bytes.to_vec())
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Raw(s.as_bytes().to_vec())
    }
}

impl From<String> for Frame {
    fn from(s: String) -> Self {
        Self::Raw(s.into_bytes())
    }
}

impl From<Value> for Frame {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}
