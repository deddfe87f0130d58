//! Wire body encoding.
//!
//! Proxied payloads cross the boundary as a one-byte format code
//! followed by the encoded body, so a handler can decode a request
//! without out-of-band negotiation and reply in the same format.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for wire codec operations.
pub type WireResult<T> = Result<T, WireError>;

/// Errors raised by the wire codec.
#[derive(Error, Debug)]
pub enum WireError {
    /// The body carried no bytes at all.
    #[error("empty wire body")]
    EmptyBody,

    /// The leading format code is not recognized.
    #[error("unknown serialization format code: {0}")]
    UnknownFormat(u8),

    /// Json encode/decode failure.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary encode/decode failure.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
}

/// Serialization format for proxied payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializationFormat {
    /// Human-readable JSON bodies.
    Json,
    /// Compact binary bodies.
    Binary,
}

impl SerializationFormat {
    /// Converts to the on-wire format code.
    pub fn to_code(self) -> u8 {
        match self {
            SerializationFormat::Json => 1,
            SerializationFormat::Binary => 2,
        }
    }

    /// Converts from an on-wire format code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SerializationFormat::Json),
            2 => Some(SerializationFormat::Binary),
            _ => None,
        }
    }
}

impl Default for SerializationFormat {
    fn default() -> Self {
        SerializationFormat::Json
    }
}

/// Encodes a payload into a tagged wire body.
pub fn encode_body<T: Serialize>(format: SerializationFormat, payload: &T) -> WireResult<Vec<u8>> {
    let mut body = vec![format.to_code()];
    match format {
        SerializationFormat::Json => serde_json::to_writer(&mut body, payload)?,
        SerializationFormat::Binary => bincode::serialize_into(&mut body, payload)?,
    }
    Ok(body)
}

/// Decodes a tagged wire body, returning the format it arrived in.
pub fn decode_body<T: DeserializeOwned>(body: &[u8]) -> WireResult<(SerializationFormat, T)> {
    let (code, rest) = body.split_first().ok_or(WireError::EmptyBody)?;
    let format = SerializationFormat::from_code(*code).ok_or(WireError::UnknownFormat(*code))?;
    let payload = match format {
        SerializationFormat::Json => serde_json::from_slice(rest)?,
        SerializationFormat::Binary => bincode::deserialize(rest)?,
    };
    Ok((format, payload))
}
