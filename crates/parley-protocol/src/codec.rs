//! Codec for encoding and decoding Parley events.
//!
//! Events travel as JSON in text frames by default. Clients that ask for
//! it get named-field MessagePack in binary frames instead.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Maximum frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Unknown encoding name.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),
}

/// Frame encoding negotiated for a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    MessagePack,
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// A single encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    /// Size of the frame in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(data) => data.len(),
        }
    }

    /// Check if the frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode an event into a frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(event: &T, encoding: Encoding) -> Result<WireFrame, ProtocolError> {
    let frame = match encoding {
        Encoding::Json => WireFrame::Text(serde_json::to_string(event)?),
        Encoding::MessagePack => WireFrame::Binary(Bytes::from(rmp_serde::to_vec_named(event)?)),
    };

    if frame.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(frame.len()));
    }

    Ok(frame)
}

/// Decode an event from a frame.
///
/// Text frames are read as JSON and binary frames as MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or does not hold a known event.
pub fn decode<T: DeserializeOwned>(frame: &WireFrame) -> Result<T, ProtocolError> {
    match frame {
        WireFrame::Text(text) => decode_text(text),
        WireFrame::Binary(data) => decode_binary(data),
    }
}

/// Decode an event from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_text<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an event from a MessagePack binary frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_binary<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Per-connection codec bound to the negotiated encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventCodec {
    encoding: Encoding,
}

impl EventCodec {
    /// Create a codec for the given encoding.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Encode an event.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode<T: Serialize>(&self, event: &T) -> Result<WireFrame, ProtocolError> {
        encode(event, self.encoding)
    }

    /// Decode an event. Clients may mix frame types, so the frame decides.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode<T: DeserializeOwned>(&self, frame: &WireFrame) -> Result<T, ProtocolError> {
        decode(frame)
    }
}
