//! Codec for encoding and decoding Whisper events.
//!
//! Events travel as one JSON object per WebSocket text frame, so there is
//! no length prefix: the transport already delimits frames.

use bytes::Bytes;
use thiserror::Error;

use crate::events::Event;

/// Maximum size of a frame accepted from a client (512 bytes).
///
/// This is a fixed anti-abuse ceiling, not a tunable.
pub const MAX_FRAME_SIZE: usize = 512;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Inbound frame exceeds the ceiling.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Frame is not valid UTF-8 text.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode an event to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(event: &Event) -> Result<Bytes, ProtocolError> {
    let data = serde_json::to_vec(event).map_err(ProtocolError::Encode)?;
    Ok(Bytes::from(data))
}

/// Decode an event from bytes.
///
/// # Errors
///
/// Returns an error if the data is not a well-formed event envelope.
pub fn decode(data: &[u8]) -> Result<Event, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Check an inbound frame against [`MAX_FRAME_SIZE`].
///
/// # Errors
///
/// Returns [`ProtocolError::FrameTooLarge`] if the frame is over the ceiling.
pub fn check_inbound_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    Ok(())
}

/// Turn a raw inbound frame into chat text.
///
/// # Errors
///
/// Returns an error if the frame is too large or not UTF-8.
pub fn inbound_text(data: Vec<u8>) -> Result<String, ProtocolError> {
    check_inbound_size(data.len())?;
    String::from_utf8(data).map_err(|e| ProtocolError::Invalid(e.to_string()))
}
