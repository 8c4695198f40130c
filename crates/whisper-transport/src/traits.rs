//! Transport abstraction traits for Whisper.
//!
//! These traits define the two halves every transport must provide, so
//! the connection pump can be driven by a real socket or by an in-memory
//! double in tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a process-unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let n = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}", n))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write missed its deadline.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error (oversized or non-text frame).
    #[error("Protocol error: {0}")]
    Protocol(#[from] whisper_protocol::ProtocolError),
}

/// Something read from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A chat line.
    Text(String),
    /// A liveness acknowledgment.
    Pong,
}

/// The read half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next application-level frame.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one pre-encoded event as a single frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Send a liveness probe.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame and shut the write half down.
    async fn close(&mut self) -> Result<(), TransportError>;
}
