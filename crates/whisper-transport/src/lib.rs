//! # whisper-transport
//!
//! Transport abstraction layer for the Whisper chat hub.
//!
//! A connection is split into two halves that are driven by independent
//! tasks:
//!
//! - **FrameSource** - the read half, yielding chat text and pongs
//! - **FrameSink** - the write half, accepting encoded events, pings and close
//!
//! ```rust,ignore
//! use whisper_transport::{FrameSink, FrameSource, Inbound};
//!
//! async fn echo(mut source: impl FrameSource, mut sink: impl FrameSink) {
//!     while let Ok(Some(Inbound::Text(text))) = source.recv().await {
//!         let _ = sink.send(text.into_bytes().into()).await;
//!     }
//! }
//! ```

pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, FrameSink, FrameSource, Inbound, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{split_socket, WebSocketSink, WebSocketSource};
