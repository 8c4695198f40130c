//! WebSocket transport implementation.
//!
//! Adapts the two halves of an upgraded axum [`WebSocket`] to
//! [`FrameSource`] and [`FrameSink`].

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use whisper_protocol::codec;

use crate::traits::{FrameSink, FrameSource, Inbound, TransportError};
use tracing::{debug, trace, warn};

/// Split an upgraded socket into its read and write halves.
#[must_use]
pub fn split_socket(socket: WebSocket) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (WebSocketSink { sink }, WebSocketSource { stream })
}

/// Write half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

/// Read half of a WebSocket connection.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

/// Turn a pre-encoded event into a text message.
fn text_message(frame: &Bytes) -> Result<Message, TransportError> {
    let text = std::str::from_utf8(frame)
        .map_err(|e| TransportError::SendFailed(format!("frame is not UTF-8: {}", e)))?;
    Ok(Message::Text(text.to_owned()))
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    codec::check_inbound_size(text.len())?;
                    return Ok(Some(Inbound::Text(text)));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Inbound::Text(codec::inbound_text(data)?)));
                }
                Some(Ok(Message::Pong(_))) => return Ok(Some(Inbound::Pong)),
                Some(Ok(Message::Ping(_))) => {
                    // axum queues the pong reply itself
                    trace!("Received ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(reason = ?frame, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let message = text_message(&frame)?;
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
