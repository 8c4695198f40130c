//! Per-connection duplex pump.
//!
//! A connection runs two loops. The reader turns inbound text into chat
//! events for the hub and tracks peer liveness. The writer drains the
//! outbound queue the hub fills and sends keepalive probes. The hub owns
//! the queue's sender, so the queue closing is the writer's only stop
//! signal besides a failed write.

use crate::hub::{HubError, HubHandle};
use crate::message::{unix_now, Identity};
use crate::metrics::ConnectionMetricsGuard;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};
use whisper_protocol::Event;
use whisper_transport::{ConnectionId, FrameSink, FrameSource, Inbound, TransportError};

/// How long a peer may stay silent before it is dropped.
pub const PEER_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Keepalive period, 9/10 of the idle timeout.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(54);

/// Deadline for any single write.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(10);

/// Events that may wait in a connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Why a connection ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The peer closed the transport.
    PeerClosed,
    /// No liveness acknowledgment within [`PEER_IDLE_TIMEOUT`].
    IdleTimeout,
    /// Reading failed, including oversized frames.
    ReadFailed(TransportError),
    /// Writing a frame or probe failed or missed its deadline.
    WriteFailed(TransportError),
    /// The hub dropped this connection (eviction or shutdown).
    QueueClosed,
    /// The hub stopped accepting submissions.
    HubUnavailable,
}

/// One authenticated party's connection.
pub struct Connection<S, R> {
    id: ConnectionId,
    identity: Identity,
    sink: S,
    source: R,
    hub: HubHandle,
}

impl<S, R> Connection<S, R>
where
    S: FrameSink + 'static,
    R: FrameSource,
{
    /// Create a connection over an upgraded transport.
    pub fn new(id: ConnectionId, identity: Identity, sink: S, source: R, hub: HubHandle) -> Self {
        Self {
            id,
            identity,
            sink,
            source,
            hub,
        }
    }

    /// Register with the hub and pump frames until either side stops.
    ///
    /// Deregisters exactly once on the way out and waits (bounded) for
    /// the writer to close the transport.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the hub refused registration.
    pub async fn run(self) -> Result<CloseReason, HubError> {
        let Connection {
            id,
            identity,
            sink,
            mut source,
            hub,
        } = self;

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        hub.register(id.clone(), identity.clone(), outbound_tx).await?;
        let _metrics = ConnectionMetricsGuard::new();
        debug!(connection = %id, username = %identity.username, "Connection registered");

        let mut writer = tokio::spawn(write_loop(sink, outbound_rx));
        let mut writer_done = false;

        let reason = tokio::select! {
            reason = read_loop(&mut source, &identity, &hub) => reason,
            joined = &mut writer => {
                writer_done = true;
                joined.unwrap_or_else(|e| CloseReason::WriteFailed(TransportError::SendFailed(e.to_string())))
            }
        };

        if hub.deregister(id.clone()).await.is_err() {
            trace!(connection = %id, "Hub gone before deregistration");
        }

        if !writer_done {
            let abort = writer.abort_handle();
            if timeout(WRITE_DEADLINE, writer).await.is_err() {
                warn!(connection = %id, "Writer did not drain in time, aborting");
                abort.abort();
            }
        }

        debug!(connection = %id, username = %identity.username, ?reason, "Connection closed");
        Ok(reason)
    }
}

async fn read_loop<R: FrameSource>(
    source: &mut R,
    identity: &Identity,
    hub: &HubHandle,
) -> CloseReason {
    let mut deadline = Instant::now() + PEER_IDLE_TIMEOUT;

    loop {
        let inbound = match timeout_at(deadline, source.recv()).await {
            Ok(Ok(Some(inbound))) => inbound,
            Ok(Ok(None)) => return CloseReason::PeerClosed,
            Ok(Err(e)) => return CloseReason::ReadFailed(e),
            Err(_) => return CloseReason::IdleTimeout,
        };

        match inbound {
            Inbound::Pong => {
                trace!(username = %identity.username, "Pong");
                deadline = Instant::now() + PEER_IDLE_TIMEOUT;
            }
            Inbound::Text(content) => {
                let event = Event::chat(
                    content,
                    identity.user_id,
                    identity.username.clone(),
                    unix_now(),
                );
                if hub.submit(event).await.is_err() {
                    return CloseReason::HubUnavailable;
                }
            }
        }
    }
}

async fn write_loop<S: FrameSink>(mut sink: S, mut outbound: mpsc::Receiver<Bytes>) -> CloseReason {
    let mut keepalive = interval_at(Instant::now() + KEEPALIVE_INTERVAL, KEEPALIVE_INTERVAL);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    break CloseReason::QueueClosed;
                };
                if let Err(e) = within_deadline(sink.send(frame)).await {
                    break CloseReason::WriteFailed(e);
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = within_deadline(sink.ping()).await {
                    break CloseReason::WriteFailed(e);
                }
            }
        }
    };

    if let Err(e) = within_deadline(sink.close()).await {
        trace!(error = %e, "Close frame not delivered");
    }
    reason
}

async fn within_deadline<F>(write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    timeout(WRITE_DEADLINE, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}
