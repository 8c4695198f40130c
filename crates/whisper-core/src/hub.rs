//! The broadcast hub.
//!
//! One task owns the membership set. Registrations, deregistrations and
//! broadcasts share a single FIFO command queue and are applied one at a
//! time, so every roster it computes matches the members that will
//! receive it, and each connection's commands take effect in the order it
//! sent them.
//!
//! ```text
//!  Connection ──register──▶ ┌───────┐ ──try_send──▶ outbound queue (per member)
//!  Connection ──submit────▶ │  Hub  │
//!  Connection ──deregister▶ └───┬───┘
//!                               │ spawn (chat only)
//!                               ▼
//!                            History
//! ```

use crate::history::History;
use crate::message::{Identity, NewMessage};
use crate::metrics;
use crate::roster::{Member, Membership};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use whisper_protocol::{codec, Event};
use whisper_transport::ConnectionId;

/// Hub errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub task has stopped, either by shutdown or after a fault.
    #[error("Hub is unavailable")]
    Unavailable,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the command queue.
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

struct Registration {
    id: ConnectionId,
    identity: Identity,
    outbound: mpsc::Sender<Bytes>,
}

enum Submission {
    Event(Event),
    Encoded(Bytes),
}

enum Command {
    Register(Registration),
    Unregister(ConnectionId),
    Submit(Submission),
}

/// Work queued behind the broadcast in progress.
enum Outgoing {
    Event(Event),
    // Computed when popped so it reflects every eviction before it.
    Roster,
}

/// Cloneable handle for talking to a running hub.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    available: Arc<AtomicBool>,
}

impl HubHandle {
    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Unavailable)
    }

    /// Admit a connection. Broadcasts sent after this call include it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the hub has stopped.
    pub async fn register(
        &self,
        id: ConnectionId,
        identity: Identity,
        outbound: mpsc::Sender<Bytes>,
    ) -> Result<(), HubError> {
        self.send(Command::Register(Registration {
            id,
            identity,
            outbound,
        }))
        .await
    }

    /// Remove a connection. Removing one that is already gone is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the hub has stopped.
    pub async fn deregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(Command::Unregister(id)).await
    }

    /// Broadcast an event to every member.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the hub has stopped.
    pub async fn submit(&self, event: Event) -> Result<(), HubError> {
        self.send(Command::Submit(Submission::Event(event))).await
    }

    /// Broadcast an already-encoded event.
    ///
    /// The hub decodes it first; frames that fail to decode are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unavailable`] if the hub has stopped.
    pub async fn submit_encoded(&self, frame: Bytes) -> Result<(), HubError> {
        self.send(Command::Submit(Submission::Encoded(frame))).await
    }

    /// Ask the hub to close every member and stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Whether the hub task is still running.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }
}

/// The hub task state.
pub struct Hub {
    members: Membership,
    history: Option<History>,
    commands: mpsc::Receiver<Command>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Hub {
    /// Start a hub on the current runtime.
    ///
    /// Chat events are persisted to `history` when one is given. A panic
    /// inside the hub is contained to its task: it is logged, the handle
    /// reports unavailable, and every later call returns
    /// [`HubError::Unavailable`].
    #[must_use]
    pub fn spawn(config: HubConfig, history: Option<History>) -> HubHandle {
        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub = Hub {
            members: Membership::new(),
            history,
            commands: commands_rx,
            shutdown_rx,
        };

        let available = Arc::new(AtomicBool::new(true));
        metrics::set_hub_available(true);
        info!(?config, persist = hub.history.is_some(), "Starting hub");

        let task = tokio::spawn(hub.run());
        tokio::spawn(supervise(task, available.clone()));

        HubHandle {
            commands: commands_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            available,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => break,
                Some(command) = self.commands.recv() => match command {
                    Command::Register(registration) => self.on_register(registration),
                    Command::Unregister(id) => self.on_unregister(&id),
                    Command::Submit(submission) => self.on_submit(submission),
                },
                else => break,
            }
        }

        let closed = self.members.clear();
        metrics::set_roster_size(0);
        info!(closed, "Hub stopped");
    }

    fn on_register(&mut self, registration: Registration) {
        let Registration {
            id,
            identity,
            outbound,
        } = registration;
        let username = identity.username.clone();

        if !self.members.join(id, Member::new(identity, outbound)) {
            return;
        }
        info!(%username, online = self.members.len(), "User connected");

        self.broadcast([Outgoing::Event(Event::join(username)), Outgoing::Roster]);
    }

    fn on_unregister(&mut self, id: &ConnectionId) {
        let Some(member) = self.members.leave(id) else {
            trace!(connection = %id, "Deregistration for unknown connection ignored");
            return;
        };
        info!(username = %member.identity.username, online = self.members.len(), "User disconnected");

        self.broadcast([
            Outgoing::Event(Event::leave(member.identity.username)),
            Outgoing::Roster,
        ]);
    }

    fn on_submit(&mut self, submission: Submission) {
        let event = match submission {
            Submission::Event(event) => event,
            Submission::Encoded(frame) => match codec::decode(&frame) {
                Ok(event) => event,
                Err(e) => {
                    metrics::record_malformed();
                    warn!(error = %e, len = frame.len(), "Dropping malformed submission");
                    return;
                }
            },
        };

        if let Some(chat) = event.as_chat() {
            self.persist(NewMessage::from(chat));
        }

        self.broadcast([Outgoing::Event(event)]);
    }

    fn persist(&self, message: NewMessage) {
        let Some(history) = self.history.clone() else {
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = history.append(message).await {
                metrics::record_persist_failure(e.class());
                error!(error = %e, class = e.class(), "Failed to persist chat message");
            }
        });
    }

    /// Encode and deliver each item in order, followed by the leave and
    /// roster events caused by evictions along the way.
    fn broadcast<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = Outgoing>,
    {
        let mut pending: VecDeque<Outgoing> = items.into_iter().collect();

        while let Some(next) = pending.pop_front() {
            let event = match next {
                Outgoing::Event(event) => event,
                Outgoing::Roster => {
                    let online = self.members.usernames();
                    metrics::set_roster_size(online.len());
                    Event::roster(online)
                }
            };

            let frame = match codec::encode(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, kind = %event.kind(), "Failed to encode event");
                    continue;
                }
            };

            let dropped = self.members.deliver(&frame);
            metrics::record_event(event.kind(), frame.len());
            trace!(kind = %event.kind(), bytes = frame.len(), recipients = self.members.len(), "Broadcast");

            if dropped.is_empty() {
                continue;
            }
            for (id, member) in dropped {
                metrics::record_eviction();
                debug!(connection = %id, username = %member.identity.username, "Member dropped during broadcast");
                pending.push_back(Outgoing::Event(Event::leave(member.identity.username)));
            }
            // A pending roster is computed late enough to cover these.
            if !pending.iter().any(|o| matches!(o, Outgoing::Roster)) {
                pending.push_back(Outgoing::Roster);
            }
        }
    }
}

/// Wait for the hub task and record why it ended.
async fn supervise(task: JoinHandle<()>, available: Arc<AtomicBool>) {
    match task.await {
        Ok(()) => debug!("Hub task finished"),
        Err(e) if e.is_panic() => {
            error!(error = %e, "Hub task panicked, hub unavailable until restart");
        }
        Err(e) => warn!(error = %e, "Hub task cancelled"),
    }
    available.store(false, Ordering::Release);
    metrics::set_hub_available(false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MessageStore, StoreError};
    use crate::memory::MemoryStore;
    use crate::message::{Message, MessageId};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};
    use whisper_protocol::EventKind;

    const WAIT: Duration = Duration::from_secs(1);

    struct Client {
        id: ConnectionId,
        rx: mpsc::Receiver<Bytes>,
    }

    impl Client {
        async fn next(&mut self) -> Event {
            let frame = timeout(WAIT, self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("queue closed");
            codec::decode(&frame).unwrap()
        }

        async fn closed(&mut self) -> bool {
            matches!(timeout(WAIT, self.rx.recv()).await, Ok(None))
        }

        async fn skip(&mut self, n: usize) {
            for _ in 0..n {
                self.next().await;
            }
        }

        fn is_idle(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }
    }

    async fn connect(hub: &HubHandle, id: &str, username: &str, capacity: usize) -> Client {
        let (tx, rx) = mpsc::channel(capacity);
        hub.register(id.into(), Identity::new(1, username), tx)
            .await
            .unwrap();
        Client { id: id.into(), rx }
    }

    fn spawn_hub() -> HubHandle {
        Hub::spawn(HubConfig::default(), None)
    }

    #[tokio::test]
    async fn test_roster_tracks_membership() {
        let hub = spawn_hub();

        let mut a1 = connect(&hub, "c1", "alice", 64).await;
        assert_eq!(a1.next().await, Event::join("alice"));
        assert_eq!(a1.next().await, Event::roster(["alice"]));

        let mut a2 = connect(&hub, "c2", "alice", 64).await;
        assert_eq!(a1.next().await, Event::join("alice"));
        assert_eq!(a1.next().await, Event::roster(["alice"]));
        a2.skip(2).await;

        let mut b = connect(&hub, "c3", "bob", 64).await;
        assert_eq!(b.next().await, Event::join("bob"));
        assert_eq!(b.next().await, Event::roster(["alice", "bob"]));
        a2.skip(2).await;

        hub.deregister(a1.id.clone()).await.unwrap();
        assert_eq!(b.next().await, Event::leave("alice"));
        assert_eq!(b.next().await, Event::roster(["alice", "bob"]));

        hub.deregister(a2.id.clone()).await.unwrap();
        assert_eq!(b.next().await, Event::leave("alice"));
        assert_eq!(b.next().await, Event::roster(["bob"]));
    }

    #[tokio::test]
    async fn test_double_deregister_is_noop() {
        let hub = spawn_hub();
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        let mut bob = connect(&hub, "c2", "bob", 64).await;
        alice.skip(2).await;
        bob.skip(2).await;
        alice.skip(2).await;

        hub.deregister(alice.id.clone()).await.unwrap();
        hub.deregister(alice.id.clone()).await.unwrap();
        hub.submit(Event::chat("still here", 2, "bob", 0)).await.unwrap();

        assert_eq!(bob.next().await, Event::leave("alice"));
        assert_eq!(bob.next().await, Event::roster(["bob"]));
        assert_eq!(bob.next().await.kind(), EventKind::Chat);
        assert!(alice.closed().await);
    }

    #[tokio::test]
    async fn test_commands_apply_in_submission_order() {
        let hub = spawn_hub();
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        let bob = connect(&hub, "c2", "bob", 64).await;
        alice.skip(4).await;

        let last = Event::chat("bye", 2, "bob", 0);
        hub.submit(last.clone()).await.unwrap();
        hub.deregister(bob.id.clone()).await.unwrap();

        assert_eq!(alice.next().await, last);
        assert_eq!(alice.next().await, Event::leave("bob"));
        assert_eq!(alice.next().await, Event::roster(["alice"]));
    }

    #[tokio::test]
    async fn test_chat_reaches_live_members_including_sender() {
        let hub = spawn_hub();
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        let mut bob = connect(&hub, "c2", "bob", 64).await;
        let mut carol = connect(&hub, "c3", "carol", 64).await;
        alice.skip(6).await;
        bob.skip(4).await;
        carol.skip(2).await;

        hub.deregister(carol.id.clone()).await.unwrap();
        alice.skip(2).await;
        bob.skip(2).await;

        let chat = Event::chat("hello", 1, "alice", 1_700_000_000);
        hub.submit(chat.clone()).await.unwrap();

        assert_eq!(alice.next().await, chat);
        assert_eq!(bob.next().await, chat);
        assert!(carol.closed().await);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let hub = spawn_hub();
        let mut fast = connect(&hub, "fast", "fast", 64).await;
        fast.skip(2).await;

        // join + roster fill this queue exactly
        let mut slow = connect(&hub, "slow", "slow", 2).await;
        fast.skip(2).await;

        let chat = Event::chat("hi", 1, "fast", 0);
        hub.submit(chat.clone()).await.unwrap();

        assert_eq!(fast.next().await, chat);
        assert_eq!(fast.next().await, Event::leave("slow"));
        assert_eq!(fast.next().await, Event::roster(["fast"]));

        slow.skip(2).await;
        assert!(slow.closed().await);
    }

    #[tokio::test]
    async fn test_malformed_submission_is_dropped() {
        let hub = spawn_hub();
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        alice.skip(2).await;

        hub.submit_encoded(Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        let good = codec::encode(&Event::chat("ok", 1, "alice", 0)).unwrap();
        hub.submit_encoded(good).await.unwrap();

        assert_eq!(alice.next().await, Event::chat("ok", 1, "alice", 0));
        assert!(alice.is_idle());
    }

    #[tokio::test]
    async fn test_chat_is_persisted() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::spawn(HubConfig::default(), Some(History::new(store.clone())));
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        alice.skip(2).await;

        hub.submit(Event::chat("keep me", 1, "alice", 0)).await.unwrap();
        hub.submit(Event::join("ignored")).await.unwrap();
        alice.skip(2).await;

        timeout(WAIT, async {
            while store.len().await == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stored = store.latest(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "keep me");
    }

    struct RejectingStore;

    #[async_trait]
    impl MessageStore for RejectingStore {
        async fn insert(&self, _: &NewMessage) -> Result<Message, StoreError> {
            Err(StoreError::Rejected("read-only".into()))
        }

        async fn latest(&self, _: usize) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }

        async fn before(&self, _: MessageId, _: usize) -> Result<Vec<Message>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_block_delivery() {
        let hub = Hub::spawn(
            HubConfig::default(),
            Some(History::new(Arc::new(RejectingStore))),
        );
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        alice.skip(2).await;

        let chat = Event::chat("lost but seen", 1, "alice", 0);
        hub.submit(chat.clone()).await.unwrap();
        assert_eq!(alice.next().await, chat);
    }

    #[tokio::test]
    async fn test_shutdown_closes_members() {
        let hub = spawn_hub();
        let mut alice = connect(&hub, "c1", "alice", 64).await;
        alice.skip(2).await;

        hub.shutdown();
        assert!(alice.closed().await);

        timeout(WAIT, async {
            while hub.is_available() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let (tx, _rx) = mpsc::channel(1);
        let err = hub
            .register("late".into(), Identity::new(9, "late"), tx)
            .await
            .unwrap_err();
        assert_eq!(err, HubError::Unavailable);
    }

    #[tokio::test]
    async fn test_supervisor_contains_panic() {
        let available = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(async { panic!("boom") });

        supervise(task, available.clone()).await;
        assert!(!available.load(Ordering::Acquire));
    }
}
