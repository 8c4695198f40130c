//! Shared fixtures for Whisper benchmarks.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use whisper_core::{HubHandle, Identity, Member, Membership};
use whisper_protocol::Event;

/// A chat event of roughly `size` content bytes.
#[must_use]
pub fn chat_event(size: usize) -> Event {
    Event::chat("x".repeat(size), 1, "bench", 1_700_000_000)
}

/// A membership set of `count` members with their queue receivers.
///
/// Usernames repeat every 10 members so roster de-duplication has work
/// to do.
#[must_use]
pub fn membership(count: usize, capacity: usize) -> (Membership, Vec<mpsc::Receiver<Bytes>>) {
    let mut members = Membership::new();
    let mut receivers = Vec::with_capacity(count);

    for i in 0..count {
        let (tx, rx) = mpsc::channel(capacity);
        let identity = Identity::new(i as i64, format!("user-{}", i % (count / 10).max(1)));
        members.join(format!("conn-{i}").into(), Member::new(identity, tx));
        receivers.push(rx);
    }

    (members, receivers)
}

/// Register `count` members with a running hub, each drained by a task.
///
/// Member `i` sees a join and a roster for itself and every member after
/// it, so its task stops after those plus `broadcasts` more frames, or
/// when its queue closes. Each task reports how many frames it saw.
///
/// # Panics
///
/// Panics if the hub refuses a registration.
pub async fn attach(hub: &HubHandle, count: usize, broadcasts: usize) -> Vec<JoinHandle<usize>> {
    let mut drains = Vec::with_capacity(count);

    for i in 0..count {
        let (tx, mut rx) = mpsc::channel(whisper_core::OUTBOUND_QUEUE_CAPACITY);
        hub.register(
            format!("bench-{i}").into(),
            Identity::new(i as i64, format!("user-{i}")),
            tx,
        )
        .await
        .expect("hub refused registration");

        drains.push(tokio::spawn(async move {
            let expect = 2 * (count - i) + broadcasts;
            let mut seen = 0;
            while seen < expect && rx.recv().await.is_some() {
                seen += 1;
            }
            seen
        }));
    }

    drains
}
