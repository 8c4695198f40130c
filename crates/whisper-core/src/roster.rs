//! Hub membership and the online roster derived from it.
//!
//! [`Membership`] is owned by the hub task alone. Holding a member's
//! outbound sender here is what keeps its queue open: removing the member
//! drops the sender, which is the single close signal its writer sees.

use crate::message::Identity;
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use whisper_protocol::Event;
use whisper_transport::ConnectionId;

/// A registered connection as the hub sees it.
#[derive(Debug)]
pub struct Member {
    /// Who is on the other end.
    pub identity: Identity,
    outbound: mpsc::Sender<Bytes>,
}

impl Member {
    /// Create a member writing into `outbound`.
    #[must_use]
    pub fn new(identity: Identity, outbound: mpsc::Sender<Bytes>) -> Self {
        Self { identity, outbound }
    }
}

/// The live connection set.
#[derive(Debug, Default)]
pub struct Membership {
    members: HashMap<ConnectionId, Member>,
}

impl Membership {
    /// Create an empty membership set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains_key(id)
    }

    /// Add a connection.
    ///
    /// Returns `false` and keeps the existing entry if the ID is taken.
    pub fn join(&mut self, id: ConnectionId, member: Member) -> bool {
        if self.members.contains_key(&id) {
            warn!(connection = %id, "Duplicate registration ignored");
            return false;
        }
        debug!(connection = %id, username = %member.identity.username, "Member joined");
        self.members.insert(id, member);
        true
    }

    /// Remove a connection, closing its queue.
    ///
    /// Returns the removed member, or `None` if it was already gone.
    pub fn leave(&mut self, id: &ConnectionId) -> Option<Member> {
        let member = self.members.remove(id);
        if member.is_some() {
            debug!(connection = %id, "Member left");
        }
        member
    }

    /// Distinct usernames of everyone online, sorted.
    #[must_use]
    pub fn usernames(&self) -> BTreeSet<String> {
        self.members
            .values()
            .map(|m| m.identity.username.clone())
            .collect()
    }

    /// The current roster event.
    #[must_use]
    pub fn roster(&self) -> Event {
        Event::roster(self.usernames())
    }

    /// Enqueue a frame on every member without waiting.
    ///
    /// Members whose queue is full or closed are removed and returned, so
    /// the caller can announce their departure.
    pub fn deliver(&mut self, frame: &Bytes) -> Vec<(ConnectionId, Member)> {
        let mut stalled = Vec::new();

        for (id, member) in &self.members {
            match member.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, username = %member.identity.username, "Outbound queue full, evicting slow consumer");
                    stalled.push(id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Outbound queue closed, dropping member");
                    stalled.push(id.clone());
                }
            }
        }

        stalled
            .into_iter()
            .filter_map(|id| self.members.remove(&id).map(|member| (id, member)))
            .collect()
    }

    /// Remove everyone, closing every queue.
    pub fn clear(&mut self) -> usize {
        let count = self.members.len();
        self.members.clear();
        count
    }
}
