//! Event types for the Whisper protocol.
//!
//! Events are the unit of fan-out. Each one is encoded once per broadcast
//! and the same bytes are handed to every recipient.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Event kind, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Chat,
    Join,
    Leave,
    Roster,
}

impl EventKind {
    /// The `type` tag written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Chat => "chat",
            EventKind::Join => "join",
            EventKind::Leave => "leave",
            EventKind::Roster => "users",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `chat` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// The chat text as the author sent it.
    pub content: String,
    /// Author's user ID.
    pub user_id: i64,
    /// Author's username.
    pub username: String,
    /// Unix seconds at which the server received the line.
    pub created_at: i64,
}

/// Payload of `join` and `leave` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// The user who joined or left.
    pub username: String,
}

/// A protocol event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// A chat line.
    #[serde(rename = "chat")]
    Chat(ChatPayload),

    /// A user connected.
    #[serde(rename = "join")]
    Join(PresencePayload),

    /// A user disconnected.
    #[serde(rename = "leave")]
    Leave(PresencePayload),

    /// Online roster. Order carries no meaning.
    #[serde(rename = "users")]
    Roster(Vec<String>),
}

impl Event {
    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Chat(_) => EventKind::Chat,
            Event::Join(_) => EventKind::Join,
            Event::Leave(_) => EventKind::Leave,
            Event::Roster(_) => EventKind::Roster,
        }
    }

    /// Create a new chat event.
    #[must_use]
    pub fn chat(
        content: impl Into<String>,
        user_id: i64,
        username: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Event::Chat(ChatPayload {
            content: content.into(),
            user_id,
            username: username.into(),
            created_at,
        })
    }

    /// Create a new join event.
    #[must_use]
    pub fn join(username: impl Into<String>) -> Self {
        Event::Join(PresencePayload {
            username: username.into(),
        })
    }

    /// Create a new leave event.
    #[must_use]
    pub fn leave(username: impl Into<String>) -> Self {
        Event::Leave(PresencePayload {
            username: username.into(),
        })
    }

    /// Create a roster event from any collection of usernames.
    ///
    /// Duplicates are collapsed and the result is sorted so that equal
    /// rosters always encode to equal bytes.
    #[must_use]
    pub fn roster<I, S>(usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = usernames.into_iter().map(Into::into).collect();
        Event::Roster(unique.into_iter().collect())
    }

    /// Get the chat payload, if this is a chat event.
    #[must_use]
    pub fn as_chat(&self) -> Option<&ChatPayload> {
        match self {
            Event::Chat(payload) => Some(payload),
            _ => None,
        }
    }
}
