//! Chat message and identity types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use whisper_protocol::ChatPayload;

/// A persisted message identifier, assigned by the store.
pub type MessageId = i64;

/// Current time in unix seconds.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// The authenticated party behind a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User ID.
    pub user_id: i64,
    /// Username.
    pub username: String,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

/// A chat line on its way into the store.
///
/// Carries no timestamp: the store stamps `created_at` when the insert
/// actually succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub content: String,
    pub user_id: i64,
    pub username: String,
}

impl From<&ChatPayload> for NewMessage {
    fn from(payload: &ChatPayload) -> Self {
        Self {
            content: payload.content.clone(),
            user_id: payload.user_id,
            username: payload.username.clone(),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned ID, increasing with insertion order.
    pub id: MessageId,
    pub content: String,
    pub user_id: i64,
    pub username: String,
    /// Unix seconds at which the insert succeeded.
    pub created_at: i64,
}

impl Message {
    /// Materialize a stored message from its insert request.
    #[must_use]
    pub fn stored(id: MessageId, message: &NewMessage, created_at: i64) -> Self {
        Self {
            id,
            content: message.content.clone(),
            user_id: message.user_id,
            username: message.username.clone(),
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisper_protocol::Event;

    #[test]
    fn test_new_message_from_chat() {
        let event = Event::chat("hey", 5, "erin", 100);
        let message = NewMessage::from(event.as_chat().unwrap());

        assert_eq!(message.content, "hey");
        assert_eq!(message.user_id, 5);
        assert_eq!(message.username, "erin");
    }

    #[test]
    fn test_message_json_shape() {
        let new = NewMessage {
            content: "hi".into(),
            user_id: 1,
            username: "a".into(),
        };
        let value = serde_json::to_value(Message::stored(9, &new, 1234)).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["created_at"], 1234);
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2023-11-14, well before any test run
        assert!(unix_now() > 1_700_000_000);
    }
}
