//! In-memory message store.
//!
//! Used when no database is configured, and as the backing store in tests.

use crate::history::{MessageStore, StoreError};
use crate::message::{unix_now, Message, MessageId, NewMessage};
use async_trait::async_trait;
use tokio::sync::Mutex;

/// A process-local, append-only message log.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }

    /// Whether the store holds no messages.
    pub async fn is_empty(&self) -> bool {
        self.messages.lock().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn insert(&self, message: &NewMessage) -> Result<Message, StoreError> {
        let mut messages = self.messages.lock().await;
        let id = messages.last().map_or(1, |m| m.id + 1);
        let stored = Message::stored(id, message, unix_now());
        messages.push(stored.clone());
        Ok(stored)
    }

    // Newest first, like a descending index scan.
    async fn latest(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        Ok(messages.iter().rev().take(limit).cloned().collect())
    }

    async fn before(&self, id: MessageId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| m.id < id)
            .take(limit)
            .cloned()
            .collect())
    }
}
