//! Durable chat history.
//!
//! [`MessageStore`] is the seam to whatever database holds the log.
//! [`History`] wraps a store with the retry, deadline and paging rules
//! that every backend shares.

use crate::message::{Message, MessageId, NewMessage};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

/// Page size used when none (or an out-of-range one) is requested.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page a caller may request.
pub const MAX_PAGE_SIZE: usize = 100;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The call did not finish before its deadline.
    #[error("Store operation timed out")]
    Timeout,

    /// The backend has no usable connection right now.
    #[error("Store not ready: {0}")]
    NotReady(String),

    /// The backend rolled the transaction back.
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// The backend refused the operation (constraint violation, bad data).
    #[error("Store rejected operation: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout | StoreError::NotReady(_) | StoreError::Aborted(_)
        )
    }

    /// Short class label for logs and metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        if self.is_transient() {
            "transient"
        } else {
            "permanent"
        }
    }
}

/// A durable, append-only message log.
///
/// Implementations stamp `created_at` themselves at insert time and may
/// return pages in any order; [`History`] normalizes them.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message and return it with its assigned ID and timestamp.
    async fn insert(&self, message: &NewMessage) -> Result<Message, StoreError>;

    /// Up to `limit` of the newest messages.
    async fn latest(&self, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Up to `limit` of the newest messages with an ID below `id`.
    async fn before(&self, id: MessageId, limit: usize) -> Result<Vec<Message>, StoreError>;
}

/// Clamp a requested page size into `(0, MAX_PAGE_SIZE]`.
#[must_use]
pub fn page_size(requested: Option<i64>) -> usize {
    match requested {
        Some(n) if n > 0 && n <= MAX_PAGE_SIZE as i64 => n as usize,
        _ => DEFAULT_PAGE_SIZE,
    }
}

/// Retry and deadline settings.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
    /// Deadline applied to every individual store call.
    pub call_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(100),
            call_deadline: Duration::from_secs(5),
        }
    }
}

/// Chat history backed by a [`MessageStore`].
#[derive(Clone)]
pub struct History {
    store: Arc<dyn MessageStore>,
    policy: RetryPolicy,
}

impl History {
    /// Create a history over a store with the default policy.
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    /// Create a history with a custom policy.
    #[must_use]
    pub fn with_policy(store: Arc<dyn MessageStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Append a message, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// permanent error.
    pub async fn append(&self, message: NewMessage) -> Result<MessageId, StoreError> {
        self.append_within(message, None).await
    }

    /// Append a message under an additional caller deadline.
    ///
    /// Each attempt gets the stricter of the caller deadline and the
    /// policy's per-call deadline. No retry is scheduled past the caller
    /// deadline.
    ///
    /// # Errors
    ///
    /// Same as [`History::append`].
    pub async fn append_within(
        &self,
        message: NewMessage,
        caller_deadline: Option<Instant>,
    ) -> Result<MessageId, StoreError> {
        let mut attempt: u32 = 1;

        loop {
            let result = self
                .bounded(caller_deadline, self.store.insert(&message))
                .await;

            let err = match result {
                Ok(stored) => {
                    debug!(id = stored.id, attempt, "Message stored");
                    return Ok(stored.id);
                }
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.policy.max_attempts {
                return Err(err);
            }

            let backoff = self.policy.backoff_step * attempt;
            if let Some(deadline) = caller_deadline {
                if Instant::now() + backoff >= deadline {
                    return Err(err);
                }
            }

            warn!(attempt, error = %err, backoff_ms = backoff.as_millis() as u64, "Transient store failure, retrying");
            sleep(backoff).await;
            attempt += 1;
        }
    }

    /// The newest page of messages, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store call fails or times out.
    pub async fn recent(&self, limit: Option<i64>) -> Result<Vec<Message>, StoreError> {
        let limit = page_size(limit);
        let page = self.bounded(None, self.store.latest(limit)).await?;
        Ok(chronological(page, limit))
    }

    /// The page of messages just before `id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store call fails or times out.
    pub async fn before(
        &self,
        id: MessageId,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, StoreError> {
        let limit = page_size(limit);
        let page = self.bounded(None, self.store.before(id, limit)).await?;
        Ok(chronological(page, limit))
    }

    async fn bounded<T, F>(&self, caller_deadline: Option<Instant>, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let own = Instant::now() + self.policy.call_deadline;
        let deadline = caller_deadline.map_or(own, |caller| caller.min(own));

        match timeout_at(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

/// Order a page by ID and keep its newest `limit` entries.
fn chronological(mut page: Vec<Message>, limit: usize) -> Vec<Message> {
    page.sort_by_key(|m| m.id);
    if page.len() > limit {
        page.drain(..page.len() - limit);
    }
    page
}
