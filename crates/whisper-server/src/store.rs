//! SQLite-backed chat history.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::info;
use whisper_core::message::unix_now;
use whisper_core::{Message, MessageId, MessageStore, NewMessage, StoreError};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content TEXT NOT NULL,
        user_id INTEGER NOT NULL,
        username TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
"#;

// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
const BUSY_CODES: [&str; 4] = ["5", "6", "261", "517"];

/// Database row type for [`Message`].
#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    content: String,
    user_id: i64,
    username: String,
    created_at: i64,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            user_id: row.user_id,
            username: row.username,
            created_at: row.created_at,
        }
    }
}

/// Message log stored in a SQLite database.
#[derive(Clone)]
pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    /// Open a pool on `url` and make sure the messages table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the table
    /// cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await
            .map_err(classify)?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(classify)?;

        info!(url, "Message store ready");
        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn insert(&self, message: &NewMessage) -> Result<Message, StoreError> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO messages (content, user_id, username, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, content, user_id, username, created_at
            "#,
        )
        .bind(&message.content)
        .bind(message.user_id)
        .bind(&message.username)
        .bind(unix_now())
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;

        Ok(row.into())
    }

    async fn latest(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, content, user_id, username, created_at
            FROM messages
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn before(&self, id: MessageId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, content, user_id, username, created_at
            FROM messages
            WHERE id < $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

/// Sort a sqlx error into the retry classes [`StoreError`] knows.
fn classify(err: sqlx::Error) -> StoreError {
    let detail = err.to_string();
    match &err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::WorkerCrashed => {
            StoreError::NotReady(detail)
        }
        sqlx::Error::Database(db)
            if db
                .code()
                .is_some_and(|code| BUSY_CODES.contains(&&*code)) =>
        {
            StoreError::Aborted(detail)
        }
        _ => StoreError::Rejected(detail),
    }
}
