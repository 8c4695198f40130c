//! # whisper-core
//!
//! The broadcast hub and everything it coordinates.
//!
//! - **Hub** - Single task owning membership; serializes joins, leaves and broadcasts
//! - **Connection** - Per-party reader/writer pump with keepalive
//! - **Roster** - Membership set and the online-user list derived from it
//! - **History** - Chat persistence with bounded retry, plus paged reads
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  submit   ┌─────────────┐  spawn   ┌─────────────┐
//! │  Connection │──────────▶│     Hub     │─────────▶│   History   │
//! └─────────────┘           └─────────────┘          └─────────────┘
//!        ▲                         │                        │
//!        └──── outbound queue ─────┘                        ▼
//!                                                    MessageStore
//! ```

pub mod connection;
pub mod history;
pub mod hub;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod roster;

pub use connection::{
    CloseReason, Connection, KEEPALIVE_INTERVAL, OUTBOUND_QUEUE_CAPACITY, PEER_IDLE_TIMEOUT,
    WRITE_DEADLINE,
};
pub use history::{page_size, History, MessageStore, RetryPolicy, StoreError};
pub use hub::{Hub, HubConfig, HubError, HubHandle};
pub use memory::MemoryStore;
pub use message::{Identity, Message, MessageId, NewMessage};
pub use roster::{Member, Membership};
