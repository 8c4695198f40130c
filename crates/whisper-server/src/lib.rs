//! # whisper-server
//!
//! HTTP surface of the Whisper chat hub: configuration, the upgrade-time
//! auth gate, SQLite-backed history and the axum routes that hand admitted
//! sockets to the hub.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod metrics;
pub mod store;

pub use auth::{
    AuthError, Authenticator, Claims, JwtAuthenticator, MemorySessionStore, SessionStore,
};
pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
pub use store::SqliteMessageStore;
