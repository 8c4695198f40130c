//! # whisper-protocol
//!
//! Wire protocol definitions for the Whisper chat hub.
//!
//! Every server-to-client frame is one JSON object of the form
//! `{"type": ..., "payload": ...}`. Clients send raw chat text, which the
//! server wraps into a `chat` event on their behalf.
//!
//! ## Event Types
//!
//! - `chat` - A chat line with its author and creation time
//! - `join` / `leave` - A user connected or disconnected
//! - `users` - The current online roster
//!
//! ## Example
//!
//! ```rust
//! use whisper_protocol::{codec, Event};
//!
//! let event = Event::join("alice");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod handshake;

pub use codec::{decode, encode, ProtocolError, MAX_FRAME_SIZE};
pub use events::{ChatPayload, Event, EventKind, PresencePayload};
pub use handshake::{parse_access_token, HandshakeError, ACCESS_TOKEN_SCHEME};
