//! Upgrade-time authentication.
//!
//! A socket is admitted only after its sub-protocol value parses as
//! `access_token|<token>` and the token verifies. Session tracking is
//! optional: when a [`SessionStore`] is attached, only the most recently
//! activated token of each user is accepted.

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use whisper_core::Identity;
use whisper_protocol::{parse_access_token, HandshakeError};

/// Why a credential was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The sub-protocol value was absent or not `access_token|<token>`.
    #[error("Bad credential envelope: {0}")]
    Handshake(#[from] HandshakeError),

    /// The token failed verification.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The token is past its expiry.
    #[error("Token expired")]
    Expired,

    /// A newer session replaced this token.
    #[error("Session is no longer active")]
    SessionRevoked,
}

/// Resolves a bearer token to the identity it was issued for.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validate a token.
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Tracks the single active token of each user.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Make `token` the user's active session, superseding any other.
    async fn activate(&self, user_id: i64, token: &str);

    /// Whether `token` is the user's active session.
    async fn is_active(&self, user_id: i64, token: &str) -> bool;

    /// End the user's session.
    async fn revoke(&self, user_id: i64);
}

/// Access-token claims. Tokens are minted elsewhere; this is the shape
/// accepted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    pub username: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// HS256 token verifier.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    validation: Validation,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl JwtAuthenticator {
    /// Create an authenticator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            sessions: None,
        }
    }

    /// Only accept tokens that are their user's active session.
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.username.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty username".into()));
        }

        if let Some(sessions) = &self.sessions {
            if !sessions.is_active(claims.user_id, token).await {
                return Err(AuthError::SessionRevoked);
            }
        }

        Ok(Identity::new(claims.user_id, claims.username))
    }
}

/// Process-local session table.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<i64, String>,
}

impl MemorySessionStore {
    /// Create an empty session table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn activate(&self, user_id: i64, token: &str) {
        if self.sessions.insert(user_id, token.to_string()).is_some() {
            debug!(user_id, "Previous session superseded");
        }
    }

    async fn is_active(&self, user_id: i64, token: &str) -> bool {
        self.sessions
            .get(&user_id)
            .is_some_and(|active| active.value() == token)
    }

    async fn revoke(&self, user_id: i64) {
        self.sessions.remove(&user_id);
    }
}

/// Check an offered `Sec-WebSocket-Protocol` value.
///
/// The envelope is parsed before the token is looked at, so a wrong
/// scheme never reaches the authenticator.
///
/// # Errors
///
/// Returns the reason the offer was refused.
pub async fn admit(
    authenticator: &dyn Authenticator,
    offered: Option<&str>,
) -> Result<Identity, AuthError> {
    let offered = offered.ok_or(HandshakeError::Missing)?;
    let token = parse_access_token(offered)?;
    authenticator.validate(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use whisper_core::message::unix_now;

    const SECRET: &str = "test-secret";

    fn alice() -> Identity {
        Identity::new(1, "alice")
    }

    fn sign(secret: &str, user_id: i64, username: &str, ttl: i64) -> String {
        let claims = Claims {
            user_id,
            username: username.into(),
            exp: unix_now() + ttl,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_is_accepted() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = sign(SECRET, 1, "alice", 3600);

        assert_eq!(auth.validate(&token).await.unwrap(), alice());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let token = sign("other", 1, "alice", 3600);

        let err = JwtAuthenticator::new(SECRET)
            .validate(&token)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = sign(SECRET, 1, "alice", -3600);

        assert_eq!(auth.validate(&token).await.unwrap_err(), AuthError::Expired);
    }

    #[tokio::test]
    async fn test_garbage_token_is_rejected() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(matches!(
            auth.validate("not.a.jwt").await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_newer_session_supersedes_older() {
        let sessions = Arc::new(MemorySessionStore::new());
        let auth = JwtAuthenticator::new(SECRET).with_sessions(sessions.clone());

        let first = sign(SECRET, 1, "alice", 60);
        let second = sign(SECRET, 1, "alice", 120);

        sessions.activate(1, &first).await;
        assert!(auth.validate(&first).await.is_ok());

        sessions.activate(1, &second).await;
        assert_eq!(
            auth.validate(&first).await.unwrap_err(),
            AuthError::SessionRevoked
        );
        assert!(auth.validate(&second).await.is_ok());

        sessions.revoke(1).await;
        assert!(auth.validate(&second).await.is_err());
    }

    /// Counts how often validation is attempted.
    struct Counting(AtomicUsize);

    #[async_trait]
    impl Authenticator for Counting {
        async fn validate(&self, _: &str) -> Result<Identity, AuthError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(alice())
        }
    }

    #[tokio::test]
    async fn test_wrong_scheme_never_reaches_authenticator() {
        let auth = Counting(AtomicUsize::new(0));

        let err = admit(&auth, Some("bearer|xyz")).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::Handshake(HandshakeError::UnsupportedScheme("bearer".into()))
        );

        let err = admit(&auth, None).await.unwrap_err();
        assert_eq!(err, AuthError::Handshake(HandshakeError::Missing));

        let err = admit(&auth, Some("access_token")).await.unwrap_err();
        assert_eq!(err, AuthError::Handshake(HandshakeError::Malformed));

        assert_eq!(auth.0.load(Ordering::SeqCst), 0);

        assert_eq!(admit(&auth, Some("access_token|abc")).await.unwrap(), alice());
        assert_eq!(auth.0.load(Ordering::SeqCst), 1);
    }
}
