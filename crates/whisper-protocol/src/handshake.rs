//! Upgrade handshake parsing.
//!
//! Browsers cannot attach custom headers to a WebSocket upgrade, so the
//! bearer token rides in the sub-protocol field as `access_token|<token>`.

use thiserror::Error;

/// The only accepted sub-protocol scheme.
pub const ACCESS_TOKEN_SCHEME: &str = "access_token";

/// Separator between scheme and token.
const SEPARATOR: char = '|';

/// Handshake errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// No sub-protocol was offered.
    #[error("no token provided")]
    Missing,

    /// The sub-protocol value does not have the `scheme|token` shape.
    #[error("invalid protocol")]
    Malformed,

    /// The scheme is not `access_token`.
    #[error("unsupported protocol scheme: {0}")]
    UnsupportedScheme(String),
}

/// Extract the token from a sub-protocol value.
///
/// The value must be exactly `access_token|<token>` with a non-empty token,
/// no further separators and no whitespace anywhere.
///
/// # Errors
///
/// Returns an error describing why the value was rejected.
pub fn parse_access_token(value: &str) -> Result<&str, HandshakeError> {
    if value.is_empty() {
        return Err(HandshakeError::Missing);
    }
    if value.contains(char::is_whitespace) {
        return Err(HandshakeError::Malformed);
    }

    let (scheme, token) = value
        .split_once(SEPARATOR)
        .ok_or(HandshakeError::Malformed)?;

    if token.is_empty() || token.contains(SEPARATOR) || token.contains(',') {
        return Err(HandshakeError::Malformed);
    }

    if scheme != ACCESS_TOKEN_SCHEME {
        return Err(HandshakeError::UnsupportedScheme(scheme.to_string()));
    }

    Ok(token)
}
