//! Connection authentication.
//!
//! Tokens are taken from the `Sec-WebSocket-Protocol` header, falling back to
//! a `token` query parameter. Validation is a placeholder for an external
//! identity service: any non-empty token is accepted and used as the user id.

use thiserror::Error;
use url::form_urlencoded;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing or empty token")]
    EmptyToken,
}

/// Where the token was found. Header tokens are echoed back in the handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Header(String),
    Query(String),
}

impl TokenSource {
    pub fn token(&self) -> &str {
        match self {
            TokenSource::Header(t) | TokenSource::Query(t) => t,
        }
    }
}

/// Pick the token from the subprotocol header or the request query string.
pub fn extract_token(protocol_header: Option<&str>, query: Option<&str>) -> Option<TokenSource> {
    if let Some(header) = protocol_header.map(str::trim).filter(|h| !h.is_empty()) {
        return Some(TokenSource::Header(header.to_string()));
    }
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| TokenSource::Query(value.into_owned()))
}

/// Validate a token and return the user id it identifies.
pub fn validate_token(token: &str) -> Result<String, AuthError> {
    if token.is_empty() {
        return Err(AuthError::EmptyToken);
    }
    Ok(token.to_string())
}
