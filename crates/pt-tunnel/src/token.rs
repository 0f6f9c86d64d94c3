//! Tunnel token decoding
//!
//! A token is the standard-alphabet base64 encoding of a JSON object
//! `{"a": account tag, "s": base64 tunnel secret, "t": tunnel id, "e": endpoint}`.
//! Decoding is pure and never touches session state.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::TunnelError;

/// Reasons a token is rejected
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token is empty")]
    Empty,

    #[error("token is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("token payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("token has no account tag")]
    MissingAccountTag,

    #[error("token secret is not valid base64")]
    InvalidSecret,
}

#[derive(Deserialize)]
struct RawToken {
    #[serde(rename = "a")]
    account_tag: String,
    #[serde(rename = "s")]
    tunnel_secret: String,
    #[serde(rename = "t")]
    tunnel_id: Uuid,
    #[serde(rename = "e", default)]
    endpoint: Option<String>,
}

/// Credentials the engine authenticates with
#[derive(Clone, PartialEq, Eq)]
pub struct TunnelCredentials {
    pub account_tag: String,
    pub tunnel_secret: Vec<u8>,
    pub tunnel_id: Uuid,
    pub endpoint: Option<String>,
}

impl fmt::Debug for TunnelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelCredentials")
            .field("account_tag", &self.account_tag)
            .field("tunnel_secret", &"<redacted>")
            .field("tunnel_id", &self.tunnel_id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Decode a token into credentials
pub fn parse_token(token: &str) -> Result<TunnelCredentials, TokenError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Empty);
    }

    let payload = STANDARD.decode(token)?;
    let raw: RawToken = serde_json::from_slice(&payload)?;

    if raw.account_tag.trim().is_empty() {
        return Err(TokenError::MissingAccountTag);
    }

    let tunnel_secret = STANDARD
        .decode(raw.tunnel_secret.as_bytes())
        .map_err(|_| TokenError::InvalidSecret)?;

    Ok(TunnelCredentials {
        account_tag: raw.account_tag,
        tunnel_secret,
        tunnel_id: raw.tunnel_id,
        endpoint: raw.endpoint.filter(|e| !e.is_empty()),
    })
}

/// Decode a token and return its tunnel identifier
pub fn validate_token(token: &str) -> Result<String, TunnelError> {
    let credentials = parse_token(token)?;
    Ok(credentials.tunnel_id.to_string())
}

#[cfg(test)]
pub(crate) fn encode_token(account_tag: &str, tunnel_id: Uuid, secret: &[u8]) -> String {
    let json = serde_json::json!({
        "a": account_tag,
        "s": STANDARD.encode(secret),
        "t": tunnel_id,
    });
    STANDARD.encode(json.to_string())
}
