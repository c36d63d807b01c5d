//! Credential dual representation.
//!
//! A user's token (a UUID-shaped secret) and the externally presented API key
//! are two encodings of the same value. The transform is a pure, injective
//! codec rather than a hash so the same key can be resolved from either
//! direction: forward at issuance time (token -> key), reverse at lookup time
//! (key -> token). The cache keys on the API-key form while some storage
//! paths key on the token form.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use uuid::Uuid;

const KEY_PREFIX: &str = "ak_";

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiKeyError {
    #[error("api key is missing the '{KEY_PREFIX}' prefix")]
    MissingPrefix,
    #[error("api key payload is not valid base64url")]
    BadEncoding,
    #[error("api key payload is not a 16-byte token")]
    BadLength,
}

/// Forward direction: token -> externally presented API key.
pub fn api_key_from_token(token: &Uuid) -> String {
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(token.as_bytes()))
}

/// Reverse direction: API key -> token.
pub fn token_from_api_key(key: &str) -> Result<Uuid, ApiKeyError> {
    let payload = key.strip_prefix(KEY_PREFIX).ok_or(ApiKeyError::MissingPrefix)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| ApiKeyError::BadEncoding)?;
    Uuid::from_slice(&bytes).map_err(|_| ApiKeyError::BadLength)
}
