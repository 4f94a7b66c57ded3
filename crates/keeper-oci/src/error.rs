//! Registry error taxonomy.
//!
//! Absence (HTTP 404) is never an error: lookups return `Ok(None)` or
//! `Ok(false)`. Rate limiting is the only retryable condition.

use std::time::Duration;

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("rate limited by {registry}")]
    RateLimited {
        registry: String,
        retry_after: Option<Duration>,
    },

    #[error("unauthorized at {registry}: {message}")]
    Unauthorized { registry: String, message: String },

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("digest mismatch for {reference}: expected {expected}, got {actual}")]
    DigestMismatch {
        reference: String,
        expected: String,
        actual: String,
    },
}

impl RegistryError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RegistryError::RateLimited { .. })
    }

    /// Server-suggested delay for a rate-limited call.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RegistryError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
