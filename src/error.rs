//! Error taxonomy for the broker OAuth subsystem.
//!
//! Every failure is a typed variant carrying structured context so callers
//! can handle the full set exhaustively. `ConfigError` is startup-only;
//! `AuthError` covers everything after construction.

use std::fmt;
use thiserror::Error;

/// Fatal startup errors. Raised once, at construction time, never per call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("encryption key not found: set the {0} environment variable")]
    MissingKey(&'static str),

    #[error("encryption key must be 64 hex characters (32 bytes), got {0} characters")]
    KeyLength(usize),

    #[error("encryption key is not valid hex")]
    KeyEncoding,

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Why a received authorization state was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateRejection {
    /// The session holds no pending authorization attempt.
    NotFound,
    /// The received state differs from the pending one (possible CSRF).
    Mismatch,
    /// The pending attempt outlived its TTL.
    Expired,
}

impl fmt::Display for StateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateRejection::NotFound => write!(f, "no pending authorization state"),
            StateRejection::Mismatch => write!(f, "state mismatch (possible CSRF)"),
            StateRejection::Expired => write!(f, "authorization state expired"),
        }
    }
}

/// Runtime errors across the authorization, exchange and refresh flows.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("broker '{provider}' does not support OAuth authorization")]
    UnsupportedBroker { provider: String },

    #[error("missing user id")]
    MissingUser,

    #[error("authorization state rejected: {reason}")]
    SessionState { reason: StateRejection },

    #[error("token exchange with '{provider}' failed: {reason}")]
    ProviderExchange { provider: String, reason: String },

    /// Refresh rejected with a 4xx. The stored record has been invalidated;
    /// only a fresh authorization flow restores validity.
    #[error("refresh rejected by '{provider}' ({code}): re-authorization required")]
    PermanentAuth { provider: String, code: String },

    /// Refresh exhausted its retry budget on 5xx/network failures. The
    /// stored record remains valid; callers may retry later.
    #[error("token refresh for '{provider}' failed after {retries} retries: {reason}")]
    TransientAuth {
        provider: String,
        retries: u32,
        reason: String,
    },

    #[error("token encryption failed")]
    Encryption,

    #[error("token decryption failed: possible tampering or corruption")]
    Decryption,

    #[error("no stored refresh token for user '{user_id}' on '{provider}'")]
    RefreshTokenNotFound { provider: String, user_id: String },

    #[error("token store error: {0}")]
    Store(String),
}

impl AuthError {
    pub(crate) fn session_state(reason: StateRejection) -> Self {
        AuthError::SessionState { reason }
    }

    pub(crate) fn unsupported_broker(provider: &str) -> Self {
        AuthError::UnsupportedBroker {
            provider: provider.to_string(),
        }
    }
}

impl From<rusqlite::Error> for AuthError {
    fn from(err: rusqlite::Error) -> Self {
        AuthError::Store(err.to_string())
    }
}
