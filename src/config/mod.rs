//! Startup configuration.
//!
//! The encryption key is validated once, at construction time. A missing or
//! malformed key is a fatal startup error, never a per-call error.

use crate::error::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Environment variable holding the 64-hex-character master key.
pub const ENCRYPTION_KEY_ENV: &str = "BROKER_AUTH_ENCRYPTION_KEY";

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Validated 32-byte AES-256 key.
///
/// Parsed from a 64-hex-character string. Key material is never printed;
/// the `Debug` impl is redacted.
#[derive(Clone)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    /// Parses and validates a hex-encoded key.
    pub fn from_hex(hex_key: &str) -> Result<Self, ConfigError> {
        if hex_key.len() != KEY_SIZE * 2 {
            return Err(ConfigError::KeyLength(hex_key.len()));
        }

        let bytes = hex::decode(hex_key).map_err(|_| ConfigError::KeyEncoding)?;

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Reads the key from `BROKER_AUTH_ENCRYPTION_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var(ENCRYPTION_KEY_ENV)
            .map_err(|_| ConfigError::MissingKey(ENCRYPTION_KEY_ENV))?;
        Self::from_hex(raw.trim())
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(..)")
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Timeout for outbound provider requests (seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// How long a pending authorization state remains valid (seconds)
    #[serde(default = "default_state_ttl_secs")]
    pub state_ttl_secs: i64,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_state_ttl_secs() -> i64 {
    300
}

impl ServiceConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            http_timeout_secs: default_http_timeout_secs(),
            state_ttl_secs: default_state_ttl_secs(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry policy for transient refresh failures
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt (total attempts = max_retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

impl RetryConfig {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ServiceConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: ServiceConfig = toml::from_str(&contents)?;
    Ok(config)
}
