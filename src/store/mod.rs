//! Encrypted token persistence.
//!
//! The store is a seam: this subsystem only needs keyed load/save of
//! [`TokenRecord`]s. Tokens cross the boundary already encrypted — the
//! store never sees plaintext.

use crate::crypto::CipherEnvelope;
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod sqlite;

pub use sqlite::SqliteTokenStore;

/// Stored credential set for one `(provider, user_id)` pair.
///
/// Created by a successful exchange, mutated in place by every refresh
/// attempt. Never deleted by this subsystem: `is_valid = false` marks a
/// record that must not authorize broker calls until a fresh exchange.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: CipherEnvelope,
    pub refresh_token: CipherEnvelope,
    /// When the access token expires (UTC)
    pub expires_at: DateTime<Utc>,
    /// Granted scopes, in the order the broker reported them
    pub scopes: Vec<String>,
    pub token_type: String,
    /// False after a permanent refresh failure; only a new exchange
    /// restores validity
    pub is_valid: bool,
    pub last_refresh_error: Option<String>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
}

/// Keyed persistence for token records.
///
/// Implementations guarantee atomic single-record writes; nothing more is
/// assumed.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, provider: &str, user_id: &str)
        -> Result<Option<TokenRecord>, AuthError>;

    async fn save(
        &self,
        provider: &str,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<(), AuthError>;
}
