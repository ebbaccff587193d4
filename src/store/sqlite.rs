//! SQLite-backed token store.
//!
//! One row per `(provider, user_id)` pair, envelope fields as columns,
//! timestamps as ISO 8601 strings. Tokens arrive already encrypted.

use super::{TokenRecord, TokenStore};
use crate::crypto::CipherEnvelope;
use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;

/// Encrypted token storage backed by SQLite.
///
/// # Thread Safety
/// The connection is wrapped in a Mutex; SQLite itself runs in serialized
/// mode.
pub struct SqliteTokenStore {
    conn: Mutex<Connection>,
}

impl SqliteTokenStore {
    /// Creates or opens a token store at `db_path` (`:memory:` for tests).
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, AuthError> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY,
                provider TEXT NOT NULL,
                user_id TEXT NOT NULL,
                access_ciphertext TEXT NOT NULL,
                access_iv TEXT NOT NULL,
                access_tag TEXT NOT NULL,
                refresh_ciphertext TEXT NOT NULL,
                refresh_iv TEXT NOT NULL,
                refresh_tag TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                scopes TEXT NOT NULL,
                token_type TEXT NOT NULL,
                is_valid INTEGER NOT NULL,
                last_refresh_error TEXT,
                last_refresh_attempt TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(provider, user_id)
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_provider_user ON oauth_tokens(provider, user_id)",
            [],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Removes a record. Returns true if one existed.
    pub fn delete(&self, provider: &str, user_id: &str) -> Result<bool, AuthError> {
        let rows = self.conn.lock().unwrap().execute(
            "DELETE FROM oauth_tokens WHERE provider = ?1 AND user_id = ?2",
            params![provider, user_id],
        )?;
        Ok(rows > 0)
    }

    /// Lists providers with stored tokens for a user.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<String>, AuthError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT provider FROM oauth_tokens WHERE user_id = ?1 ORDER BY provider")?;

        let providers = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(providers)
    }

    fn record_from_row(row: &Row<'_>) -> Result<TokenRecord, AuthError> {
        let expires_at: String = row.get(6)?;
        let scopes_json: String = row.get(7)?;
        let last_refresh_attempt: Option<String> = row.get(11)?;

        Ok(TokenRecord {
            access_token: CipherEnvelope {
                ciphertext: row.get(0)?,
                iv: row.get(1)?,
                auth_tag: row.get(2)?,
            },
            refresh_token: CipherEnvelope {
                ciphertext: row.get(3)?,
                iv: row.get(4)?,
                auth_tag: row.get(5)?,
            },
            expires_at: parse_timestamp(&expires_at)?,
            scopes: serde_json::from_str(&scopes_json)
                .map_err(|e| AuthError::Store(format!("corrupt scopes column: {}", e)))?,
            token_type: row.get(8)?,
            is_valid: row.get(9)?,
            last_refresh_error: row.get(10)?,
            last_refresh_attempt: last_refresh_attempt
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuthError::Store(format!("corrupt timestamp column: {}", e)))
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
    async fn load(
        &self,
        provider: &str,
        user_id: &str,
    ) -> Result<Option<TokenRecord>, AuthError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT access_ciphertext, access_iv, access_tag,
                   refresh_ciphertext, refresh_iv, refresh_tag,
                   expires_at, scopes, token_type, is_valid,
                   last_refresh_error, last_refresh_attempt
            FROM oauth_tokens
            WHERE provider = ?1 AND user_id = ?2
            "#,
        )?;

        let mut rows = stmt.query(params![provider, user_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(Self::record_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        provider: &str,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<(), AuthError> {
        let scopes = serde_json::to_string(&record.scopes)
            .map_err(|e| AuthError::Store(format!("failed to encode scopes: {}", e)))?;
        let now = Utc::now().to_rfc3339();

        self.conn.lock().unwrap().execute(
            r#"
            INSERT INTO oauth_tokens (
                provider, user_id,
                access_ciphertext, access_iv, access_tag,
                refresh_ciphertext, refresh_iv, refresh_tag,
                expires_at, scopes, token_type, is_valid,
                last_refresh_error, last_refresh_attempt,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
            ON CONFLICT(provider, user_id) DO UPDATE SET
                access_ciphertext = excluded.access_ciphertext,
                access_iv = excluded.access_iv,
                access_tag = excluded.access_tag,
                refresh_ciphertext = excluded.refresh_ciphertext,
                refresh_iv = excluded.refresh_iv,
                refresh_tag = excluded.refresh_tag,
                expires_at = excluded.expires_at,
                scopes = excluded.scopes,
                token_type = excluded.token_type,
                is_valid = excluded.is_valid,
                last_refresh_error = excluded.last_refresh_error,
                last_refresh_attempt = excluded.last_refresh_attempt,
                updated_at = excluded.updated_at
            "#,
            params![
                provider,
                user_id,
                record.access_token.ciphertext,
                record.access_token.iv,
                record.access_token.auth_tag,
                record.refresh_token.ciphertext,
                record.refresh_token.iv,
                record.refresh_token.auth_tag,
                record.expires_at.to_rfc3339(),
                scopes,
                record.token_type,
                record.is_valid,
                record.last_refresh_error,
                record.last_refresh_attempt.map(|dt| dt.to_rfc3339()),
                now,
            ],
        )?;

        Ok(())
    }
}
