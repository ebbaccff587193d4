//! Access token refresh.
//!
//! A refresh drives the record's validity state machine: a successful
//! refresh keeps the record VALID with rotated tokens; a permanent (4xx)
//! failure moves it to INVALID, where only a fresh exchange can bring it
//! back. Transient failures (5xx, network) are retried with exponential
//! backoff and never invalidate the record.
//!
//! Concurrent refreshes for the same `(provider, user_id)` are not
//! serialized here; callers that may race should coalesce externally.

use super::exchange::{expires_at_from, TokenErrorResponse, TokenResponse};
use crate::config::RetryConfig;
use crate::crypto::TokenCipher;
use crate::error::AuthError;
use crate::provider::{ProviderConfig, ProviderRegistry};
use crate::store::{TokenRecord, TokenStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One refresh attempt's failure, classified by recoverability.
enum RefreshFailure {
    /// 4xx from the token endpoint. Never retried.
    Permanent { code: String },
    /// 5xx or transport failure. Retried within the budget.
    Transient { reason: String },
}

/// Keeps stored token records usable past access-token expiry.
pub struct TokenRefresher {
    registry: Arc<ProviderRegistry>,
    cipher: Arc<TokenCipher>,
    store: Arc<dyn TokenStore>,
    http: reqwest::Client,
    retry: RetryConfig,
}

impl TokenRefresher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cipher: Arc<TokenCipher>,
        store: Arc<dyn TokenStore>,
        http: reqwest::Client,
        retry: RetryConfig,
    ) -> Self {
        Self {
            registry,
            cipher,
            store,
            http,
            retry,
        }
    }

    /// Refreshes the stored record for `(provider, user_id)`.
    ///
    /// On success the record is re-encrypted, persisted and returned. A
    /// 4xx rejection invalidates the record immediately (zero retries);
    /// 5xx and network failures are retried up to the configured budget.
    /// A decryption failure of the stored refresh token is fatal and
    /// propagates untouched.
    pub async fn refresh(&self, provider: &str, user_id: &str) -> Result<TokenRecord, AuthError> {
        if user_id.trim().is_empty() {
            return Err(AuthError::MissingUser);
        }

        let config = self
            .registry
            .get(provider)
            .ok_or_else(|| AuthError::unsupported_broker(provider))?;

        let mut record = self.store.load(provider, user_id).await?.ok_or_else(|| {
            AuthError::RefreshTokenNotFound {
                provider: provider.to_string(),
                user_id: user_id.to_string(),
            }
        })?;

        // Fatal on integrity failure, never retried
        let refresh_token = self.cipher.decrypt(&record.refresh_token)?;

        let mut last_transient = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                let delay = self.retry.backoff_delay(attempt - 1);
                debug!(
                    provider = %provider,
                    user_id = %user_id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before refresh retry"
                );
                tokio::time::sleep(delay).await;
            }

            match self.request_refresh(config, &refresh_token).await {
                Ok(token) => {
                    return self
                        .apply_refreshed_tokens(config, user_id, record, token, &refresh_token)
                        .await;
                }
                Err(RefreshFailure::Permanent { code }) => {
                    warn!(
                        provider = %provider,
                        user_id = %user_id,
                        code = %code,
                        "Refresh rejected permanently, invalidating stored tokens"
                    );

                    record.is_valid = false;
                    record.last_refresh_error = Some(code.clone());
                    record.last_refresh_attempt = Some(Utc::now());
                    self.persist_bookkeeping(provider, user_id, &record).await;

                    return Err(AuthError::PermanentAuth {
                        provider: provider.to_string(),
                        code,
                    });
                }
                Err(RefreshFailure::Transient { reason }) => {
                    warn!(
                        provider = %provider,
                        user_id = %user_id,
                        attempt = attempt + 1,
                        error = %reason,
                        "Transient refresh failure"
                    );
                    last_transient = reason;
                }
            }
        }

        // Exhausted: attempt bookkeeping only, validity unchanged
        record.last_refresh_attempt = Some(Utc::now());
        self.persist_bookkeeping(provider, user_id, &record).await;

        Err(AuthError::TransientAuth {
            provider: provider.to_string(),
            retries: self.retry.max_retries,
            reason: last_transient,
        })
    }

    /// One network round trip to the token endpoint.
    async fn request_refresh(
        &self,
        config: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse, RefreshFailure> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
        ];

        let response = match self
            .http
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Err(RefreshFailure::Transient {
                    reason: e.to_string(),
                })
            }
        };

        let status = response.status();

        if status.is_success() {
            return response.json().await.map_err(|e| RefreshFailure::Transient {
                reason: format!("failed to parse token response: {}", e),
            });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());

        if status.is_client_error() {
            let code = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| format!("http_{}", status.as_u16()));
            Err(RefreshFailure::Permanent { code })
        } else {
            Err(RefreshFailure::Transient {
                reason: format!("HTTP {}: {}", status, body),
            })
        }
    }

    async fn apply_refreshed_tokens(
        &self,
        config: &ProviderConfig,
        user_id: &str,
        mut record: TokenRecord,
        token: TokenResponse,
        previous_refresh_token: &str,
    ) -> Result<TokenRecord, AuthError> {
        // Rotation: only accept a new refresh token when the broker
        // actually rotates; otherwise re-encrypt the previous one unchanged
        let rotated = if config.supports_refresh_token_rotation {
            token.refresh_token.as_deref()
        } else {
            None
        };
        let refresh_plaintext = rotated.unwrap_or(previous_refresh_token);

        record.access_token = self.cipher.encrypt(&token.access_token)?;
        record.refresh_token = self.cipher.encrypt(refresh_plaintext)?;
        record.expires_at = expires_at_from(token.expires_in, config.token_expiry_ms);
        record.is_valid = true;
        record.last_refresh_error = None;
        record.last_refresh_attempt = Some(Utc::now());

        self.store.save(&config.name, user_id, &record).await?;

        info!(
            provider = %config.name,
            user_id = %user_id,
            rotated = rotated.is_some(),
            expires_at = %record.expires_at,
            "Access token refreshed"
        );

        Ok(record)
    }

    /// Best-effort persistence of failure bookkeeping. A store failure is
    /// logged and must not mask the refresh failure itself.
    async fn persist_bookkeeping(&self, provider: &str, user_id: &str, record: &TokenRecord) {
        if let Err(e) = self.store.save(provider, user_id, record).await {
            warn!(
                provider = %provider,
                user_id = %user_id,
                error = %e,
                "Failed to persist refresh bookkeeping"
            );
        }
    }
}
