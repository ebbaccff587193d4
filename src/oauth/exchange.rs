//! Authorization code exchange.
//!
//! Converts a provider authorization code into an encrypted, storable
//! [`TokenRecord`]. The session's pending state is consumed here, and only
//! on success — a provider-rejected code leaves the slot intact so the
//! caller may retry the same flow within the TTL.

use super::state::StateValidator;
use crate::crypto::TokenCipher;
use crate::error::{AuthError, StateRejection};
use crate::provider::{ProviderConfig, ProviderRegistry};
use crate::session::Session;
use crate::store::TokenRecord;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Token endpoint response (standard OAuth 2.0)
#[derive(Deserialize, Debug)]
pub(super) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Space-delimited granted scopes
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Token endpoint error body (RFC 6749 §5.2)
#[derive(Deserialize, Debug)]
pub(super) struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// `expires_in` from the provider, or the configured fallback.
pub(super) fn expires_at_from(expires_in: Option<i64>, fallback_ms: i64) -> DateTime<Utc> {
    match expires_in {
        Some(seconds) => Utc::now() + Duration::seconds(seconds),
        None => Utc::now() + Duration::milliseconds(fallback_ms),
    }
}

pub(super) fn split_scopes(raw: &str) -> Vec<String> {
    raw.split(' ')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Exchanges authorization codes for encrypted token records.
pub struct TokenExchanger {
    registry: Arc<ProviderRegistry>,
    states: StateValidator,
    cipher: Arc<TokenCipher>,
    http: reqwest::Client,
}

impl TokenExchanger {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        states: StateValidator,
        cipher: Arc<TokenCipher>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            registry,
            states,
            cipher,
            http,
        }
    }

    /// Exchanges `code` for tokens and returns the record for the caller
    /// to persist via `TokenStore::save`.
    ///
    /// The pending state is cleared only on success; any state rejection
    /// or provider failure leaves the slot untouched.
    pub async fn exchange(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        session: &mut Session,
    ) -> Result<TokenRecord, AuthError> {
        let context = self.states.validate(state, session)?;

        // The pending attempt must be for the same broker
        if context.provider != provider {
            warn!(
                expected = %context.provider,
                actual = %provider,
                "Authorization state issued for a different broker"
            );
            return Err(AuthError::session_state(StateRejection::Mismatch));
        }

        let config = self
            .registry
            .get(provider)
            .ok_or_else(|| AuthError::unsupported_broker(provider))?;

        debug!(provider = %provider, user_id = %context.user_id, "Exchanging authorization code");

        let token = self.request_tokens(config, code).await?;

        let refresh_token = token.refresh_token.ok_or_else(|| AuthError::ProviderExchange {
            provider: provider.to_string(),
            reason: "provider did not return a refresh token".to_string(),
        })?;

        // Single-use enforcement: consume the pending state now
        session.pending_oauth_state = None;

        let scopes = match token.scope.as_deref() {
            Some(raw) => split_scopes(raw),
            None => config.scopes.clone(),
        };

        let record = TokenRecord {
            access_token: self.cipher.encrypt(&token.access_token)?,
            refresh_token: self.cipher.encrypt(&refresh_token)?,
            expires_at: expires_at_from(token.expires_in, config.token_expiry_ms),
            scopes,
            token_type: token.token_type.unwrap_or_else(|| "Bearer".to_string()),
            is_valid: true,
            last_refresh_error: None,
            last_refresh_attempt: None,
        };

        info!(
            provider = %provider,
            user_id = %context.user_id,
            expires_at = %record.expires_at,
            "Authorization code exchanged"
        );

        Ok(record)
    }

    async fn request_tokens(
        &self,
        config: &ProviderConfig,
        code: &str,
    ) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::ProviderExchange {
                provider: config.name.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());

            // Prefer the provider's error_description, then its error code
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| e.error_description.unwrap_or(e.error))
                .unwrap_or(body);

            return Err(AuthError::ProviderExchange {
                provider: config.name.clone(),
                reason,
            });
        }

        response.json().await.map_err(|e| AuthError::ProviderExchange {
            provider: config.name.clone(),
            reason: format!("failed to parse token response: {}", e),
        })
    }
}
