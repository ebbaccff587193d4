//! OAuth 2.0 authorization code flow for broker connections.
//!
//! 1. `authorization_url` issues a CSRF state and renders the redirect URL
//! 2. User authorizes on the broker's site
//! 3. Broker redirects back with `code` and `state`
//! 4. `exchange` validates the state, redeems the code and returns an
//!    encrypted [`TokenRecord`](crate::store::TokenRecord) to persist
//! 5. Later, `refresh` keeps the stored record usable past expiry
//!
//! A record whose `is_valid` is false must never authorize an outbound
//! broker call; the user has to re-authorize from step 1.

mod authorize;
mod exchange;
mod refresh;
mod state;

pub use authorize::AuthorizationUrlBuilder;
pub use exchange::TokenExchanger;
pub use refresh::TokenRefresher;
pub use state::{StateContext, StateValidator};

use crate::config::{EncryptionKey, ServiceConfig};
use crate::crypto::TokenCipher;
use crate::error::{AuthError, ConfigError};
use crate::provider::ProviderRegistry;
use crate::session::Session;
use crate::store::{TokenRecord, TokenStore};
use std::sync::Arc;

/// The broker OAuth service: one explicit instance per process, with
/// injected provider registry, token store and encryption key.
///
/// All collaborators are wired at construction; there is no global state,
/// so tests can build isolated instances freely.
pub struct OAuthService {
    url_builder: AuthorizationUrlBuilder,
    exchanger: TokenExchanger,
    refresher: TokenRefresher,
}

impl OAuthService {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn TokenStore>,
        key: &EncryptionKey,
        config: ServiceConfig,
    ) -> Result<Self, ConfigError> {
        let cipher = Arc::new(TokenCipher::new(key));
        let states = StateValidator::new(config.state_ttl_secs);

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            url_builder: AuthorizationUrlBuilder::new(Arc::clone(&registry), states.clone()),
            exchanger: TokenExchanger::new(
                Arc::clone(&registry),
                states,
                Arc::clone(&cipher),
                http.clone(),
            ),
            refresher: TokenRefresher::new(registry, cipher, store, http, config.retry),
        })
    }

    /// Starts an authorization flow: issues a state into the session and
    /// returns the broker redirect URL.
    pub fn authorization_url(
        &self,
        provider: &str,
        user_id: &str,
        session: &mut Session,
    ) -> Result<String, AuthError> {
        self.url_builder.build(provider, user_id, session)
    }

    /// Redeems an authorization code. Returns the encrypted record for the
    /// caller to persist via `TokenStore::save`.
    pub async fn exchange(
        &self,
        provider: &str,
        code: &str,
        state: &str,
        session: &mut Session,
    ) -> Result<TokenRecord, AuthError> {
        self.exchanger.exchange(provider, code, state, session).await
    }

    /// Refreshes the stored record for `(provider, user_id)`, persisting
    /// the outcome.
    pub async fn refresh(&self, provider: &str, user_id: &str) -> Result<TokenRecord, AuthError> {
        self.refresher.refresh(provider, user_id).await
    }
}
