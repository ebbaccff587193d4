//! Broker OAuth provider configurations.
//!
//! Each supported broker gets a [`ProviderConfig`] describing its endpoint
//! set and client credentials. The registry is static configuration: built
//! once at startup and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OAuth configuration for a single broker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Broker name used as the registry key (e.g. "tradier")
    pub name: String,

    /// OAuth authorization endpoint URL
    pub authorization_url: String,

    /// OAuth token exchange endpoint URL
    pub token_url: String,

    /// Client ID (from environment variable)
    pub client_id: String,

    /// Client secret (from environment variable)
    pub client_secret: String,

    /// Redirect URI registered with the broker
    pub redirect_uri: String,

    /// Required OAuth scopes
    pub scopes: Vec<String>,

    /// Fallback access-token lifetime when the broker omits `expires_in`
    #[serde(default = "default_token_expiry_ms")]
    pub token_expiry_ms: i64,

    /// Whether the broker issues a new refresh token on every refresh
    #[serde(default)]
    pub supports_refresh_token_rotation: bool,
}

fn default_token_expiry_ms() -> i64 {
    86_400_000
}

impl ProviderConfig {
    /// Renders the authorization redirect URL for a given state.
    pub fn build_authorization_url(&self, state: &str) -> String {
        let scopes = self.scopes.join(" ");
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorization_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state)
        )
    }
}

/// Registry of broker provider configurations, keyed by name.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderConfig>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing any existing entry with the same name.
    pub fn register(&mut self, config: ProviderConfig) {
        self.providers.insert(config.name.clone(), config);
    }

    /// Looks up a provider; `None` means the broker has no OAuth support.
    pub fn get(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Builds a registry from the builtin broker table.
    ///
    /// Brokers whose `BROKER_AUTH_{NAME}_CLIENT_ID`, `..._CLIENT_SECRET`
    /// and `..._REDIRECT_URI` environment variables are unset are skipped.
    pub fn from_env() -> Self {
        let mut registry = Self::new();
        for name in BUILTIN_BROKERS {
            if let Some(config) = builtin_provider(name) {
                registry.register(config);
            }
        }
        registry
    }
}

const BUILTIN_BROKERS: &[&str] = &["tradier", "schwab", "tastytrade"];

/// Builtin endpoint table for known brokers, credentials from environment.
fn builtin_provider(name: &str) -> Option<ProviderConfig> {
    let env_prefix = name.to_uppercase();
    let client_id = std::env::var(format!("BROKER_AUTH_{}_CLIENT_ID", env_prefix)).ok()?;
    let client_secret = std::env::var(format!("BROKER_AUTH_{}_CLIENT_SECRET", env_prefix)).ok()?;
    let redirect_uri = std::env::var(format!("BROKER_AUTH_{}_REDIRECT_URI", env_prefix)).ok()?;

    let (authorization_url, token_url, scopes, rotation) = match name {
        "tradier" => (
            "https://api.tradier.com/v1/oauth/authorize",
            "https://api.tradier.com/v1/oauth/accesstoken",
            vec!["read", "trade"],
            false,
        ),
        "schwab" => (
            "https://api.schwabapi.com/v1/oauth/authorize",
            "https://api.schwabapi.com/v1/oauth/token",
            vec!["api"],
            true,
        ),
        "tastytrade" => (
            "https://api.tastyworks.com/oauth/authorize",
            "https://api.tastyworks.com/oauth/token",
            vec!["read", "trade"],
            true,
        ),
        _ => return None,
    };

    Some(ProviderConfig {
        name: name.to_string(),
        authorization_url: authorization_url.to_string(),
        token_url: token_url.to_string(),
        client_id,
        client_secret,
        redirect_uri,
        scopes: scopes.into_iter().map(|s| s.to_string()).collect(),
        token_expiry_ms: default_token_expiry_ms(),
        supports_refresh_token_rotation: rotation,
    })
}
