//! Authorization redirect URL construction.

use super::state::StateValidator;
use crate::error::AuthError;
use crate::provider::ProviderRegistry;
use crate::session::Session;
use std::sync::Arc;
use tracing::info;

/// Builds the provider redirect URL that starts an authorization flow.
///
/// Issuing the URL mutates the session: a fresh CSRF state is written to
/// the pending-state slot.
pub struct AuthorizationUrlBuilder {
    registry: Arc<ProviderRegistry>,
    states: StateValidator,
}

impl AuthorizationUrlBuilder {
    pub fn new(registry: Arc<ProviderRegistry>, states: StateValidator) -> Self {
        Self { registry, states }
    }

    /// Renders `GET <authorization_url>?response_type=code&client_id=..&
    /// redirect_uri=..&scope=..&state=..` for the given broker.
    pub fn build(
        &self,
        provider: &str,
        user_id: &str,
        session: &mut Session,
    ) -> Result<String, AuthError> {
        let config = self
            .registry
            .get(provider)
            .ok_or_else(|| AuthError::unsupported_broker(provider))?;

        if user_id.trim().is_empty() {
            return Err(AuthError::MissingUser);
        }

        let state = self.states.issue(provider, user_id, session);
        let url = config.build_authorization_url(&state);

        info!(provider = %provider, user_id = %user_id, "Built authorization redirect URL");

        Ok(url)
    }
}
