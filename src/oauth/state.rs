//! CSRF state issuance and verification.
//!
//! Each session holds a single pending-state slot. Issuing overwrites the
//! slot; validation is read-only. Only the exchanger clears the slot, and
//! only on a successful exchange.

use crate::error::{AuthError, StateRejection};
use crate::session::{OAuthStateEntry, Session};
use chrono::{Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

/// Bytes of entropy per state token (256 bits, rendered as 64 hex chars)
const STATE_SIZE: usize = 32;

/// Identity carried by a validated state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateContext {
    pub provider: String,
    pub user_id: String,
}

/// CSRF protection for the authorization redirect.
#[derive(Clone)]
pub struct StateValidator {
    ttl: Duration,
}

impl StateValidator {
    /// # Arguments
    /// * `ttl_seconds` - How long a pending state remains valid (default: 300)
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_seconds),
        }
    }

    /// Generates a fresh state and stores it as the session's pending
    /// entry, overwriting any previous attempt (last-writer-wins).
    pub fn issue(&self, provider: &str, user_id: &str, session: &mut Session) -> String {
        let state = generate_state();

        if session.pending_oauth_state.is_some() {
            debug!(provider = %provider, user_id = %user_id, "Overwriting pending authorization state");
        }

        session.pending_oauth_state = Some(OAuthStateEntry {
            state: state.clone(),
            provider: provider.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        });

        state
    }

    /// Checks a received state against the session's pending entry.
    ///
    /// Read-only: the entry is never consumed here. Expiry is strict —
    /// a state is rejected only once its age exceeds the TTL.
    pub fn validate(&self, received: &str, session: &Session) -> Result<StateContext, AuthError> {
        let entry = session
            .pending_oauth_state
            .as_ref()
            .ok_or(AuthError::session_state(StateRejection::NotFound))?;

        if entry.state != received {
            warn!(provider = %entry.provider, "Authorization state mismatch (possible CSRF)");
            return Err(AuthError::session_state(StateRejection::Mismatch));
        }

        if Utc::now() - entry.created_at > self.ttl {
            return Err(AuthError::session_state(StateRejection::Expired));
        }

        Ok(StateContext {
            provider: entry.provider.clone(),
            user_id: entry.user_id.clone(),
        })
    }
}

fn generate_state() -> String {
    let mut bytes = [0u8; STATE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_rejection(result: Result<StateContext, AuthError>, expected: StateRejection) {
        match result {
            Err(AuthError::SessionState { reason }) => assert_eq!(reason, expected),
            other => panic!("expected SessionState({:?}), got {:?}", expected, other),
        }
    }

    #[test]
    fn test_issue_and_validate() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let state = validator.issue("tradier", "user123", &mut session);
        assert_eq!(state.len(), 64);
        assert!(state.chars().all(|c| c.is_ascii_hexdigit()));

        let context = validator.validate(&state, &session).unwrap();
        assert_eq!(context.provider, "tradier");
        assert_eq!(context.user_id, "user123");
    }

    #[test]
    fn test_validate_is_read_only() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let state = validator.issue("tradier", "user123", &mut session);

        // Validation does not consume the entry
        assert!(validator.validate(&state, &session).is_ok());
        assert!(validator.validate(&state, &session).is_ok());
        assert!(session.pending_oauth_state.is_some());
    }

    #[test]
    fn test_no_pending_state() {
        let validator = StateValidator::new(300);
        let session = Session::new();

        expect_rejection(
            validator.validate("anything", &session),
            StateRejection::NotFound,
        );
    }

    #[test]
    fn test_mismatched_state() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        validator.issue("tradier", "user123", &mut session);

        expect_rejection(
            validator.validate("forged_state", &session),
            StateRejection::Mismatch,
        );
        // Rejection leaves the pending entry in place
        assert!(session.pending_oauth_state.is_some());
    }

    #[test]
    fn test_second_issue_overwrites_first() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let first = validator.issue("tradier", "user123", &mut session);
        let second = validator.issue("tradier", "user123", &mut session);

        assert_ne!(first, second);
        expect_rejection(validator.validate(&first, &session), StateRejection::Mismatch);
        assert!(validator.validate(&second, &session).is_ok());
    }

    #[test]
    fn test_expired_state() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let state = validator.issue("tradier", "user123", &mut session);
        session.pending_oauth_state.as_mut().unwrap().created_at =
            Utc::now() - Duration::seconds(301);

        expect_rejection(validator.validate(&state, &session), StateRejection::Expired);
    }

    #[test]
    fn test_state_valid_just_inside_ttl() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let state = validator.issue("tradier", "user123", &mut session);
        session.pending_oauth_state.as_mut().unwrap().created_at =
            Utc::now() - Duration::seconds(299);

        assert!(validator.validate(&state, &session).is_ok());
    }

    #[test]
    fn test_states_are_unique() {
        let validator = StateValidator::new(300);
        let mut session = Session::new();

        let a = validator.issue("tradier", "u", &mut session);
        let b = validator.issue("tradier", "u", &mut session);
        let c = validator.issue("tradier", "u", &mut session);

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }
}
