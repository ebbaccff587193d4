//! Caller-owned session surface.
//!
//! The authorization flow touches exactly one session field: the single
//! pending-state slot. The slot is last-writer-wins — only the most recent
//! authorization attempt for a session is valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pending authorization attempt for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthStateEntry {
    /// Opaque high-entropy state (64 hex characters, 256 bits)
    pub state: String,
    pub provider: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Session object owned by the caller, read and written in place.
#[derive(Clone, Debug, Default)]
pub struct Session {
    /// The single pending-state slot. Overwritten by each new
    /// authorization attempt, cleared only on a successful exchange.
    pub pending_oauth_state: Option<OAuthStateEntry>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }
}
