//! Anti-forgery state carried through the provider redirect.

use crate::error::SessionError;
use crate::key::SecretKey;
use crate::seal::{Purpose, seal_for, unseal_for};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The `state` parameter of an authorization request.
///
/// Binds the callback to a login this server started and remembers where
/// the user was headed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiForgeryState {
    /// Path and query of the originally requested URL.
    pub current_url: String,
    pub issued_at: DateTime<Utc>,
}

impl AntiForgeryState {
    #[must_use]
    pub fn new(current_url: impl Into<String>) -> Self {
        Self {
            current_url: current_url.into(),
            issued_at: Utc::now(),
        }
    }

    /// Seals the state into a query parameter value.
    ///
    /// # Panics
    ///
    /// Panics if the state cannot be serialized, which cannot happen for
    /// these plain data fields.
    #[must_use]
    pub fn seal(&self, key: &SecretKey) -> String {
        let payload = serde_json::to_vec(self).expect("serialize anti-forgery state");
        seal_for(Purpose::State, &payload, key)
    }

    /// Opens a state parameter issued no more than `window` ago.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the token does not unseal, does not parse,
    /// or is older than `window`.
    pub fn open(token: &str, key: &SecretKey, window: Duration) -> Result<Self, SessionError> {
        Self::open_at(token, key, window, Utc::now())
    }

    /// Like [`AntiForgeryState::open`], evaluated at `now`.
    ///
    /// # Errors
    ///
    /// See [`AntiForgeryState::open`].
    pub fn open_at(
        token: &str,
        key: &SecretKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        let payload = unseal_for(Purpose::State, token, key)?;
        let state: Self = serde_json::from_slice(&payload)?;
        if state.issued_at + window < now {
            return Err(SessionError::Expired);
        }
        Ok(state)
    }
}
