//! The client-held session.
//!
//! A `Session` lives entirely in a sealed cookie. There is no server-side
//! store, so a session ends only when its absolute expiry passes or the
//! client drops the cookie.

use crate::error::SessionError;
use crate::key::SecretKey;
use crate::seal::{Purpose, seal_for, unseal_for};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Who the user is, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Display name. May be empty when the provider has none.
    pub name: String,
    /// Verified e-mail address.
    pub email: String,
}

impl Identity {
    /// Formats the identity as an RFC 5322 mailbox, e.g. `Jane Doe <jane@example.com>`.
    #[must_use]
    pub fn mailbox(&self) -> String {
        if self.name.trim().is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name.trim(), self.email)
        }
    }

    /// Returns the domain part of the address, if any.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.email.rsplit_once('@').map(|(_, domain)| domain)
    }
}

/// An access credential delegated by the user for calling provider APIs on their behalf.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedCredential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// When the access token stops working. `None` means the provider did not say.
    pub expires_at: Option<DateTime<Utc>>,
}

impl DelegatedCredential {
    /// Returns true if the credential expires within `margin` of `now`.
    #[must_use]
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at - margin <= now)
    }

    /// Returns true if the credential expires within `margin` from now.
    #[must_use]
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        self.needs_refresh_at(Utc::now(), margin)
    }
}

impl std::fmt::Debug for DelegatedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegatedCredential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub credential: DelegatedCredential,
    /// Absolute expiry. Never extended by a credential refresh.
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session expiring `lifetime` from now.
    #[must_use]
    pub fn new(identity: Identity, credential: DelegatedCredential, lifetime: Duration) -> Self {
        Self {
            identity,
            credential,
            expires_at: Utc::now() + lifetime,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Swaps in a refreshed credential.
    ///
    /// Providers often omit the refresh token on refresh; the previous one is
    /// kept in that case. The session expiry is left unchanged.
    pub fn replace_credential(&mut self, mut credential: DelegatedCredential) {
        if credential.refresh_token.is_none() {
            credential.refresh_token = self.credential.refresh_token.take();
        }
        self.credential = credential;
    }

    /// Seals the session into a cookie value.
    ///
    /// # Panics
    ///
    /// Panics if the session cannot be serialized, which cannot happen for
    /// these plain data fields.
    #[must_use]
    pub fn seal(&self, key: &SecretKey) -> String {
        let payload = serde_json::to_vec(self).expect("serialize session");
        seal_for(Purpose::Session, &payload, key)
    }

    /// Opens a session cookie, rejecting it if it has expired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the token does not unseal, does not parse,
    /// or holds an expired session.
    pub fn open(token: &str, key: &SecretKey) -> Result<Self, SessionError> {
        Self::open_at(token, key, Utc::now())
    }

    /// Like [`Session::open`], evaluated at `now`.
    ///
    /// # Errors
    ///
    /// See [`Session::open`].
    pub fn open_at(token: &str, key: &SecretKey, now: DateTime<Utc>) -> Result<Self, SessionError> {
        let payload = unseal_for(Purpose::Session, token, key)?;
        let session: Self = serde_json::from_slice(&payload)?;
        if session.is_expired_at(now) {
            return Err(SessionError::Expired);
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SealError;

    fn identity() -> Identity {
        Identity {
            name: "Jane Doe".to_string(),
            email: "jane@example.com".to_string(),
        }
    }

    fn credential(refresh: Option<&str>, expires_in: Option<Duration>) -> DelegatedCredential {
        DelegatedCredential {
            access_token: "access".to_string(),
            refresh_token: refresh.map(str::to_string),
            token_type: "Bearer".to_string(),
            expires_at: expires_in.map(|d| Utc::now() + d),
        }
    }

    #[test]
    fn seal_and_open() {
        let key = SecretKey::generate();
        let session = Session::new(
            identity(),
            credential(Some("refresh"), Some(Duration::hours(1))),
            Duration::days(14),
        );
        let opened = Session::open(&session.seal(&key), &key).expect("open");
        assert_eq!(opened, session);
    }

    #[test]
    fn expired_session_is_rejected() {
        let key = SecretKey::generate();
        let session = Session::new(identity(), credential(None, None), Duration::days(14));
        let token = session.seal(&key);
        let later = session.expires_at + Duration::seconds(1);
        assert_eq!(
            Session::open_at(&token, &key, later),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn session_token_does_not_open_with_other_key() {
        let session = Session::new(identity(), credential(None, None), Duration::days(1));
        let token = session.seal(&SecretKey::generate());
        assert_eq!(
            Session::open(&token, &SecretKey::generate()),
            Err(SessionError::Sealed(SealError::Authentication))
        );
    }

    #[test]
    fn non_session_payload_is_malformed() {
        let key = SecretKey::generate();
        let token = seal_for(Purpose::Session, b"[1,2,3]", &key);
        assert!(matches!(
            Session::open(&token, &key),
            Err(SessionError::Malformed { .. })
        ));
    }

    #[test]
    fn refresh_keeps_old_refresh_token_and_expiry() {
        let mut session = Session::new(
            identity(),
            credential(Some("original-refresh"), Some(Duration::seconds(10))),
            Duration::days(14),
        );
        let expires_at = session.expires_at;

        let mut refreshed = credential(None, Some(Duration::hours(1)));
        refreshed.access_token = "new-access".to_string();
        session.replace_credential(refreshed);

        assert_eq!(session.credential.access_token, "new-access");
        assert_eq!(
            session.credential.refresh_token.as_deref(),
            Some("original-refresh")
        );
        assert_eq!(session.expires_at, expires_at);
    }

    #[test]
    fn refresh_takes_new_refresh_token_when_given() {
        let mut session = Session::new(
            identity(),
            credential(Some("old"), None),
            Duration::days(14),
        );
        session.replace_credential(credential(Some("new"), None));
        assert_eq!(session.credential.refresh_token.as_deref(), Some("new"));
    }

    #[test]
    fn needs_refresh_within_margin() {
        let margin = Duration::seconds(60);
        assert!(credential(None, Some(Duration::seconds(30))).needs_refresh(margin));
        assert!(credential(None, Some(Duration::seconds(-5))).needs_refresh(margin));
        assert!(!credential(None, Some(Duration::hours(1))).needs_refresh(margin));
        assert!(!credential(None, None).needs_refresh(margin));
    }

    #[test]
    fn mailbox_formatting() {
        assert_eq!(identity().mailbox(), "Jane Doe <jane@example.com>");
        let anonymous = Identity {
            name: String::new(),
            email: "x@example.org".to_string(),
        };
        assert_eq!(anonymous.mailbox(), "x@example.org");
        assert_eq!(anonymous.domain(), Some("example.org"));
    }

    #[test]
    fn credential_debug_is_redacted() {
        let rendered = format!("{:?}", credential(Some("secret-refresh"), None));
        assert!(!rendered.contains("access\""));
        assert!(!rendered.contains("secret-refresh"));
    }
}
