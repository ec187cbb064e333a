//! Authentication for the multi-emailer server.
//!
//! This module provides:
//! - Google sign-in through the OAuth2 authorization-code flow
//! - Sessions held entirely by the client in a sealed cookie
//! - A middleware that resumes, refreshes, or starts a login per request
//!
//! Nothing about a login is stored on the server. The anti-forgery `state`
//! travels sealed through the provider redirect and the session lives in the
//! `google-oauth-token` cookie, so any instance sharing the secret key can
//! serve any request.

pub mod middleware;
pub mod provider;
pub mod routes;

pub use middleware::{Authenticated, RequireAuth, authenticate};
pub use provider::{GoogleIdentityProvider, IdentityProvider, ProviderIdentity};
pub use routes::logout;

use crate::error::{CallbackError, ProviderError};
use axum::extract::Request;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use multi_emailer_session::{AntiForgeryState, Identity, SecretKey, Session};
use reqwest::Url;
use rootcause::prelude::Report;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "google-oauth-token";

/// Settings for the authentication flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Path the provider redirects back to.
    pub callback_path: String,
    /// Absolute lifetime of a session.
    pub session_lifetime: chrono::Duration,
    /// How long a started login stays valid.
    pub auth_window: chrono::Duration,
    /// Timeout for each provider call.
    pub provider_timeout: Duration,
    /// Lowercase domains allowed to log in. Empty allows all.
    pub allowed_domains: Vec<String>,
    /// Set the `Secure` flag on cookies.
    pub secure_cookies: bool,
    /// Refresh a credential this close to its expiry.
    pub refresh_margin: chrono::Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            callback_path: "/auth/callback".to_string(),
            session_lifetime: chrono::Duration::days(14),
            auth_window: chrono::Duration::hours(1),
            provider_timeout: Duration::from_secs(30),
            allowed_domains: Vec::new(),
            secure_cookies: true,
            refresh_margin: chrono::Duration::seconds(60),
        }
    }
}

/// Decides what an unauthenticated request sees.
pub trait LoginHandler: Send + Sync {
    /// `authorization_url` already carries a sealed state for this request.
    fn login(&self, request: Request, jar: CookieJar, authorization_url: String) -> Response;
}

/// Sends the browser straight to the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectLogin;

impl LoginHandler for RedirectLogin {
    fn login(&self, _request: Request, jar: CookieJar, authorization_url: String) -> Response {
        (jar, found(&authorization_url)).into_response()
    }
}

/// Runs the authentication flow.
pub struct Authenticator {
    provider: Arc<dyn IdentityProvider>,
    key: SecretKey,
    settings: AuthSettings,
    login: Arc<dyn LoginHandler>,
}

impl Authenticator {
    /// Creates an authenticator that redirects unauthenticated requests to the provider.
    pub fn new(provider: Arc<dyn IdentityProvider>, key: SecretKey, settings: AuthSettings) -> Self {
        Self {
            provider,
            key,
            settings,
            login: Arc::new(RedirectLogin),
        }
    }

    /// Replaces the login handler.
    #[must_use]
    pub fn with_login(mut self, login: Arc<dyn LoginHandler>) -> Self {
        self.login = login;
        self
    }

    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Builds the provider URL for a login started at `uri`.
    ///
    /// A `g` query parameter overrides the return location, but only its path
    /// is kept so the login cannot be used to bounce users to another site.
    pub fn authorization_url(&self, uri: &Uri) -> String {
        let state = AntiForgeryState::new(return_url(uri));
        self.provider.authorization_url(&state.seal(&self.key))
    }

    /// The cookie holding `session`.
    pub fn session_cookie(&self, session: &Session) -> Cookie<'static> {
        let mut cookie = Cookie::build((SESSION_COOKIE, session.seal(&self.key)))
            .path("/")
            .http_only(true)
            .secure(self.settings.secure_cookies)
            .same_site(SameSite::Lax)
            .build();
        if let Ok(expires) = time::OffsetDateTime::from_unix_timestamp(session.expires_at.timestamp()) {
            cookie.set_expires(expires);
        }
        cookie
    }

    /// Drops the session cookie.
    pub fn logout(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"))
    }

    /// Restores the session from the request cookies.
    pub(crate) fn restore(&self, jar: &CookieJar) -> Option<Session> {
        let cookie = jar.get(SESSION_COOKIE)?;
        Session::open(cookie.value(), &self.key)
            .inspect_err(|e| tracing::debug!(error = %e, "Ignoring session cookie"))
            .ok()
    }

    /// Exchanges a callback code for a new session.
    pub(crate) async fn complete_login(&self, code: &str) -> Result<Session, CallbackError> {
        let credential = self
            .within_timeout("code exchange", self.provider.exchange_code(code))
            .await?;
        let user = self
            .within_timeout("user info", self.provider.fetch_identity(&credential))
            .await?;

        if !user.email_verified {
            return Err(CallbackError::UnverifiedEmail { email: user.email });
        }
        let identity = Identity {
            name: user.name,
            email: user.email,
        };
        if !self.domain_allowed(&identity) {
            return Err(CallbackError::DomainNotAllowed {
                email: identity.email,
            });
        }

        tracing::info!(email = %identity.email, "User logged in");
        Ok(Session::new(
            identity,
            credential,
            self.settings.session_lifetime,
        ))
    }

    /// Replaces the session's access credential with a fresh one.
    pub(crate) async fn refresh(&self, session: &mut Session) -> Result<(), Report<ProviderError>> {
        let Some(refresh_token) = session.credential.refresh_token.clone() else {
            return Err(ProviderError::Refresh {
                details: "session has no refresh token".to_string(),
            }
            .into());
        };
        let credential = self
            .within_timeout("token refresh", self.provider.refresh(&refresh_token))
            .await?;
        session.replace_credential(credential);
        Ok(())
    }

    fn domain_allowed(&self, identity: &Identity) -> bool {
        if self.settings.allowed_domains.is_empty() {
            return true;
        }
        let Some(domain) = identity.domain() else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();
        self.settings.allowed_domains.iter().any(|d| *d == domain)
    }

    async fn within_timeout<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, Report<ProviderError>>>,
    ) -> Result<T, Report<ProviderError>> {
        match tokio::time::timeout(self.settings.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout { operation }.into()),
        }
    }
}

/// A `302 Found` to `location`.
///
/// Browsers re-issue a 302 as GET, which is what a POST-then-redirect wants.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Path and query to come back to after login.
fn return_url(uri: &Uri) -> String {
    let requested = uri
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());

    // Only used to parse relative references.
    let Ok(base) = Url::parse("http://localhost/") else {
        return requested;
    };
    let Ok(current) = base.join(&requested) else {
        return requested;
    };
    let Some(g) = current
        .query_pairs()
        .find(|(name, value)| name == "g" && !value.is_empty())
        .map(|(_, value)| value.into_owned())
    else {
        return requested;
    };

    match base.join(&g) {
        Ok(target) => format!("/{}", target.path().trim_start_matches('/')),
        Err(_) => requested,
    }
}
