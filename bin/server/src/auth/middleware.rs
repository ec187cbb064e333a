//! Authentication middleware and extractors for Axum.

use super::{Authenticator, found};
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::{StatusCode, Uri, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use multi_emailer_session::{AntiForgeryState, DelegatedCredential, Identity};
use serde::Deserialize;
use std::sync::Arc;

/// The verified user, inserted into request extensions by [`authenticate`].
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    pub credential: DelegatedCredential,
}

impl Authenticated {
    /// An HTTP client that calls provider APIs as this user.
    pub fn client(&self, http: &reqwest::Client) -> AuthorizedClient {
        AuthorizedClient {
            http: http.clone(),
            access_token: self.credential.access_token.clone(),
        }
    }
}

/// An HTTP client carrying a user's bearer credential.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    access_token: String,
}

impl AuthorizedClient {
    pub fn post(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        self.http.post(url).bearer_auth(&self.access_token)
    }
}

/// Extractor for the verified user.
///
/// Only usable on routes behind [`authenticate`].
pub struct RequireAuth(pub Authenticated);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| {
                tracing::error!(path = %parts.uri.path(), "Route is missing the authentication layer");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            })
    }
}

/// Query parameters for the provider callback.
#[derive(Debug, Default, Deserialize)]
struct CallbackQuery {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Per-request authentication.
///
/// - the callback path completes a login started by this server
/// - a valid session cookie lets the request through, refreshing the
///   credential first if it is about to expire
/// - anything else goes to the login handler
pub async fn authenticate(
    State(auth): State<Arc<Authenticator>>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == auth.settings().callback_path {
        return callback(&auth, jar, request.uri()).await;
    }

    let Some(mut session) = auth.restore(&jar) else {
        return login(&auth, request, jar);
    };

    let mut refreshed = false;
    if session
        .credential
        .needs_refresh(auth.settings().refresh_margin)
    {
        if let Err(e) = auth.refresh(&mut session).await {
            tracing::warn!(email = %session.identity.email, error = %e, "Could not refresh credential");
            return login(&auth, request, jar);
        }
        tracing::debug!(email = %session.identity.email, "Refreshed credential");
        refreshed = true;
    }

    let cookie = refreshed.then(|| auth.session_cookie(&session));
    request.extensions_mut().insert(Authenticated {
        identity: session.identity,
        credential: session.credential,
    });
    let response = next.run(request).await;

    match cookie {
        Some(cookie) => (jar.add(cookie), response).into_response(),
        None => response,
    }
}

fn login(auth: &Authenticator, request: Request, jar: CookieJar) -> Response {
    let authorization_url = auth.authorization_url(request.uri());
    auth.login.login(request, jar, authorization_url)
}

async fn callback(auth: &Authenticator, jar: CookieJar, uri: &Uri) -> Response {
    let query = Query::<CallbackQuery>::try_from_uri(uri)
        .map(|Query(query)| query)
        .unwrap_or_default();

    let state = query.state.as_deref().and_then(|state| {
        AntiForgeryState::open(state, auth.key(), auth.settings().auth_window)
            .inspect_err(|e| tracing::debug!(error = %e, "Rejected callback state"))
            .ok()
    });
    let Some(state) = state else {
        return found("/");
    };

    let code = query.code.unwrap_or_default();
    if code.trim().is_empty() {
        tracing::warn!("Callback request has valid state, no code");
        return found("/");
    }

    match auth.complete_login(&code).await {
        Ok(session) => (jar.add(auth.session_cookie(&session)), found(&state.current_url)).into_response(),
        Err(e) => e.into_response(),
    }
}
