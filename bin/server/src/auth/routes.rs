//! Authentication routes outside the middleware.

use super::{Authenticator, found};
use axum::{extract::State, response::IntoResponse};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

/// Clears the session cookie and sends the user home.
pub async fn logout(State(auth): State<Arc<Authenticator>>, jar: CookieJar) -> impl IntoResponse {
    tracing::debug!("Logging out");
    (auth.logout(jar), found("/"))
}
