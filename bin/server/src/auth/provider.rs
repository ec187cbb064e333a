//! Identity provider seam and the Google implementation.

use crate::error::ProviderError;
use async_trait::async_trait;
use chrono::Utc;
use multi_emailer_session::DelegatedCredential;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EmptyExtraTokenFields,
    RedirectUrl, RefreshToken, Scope, StandardTokenResponse, TokenResponse, TokenUrl,
    basic::{BasicClient, BasicTokenType},
};
use rootcause::prelude::Report;
use serde::Deserialize;
use tracing::instrument;

/// Google OAuth authorization URL.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Google OAuth token URL.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google user-info endpoint.
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Scopes needed to identify the user and send mail as them.
const GOOGLE_SCOPES: &[&str] = &["email", "https://www.googleapis.com/auth/gmail.send"];

type GoogleTokenResponse = StandardTokenResponse<EmptyExtraTokenFields, BasicTokenType>;

/// Who the provider says the user is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub name: String,
    pub email: String,
    pub email_verified: bool,
}

/// An OAuth2 identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL to send the browser to, carrying `state` unchanged.
    fn authorization_url(&self, state: &str) -> String;

    /// Redeems an authorization code.
    async fn exchange_code(&self, code: &str)
    -> Result<DelegatedCredential, Report<ProviderError>>;

    /// Looks up the user the credential belongs to.
    async fn fetch_identity(
        &self,
        credential: &DelegatedCredential,
    ) -> Result<ProviderIdentity, Report<ProviderError>>;

    /// Obtains a fresh access token.
    async fn refresh(&self, refresh_token: &str)
    -> Result<DelegatedCredential, Report<ProviderError>>;
}

/// Google sign-in with delegated Gmail send access.
pub struct GoogleIdentityProvider {
    client_id: String,
    client_secret: String,
    auth_url: AuthUrl,
    token_url: TokenUrl,
    redirect_url: RedirectUrl,
    userinfo_url: String,
    http: reqwest::Client,
}

impl GoogleIdentityProvider {
    /// Creates a provider that redirects back to `redirect_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `redirect_url` is not a URL or the HTTP client
    /// cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Result<Self, Report<ProviderError>> {
        let client_error = |details: String| ProviderError::Client { details };

        let redirect_url = RedirectUrl::new(redirect_url.into())
            .map_err(|e| client_error(format!("invalid redirect URL: {}", e)))?;
        let auth_url = AuthUrl::new(GOOGLE_AUTH_URL.to_string())
            .map_err(|e| client_error(format!("invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
            .map_err(|e| client_error(format!("invalid token URL: {}", e)))?;

        // The token endpoint must never be followed to another host.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| client_error(e.to_string()))?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url,
            token_url,
            redirect_url,
            userinfo_url: GOOGLE_USERINFO_URL.to_string(),
            http,
        })
    }

    /// The HTTP client used for provider calls. Shared with API clients.
    #[must_use]
    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    fn credential_from(token: &GoogleTokenResponse) -> DelegatedCredential {
        let token_type = match token.token_type() {
            BasicTokenType::Bearer => "Bearer".to_string(),
            BasicTokenType::Mac => "MAC".to_string(),
            BasicTokenType::Extension(other) => other.clone(),
        };
        DelegatedCredential {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            token_type,
            expires_at: token
                .expires_in()
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GoogleUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    email_verified: bool,
}

#[async_trait]
impl IdentityProvider for GoogleIdentityProvider {
    fn authorization_url(&self, state: &str) -> String {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_auth_uri(self.auth_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let state = state.to_string();
        let mut auth_request = client.authorize_url(move || CsrfToken::new(state));
        for scope in GOOGLE_SCOPES {
            auth_request = auth_request.add_scope(Scope::new((*scope).to_string()));
        }
        // Request offline access for refresh token
        let (url, _) = auth_request.add_extra_param("access_type", "offline").url();
        url.to_string()
    }

    #[instrument(skip_all)]
    async fn exchange_code(
        &self,
        code: &str,
    ) -> Result<DelegatedCredential, Report<ProviderError>> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(self.token_url.clone())
            .set_redirect_uri(self.redirect_url.clone());

        let token: GoogleTokenResponse = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::Exchange {
                details: e.to_string(),
            })?;

        Ok(Self::credential_from(&token))
    }

    #[instrument(skip_all)]
    async fn fetch_identity(
        &self,
        credential: &DelegatedCredential,
    ) -> Result<ProviderIdentity, Report<ProviderError>> {
        let user_info_error = |details: String| ProviderError::UserInfo { details };

        let user: GoogleUser = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(&credential.access_token)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| user_info_error(e.to_string()))?
            .json()
            .await
            .map_err(|e| user_info_error(format!("unexpected response: {}", e)))?;

        if user.email.trim().is_empty() {
            return Err(user_info_error(format!("no email address for user '{}'", user.name)).into());
        }

        Ok(ProviderIdentity {
            name: user.name,
            email: user.email,
            email_verified: user.email_verified,
        })
    }

    #[instrument(skip_all)]
    async fn refresh(
        &self,
        refresh_token: &str,
    ) -> Result<DelegatedCredential, Report<ProviderError>> {
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_token_uri(self.token_url.clone());

        let token: GoogleTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| ProviderError::Refresh {
                details: e.to_string(),
            })?;

        Ok(Self::credential_from(&token))
    }
}
