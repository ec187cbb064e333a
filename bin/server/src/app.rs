//! Router, shared state and HTTP handlers.
//!
//! Views are JSON documents; a front end renders them.

use crate::auth::{self, Authenticated, Authenticator, LoginHandler, RequireAuth, authenticate, found};
use crate::flash::{self, Slot};
use axum::{
    Form, Json, Router,
    extract::{FromRef, Path, Query, Request, State},
    http::{Method, StatusCode, Uri, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::CookieJar;
use multi_emailer_core::GroupId;
use multi_emailer_dispatch::{
    Address, DispatchJob, DispatchReport, Dispatcher, JobTarget, Mailbox, MessageProvider,
    RecipientDirectory, RecipientGroup,
};
use multi_emailer_session::{Identity, SecretKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Builds a message provider acting as the authenticated user.
pub type ProviderFactory = Arc<dyn Fn(&Authenticated) -> Arc<dyn MessageProvider> + Send + Sync>;

/// Site-wide settings fixed at startup.
#[derive(Debug)]
pub struct Site {
    pub title: String,
    pub directory: RecipientDirectory,
    /// Google site verification file served at the root, e.g. `google1234.html`.
    pub site_verification: Option<String>,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<Authenticator>,
    pub site: Arc<Site>,
    pub dispatcher: Dispatcher,
    pub providers: ProviderFactory,
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.auth)
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    let callback_path = state.auth.settings().callback_path.clone();
    let public = public_routes(&state.site);

    // The middleware answers the callback itself; the route only has to match.
    let protected = Router::new()
        .route("/", get(home))
        .route("/{group_id}", get(home))
        .route(&callback_path, get(|| async { StatusCode::NOT_FOUND }))
        .route("/v1/send", post(send))
        .route_layer(from_fn_with_state(Arc::clone(&state.auth), authenticate));

    public
        .route("/logout", post(auth::logout))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Builds a router with sign-in turned off, for development.
///
/// Every visitor sees the home page as [`preview_identity`]. Nothing can be
/// sent and there is no login or logout.
pub fn router_without_auth(state: AppState) -> Router {
    public_routes(&state.site)
        .route("/", get(preview_home))
        .route("/{group_id}", get(preview_home))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn public_routes(site: &Site) -> Router<AppState> {
    let router = Router::new()
        .route("/health", get(health))
        .route("/{group_id}/recipients", get(recipients));

    match site.site_verification.clone() {
        Some(file) => router.route(
            &format!("/{file}"),
            get(move || async move {
                (
                    [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                    format!("google-site-verification: {file}"),
                )
            }),
        ),
        None => router,
    }
}

async fn health() -> &'static str {
    "ok"
}

/// The user every visitor appears as when sign-in is turned off.
#[must_use]
pub fn preview_identity() -> Identity {
    Identity {
        name: "Test Email".into(),
        email: "test@example.org".into(),
    }
}

/// Everything the home page shows.
#[derive(Debug, Serialize, Deserialize)]
pub struct HomeView {
    pub title: String,
    /// The signed-in user, absent on the landing page.
    pub email: Option<String>,
    pub groups: Vec<GroupView>,
    pub error: Option<String>,
    pub success: Option<String>,
    pub subject: String,
    pub body: String,
    pub is_homepage: bool,
    /// Set when exactly one group with one recipient is shown.
    pub opening_line: Option<String>,
    /// Where to sign in, absent once signed in.
    pub auth_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GroupView {
    pub id: String,
    pub name: String,
    pub recipients: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecipientView {
    pub email: String,
    pub cc: Vec<String>,
    pub opening_line: String,
}

#[derive(Debug, Default, Deserialize)]
struct DraftQuery {
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Cookie sealing for views.
#[derive(Clone)]
struct ViewCookies {
    key: SecretKey,
    secure: bool,
}

impl ViewCookies {
    fn from_auth(auth: &Authenticator) -> Self {
        Self {
            key: auth.key().clone(),
            secure: auth.settings().secure_cookies,
        }
    }
}

/// Shows the home page to visitors who have not signed in, with a link to
/// the provider instead of a redirect.
pub struct LandingLogin {
    site: Arc<Site>,
    cookies: ViewCookies,
}

impl LandingLogin {
    /// `key` and `secure` must match the authenticator's.
    pub fn new(site: Arc<Site>, key: SecretKey, secure: bool) -> Self {
        Self {
            site,
            cookies: ViewCookies { key, secure },
        }
    }
}

impl LoginHandler for LandingLogin {
    fn login(&self, request: Request, jar: CookieJar, authorization_url: String) -> Response {
        if request.method() != Method::GET {
            return (jar, found(&authorization_url)).into_response();
        }
        render_home(
            &self.site,
            &self.cookies,
            request.uri(),
            jar,
            None,
            Some(authorization_url),
        )
    }
}

async fn home(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    jar: CookieJar,
    uri: Uri,
) -> Response {
    render_home(
        &state.site,
        &ViewCookies::from_auth(&state.auth),
        &uri,
        jar,
        Some(&user.identity),
        None,
    )
}

async fn preview_home(State(state): State<AppState>, jar: CookieJar, uri: Uri) -> Response {
    render_home(
        &state.site,
        &ViewCookies::from_auth(&state.auth),
        &uri,
        jar,
        Some(&preview_identity()),
        None,
    )
}

fn render_home(
    site: &Site,
    cookies: &ViewCookies,
    uri: &Uri,
    jar: CookieJar,
    user: Option<&Identity>,
    auth_url: Option<String>,
) -> Response {
    let Some(groups) = visible_groups(&site.directory, uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let draft = Query::<DraftQuery>::try_from_uri(uri)
        .map(|Query(draft)| draft)
        .unwrap_or_default();
    let subject = draft.subject.unwrap_or_default();
    let body = draft.body.unwrap_or_default();
    if !subject.is_empty() || !body.is_empty() {
        // Keep the draft out of the URL and across the login round-trip.
        let jar = flash::set(jar, Slot::Subject, &subject, &cookies.key, cookies.secure);
        let jar = flash::set(jar, Slot::Body, &body, &cookies.key, cookies.secure);
        return (jar, found(uri.path())).into_response();
    }

    // Drafts are only consumed once they can be sent.
    let (jar, subject, body) = if user.is_some() {
        let (jar, subject) = flash::take(jar, Slot::Subject, &cookies.key);
        let (jar, body) = flash::take(jar, Slot::Body, &cookies.key);
        (jar, subject, body)
    } else {
        let subject = flash::peek(&jar, Slot::Subject, &cookies.key);
        let body = flash::peek(&jar, Slot::Body, &cookies.key);
        (jar, subject, body)
    };
    let (jar, error) = flash::take(jar, Slot::Error, &cookies.key);
    let (jar, success) = flash::take(jar, Slot::Success, &cookies.key);

    let opening_line = match groups.as_slice() {
        [group] if group.recipients.len() == 1 => {
            group.recipients.first().map(|r| r.opening_line.clone())
        }
        _ => None,
    };

    let view = HomeView {
        title: site.title.clone(),
        email: user.map(Identity::mailbox),
        groups: groups
            .iter()
            .map(|group| GroupView {
                id: group.id.to_string(),
                name: group.name.clone(),
                recipients: group.recipients.len(),
            })
            .collect(),
        error,
        success,
        subject: subject.unwrap_or_default(),
        body: body.unwrap_or_default(),
        is_homepage: uri.path() == "/",
        opening_line,
        auth_url,
    };
    (jar, Json(view)).into_response()
}

/// Groups shown at `path`: all of them at `/`, one at `/{group_id}`.
fn visible_groups<'a>(directory: &'a RecipientDirectory, path: &str) -> Option<Vec<&'a RecipientGroup>> {
    let id = path.trim_matches('/');
    if id.is_empty() {
        return Some(directory.groups().collect());
    }
    let id: GroupId = id.parse().ok()?;
    directory.get(&id).map(|group| vec![group])
}

async fn recipients(State(state): State<AppState>, Path(group_id): Path<String>) -> Response {
    let group = group_id
        .parse::<GroupId>()
        .ok()
        .and_then(|id| state.site.directory.get(&id));
    let Some(group) = group else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let recipients: Vec<RecipientView> = group
        .recipients
        .iter()
        .map(|recipient| RecipientView {
            email: recipient.address.to_string(),
            cc: recipient.cc.iter().map(ToString::to_string).collect(),
            opening_line: recipient.opening_line.clone(),
        })
        .collect();
    Json(recipients).into_response()
}

#[derive(Debug, Deserialize)]
struct SendForm {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    group_id: String,
}

async fn send(
    State(state): State<AppState>,
    RequireAuth(user): RequireAuth,
    jar: CookieJar,
    Form(form): Form<SendForm>,
) -> Response {
    let cookies = ViewCookies::from_auth(&state.auth);
    let flash_error = |jar: CookieJar, message: &str| {
        let jar = flash::set(jar, Slot::Error, message, &cookies.key, cookies.secure);
        (jar, found("/")).into_response()
    };

    let target = match JobTarget::parse(&form.group_id) {
        Ok(target) => target,
        Err(e) => return flash_error(jar, &e.user_message()),
    };
    let job = DispatchJob {
        subject: form.subject,
        body: form.body,
        target,
    };

    let sender = match sender_mailbox(&user.identity) {
        Ok(sender) => sender,
        Err(e) => {
            tracing::error!(email = %user.identity.email, error = %e, "Signed-in address does not parse");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to send messages").into_response();
        }
    };

    // Abandoned requests stop their sends.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let provider = (state.providers)(&user);
    match state
        .dispatcher
        .dispatch(&state.site.directory, provider, &sender, &job, &cancel)
        .await
    {
        Ok(report) => {
            tracing::info!(
                from = %user.identity.email,
                delivered = report.delivered(),
                failed = report.failed(),
                "Dispatch finished"
            );
            let (slot, message) = report_message(&report);
            let jar = flash::set(jar, slot, &message, &cookies.key, cookies.secure);
            (jar, found("/")).into_response()
        }
        Err(e) if e.is_validation() => flash_error(jar, &e.user_message()),
        Err(e) => {
            tracing::error!(from = %user.identity.email, error = %e, "Dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.user_message()).into_response()
        }
    }
}

fn sender_mailbox(identity: &Identity) -> Result<Mailbox, multi_emailer_dispatch::AddressError> {
    let address: Address = identity.email.trim().parse()?;
    let name = Some(identity.name.trim().to_string()).filter(|name| !name.is_empty());
    Ok(Mailbox::new(name, address))
}

/// The flash shown after a finished job.
fn report_message(report: &DispatchReport) -> (Slot, String) {
    let delivered = report.delivered();
    let failed = report.failed();
    if delivered == 0 && failed > 0 {
        return (Slot::Error, format!("Could not deliver any of {failed} {}", plural(failed)));
    }
    let mut message = format!(
        "Sent {delivered} {}. They will appear in your Sent folder shortly",
        plural(delivered)
    );
    if failed > 0 {
        message.push_str(&format!(". {failed} could not be delivered"));
    }
    (Slot::Success, message)
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "message" } else { "messages" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSettings, IdentityProvider, ProviderIdentity, SESSION_COOKIE};
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use axum::{body::Body, http::header};
    use multi_emailer_dispatch::{
        CountingSemaphore, Recipient, RetryPolicy, SendOutcome,
    };
    use multi_emailer_session::{DelegatedCredential, Purpose, Session, seal_for, unseal_for};
    use rootcause::prelude::Report;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct StubIdentity;

    #[async_trait]
    impl IdentityProvider for StubIdentity {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://provider.example/auth?state={state}")
        }

        async fn exchange_code(
            &self,
            _code: &str,
        ) -> Result<DelegatedCredential, Report<ProviderError>> {
            Err(ProviderError::Exchange {
                details: "not used".into(),
            }
            .into())
        }

        async fn fetch_identity(
            &self,
            _credential: &DelegatedCredential,
        ) -> Result<ProviderIdentity, Report<ProviderError>> {
            Err(ProviderError::UserInfo {
                details: "not used".into(),
            }
            .into())
        }

        async fn refresh(
            &self,
            _refresh_token: &str,
        ) -> Result<DelegatedCredential, Report<ProviderError>> {
            Err(ProviderError::Refresh {
                details: "not used".into(),
            }
            .into())
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        senders: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageProvider for RecordingProvider {
        async fn send_raw(&self, from: &str, _raw: &str) -> SendOutcome {
            self.senders
                .lock()
                .expect("senders lock")
                .push(from.to_string());
            SendOutcome::Delivered
        }
    }

    fn mailbox(s: &str) -> Mailbox {
        s.parse().expect("mailbox")
    }

    fn directory() -> RecipientDirectory {
        RecipientDirectory::new([
            RecipientGroup::new(
                "council".parse().expect("id"),
                Some("City Council".into()),
                vec![
                    Recipient::new(mailbox("a@example.org")).with_opening_line("Dear Ada"),
                    Recipient::new(mailbox("b@example.org"))
                        .with_cc(vec![mailbox("aide@example.org")]),
                ],
            ),
            RecipientGroup::new(
                "mayor".parse().expect("id"),
                None,
                vec![Recipient::new(mailbox("mayor@example.org")).with_opening_line("Dear Mayor")],
            ),
        ])
        .expect("directory")
    }

    struct Harness {
        app: Router,
        auth: Arc<Authenticator>,
        provider: Arc<RecordingProvider>,
    }

    fn harness() -> Harness {
        harness_with(None, router)
    }

    fn harness_with(site_verification: Option<&str>, build: fn(AppState) -> Router) -> Harness {
        let key = SecretKey::generate();
        let site = Arc::new(Site {
            title: "Write your council".into(),
            directory: directory(),
            site_verification: site_verification.map(str::to_string),
        });
        let settings = AuthSettings::default();
        let landing = LandingLogin::new(Arc::clone(&site), key.clone(), settings.secure_cookies);
        let auth = Arc::new(
            Authenticator::new(Arc::new(StubIdentity), key, settings).with_login(Arc::new(landing)),
        );
        let provider = Arc::new(RecordingProvider::default());
        let shared = Arc::clone(&provider);
        let providers: ProviderFactory =
            Arc::new(move |_: &Authenticated| Arc::clone(&shared) as Arc<dyn MessageProvider>);
        let dispatcher = Dispatcher::new(
            Arc::new(CountingSemaphore::new(2)),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
            },
            Duration::from_secs(5),
        );
        let app = build(AppState {
            auth: Arc::clone(&auth),
            site,
            dispatcher,
            providers,
        });
        Harness {
            app,
            auth,
            provider,
        }
    }

    fn session_cookie(auth: &Authenticator) -> String {
        let session = Session::new(
            Identity {
                name: "Jane Doe".into(),
                email: "jane@example.com".into(),
            },
            DelegatedCredential {
                access_token: "token".into(),
                refresh_token: Some("refresh".into()),
                token_type: "Bearer".into(),
                expires_at: None,
            },
            chrono::Duration::days(1),
        );
        let cookie = auth.session_cookie(&session);
        format!("{}={}", cookie.name(), cookie.value())
    }

    fn request(method: Method, uri: &str, cookies: &[String], form: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri(uri);
        if !cookies.is_empty() {
            builder = builder.header(header::COOKIE, cookies.join("; "));
        }
        let body = match form {
            Some(form) => {
                builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
                Body::from(form.to_string())
            }
            None => Body::empty(),
        };
        builder.body(body).expect("request")
    }

    fn location(response: &Response) -> Option<String> {
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Value of the named cookie as set by the response.
    fn set_cookie(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .and_then(|v| v.split(';').next())
            .map(|pair| pair[name.len() + 1..].to_string())
    }

    async fn json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    fn sealed_flash(auth: &Authenticator, response: &Response, slot: Slot, purpose: Purpose) -> String {
        let value = set_cookie(response, slot.cookie_name()).expect("flash cookie");
        String::from_utf8(unseal_for(purpose, &value, auth.key()).expect("unseal flash"))
            .expect("utf-8")
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = harness();
        let response = h
            .app
            .oneshot(request(Method::GET, "/health", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn landing_page_offers_sign_in() {
        let h = harness();
        let response = h
            .app
            .oneshot(request(Method::GET, "/", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let view: HomeView = json(response).await;
        assert_eq!(view.email, None);
        assert_eq!(view.title, "Write your council");
        assert!(view.is_homepage);
        assert_eq!(view.groups.len(), 2);
        let auth_url = view.auth_url.expect("auth url");
        assert!(auth_url.starts_with("https://provider.example/auth?state="));
    }

    #[tokio::test]
    async fn unauthenticated_send_goes_to_provider() {
        let h = harness();
        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &[],
                Some("subject=Hi&body=There&group_id=council"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(location(&response).is_some_and(|l| l.starts_with("https://provider.example/")));
        assert!(h.provider.senders.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn draft_query_is_moved_into_cookies() {
        let h = harness();
        let response = h
            .app
            .oneshot(request(Method::GET, "/council?subject=Bike+lanes&body=Please", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/council"));
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Subject, Purpose::DraftSubject),
            "Bike lanes"
        );
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Body, Purpose::DraftBody),
            "Please"
        );
    }

    #[tokio::test]
    async fn draft_query_on_unknown_path_is_not_redirected() {
        let h = harness();
        for uri in ["/nobody?subject=Hi", "/\\evil.example?subject=Hi"] {
            let response = h
                .app
                .clone()
                .oneshot(request(Method::GET, uri, &[], None))
                .await
                .expect("response");
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(location(&response), None);
            assert_eq!(set_cookie(&response, "subject"), None);
        }
    }

    #[tokio::test]
    async fn signed_in_home_consumes_draft_and_flash() {
        let h = harness();
        let cookies = vec![
            session_cookie(&h.auth),
            format!(
                "subject={}",
                seal_for(Purpose::DraftSubject, b"Bike lanes", h.auth.key())
            ),
            format!(
                "flash-success={}",
                seal_for(Purpose::FlashSuccess, b"Sent 2 messages", h.auth.key())
            ),
        ];
        let response = h
            .app
            .oneshot(request(Method::GET, "/", &cookies, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(set_cookie(&response, "subject").as_deref(), Some(""));
        assert_eq!(set_cookie(&response, "flash-success").as_deref(), Some(""));

        let view: HomeView = json(response).await;
        assert_eq!(view.email.as_deref(), Some("Jane Doe <jane@example.com>"));
        assert_eq!(view.subject, "Bike lanes");
        assert_eq!(view.success.as_deref(), Some("Sent 2 messages"));
        assert_eq!(view.auth_url, None);
    }

    #[tokio::test]
    async fn group_page_shows_single_opening_line() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(Method::GET, "/mayor", &cookies, None))
            .await
            .expect("response");
        let view: HomeView = json(response).await;
        assert!(!view.is_homepage);
        assert_eq!(view.groups.len(), 1);
        assert_eq!(view.groups[0].name, "mayor");
        assert_eq!(view.opening_line.as_deref(), Some("Dear Mayor"));
    }

    #[tokio::test]
    async fn unknown_group_page_is_404() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(Method::GET, "/nobody", &cookies, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recipients_are_listed_publicly() {
        let h = harness();
        let response = h
            .app
            .clone()
            .oneshot(request(Method::GET, "/council/recipients", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let list: Vec<RecipientView> = json(response).await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].email, "a@example.org");
        assert_eq!(list[0].opening_line, "Dear Ada");
        assert_eq!(list[1].cc, vec!["aide@example.org".to_string()]);

        let missing = h
            .app
            .oneshot(request(Method::GET, "/nobody/recipients", &[], None))
            .await
            .expect("response");
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_subject_is_flashed_without_sending() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &cookies,
                Some("subject=+&body=Hello&group_id=council"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/"));
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Error, Purpose::FlashError),
            "Please provide a subject"
        );
        assert!(h.provider.senders.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn unknown_group_is_flashed() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &cookies,
                Some("subject=Hi&body=Hello&group_id=nobody"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Error, Purpose::FlashError),
            "Unknown group: nobody"
        );
    }

    #[tokio::test]
    async fn send_reaches_every_recipient() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &cookies,
                Some("subject=Bike+lanes&body=**Please**&group_id=council"),
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/"));
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Success, Purpose::FlashSuccess),
            "Sent 2 messages. They will appear in your Sent folder shortly"
        );

        let senders = h.provider.senders.lock().expect("lock");
        assert_eq!(senders.len(), 2);
        assert!(senders.iter().all(|s| s == "jane@example.com"));
    }

    #[tokio::test]
    async fn test_target_sends_one_message_to_self() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &cookies,
                Some("subject=Hi&body=Hello&group_id=test"),
            ))
            .await
            .expect("response");
        assert_eq!(
            sealed_flash(&h.auth, &response, Slot::Success, Purpose::FlashSuccess),
            "Sent 1 message. They will appear in your Sent folder shortly"
        );
        assert_eq!(h.provider.senders.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let h = harness();
        let cookies = vec![session_cookie(&h.auth)];
        let response = h
            .app
            .oneshot(request(Method::POST, "/logout", &cookies, None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(location(&response).as_deref(), Some("/"));
        assert_eq!(set_cookie(&response, SESSION_COOKIE).as_deref(), Some(""));
    }

    #[tokio::test]
    async fn site_verification_file_is_served() {
        let h = harness_with(Some("google4f9d0c78202b2454.html"), router);
        let response = h
            .app
            .clone()
            .oneshot(request(Method::GET, "/google4f9d0c78202b2454.html", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("text/html; charset=utf-8")
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        assert_eq!(&body[..], b"google-site-verification: google4f9d0c78202b2454.html");

        // Without the setting the path is just another unknown page.
        let h = harness();
        let response = h
            .app
            .oneshot(request(Method::GET, "/google4f9d0c78202b2454.html", &[], None))
            .await
            .expect("response");
        assert_ne!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn without_auth_home_shows_preview_user() {
        let h = harness_with(None, router_without_auth);

        let response = h
            .app
            .clone()
            .oneshot(request(Method::GET, "/mayor", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let view: HomeView = json(response).await;
        assert_eq!(view.email.as_deref(), Some("Test Email <test@example.org>"));
        assert_eq!(view.auth_url, None);
        assert_eq!(view.groups.len(), 1);
        assert_eq!(view.opening_line.as_deref(), Some("Dear Mayor"));

        let response = h
            .app
            .clone()
            .oneshot(request(Method::GET, "/nobody", &[], None))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = h
            .app
            .oneshot(request(
                Method::POST,
                "/v1/send",
                &[],
                Some("group_id=mayor&subject=Hi&body=Hello"),
            ))
            .await
            .expect("response");
        assert!(response.status().is_client_error());
        assert!(h.provider.senders.lock().expect("senders lock").is_empty());
    }

    #[test]
    fn report_message_counts_failures() {
        use multi_emailer_dispatch::{DeliveryStatus, RecipientOutcome};

        let outcome = |delivered: bool| RecipientOutcome {
            address: "x@example.org".into(),
            message_id: None,
            attempts: 1,
            status: if delivered {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Failed {
                    reason: "bounced".into(),
                }
            },
        };

        let partial = DispatchReport {
            outcomes: vec![outcome(true), outcome(false), outcome(true)],
        };
        assert_eq!(
            report_message(&partial),
            (
                Slot::Success,
                "Sent 2 messages. They will appear in your Sent folder shortly. 1 could not be delivered"
                    .to_string()
            )
        );

        let none = DispatchReport {
            outcomes: vec![outcome(false)],
        };
        assert_eq!(report_message(&none).0, Slot::Error);
    }
}
