use multi_emailer_dispatch::{CountingSemaphore, Dispatcher, MessageProvider};
use multi_emailer_server::{
    app::{self, AppState, LandingLogin, ProviderFactory, Site},
    auth::{Authenticated, Authenticator, GoogleIdentityProvider},
    config::ServerConfig,
    gmail::GmailProvider,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::load().expect("failed to load configuration");
    let key = config.secret_key().expect("invalid secret key");
    let directory = config.directory().expect("invalid recipient groups");
    let redirect_url = config.redirect_url().expect("invalid public host");
    tracing::info!(groups = directory.len(), redirect_url = %redirect_url, "Loaded configuration");

    if config.allow_unencrypted {
        tracing::warn!("Cookies will be sent over unencrypted connections");
    }

    let google = GoogleIdentityProvider::new(
        config.google.client_id.clone(),
        config.google.client_secret.clone(),
        redirect_url.to_string(),
    )
    .expect("failed to create Google client");
    let http = google.http_client().clone();

    let site = Arc::new(Site {
        title: config.title.clone(),
        directory,
        site_verification: config.site_verification(),
    });
    let settings = config.auth_settings().expect("invalid auth settings");
    let landing = LandingLogin::new(Arc::clone(&site), key.clone(), settings.secure_cookies);
    let auth = Arc::new(
        Authenticator::new(Arc::new(google), key, settings).with_login(Arc::new(landing)),
    );

    let dispatcher = Dispatcher::new(
        Arc::new(CountingSemaphore::new(config.dispatch.max_concurrency.max(1))),
        config.dispatch.retry_policy(),
        config.dispatch.job_timeout(),
    );
    let providers: ProviderFactory = Arc::new(move |user: &Authenticated| {
        Arc::new(GmailProvider::new(user.client(&http))) as Arc<dyn MessageProvider>
    });

    let state = AppState {
        auth,
        site,
        dispatcher,
        providers,
    };
    let router = if config.no_google_auth {
        tracing::warn!("Google sign-in is disabled; every visitor is the test user");
        app::router_without_auth(state)
    } else {
        app::router(state)
    };

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
