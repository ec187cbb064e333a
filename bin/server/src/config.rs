//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional YAML file (path from
//! `EMAILER_CONFIG`, default `config.yml`) with environment variables layered
//! on top. Environment keys use the `EMAILER_` prefix and `__` between nested
//! keys, e.g. `EMAILER_GOOGLE__CLIENT_ID`.

use crate::auth::AuthSettings;
use crate::error::ConfigError;
use multi_emailer_core::{GroupId, Result as CoreResult};
use multi_emailer_dispatch::{Mailbox, Recipient, RecipientDirectory, RecipientGroup, RetryPolicy};
use multi_emailer_session::SecretKey;
use reqwest::Url;
use rootcause::prelude::Report;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "EMAILER_CONFIG";

/// Config file used when `EMAILER_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

/// Longest allowed `auth.session_lifetime_hours`, one year.
pub const MAX_SESSION_LIFETIME_HOURS: u32 = 365 * 24;

/// Server configuration.
#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    /// 64 hex characters. A random key is generated when unset, which logs
    /// everyone out on restart.
    #[serde(default)]
    pub secret_key: Option<String>,

    /// Public base URL, e.g. `https://emailer.example.com`. Defaults to
    /// `http://localhost:{port}`.
    #[serde(default)]
    pub public_host: Option<String>,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Site title shown in the home view.
    #[serde(default)]
    pub title: String,

    /// Omit the `Secure` flag on cookies. Only for plain-HTTP development.
    #[serde(default)]
    pub allow_unencrypted: bool,

    /// Skip Google sign-in and show every page as a fixed test user. Nothing
    /// can be sent. Only for development.
    #[serde(default)]
    pub no_google_auth: bool,

    /// Google site verification file, e.g. `google4f9d0c78202b2454.html`.
    /// See [`ServerConfig::site_verification`].
    #[serde(default)]
    pub google_site_verification: Option<String>,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("public_host", &self.public_host)
            .field("port", &self.port)
            .field("title", &self.title)
            .field("allow_unencrypted", &self.allow_unencrypted)
            .field("no_google_auth", &self.no_google_auth)
            .field("google_site_verification", &self.google_site_verification)
            .field("google", &self.google)
            .field("auth", &self.auth)
            .field("dispatch", &self.dispatch)
            .field("groups", &self.groups.len())
            .finish_non_exhaustive()
    }
}

/// Google OAuth client registration.
#[derive(Clone, Default, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl fmt::Debug for GoogleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Authentication flow configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Absolute session lifetime in hours, at most `MAX_SESSION_LIFETIME_HOURS`.
    #[serde(default = "default_session_lifetime_hours")]
    pub session_lifetime_hours: u32,

    /// How long a login started by this server may take to come back, in minutes.
    #[serde(default = "default_auth_window_minutes")]
    pub auth_window_minutes: u32,

    /// Timeout for each call to the identity provider.
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,

    /// E-mail domains allowed to log in. Empty allows every domain.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

fn default_port() -> u16 {
    8048
}

fn default_callback_path() -> String {
    "/auth/callback".to_string()
}

fn default_session_lifetime_hours() -> u32 {
    14 * 24
}

fn default_auth_window_minutes() -> u32 {
    60
}

fn default_provider_timeout_seconds() -> u64 {
    30
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            callback_path: default_callback_path(),
            session_lifetime_hours: default_session_lifetime_hours(),
            auth_window_minutes: default_auth_window_minutes(),
            provider_timeout_seconds: default_provider_timeout_seconds(),
            allowed_domains: Vec::new(),
        }
    }
}

/// Dispatch pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Process-wide cap on concurrent sends.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before retry `n` is `n * backoff_base_ms`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
}

fn default_max_concurrency() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_job_timeout_seconds() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            job_timeout_seconds: default_job_timeout_seconds(),
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.backoff_base_ms),
        }
    }

    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }
}

/// A recipient group as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub recipients: Vec<RecipientConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientConfig {
    pub email: String,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub opening_line: Option<String>,
}

impl ServerConfig {
    /// Loads configuration from the file named by `EMAILER_CONFIG` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result does not deserialize.
    pub fn load() -> CoreResult<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from(&path)
    }

    /// Loads configuration from `path` (if it exists) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result does not deserialize.
    pub fn load_from(path: &Path) -> CoreResult<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("EMAILER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("auth.allowed_domains"),
            )
            .build()
            .map_err(ConfigError::from)?
            .try_deserialize()
            .map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Returns the configured secret key, or a fresh random one if none is set.
    ///
    /// # Errors
    ///
    /// Returns an error if `secret_key` is set but is not 64 hex characters.
    pub fn secret_key(&self) -> CoreResult<SecretKey, ConfigError> {
        match self.secret_key.as_deref().map(str::trim) {
            None | Some("") => {
                tracing::warn!(
                    "No secret_key configured; generated a random one. Sessions will not survive a restart"
                );
                Ok(SecretKey::generate())
            }
            Some(hex) => SecretKey::from_hex(hex).map_err(|e| {
                ConfigError::InvalidSecretKey {
                    details: e.to_string(),
                }
                .into()
            }),
        }
    }

    /// The public base URL of the site.
    ///
    /// # Errors
    ///
    /// Returns an error if `public_host` does not parse as a URL.
    pub fn base_url(&self) -> CoreResult<Url, ConfigError> {
        let host = match self.public_host.as_deref().map(str::trim) {
            None | Some("") => format!("http://localhost:{}", self.port),
            Some(host) if host.contains("://") => host.to_string(),
            Some(host) => format!("http://{host}"),
        };
        Url::parse(&host).map_err(|e| {
            ConfigError::InvalidPublicHost {
                host: host.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// The absolute URL the provider redirects back to.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or callback path is invalid.
    pub fn redirect_url(&self) -> CoreResult<Url, ConfigError> {
        let base = self.base_url()?;
        base.join(&self.auth.callback_path).map_err(|e| {
            ConfigError::InvalidPublicHost {
                host: base.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// The site verification file name, if one is configured.
    ///
    /// `google` is prepended and `.html` appended when missing.
    #[must_use]
    pub fn site_verification(&self) -> Option<String> {
        let name = self.google_site_verification.as_deref().map(str::trim)?;
        if name.is_empty() {
            return None;
        }
        let mut file = String::with_capacity(name.len() + 11);
        if !name.starts_with("google") {
            file.push_str("google");
        }
        file.push_str(name);
        if !name.ends_with(".html") {
            file.push_str(".html");
        }
        Some(file)
    }

    /// Settings for the authentication middleware.
    ///
    /// # Errors
    ///
    /// Returns an error if the session lifetime is zero or longer than
    /// `MAX_SESSION_LIFETIME_HOURS`.
    pub fn auth_settings(&self) -> CoreResult<AuthSettings, ConfigError> {
        let hours = self.auth.session_lifetime_hours;
        if !(1..=MAX_SESSION_LIFETIME_HOURS).contains(&hours) {
            return Err(ConfigError::InvalidSessionLifetime { hours }.into());
        }
        Ok(AuthSettings {
            callback_path: self.auth.callback_path.clone(),
            session_lifetime: chrono::Duration::hours(i64::from(hours)),
            auth_window: chrono::Duration::minutes(i64::from(self.auth.auth_window_minutes)),
            provider_timeout: Duration::from_secs(self.auth.provider_timeout_seconds),
            allowed_domains: self
                .auth
                .allowed_domains
                .iter()
                .map(|domain| domain.trim().to_ascii_lowercase())
                .filter(|domain| !domain.is_empty())
                .collect(),
            secure_cookies: !self.allow_unencrypted,
            ..AuthSettings::default()
        })
    }

    /// Validates the configured groups and builds the recipient directory.
    ///
    /// Group names default to the id and blank opening lines to
    /// "To whom it may concern".
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid group id, an unparsable address, or a
    /// duplicate or reserved group id.
    pub fn directory(&self) -> CoreResult<RecipientDirectory, ConfigError> {
        let groups = self
            .groups
            .iter()
            .map(build_group)
            .collect::<Result<Vec<_>, _>>()?;
        RecipientDirectory::new(groups).map_err(|e| {
            ConfigError::InvalidDirectory {
                details: e.to_string(),
            }
            .into()
        })
    }
}

fn build_group(group: &GroupConfig) -> Result<RecipientGroup, Report<ConfigError>> {
    let id: GroupId = group.id.parse().map_err(|e: multi_emailer_core::ParseIdError| {
        ConfigError::InvalidGroup {
            id: group.id.clone(),
            reason: e.reason,
        }
    })?;

    let parse = |address: &str| -> Result<Mailbox, Report<ConfigError>> {
        address.trim().parse().map_err(|e: multi_emailer_dispatch::AddressError| {
            ConfigError::InvalidAddress {
                group: group.id.clone(),
                address: address.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    };

    let mut recipients = Vec::with_capacity(group.recipients.len());
    for recipient in &group.recipients {
        let cc = recipient
            .cc
            .iter()
            .map(|cc| parse(cc))
            .collect::<Result<Vec<_>, _>>()?;
        recipients.push(
            Recipient::new(parse(&recipient.email)?)
                .with_cc(cc)
                .with_opening_line(recipient.opening_line.clone().unwrap_or_default()),
        );
    }

    Ok(RecipientGroup::new(id, group.name.clone(), recipients))
}
