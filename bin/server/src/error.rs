//! Domain error types for server operations.
//!
//! Detail stays in the logs; responses carry only a generic message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rootcause::prelude::Report;
use std::fmt;

/// Errors from loading and validating configuration at startup.
#[derive(Debug)]
pub enum ConfigError {
    /// The config sources could not be read or deserialized.
    Load { details: String },
    /// `secret_key` is set but unusable.
    InvalidSecretKey { details: String },
    /// `auth.session_lifetime_hours` is zero or too long.
    InvalidSessionLifetime { hours: u32 },
    /// `public_host` is not a URL.
    InvalidPublicHost { host: String, reason: String },
    /// A group id is missing or not a valid slug.
    InvalidGroup { id: String, reason: String },
    /// A recipient or cc address does not parse.
    InvalidAddress {
        group: String,
        address: String,
        reason: String,
    },
    /// The groups do not form a valid directory.
    InvalidDirectory { details: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load { details } => write!(f, "failed to load configuration: {}", details),
            Self::InvalidSecretKey { details } => write!(f, "invalid secret_key: {}", details),
            Self::InvalidSessionLifetime { hours } => write!(
                f,
                "invalid auth.session_lifetime_hours {}: must be between 1 and {}",
                hours,
                crate::config::MAX_SESSION_LIFETIME_HOURS
            ),
            Self::InvalidPublicHost { host, reason } => {
                write!(f, "invalid public_host '{}': {}", host, reason)
            }
            Self::InvalidGroup { id, reason } => {
                write!(f, "invalid group id '{}': {}", id, reason)
            }
            Self::InvalidAddress {
                group,
                address,
                reason,
            } => write!(
                f,
                "could not parse address '{}' in group '{}': {}",
                address, group, reason
            ),
            Self::InvalidDirectory { details } => {
                write!(f, "invalid recipient groups: {}", details)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load {
            details: err.to_string(),
        }
    }
}

/// Errors from talking to the identity provider.
#[derive(Debug)]
pub enum ProviderError {
    /// The HTTP client could not be built.
    Client { details: String },
    /// The authorization code was not accepted.
    Exchange { details: String },
    /// The refresh token was not accepted.
    Refresh { details: String },
    /// The user-info endpoint failed or returned something unusable.
    UserInfo { details: String },
    /// The provider did not answer in time.
    Timeout { operation: &'static str },
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client { details } => write!(f, "HTTP client error: {}", details),
            Self::Exchange { details } => write!(f, "code exchange failed: {}", details),
            Self::Refresh { details } => write!(f, "token refresh failed: {}", details),
            Self::UserInfo { details } => write!(f, "user info request failed: {}", details),
            Self::Timeout { operation } => write!(f, "{} timed out", operation),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Ways the callback can fail after the state has been accepted.
#[derive(Debug)]
pub enum CallbackError {
    /// The provider has not verified the user's address.
    UnverifiedEmail { email: String },
    /// The address is outside the allowed domains.
    DomainNotAllowed { email: String },
    /// Talking to the provider failed.
    Provider(Report<ProviderError>),
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnverifiedEmail { email } => {
                write!(f, "'{}' is not a verified address", email)
            }
            Self::DomainNotAllowed { email } => {
                write!(f, "'{}' is not in an allowed domain", email)
            }
            Self::Provider(report) => write!(f, "{}", report),
        }
    }
}

impl From<Report<ProviderError>> for CallbackError {
    fn from(report: Report<ProviderError>) -> Self {
        Self::Provider(report)
    }
}

impl IntoResponse for CallbackError {
    fn into_response(self) -> Response {
        match &self {
            Self::UnverifiedEmail { .. } => {
                tracing::warn!(error = %self, "Rejected login");
                (
                    StatusCode::FORBIDDEN,
                    "Your Google account does not have a verified email address",
                )
                    .into_response()
            }
            Self::DomainNotAllowed { .. } => {
                tracing::warn!(error = %self, "Rejected login");
                (
                    StatusCode::FORBIDDEN,
                    "Your email address is not allowed to use this site",
                )
                    .into_response()
            }
            Self::Provider(_) => {
                tracing::error!(error = %self, "Authentication with provider failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response()
            }
        }
    }
}
