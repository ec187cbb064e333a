//! The seam to the service that actually delivers messages.

use async_trait::async_trait;

/// Result of one provider call, decided once at the call boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// A transient failure worth retrying.
    Retryable { status: u16 },
    /// A failure retrying will not fix.
    Permanent { reason: String },
}

impl SendOutcome {
    /// Maps a transport-level failure (no HTTP status) to an outcome.
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Permanent {
            reason: format!("transport error: {err}"),
        }
    }
}

/// Classifies an HTTP status returned by the provider.
#[must_use]
pub fn classify_status(status: u16) -> SendOutcome {
    match status {
        200..=299 => SendOutcome::Delivered,
        429 | 500 | 502 | 503 | 504 => SendOutcome::Retryable { status },
        _ => SendOutcome::Permanent {
            reason: format!("provider responded with status {status}"),
        },
    }
}

/// Sends pre-rendered messages on behalf of a user.
#[async_trait]
pub trait MessageProvider: Send + Sync {
    /// Sends `raw` (a base64url RFC 5322 message) from the mailbox `from`.
    ///
    /// Must not panic; every failure is reported as a [`SendOutcome`].
    async fn send_raw(&self, from: &str, raw: &str) -> SendOutcome;
}
