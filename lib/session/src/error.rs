//! Error types for the session crate.
//!
//! - `SealError`: a sealed token could not be opened
//! - `KeyError`: configured key material is unusable
//! - `SessionError`: a sealed payload opened but did not describe a usable session or state

use std::fmt;

/// Errors from opening a sealed token.
///
/// The variants exist for logging and tests only. Callers must treat every
/// variant the same way (as an absent token) so the distinction never
/// reaches the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealError {
    /// The token is not valid base64url.
    Decode,
    /// The decoded token is shorter than a nonce.
    TooShort,
    /// The authentication tag did not verify (wrong key, wrong purpose, or tampering).
    Authentication,
}

impl fmt::Display for SealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => write!(f, "sealed token is not valid base64url"),
            Self::TooShort => write!(f, "sealed token is too short"),
            Self::Authentication => write!(f, "sealed token failed authentication"),
        }
    }
}

impl std::error::Error for SealError {}

/// Errors from parsing secret key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The key is not 64 hex characters long.
    WrongLength { actual: usize },
    /// The key contains a non-hex character.
    InvalidHex,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongLength { actual } => {
                write!(
                    f,
                    "secret key has wrong length ({actual}); should be a 64-character hex string"
                )
            }
            Self::InvalidHex => write!(f, "secret key is not valid hex"),
        }
    }
}

impl std::error::Error for KeyError {}

/// Errors from restoring a session or anti-forgery state from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The token could not be unsealed.
    Sealed(SealError),
    /// The token opened but its payload did not parse.
    Malformed { reason: String },
    /// The session or state is past its validity window.
    Expired,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sealed(err) => write!(f, "{err}"),
            Self::Malformed { reason } => write!(f, "malformed sealed payload: {reason}"),
            Self::Expired => write!(f, "sealed payload has expired"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SealError> for SessionError {
    fn from(err: SealError) -> Self {
        Self::Sealed(err)
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed {
            reason: err.to_string(),
        }
    }
}
