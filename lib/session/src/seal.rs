//! Sealed tokens: authenticated encryption of byte payloads into URL-safe strings.
//!
//! Format: `base64url(nonce (24 bytes) || ciphertext || tag (16 bytes))`,
//! XChaCha20-Poly1305 under the process-wide [`SecretKey`].
//!
//! A token is bound to a [`Purpose`] through the AEAD associated data, so a
//! flash message can never be replayed as a session cookie even when the
//! plaintexts happen to share a shape.

use crate::error::SealError;
use crate::key::SecretKey;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use rand::rngs::OsRng;

/// Size of the random nonce in bytes (192 bits for XChaCha20).
pub const NONCE_SIZE: usize = 24;

/// What a sealed token is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// No namespace. Used by [`seal`] and [`unseal`].
    Unbound,
    /// The long-lived session cookie.
    Session,
    /// The anti-forgery `state` parameter of the login redirect.
    State,
    /// A one-shot success message.
    FlashSuccess,
    /// A one-shot error message.
    FlashError,
    /// A draft subject preserved across the login round-trip.
    DraftSubject,
    /// A draft body preserved across the login round-trip.
    DraftBody,
}

impl Purpose {
    /// Returns the label bound into the token as associated data.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unbound => "",
            Self::Session => "session",
            Self::State => "state",
            Self::FlashSuccess => "flash-success",
            Self::FlashError => "flash-error",
            Self::DraftSubject => "draft-subject",
            Self::DraftBody => "draft-body",
        }
    }
}

/// Seals `payload` without a purpose namespace.
#[must_use]
pub fn seal(payload: &[u8], key: &SecretKey) -> String {
    seal_for(Purpose::Unbound, payload, key)
}

/// Opens a token produced by [`seal`].
///
/// # Errors
///
/// Returns [`SealError`] if the token is malformed, too short, or fails authentication.
pub fn unseal(token: &str, key: &SecretKey) -> Result<Vec<u8>, SealError> {
    unseal_for(Purpose::Unbound, token, key)
}

/// Seals `payload` for a specific purpose.
///
/// # Panics
///
/// Panics if the operating system cannot supply randomness for the nonce.
#[must_use]
pub fn seal_for(purpose: Purpose, payload: &[u8], key: &SecretKey) -> String {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: payload,
                aad: purpose.label().as_bytes(),
            },
        )
        .expect("XChaCha20-Poly1305 encryption of an in-memory payload");

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    URL_SAFE_NO_PAD.encode(sealed)
}

/// Opens a token sealed for `purpose`.
///
/// # Errors
///
/// - [`SealError::Decode`] if the token is not base64url
/// - [`SealError::TooShort`] if the decoded token cannot hold a nonce
/// - [`SealError::Authentication`] if the tag does not verify
pub fn unseal_for(purpose: Purpose, token: &str, key: &SecretKey) -> Result<Vec<u8>, SealError> {
    let sealed = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| SealError::Decode)?;
    if sealed.len() < NONCE_SIZE {
        return Err(SealError::TooShort);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: purpose.label().as_bytes(),
            },
        )
        .map_err(|_| SealError::Authentication)
}
