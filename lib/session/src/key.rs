//! The process-wide symmetric key used for every sealed token.
//!
//! Every server instance that should accept the same cookies must be
//! configured with the same key.

use crate::error::KeyError;
use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt;

/// Size of the symmetric key in bytes (256 bits).
pub const KEY_SIZE: usize = 32;

/// A 256-bit key for sealing tokens.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: [u8; KEY_SIZE],
}

impl SecretKey {
    /// Generates a new random key from OS randomness.
    ///
    /// # Panics
    ///
    /// Panics if the operating system cannot supply secure randomness.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parses a key from a 64-character hex string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not exactly 64 hex characters.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        if encoded.len() != KEY_SIZE * 2 {
            return Err(KeyError::WrongLength {
                actual: encoded.len(),
            });
        }
        let mut bytes = [0u8; KEY_SIZE];
        hex::decode_to_slice(encoded, &mut bytes).map_err(|_| KeyError::InvalidHex)?;
        Ok(Self { bytes })
    }

    /// Returns the key bytes.
    ///
    /// Never log or persist the returned value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}
