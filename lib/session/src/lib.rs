//! Sealed tokens and client-held sessions for multi-emailer.
//!
//! Everything the server remembers about a user between requests travels in
//! values sealed by [`seal::seal_for`]: the session cookie, the anti-forgery
//! `state`, flash messages and saved drafts.

pub mod error;
pub mod key;
pub mod seal;
pub mod session;
pub mod state;

pub use error::{KeyError, SealError, SessionError};
pub use key::{KEY_SIZE, SecretKey};
pub use seal::{NONCE_SIZE, Purpose, seal, seal_for, unseal, unseal_for};
pub use session::{DelegatedCredential, Identity, Session};
pub use state::AntiForgeryState;
