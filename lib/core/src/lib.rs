//! Core domain types and utilities for multi-emailer.
//!
//! This crate provides the identifiers and error handling foundation shared
//! by the session, dispatch and server crates.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{GroupId, MessageId, ParseIdError};
