//! multi-emailer web server.
//!
//! Signs users in with Google and sends one message, personalised per
//! recipient, to every member of a configured group through the user's own
//! Gmail account.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod flash;
pub mod gmail;
