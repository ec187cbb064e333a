//! Shared `Result` alias.
//!
//! Crates keep their own error enums and return them wrapped in a
//! rootcause `Report` at fallible boundaries such as configuration loading
//! and provider calls.

use rootcause::Report;

/// A `Result` whose error is a `Report` with context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Unreadable;

    impl fmt::Display for Unreadable {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "config file unreadable")
        }
    }

    impl std::error::Error for Unreadable {}

    fn load(readable: bool) -> Result<u16, Unreadable> {
        if readable { Ok(8048) } else { Err(Unreadable.into()) }
    }

    #[test]
    fn domain_errors_become_reports() {
        assert_eq!(load(true).ok(), Some(8048));
        let report = load(false).expect_err("unreadable");
        assert!(report.to_string().contains("config file unreadable"));
    }
}
