//! Single-read sealed cookies: flash messages and saved drafts.
//!
//! Reading a slot always clears it, whether or not the value unseals.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use multi_emailer_session::{Purpose, SecretKey, seal_for, unseal_for};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Message shown once after something worked.
    Success,
    /// Message shown once after something failed.
    Error,
    /// Draft subject kept across the login round-trip.
    Subject,
    /// Draft body kept across the login round-trip.
    Body,
}

impl Slot {
    #[must_use]
    pub const fn cookie_name(self) -> &'static str {
        match self {
            Self::Success => "flash-success",
            Self::Error => "flash-error",
            Self::Subject => "subject",
            Self::Body => "body",
        }
    }

    const fn purpose(self) -> Purpose {
        match self {
            Self::Success => Purpose::FlashSuccess,
            Self::Error => Purpose::FlashError,
            Self::Subject => Purpose::DraftSubject,
            Self::Body => Purpose::DraftBody,
        }
    }
}

/// Seals `message` into the slot's cookie.
pub fn set(jar: CookieJar, slot: Slot, message: &str, key: &SecretKey, secure: bool) -> CookieJar {
    let value = seal_for(slot.purpose(), message.as_bytes(), key);
    jar.add(
        Cookie::build((slot.cookie_name(), value))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax),
    )
}

/// Reads and clears the slot.
pub fn take(jar: CookieJar, slot: Slot, key: &SecretKey) -> (CookieJar, Option<String>) {
    if jar.get(slot.cookie_name()).is_none() {
        return (jar, None);
    }
    let message = peek(&jar, slot, key);
    (clear(jar, slot), message)
}

/// Reads the slot without clearing it.
pub fn peek(jar: &CookieJar, slot: Slot, key: &SecretKey) -> Option<String> {
    let cookie = jar.get(slot.cookie_name())?;
    let bytes = unseal_for(slot.purpose(), cookie.value(), key)
        .inspect_err(|e| {
            tracing::debug!(cookie = slot.cookie_name(), error = %e, "Discarding unreadable cookie");
        })
        .ok()?;
    String::from_utf8(bytes).ok()
}

pub fn clear(jar: CookieJar, slot: Slot) -> CookieJar {
    jar.remove(Cookie::build((slot.cookie_name(), "")).path("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, header};

    fn incoming(jar: &CookieJar) -> CookieJar {
        // Replays the cookies a browser would send on the next request.
        let cookie_header = jar
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&cookie_header).expect("header"),
        );
        CookieJar::from_headers(&headers)
    }

    #[test]
    fn flash_is_read_once() {
        let key = SecretKey::generate();
        let outgoing = set(CookieJar::new(), Slot::Success, "Sent 3 messages", &key, true);

        let (jar, message) = take(incoming(&outgoing), Slot::Success, &key);
        assert_eq!(message.as_deref(), Some("Sent 3 messages"));
        assert!(jar.get(Slot::Success.cookie_name()).is_none());

        let (_, again) = take(jar, Slot::Success, &key);
        assert_eq!(again, None);
    }

    #[test]
    fn unreadable_cookie_is_still_cleared() {
        let key = SecretKey::generate();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("flash-error=garbage"),
        );

        let (jar, message) = take(CookieJar::from_headers(&headers), Slot::Error, &key);
        assert_eq!(message, None);
        assert!(jar.get(Slot::Error.cookie_name()).is_none());
    }

    #[test]
    fn slots_do_not_cross() {
        let key = SecretKey::generate();
        let outgoing = set(CookieJar::new(), Slot::Error, "boom", &key, true);
        let value = outgoing
            .get(Slot::Error.cookie_name())
            .expect("cookie")
            .value()
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("flash-success={value}")).expect("header"),
        );
        let (_, message) = take(CookieJar::from_headers(&headers), Slot::Success, &key);
        assert_eq!(message, None);
    }

    #[test]
    fn peek_keeps_the_cookie() {
        let key = SecretKey::generate();
        let jar = incoming(&set(CookieJar::new(), Slot::Subject, "Parking", &key, true));
        assert_eq!(peek(&jar, Slot::Subject, &key).as_deref(), Some("Parking"));
        assert!(jar.get(Slot::Subject.cookie_name()).is_some());
    }
}
