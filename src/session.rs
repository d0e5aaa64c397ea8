//! Client identity cookie.
//!
//! Each browser gets an opaque id on first contact, carried in a plain
//! long-lived cookie. It is an addressing handle, not an authentication
//! credential; the entitlement cookies are the signed part.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::types::ClientId;

const UID_COOKIE_NAME: &str = "uid";
const UID_TTL_DAYS: i64 = 365;

/// Read the client id from the jar, minting and setting one if absent.
///
/// Returns the id plus the jar to send back (unchanged when the cookie was
/// already present).
pub fn resolve_client(jar: CookieJar, secure: bool) -> (ClientId, CookieJar) {
    if let Some(cookie) = jar.get(UID_COOKIE_NAME) {
        let value = cookie.value();
        if !value.is_empty() {
            return (ClientId::from(value.to_string()), jar);
        }
    }

    let client = ClientId::generate();
    let jar = jar.add(uid_cookie(&client, secure));
    (client, jar)
}

/// Create the identity cookie.
fn uid_cookie(client: &ClientId, secure: bool) -> Cookie<'static> {
    Cookie::build((UID_COOKIE_NAME, client.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::days(UID_TTL_DAYS))
        .build()
}
