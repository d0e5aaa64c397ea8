//! Entitlement state: the credit balance and the one-time free use.
//!
//! Both values are carried in signed cookies rather than a server-side
//! record, so any process holding the signing key can serve any client.
//! The jar verifies signatures on read; a tampered cookie is simply absent.

use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

/// Credits consumed by one successful generation.
pub const RESTORE_COST: u32 = 100;

const CREDITS_COOKIE_NAME: &str = "credits";
const FREE_USED_COOKIE_NAME: &str = "free_used";
const ENTITLEMENT_TTL_DAYS: i64 = 730;

/// A client's current usage rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entitlement {
    pub credits: u32,
    pub free_used: bool,
}

/// Which allowance a successful generation consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    FreeUse,
    Credits,
}

impl Entitlement {
    /// Allowance to consume for the next generation, free use first.
    ///
    /// `None` means the client can afford neither.
    #[must_use]
    pub fn plan_charge(&self) -> Option<Charge> {
        if !self.free_used {
            Some(Charge::FreeUse)
        } else if self.credits >= RESTORE_COST {
            Some(Charge::Credits)
        } else {
            None
        }
    }

    #[must_use]
    pub fn free_remaining(&self) -> u8 {
        u8::from(!self.free_used)
    }
}

/// Read the entitlement carried by the request.
///
/// Missing or unparseable values read as zero credits and free use intact.
#[must_use]
pub fn read(jar: &SignedCookieJar) -> Entitlement {
    let credits = jar
        .get(CREDITS_COOKIE_NAME)
        .and_then(|c| c.value().parse::<u32>().ok())
        .unwrap_or(0);
    let free_used = jar
        .get(FREE_USED_COOKIE_NAME)
        .is_some_and(|c| c.value() == "1");
    Entitlement { credits, free_used }
}

/// Re-issue the credits cookie with a new balance.
#[must_use]
pub fn store_credits(jar: SignedCookieJar, credits: u32, secure: bool) -> SignedCookieJar {
    jar.add(entitlement_cookie(
        CREDITS_COOKIE_NAME,
        credits.to_string(),
        secure,
    ))
}

/// Mark the lifetime free use as consumed. Monotonic, there is no inverse.
#[must_use]
pub fn store_free_used(jar: SignedCookieJar, secure: bool) -> SignedCookieJar {
    jar.add(entitlement_cookie(
        FREE_USED_COOKIE_NAME,
        "1".to_string(),
        secure,
    ))
}

/// Consume the planned allowance after a confirmed success.
///
/// Exactly one of the two cookies is re-issued: the free flag for
/// [`Charge::FreeUse`], the debited balance for [`Charge::Credits`].
#[must_use]
pub fn apply_charge(
    jar: SignedCookieJar,
    current: Entitlement,
    charge: Charge,
    secure: bool,
) -> (SignedCookieJar, Entitlement) {
    match charge {
        Charge::FreeUse => {
            let updated = Entitlement {
                free_used: true,
                ..current
            };
            (store_free_used(jar, secure), updated)
        }
        Charge::Credits => {
            let updated = Entitlement {
                credits: current.credits.saturating_sub(RESTORE_COST),
                ..current
            };
            (store_credits(jar, updated.credits, secure), updated)
        }
    }
}

/// Add purchased credits to the balance.
#[must_use]
pub fn apply_purchase(
    jar: SignedCookieJar,
    current: Entitlement,
    credits: u32,
    secure: bool,
) -> (SignedCookieJar, Entitlement) {
    let updated = Entitlement {
        credits: current.credits.saturating_add(credits),
        ..current
    };
    (store_credits(jar, updated.credits, secure), updated)
}

fn entitlement_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/".to_string())
        .max_age(Duration::days(ENTITLEMENT_TTL_DAYS))
        .build()
}
