//! Stripe Checkout integration for credit purchases.
//!
//! [`StripeCheckout`] talks to the hosted Checkout API over REST. The
//! [`CheckoutClient`] trait is the seam handlers depend on, so tests can
//! substitute an in-memory double without touching Stripe.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{truncate_detail, Error};
use crate::types::{ClientId, CreditPack};

const CHECKOUT_TIMEOUT: Duration = Duration::from_secs(30);

const STRIPE_API_BASE: &str = "https://api.stripe.com/v1";

/// Payment backend used by the purchase and confirmation handlers.
pub trait CheckoutClient: Send + Sync + 'static {
    /// Create a hosted checkout session for one credit pack.
    fn create_session(
        &self,
        new: NewCheckoutSession,
    ) -> impl Future<Output = Result<CheckoutSession, Error>> + Send;

    /// Fetch a session by id for payment confirmation.
    fn retrieve_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<CheckoutSession, Error>> + Send;

    /// Whether the backend runs on test credentials.
    fn test_mode(&self) -> bool {
        false
    }
}

/// Inputs for creating a checkout session.
#[derive(Debug, Clone)]
pub struct NewCheckoutSession {
    pub client: ClientId,
    pub pack: CreditPack,
    pub success_url: String,
    pub cancel_url: String,
}

/// A checkout session as seen by the confirmation flow.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: Option<String>,
    pub client_reference_id: Option<String>,
    pub credits_purchased: u32,
}

impl CheckoutSession {
    /// Create a session with only the required `id`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            payment_status: None,
            client_reference_id: None,
            credits_purchased: 0,
        }
    }

    /// Set the hosted payment page URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the payment status.
    #[must_use]
    pub fn with_payment_status(mut self, status: impl Into<String>) -> Self {
        self.payment_status = Some(status.into());
        self
    }

    /// Set the purchaser reference.
    #[must_use]
    pub fn with_client_reference_id(mut self, id: impl Into<String>) -> Self {
        self.client_reference_id = Some(id.into());
        self
    }

    /// Set the number of credits the session pays for.
    #[must_use]
    pub fn with_credits_purchased(mut self, credits: u32) -> Self {
        self.credits_purchased = credits;
        self
    }

    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status.as_deref() == Some("paid")
    }

    /// Whether `client` is the purchaser this session was created for.
    #[must_use]
    pub fn owned_by(&self, client: &ClientId) -> bool {
        self.client_reference_id.as_deref() == Some(client.as_str())
    }
}

/// Live Stripe Checkout client.
pub struct StripeCheckout {
    http: reqwest::Client,
    secret_key: String,
    api_base: String,
}

impl StripeCheckout {
    #[must_use]
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            secret_key: secret_key.into(),
            api_base: STRIPE_API_BASE.to_string(),
        }
    }

    /// Point at a different API host (for testing).
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(Error::Upstream {
            operation,
            status: Some(status),
            detail: truncate_detail(&body),
        })
    }
}

impl CheckoutClient for StripeCheckout {
    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::Upstream`]
    /// when Stripe rejects the session.
    async fn create_session(&self, new: NewCheckoutSession) -> Result<CheckoutSession, Error> {
        let response = self
            .http
            .post(format!("{}/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&session_form(&new, self.test_mode()))
            .timeout(CHECKOUT_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response, "checkout session create").await?;
        let session: WireSession = response.json().await?;
        Ok(session.into())
    }

    /// # Errors
    ///
    /// Returns [`Error::Http`] on network failure, or [`Error::Upstream`]
    /// when the session id is unknown.
    async fn retrieve_session(&self, session_id: &str) -> Result<CheckoutSession, Error> {
        let response = self
            .http
            .get(format!("{}/checkout/sessions/{session_id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .timeout(CHECKOUT_TIMEOUT)
            .send()
            .await?;

        let response = Self::ensure_success(response, "checkout session retrieve").await?;
        let session: WireSession = response.json().await?;
        Ok(session.into())
    }

    fn test_mode(&self) -> bool {
        self.secret_key.starts_with("sk_test")
    }
}

/// Form-encoded parameters for the Checkout Sessions API.
fn session_form(new: &NewCheckoutSession, test_mode: bool) -> Vec<(&'static str, String)> {
    let test_prefix = if test_mode { "[TEST] " } else { "" };
    vec![
        ("mode", "payment".to_string()),
        ("payment_method_types[0]", "card".to_string()),
        ("client_reference_id", new.client.as_str().to_string()),
        ("metadata[credits]", new.pack.credits().to_string()),
        (
            "line_items[0][price_data][currency]",
            "usd".to_string(),
        ),
        (
            "line_items[0][price_data][product_data][name]",
            format!("{test_prefix}Tintype Credits ({})", new.pack),
        ),
        (
            "line_items[0][price_data][unit_amount]",
            new.pack.price_cents().to_string(),
        ),
        ("line_items[0][quantity]", "1".to_string()),
        ("success_url", new.success_url.clone()),
        ("cancel_url", new.cancel_url.clone()),
    ]
}

/// Session ids that have already been credited, so a replayed confirmation
/// cannot credit twice. In-memory only; a restart forgets history.
#[derive(Debug, Default)]
pub struct ProcessedSessions {
    seen: Mutex<HashSet<String>>,
}

impl ProcessedSessions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session id. Returns `true` the first time, `false` on replay.
    pub fn mark(&self, session_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string())
    }
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Option<WireMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireMetadata {
    #[serde(default)]
    credits: Option<String>,
}

impl From<WireSession> for CheckoutSession {
    fn from(wire: WireSession) -> Self {
        let credits_purchased = wire
            .metadata
            .and_then(|m| m.credits)
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let mut session = CheckoutSession::new(wire.id).with_credits_purchased(credits_purchased);
        if let Some(url) = wire.url {
            session = session.with_url(url);
        }
        if let Some(status) = wire.payment_status {
            session = session.with_payment_status(status);
        }
        if let Some(reference) = wire.client_reference_id {
            session = session.with_client_reference_id(reference);
        }
        session
    }
}
