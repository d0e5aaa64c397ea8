use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;

use crate::checkout::{CheckoutClient, ProcessedSessions};
use crate::config::Config;
use crate::providers::ProviderGateway;
use crate::rate_limit::FixedWindow;

/// Shared state for API route handlers.
///
/// `C` is the checkout backend; `None` disables the purchase endpoints.
pub struct AppState<C> {
    pub(crate) config: Arc<Config>,
    pub(crate) gateway: Arc<ProviderGateway>,
    pub(crate) limiter: Arc<FixedWindow>,
    pub(crate) checkout: Option<Arc<C>>,
    pub(crate) processed: Arc<ProcessedSessions>,
}

impl<C> AppState<C> {
    #[must_use]
    pub fn new(config: Config, gateway: ProviderGateway, checkout: Option<C>) -> Self {
        Self {
            config: Arc::new(config),
            gateway: Arc::new(gateway),
            limiter: Arc::new(FixedWindow::new()),
            checkout: checkout.map(Arc::new),
            processed: Arc::new(ProcessedSessions::new()),
        }
    }
}

// Manual Clone: avoid derive adding a `C: Clone` bound.
impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gateway: self.gateway.clone(),
            limiter: self.limiter.clone(),
            checkout: self.checkout.clone(),
            processed: self.processed.clone(),
        }
    }
}

// SignedCookieJar requires Key to be extractable from state
impl<C: CheckoutClient> FromRef<AppState<C>> for Key {
    fn from_ref(state: &AppState<C>) -> Self {
        state.config.cookie_key.clone()
    }
}
