#![doc = include_str!("../README.md")]

pub mod api;
pub mod checkout;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod providers;
pub mod rate_limit;
pub mod session;
pub mod types;
pub mod validate;

// Re-exports for convenient access
pub use api::{ApiError, AppState, CorsPolicy, router};
pub use checkout::{
    CheckoutClient, CheckoutSession, NewCheckoutSession, ProcessedSessions, StripeCheckout,
};
pub use config::{Config, RouteLimits};
pub use entitlement::{Charge, Entitlement, RESTORE_COST};
pub use error::Error;
pub use providers::{
    GatewayOutcome, GeminiProvider, GeneratedImage, GenerationProvider, GenerationRequest,
    IMAGE_ONLY_SUFFIX, InlineImage, OpenRouterProvider, POLICY_BLOCK_MESSAGE, ProviderGateway,
    ProviderReply,
};
pub use rate_limit::{Decision, FixedWindow, RoutePolicy};
pub use types::{CREDIT_PACKS, ClientId, CreditPack};
