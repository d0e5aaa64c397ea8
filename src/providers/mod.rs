//! Generation providers and the ordered-fallback gateway.
//!
//! Each provider adapts one upstream wire format to a shared request/outcome
//! shape. The gateway walks the configured adapters in order (primary first)
//! until one returns a usable image, classifying content-policy refusals
//! separately from transport or parse failures so the final response message
//! stays accurate.

mod gemini;
mod openrouter;

pub use gemini::GeminiProvider;
pub use openrouter::OpenRouterProvider;

use std::time::Duration;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::Error;

pub(crate) const GENERATION_TIMEOUT: Duration = Duration::from_secs(90);

/// Fixed user-facing message for content-policy refusals.
pub const POLICY_BLOCK_MESSAGE: &str =
    "We can't process images that may include minors, celebrities, or sensitive/controversial topics.";

/// Instruction appended to the prompt when an input image is attached.
pub const IMAGE_ONLY_SUFFIX: &str =
    "\n\nReturn only the restored photograph as an image (no text).";

/// An image travelling base64-encoded with its declared content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data_base64: String,
}

/// One generation request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub image: Option<InlineImage>,
    /// Caller-requested model; resolved against each adapter's allow-list.
    pub model: Option<String>,
}

/// A generated image as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data_base64: String,
}

/// What a single provider produced.
#[derive(Debug)]
pub enum ProviderReply {
    Image(GeneratedImage),
    /// The provider refused on content-safety grounds.
    Blocked,
}

/// Final gateway classification after the fallback chain.
#[derive(Debug)]
pub enum GatewayOutcome {
    Success(GeneratedImage),
    Blocked,
    Failed { detail: String },
}

/// One upstream generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one generation. `Err` means transport, HTTP, or parse failure;
    /// a policy refusal is a successful call with [`ProviderReply::Blocked`].
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderReply, Error>;
}

/// Ordered list of providers with fallback.
pub struct ProviderGateway {
    providers: Vec<Box<dyn GenerationProvider>>,
}

impl ProviderGateway {
    #[must_use]
    pub fn new(providers: Vec<Box<dyn GenerationProvider>>) -> Self {
        Self { providers }
    }

    /// Build the gateway from configuration: Gemini first when its key is
    /// present, then OpenRouter.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut providers: Vec<Box<dyn GenerationProvider>> = Vec::new();
        if let Some(gemini) = GeminiProvider::from_settings(&config.gemini) {
            providers.push(Box::new(gemini));
        }
        if let Some(openrouter) =
            OpenRouterProvider::from_settings(&config.openrouter, &config.site_origin)
        {
            providers.push(Box::new(openrouter));
        }
        Self::new(providers)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Try each provider in order until one yields an image.
    ///
    /// A policy block from any provider outranks a transport failure in the
    /// final classification; the failure detail is the most recent error.
    pub async fn generate(&self, request: &GenerationRequest) -> GatewayOutcome {
        let mut blocked = false;
        let mut last_detail: Option<String> = None;

        for provider in &self.providers {
            match provider.generate(request).await {
                Ok(ProviderReply::Image(image)) => {
                    tracing::info!(
                        provider = provider.name(),
                        mime = %image.mime_type,
                        "generation succeeded"
                    );
                    return GatewayOutcome::Success(image);
                }
                Ok(ProviderReply::Blocked) => {
                    tracing::warn!(
                        provider = provider.name(),
                        "content policy block, falling through"
                    );
                    blocked = true;
                }
                Err(error) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %error,
                        "generation failed, falling through"
                    );
                    last_detail = Some(error.to_string());
                }
            }
        }

        if blocked {
            GatewayOutcome::Blocked
        } else {
            GatewayOutcome::Failed {
                detail: last_detail
                    .unwrap_or_else(|| "no generation provider configured".to_string()),
            }
        }
    }
}

/// Resolve a caller-requested model against an allow-list.
///
/// Unknown or absent requests silently fall back to the default model, so an
/// arbitrary caller-supplied name never reaches a provider.
pub(crate) fn resolve_model(
    requested: Option<&str>,
    allowed: &[String],
    default_model: &str,
) -> String {
    match requested.map(str::trim).filter(|m| !m.is_empty()) {
        Some(model) if allowed.iter().any(|a| a == model) => model.to_string(),
        _ => default_model.to_string(),
    }
}

/// Case-insensitive scan of upstream error text for policy markers.
pub(crate) fn contains_policy_marker(text: &str, markers: &[&str]) -> bool {
    let haystack = text.to_ascii_lowercase();
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Best-effort error message out of an upstream JSON error body.
pub(crate) fn upstream_error_detail(body: &str) -> Option<String> {
    let payload: serde_json::Value = serde_json::from_str(body).ok()?;
    payload
        .pointer("/error/message")
        .or_else(|| payload.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
