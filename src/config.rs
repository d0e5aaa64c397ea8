use std::path::PathBuf;

use axum_extra::extract::cookie::Key;
use url::Url;

use crate::error::Error;
use crate::rate_limit::RoutePolicy;
use std::time::Duration;

const DEFAULT_PORT: u16 = 4000;
const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Per-route fixed-window rate limits.
#[derive(Debug, Clone)]
pub struct RouteLimits {
    pub buy_credits: RoutePolicy,
    pub confirm: RoutePolicy,
    pub restore: RoutePolicy,
    pub restore_text: RoutePolicy,
}

impl RouteLimits {
    fn defaults() -> Self {
        Self {
            buy_credits: RoutePolicy::new(20, DEFAULT_WINDOW),
            confirm: RoutePolicy::new(60, DEFAULT_WINDOW),
            restore: RoutePolicy::new(30, DEFAULT_WINDOW),
            restore_text: RoutePolicy::new(20, DEFAULT_WINDOW),
        }
    }
}

/// Primary provider settings (Gemini `generateContent` API).
#[derive(Clone)]
pub(crate) struct GeminiSettings {
    pub(crate) api_key: Option<String>,
    pub(crate) api_base: String,
    pub(crate) model_default: String,
    pub(crate) allowed_models: Vec<String>,
}

impl GeminiSettings {
    fn defaults() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com/v1beta".into(),
            model_default: "gemini-2.5-flash-image-preview".into(),
            allowed_models: vec![
                "gemini-2.5-flash-image-preview".into(),
                "gemini-2.5-flash".into(),
            ],
        }
    }
}

/// Fallback provider settings (OpenRouter chat completions API).
#[derive(Clone)]
pub(crate) struct OpenRouterSettings {
    pub(crate) api_key: Option<String>,
    pub(crate) api_base: String,
    pub(crate) model_default: String,
    pub(crate) allowed_models: Vec<String>,
    pub(crate) site_url: Option<String>,
    pub(crate) app_name: String,
}

impl OpenRouterSettings {
    fn defaults() -> Self {
        Self {
            api_key: None,
            api_base: "https://openrouter.ai/api/v1".into(),
            model_default: "google/gemini-2.5-flash-image-preview".into(),
            allowed_models: vec![
                "google/gemini-2.5-flash-image-preview".into(),
                "google/gemini-2.5-flash".into(),
            ],
            site_url: None,
            app_name: "Tintype".into(),
        }
    }
}

/// Service configuration.
///
/// Use [`from_env()`](Config::from_env) for convention-based setup,
/// or [`new()`](Config::new) with `with_*` methods for full control.
pub struct Config {
    pub(crate) port: u16,
    pub(crate) site_origin: String,
    pub(crate) extra_origins: Vec<String>,
    pub(crate) cookie_key: Key,
    pub(crate) has_cookie_secret: bool,
    pub(crate) secure_cookies: bool,
    pub(crate) gallery_dir: PathBuf,
    pub(crate) gemini: GeminiSettings,
    pub(crate) openrouter: OpenRouterSettings,
    pub(crate) stripe_secret_key: Option<String>,
    pub(crate) stripe_publishable_key: Option<String>,
    pub(crate) limits: RouteLimits,
}

impl Config {
    /// Create a configuration with defaults and an ephemeral signing key.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            site_origin: format!("http://127.0.0.1:{DEFAULT_PORT}"),
            extra_origins: Vec::new(),
            cookie_key: Key::generate(),
            has_cookie_secret: false,
            secure_cookies: false,
            gallery_dir: PathBuf::from("gallery"),
            gemini: GeminiSettings::defaults(),
            openrouter: OpenRouterSettings::defaults(),
            stripe_secret_key: None,
            stripe_publishable_key: None,
            limits: RouteLimits::defaults(),
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// All variables are optional; missing provider or Stripe keys disable
    /// the corresponding feature rather than failing startup.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `PORT` is not a number, an origin is not
    /// a valid URL, or `COOKIE_SECRET` is set but shorter than 64 bytes.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::new();

        if let Some(port) = non_empty_env("PORT") {
            config.port = port
                .parse()
                .map_err(|e| Error::Config(format!("PORT: {e}")))?;
            config.site_origin = format!("http://127.0.0.1:{}", config.port);
        }
        if let Some(origin) = non_empty_env("SITE_ORIGIN") {
            config.site_origin = normalize_origin(&origin)
                .map_err(|e| Error::Config(format!("SITE_ORIGIN: {e}")))?;
        }
        if let Some(list) = non_empty_env("ALLOWED_ORIGINS") {
            for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let origin = normalize_origin(entry)
                    .map_err(|e| Error::Config(format!("ALLOWED_ORIGINS: {entry}: {e}")))?;
                config = config.with_allowed_origin(origin);
            }
        }

        config.secure_cookies = match non_empty_env("SECURE_COOKIES").as_deref() {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            _ => config.site_origin.starts_with("https://"),
        };

        match non_empty_env("COOKIE_SECRET") {
            Some(secret) => {
                let key = Key::try_from(secret.as_bytes()).map_err(|_| {
                    Error::Config(
                        "COOKIE_SECRET is set but invalid (must be at least 64 bytes). \
                         Remove the env var to use an ephemeral key, or provide a valid secret."
                            .into(),
                    )
                })?;
                config.cookie_key = key;
                config.has_cookie_secret = true;
            }
            None => {
                config.cookie_key = Key::generate();
                config.has_cookie_secret = false;
            }
        }

        if let Some(dir) = non_empty_env("GALLERY_DIR") {
            config.gallery_dir = PathBuf::from(dir);
        }

        config.gemini.api_key = non_empty_env("GEMINI_API_KEY");
        if let Some(base) = non_empty_env("GEMINI_API_BASE") {
            config.gemini.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("GEMINI_MODEL") {
            push_unique(&mut config.gemini.allowed_models, &model);
            config.gemini.model_default = model;
        }
        if let Some(list) = non_empty_env("GEMINI_ALLOWED_MODELS") {
            for model in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                push_unique(&mut config.gemini.allowed_models, model);
            }
        }

        config.openrouter.api_key = non_empty_env("OPENROUTER_API_KEY");
        if let Some(base) = non_empty_env("OPENROUTER_API_BASE") {
            config.openrouter.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_env("OPENROUTER_MODEL") {
            push_unique(&mut config.openrouter.allowed_models, &model);
            config.openrouter.model_default = model;
        }
        if let Some(list) = non_empty_env("OPENROUTER_ALLOWED_MODELS") {
            for model in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                push_unique(&mut config.openrouter.allowed_models, model);
            }
        }
        config.openrouter.site_url = non_empty_env("OPENROUTER_SITE_URL");
        if let Some(name) = non_empty_env("OPENROUTER_APP_NAME") {
            config.openrouter.app_name = name;
        }

        config.stripe_secret_key = non_empty_env("STRIPE_SECRET_KEY");
        config.stripe_publishable_key = non_empty_env("STRIPE_PUBLISHABLE_KEY");

        Ok(config)
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_site_origin(mut self, origin: impl Into<String>) -> Self {
        self.site_origin = origin.into();
        self
    }

    /// Add an origin to the CORS allow-list.
    #[must_use]
    pub fn with_allowed_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if !self.extra_origins.contains(&origin) {
            self.extra_origins.push(origin);
        }
        self
    }

    #[must_use]
    pub fn with_cookie_key(mut self, key: Key) -> Self {
        self.cookie_key = key;
        self.has_cookie_secret = true;
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_gallery_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.gallery_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_limits(mut self, limits: RouteLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_stripe_publishable_key(mut self, key: impl Into<String>) -> Self {
        self.stripe_publishable_key = Some(key.into());
        self
    }

    /// Listen port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stripe secret key, when payments are configured.
    #[must_use]
    pub fn stripe_secret_key(&self) -> Option<&str> {
        self.stripe_secret_key.as_deref()
    }

    /// Whether the signing key came from `COOKIE_SECRET` (stable across restarts).
    #[must_use]
    pub fn has_cookie_secret(&self) -> bool {
        self.has_cookie_secret
    }

    /// Full CORS allow-list: site origin, its localhost alias, extras.
    pub(crate) fn cors_origins(&self) -> Vec<String> {
        let mut origins = vec![self.site_origin.clone()];
        let alias = self.site_origin.replace("127.0.0.1", "localhost");
        if alias != self.site_origin {
            origins.push(alias);
        }
        for extra in &self.extra_origins {
            if !origins.contains(extra) {
                origins.push(extra.clone());
            }
        }
        origins
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Read an env var, treating unset and blank the same.
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse and normalize an origin to `scheme://host[:port]` (no trailing slash).
fn normalize_origin(raw: &str) -> Result<String, url::ParseError> {
    let url: Url = raw.parse()?;
    Ok(url.origin().ascii_serialization())
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
