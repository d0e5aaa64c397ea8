use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Path, State};
use axum::http::header::{CONTENT_TYPE, ORIGIN};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::CookieJar;
use axum_extra::extract::SignedCookieJar;
use serde::{Deserialize, Serialize};

use super::cors::{self, CorsPolicy};
use super::error::ApiError;
use super::state::AppState;
use crate::checkout::{CheckoutClient, NewCheckoutSession};
use crate::config::Config;
use crate::entitlement;
use crate::providers::{GatewayOutcome, GenerationRequest, InlineImage, IMAGE_ONLY_SUFFIX};
use crate::rate_limit::{Decision, RoutePolicy};
use crate::session;
use crate::types::{ClientId, CreditPack};
use crate::validate;

/// Request body ceiling. Base64 inflates the 12 MiB image cap by a third,
/// plus JSON overhead.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Create the service router.
///
/// All `/api` routes share the CORS policy and body limit; the gallery
/// files are served outside `/api` without either.
pub fn router<C: CheckoutClient>(state: AppState<C>) -> Router {
    let policy = CorsPolicy::new(state.config.cors_origins());

    let api = Router::new()
        .route("/health", get(health::<C>))
        .route("/me", get(me::<C>))
        .route("/config", get(client_config::<C>))
        .route("/examples", get(gallery_index::<C>))
        .route("/buy-credits", post(buy_credits::<C>))
        .route("/confirm", post(confirm::<C>))
        .route("/restore", post(restore::<C>))
        .route("/restore-text", post(restore_text::<C>))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn_with_state(policy, cors::apply));

    Router::new()
        .nest("/api", api)
        .route("/examples/{file}", get(gallery_file::<C>))
        .with_state(state)
}

// ── Request and response bodies ────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestoreRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestoreTextRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BuyCreditsRequest {
    #[serde(default)]
    credits: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ConfirmRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UsageSnapshot {
    credits: u32,
    free_remaining: u8,
}

#[derive(Debug, Serialize)]
struct CreditsOnly {
    credits: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    model_default: String,
    has_key: bool,
    uid: ClientId,
    usage: CreditsOnly,
    free_remaining: u8,
    stripe_test_mode: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MeResponse {
    uid: ClientId,
    credits: u32,
    free_remaining: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientConfigResponse {
    stripe_publishable_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RestoreResponse {
    mime_type: String,
    data: String,
    usage: UsageSnapshot,
}

#[derive(Debug, Serialize)]
struct CheckoutCreatedResponse {
    id: String,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ConfirmResponse {
    ok: bool,
    uid: ClientId,
    credited: bool,
    credits: u32,
}

#[derive(Debug, Serialize)]
struct GalleryResponse {
    items: Vec<GalleryPair>,
}

#[derive(Debug, Serialize)]
struct GalleryPair {
    before: String,
    after: Option<String>,
}

// ── Status ─────────────────────────────────────────────────────────

async fn health<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    jar: CookieJar,
    signed: SignedCookieJar,
) -> impl IntoResponse {
    let (client, jar) = session::resolve_client(jar, state.config.secure_cookies);
    let current = entitlement::read(&signed);
    let stripe_test_mode = state
        .checkout
        .as_deref()
        .is_some_and(CheckoutClient::test_mode);

    (
        jar,
        Json(HealthResponse {
            ok: true,
            model_default: state.config.openrouter.model_default.clone(),
            has_key: state.config.openrouter.api_key.is_some(),
            uid: client,
            usage: CreditsOnly {
                credits: current.credits,
            },
            free_remaining: current.free_remaining(),
            stripe_test_mode,
        }),
    )
}

async fn me<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    jar: CookieJar,
    signed: SignedCookieJar,
) -> impl IntoResponse {
    let (client, jar) = session::resolve_client(jar, state.config.secure_cookies);
    let current = entitlement::read(&signed);

    (
        jar,
        Json(MeResponse {
            uid: client,
            credits: current.credits,
            free_remaining: current.free_remaining(),
        }),
    )
}

async fn client_config<C: CheckoutClient>(
    State(state): State<AppState<C>>,
) -> Json<ClientConfigResponse> {
    Json(ClientConfigResponse {
        stripe_publishable_key: state.config.stripe_publishable_key.clone(),
    })
}

// ── Restoration ────────────────────────────────────────────────────

async fn restore<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    peer: ClientAddr,
    headers: HeaderMap,
    jar: CookieJar,
    signed: SignedCookieJar,
    Json(request): Json<RestoreRequest>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_limit(&state, &headers, peer, "restore", &state.config.limits.restore)?;

    let (prompt, mime_type, data) = match (&request.prompt, &request.mime_type, &request.data) {
        (Some(prompt), Some(mime), Some(data))
            if !prompt.is_empty() && !mime.is_empty() && !data.is_empty() =>
        {
            (prompt, mime, data)
        }
        _ => return Err(ApiError::Invalid("Missing prompt, mimeType, or data")),
    };
    if !validate::is_image_mime(mime_type) {
        return Err(ApiError::Invalid("Invalid mimeType"));
    }
    if validate::decoded_base64_len(data) > validate::MAX_IMAGE_BYTES {
        return Err(ApiError::TooLarge);
    }

    let generation = GenerationRequest {
        prompt: format!("{prompt}{IMAGE_ONLY_SUFFIX}"),
        image: Some(InlineImage {
            mime_type: mime_type.clone(),
            data_base64: data.clone(),
        }),
        model: request.model.clone(),
    };
    finish_restore(&state, jar, signed, generation).await
}

async fn restore_text<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    peer: ClientAddr,
    headers: HeaderMap,
    jar: CookieJar,
    signed: SignedCookieJar,
    Json(request): Json<RestoreTextRequest>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_limit(
        &state,
        &headers,
        peer,
        "restore-text",
        &state.config.limits.restore_text,
    )?;

    let prompt = request
        .prompt
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::Invalid("Missing prompt"))?;

    let generation = GenerationRequest {
        prompt: prompt.to_string(),
        image: None,
        model: request.model.clone(),
    };
    finish_restore(&state, jar, signed, generation).await
}

/// Shared tail of both restoration routes: entitlement gate, provider
/// call, deduction, usage snapshot.
async fn finish_restore<C: CheckoutClient>(
    state: &AppState<C>,
    jar: CookieJar,
    signed: SignedCookieJar,
    generation: GenerationRequest,
) -> Result<(CookieJar, SignedCookieJar, Json<RestoreResponse>), ApiError> {
    if state.gateway.is_empty() {
        return Err(ApiError::Unconfigured("No generation provider configured"));
    }

    let (client, jar) = session::resolve_client(jar, state.config.secure_cookies);
    // Concurrent requests from one client can each pass this gate; the
    // cookie-carried balance has no server-side serialization point.
    let current = entitlement::read(&signed);
    let Some(charge) = current.plan_charge() else {
        return Err(ApiError::PaymentRequired {
            credits: current.credits,
        });
    };

    let image = match state.gateway.generate(&generation).await {
        GatewayOutcome::Success(image) => image,
        GatewayOutcome::Blocked => return Err(ApiError::Blocked),
        GatewayOutcome::Failed { detail } => return Err(ApiError::Upstream { detail }),
    };

    let (signed, updated) =
        entitlement::apply_charge(signed, current, charge, state.config.secure_cookies);
    tracing::info!(
        uid = %client,
        charge = ?charge,
        credits = updated.credits,
        "restoration charged"
    );

    Ok((
        jar,
        signed,
        Json(RestoreResponse {
            mime_type: image.mime_type,
            data: image.data_base64,
            usage: UsageSnapshot {
                credits: updated.credits,
                free_remaining: updated.free_remaining(),
            },
        }),
    ))
}

// ── Purchases ──────────────────────────────────────────────────────

async fn buy_credits<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    peer: ClientAddr,
    headers: HeaderMap,
    jar: CookieJar,
    Json(request): Json<BuyCreditsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_limit(
        &state,
        &headers,
        peer,
        "buy-credits",
        &state.config.limits.buy_credits,
    )?;

    let Some(checkout) = state.checkout.as_deref() else {
        return Err(ApiError::Unconfigured("Stripe not configured"));
    };
    let pack = request
        .credits
        .and_then(|c| CreditPack::try_from(c).ok())
        .ok_or(ApiError::Invalid("Invalid credits pack"))?;

    let (client, jar) = session::resolve_client(jar, state.config.secure_cookies);
    let origin = checkout_origin(&state.config, &headers);

    let session = checkout
        .create_session(NewCheckoutSession {
            client: client.clone(),
            pack,
            success_url: format!("{origin}/?p=success&session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{origin}/?p=cancel"),
        })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "checkout session create failed");
            ApiError::from(e)
        })?;

    tracing::info!(uid = %client, pack = %pack, session = %session.id, "checkout session created");

    Ok((
        jar,
        Json(CheckoutCreatedResponse {
            id: session.id,
            url: session.url,
        }),
    ))
}

async fn confirm<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    peer: ClientAddr,
    headers: HeaderMap,
    jar: CookieJar,
    signed: SignedCookieJar,
    Json(request): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    enforce_limit(&state, &headers, peer, "confirm", &state.config.limits.confirm)?;

    let Some(checkout) = state.checkout.as_deref() else {
        return Err(ApiError::Unconfigured("Stripe not configured"));
    };
    let session_id = request
        .session_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::Invalid("Missing session_id"))?;

    let (client, jar) = session::resolve_client(jar, state.config.secure_cookies);

    let session = checkout.retrieve_session(session_id).await.map_err(|e| {
        tracing::error!(error = %e, session = %session_id, "checkout session retrieve failed");
        ApiError::from(e)
    })?;

    // Ownership before payment state: a foreign session id must not learn
    // whether the session was paid.
    if !session.owned_by(&client) {
        tracing::warn!(uid = %client, session = %session.id, "confirmation by non-purchaser");
        return Err(ApiError::Forbidden);
    }
    if !session.is_paid() {
        return Err(ApiError::Invalid("Payment not completed"));
    }

    let current = entitlement::read(&signed);
    if state.processed.mark(&session.id) {
        let (signed, updated) = entitlement::apply_purchase(
            signed,
            current,
            session.credits_purchased,
            state.config.secure_cookies,
        );
        tracing::info!(
            uid = %client,
            session = %session.id,
            credited = session.credits_purchased,
            credits = updated.credits,
            "purchase credited"
        );
        return Ok((
            jar,
            signed,
            Json(ConfirmResponse {
                ok: true,
                uid: client,
                credited: true,
                credits: updated.credits,
            }),
        ));
    }

    Ok((
        jar,
        signed,
        Json(ConfirmResponse {
            ok: true,
            uid: client,
            credited: false,
            credits: current.credits,
        }),
    ))
}

// ── Gallery ────────────────────────────────────────────────────────

async fn gallery_index<C: CheckoutClient>(
    State(state): State<AppState<C>>,
) -> Result<Json<GalleryResponse>, ApiError> {
    let mut names = Vec::new();
    match tokio::fs::read_dir(&state.config.gallery_dir).await {
        Ok(mut entries) => {
            while let Ok(Some(entry)) = entries.next_entry().await {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        Err(error) => {
            tracing::debug!(error = %error, "gallery directory unavailable");
            return Ok(Json(GalleryResponse { items: Vec::new() }));
        }
    }
    names.sort();

    let items = names
        .iter()
        .filter_map(|name| {
            let index = before_index(name)?;
            let after_prefix = format!("after{index}.");
            let after = names.iter().find(|f| f.starts_with(&after_prefix));
            Some(GalleryPair {
                before: format!("/examples/{name}"),
                after: after.map(|f| format!("/examples/{f}")),
            })
        })
        .collect();

    Ok(Json(GalleryResponse { items }))
}

async fn gallery_file<C: CheckoutClient>(
    State(state): State<AppState<C>>,
    Path(file): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !validate::safe_gallery_name(&file) {
        return Err(ApiError::NotFound);
    }
    let path = state.config.gallery_dir.join(&file);
    let bytes = tokio::fs::read(&path).await.map_err(|_| ApiError::NotFound)?;
    Ok(([(CONTENT_TYPE, validate::gallery_content_type(&file))], bytes))
}

/// Digits of a `beforeN.<ext>` name; `None` for anything else.
fn before_index(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("before")?;
    let len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 || !rest[len..].starts_with('.') {
        return None;
    }
    Some(&rest[..len])
}

// ── Helpers ────────────────────────────────────────────────────────

/// Peer address when the listener provides one; absent under test harnesses.
struct ClientAddr(Option<SocketAddr>);

impl<S: Send + Sync> FromRequestParts<S> for ClientAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
        ))
    }
}

fn enforce_limit<C>(
    state: &AppState<C>,
    headers: &HeaderMap,
    peer: ClientAddr,
    route: &str,
    policy: &RoutePolicy,
) -> Result<(), ApiError> {
    let key = format!("{}:{route}", client_ip(headers, peer));
    match state.limiter.check(&key, policy) {
        Decision::Allowed { .. } => Ok(()),
        Decision::Denied { retry_after } => {
            tracing::warn!(key = %key, "rate limit exceeded");
            Err(ApiError::RateLimited {
                reset_at: unix_now() + retry_after.as_secs(),
            })
        }
    }
}

/// Proxy-aware client address for rate-limit keys.
fn client_ip(headers: &HeaderMap, peer: ClientAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .or_else(|| peer.0.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Base URL for checkout redirects: the caller's origin when trusted,
/// otherwise the configured site origin.
fn checkout_origin(config: &Config, headers: &HeaderMap) -> String {
    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(|o| o.trim_end_matches('/'))
        .filter(|o| {
            config.cors_origins().iter().any(|a| a == o) || cors::is_loopback_origin(o)
        })
        .map(str::to_string)
        .unwrap_or_else(|| config.site_origin.clone())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn before_index_matches_numbered_names() {
        assert_eq!(before_index("before1.jpg"), Some("1"));
        assert_eq!(before_index("before12.png"), Some("12"));
        assert_eq!(before_index("before.jpg"), None);
        assert_eq!(before_index("before2"), None);
        assert_eq!(before_index("beforeX.jpg"), None);
        assert_eq!(before_index("after1.jpg"), None);
    }

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer = ClientAddr(Some(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&headers, peer), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        let peer = ClientAddr(Some(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&headers, peer), "198.51.100.2");

        let peer = ClientAddr(Some(SocketAddr::from(([192, 0, 2, 7], 61000))));
        assert_eq!(client_ip(&HeaderMap::new(), peer), "192.0.2.7");

        assert_eq!(client_ip(&HeaderMap::new(), ClientAddr(None)), "unknown");
    }

    #[test]
    fn checkout_origin_trusts_allowed_and_loopback_only() {
        let config = Config::new().with_site_origin("https://photos.example.com");

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static("https://photos.example.com"));
        assert_eq!(checkout_origin(&config, &headers), "https://photos.example.com");

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static("http://localhost:5173"));
        assert_eq!(checkout_origin(&config, &headers), "http://localhost:5173");

        let mut headers = HeaderMap::new();
        headers.insert(ORIGIN, HeaderValue::from_static("https://evil.example.com"));
        assert_eq!(checkout_origin(&config, &headers), "https://photos.example.com");

        assert_eq!(
            checkout_origin(&config, &HeaderMap::new()),
            "https://photos.example.com"
        );
    }
}
