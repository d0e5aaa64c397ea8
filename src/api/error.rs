use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::providers::POLICY_BLOCK_MESSAGE;

pub(crate) const PAYMENT_REQUIRED_MESSAGE: &str =
    "Not enough credits. Each image costs 100 credits.";

/// Request-level errors for the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or missing request fields.
    #[error("{0}")]
    Invalid(&'static str),

    /// Decoded image exceeds the size cap.
    #[error("Image too large")]
    TooLarge,

    /// Fixed-window limit exhausted for this client and route.
    #[error("rate limited")]
    RateLimited {
        /// Unix seconds at which the window resets.
        reset_at: u64,
    },

    /// No free use left and not enough credits.
    #[error("payment required")]
    PaymentRequired { credits: u32 },

    /// Every provider refused the content.
    #[error("content blocked")]
    Blocked,

    /// Checkout session belongs to a different client.
    #[error("forbidden")]
    Forbidden,

    /// Unknown gallery file.
    #[error("not found")]
    NotFound,

    /// All providers failed operationally.
    #[error("upstream failure: {detail}")]
    Upstream { detail: String },

    /// A required backend is not configured.
    #[error("{0}")]
    Unconfigured(&'static str),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Invalid(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::TooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "error": "Image too large" })),
            )
                .into_response(),
            Self::RateLimited { reset_at } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(json!({ "error": "rate_limited" })),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert("x-ratelimit-reset", HeaderValue::from(reset_at));
                response
            }
            Self::PaymentRequired { credits } => (
                StatusCode::PAYMENT_REQUIRED,
                Json(json!({
                    "error": "payment_required",
                    "message": PAYMENT_REQUIRED_MESSAGE,
                    "credits": credits,
                    "freeRemaining": 0,
                })),
            )
                .into_response(),
            Self::Blocked => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "blocked", "message": POLICY_BLOCK_MESSAGE })),
            )
                .into_response(),
            Self::Forbidden => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": "forbidden" }))).into_response()
            }
            Self::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" }))).into_response()
            }
            Self::Upstream { detail } => {
                tracing::warn!(detail = %detail, "upstream generation failure");
                let message = if detail.is_empty() {
                    "Unable to process this image right now.".to_string()
                } else {
                    detail
                };
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({ "error": "upstream_error", "message": message })),
                )
                    .into_response()
            }
            Self::Unconfigured(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message })),
            )
                .into_response(),
            Self::Internal(ref message) => {
                tracing::error!(error = %message, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Internal error" })),
                )
                    .into_response()
            }
        }
    }
}

impl From<crate::error::Error> for ApiError {
    fn from(e: crate::error::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (ApiError::Invalid("Missing prompt"), StatusCode::BAD_REQUEST),
            (ApiError::TooLarge, StatusCode::PAYLOAD_TOO_LARGE),
            (
                ApiError::RateLimited { reset_at: 0 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                ApiError::PaymentRequired { credits: 50 },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (ApiError::Blocked, StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::Forbidden, StatusCode::FORBIDDEN),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (
                ApiError::Upstream {
                    detail: "boom".into(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                ApiError::Unconfigured("Stripe not configured"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Internal("oops".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.into_response().status(), expected);
        }
    }

    #[tokio::test]
    async fn payment_required_body_carries_balance() {
        let response = ApiError::PaymentRequired { credits: 50 }.into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "payment_required");
        assert_eq!(body["credits"], 50);
        assert_eq!(body["freeRemaining"], 0);
        assert!(body["message"].as_str().unwrap().contains("100 credits"));
    }

    #[tokio::test]
    async fn rate_limited_sets_reset_header() {
        let response = ApiError::RateLimited { reset_at: 1_700_000_000 }.into_response();
        assert_eq!(
            response.headers().get("x-ratelimit-reset").unwrap(),
            "1700000000"
        );
        let body = body_json(response).await;
        assert_eq!(body["error"], "rate_limited");
    }

    #[tokio::test]
    async fn blocked_body_uses_the_fixed_policy_message() {
        let body = body_json(ApiError::Blocked.into_response()).await;
        assert_eq!(body["error"], "blocked");
        assert_eq!(body["message"], POLICY_BLOCK_MESSAGE);
    }

    #[tokio::test]
    async fn upstream_surfaces_detail_when_present() {
        let body = body_json(
            ApiError::Upstream {
                detail: "quota exhausted".into(),
            }
            .into_response(),
        )
        .await;
        assert_eq!(body["message"], "quota exhausted");

        let generic = body_json(ApiError::Upstream { detail: String::new() }.into_response()).await;
        assert!(generic["message"]
            .as_str()
            .unwrap()
            .contains("Unable to process"));
    }

    #[tokio::test]
    async fn internal_detail_stays_server_side() {
        let body = body_json(ApiError::Internal("secret key leaked".into()).into_response()).await;
        assert_eq!(body["error"], "Internal error");
    }
}
