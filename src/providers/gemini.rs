//! Adapter for the Gemini `generateContent` API.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::GeminiSettings;
use crate::error::{truncate_detail, Error};

use super::{
    contains_policy_marker, resolve_model, upstream_error_detail, GeneratedImage,
    GenerationProvider, GenerationRequest, ProviderReply, GENERATION_TIMEOUT,
};

/// Markers in a non-2xx body that indicate a content-policy refusal rather
/// than an operational failure.
const POLICY_MARKERS: &[&str] = &["safety", "prohibited_content", "policy"];

const OPERATION: &str = "gemini generate";

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    model_default: String,
    allowed_models: Vec<String>,
}

impl GeminiProvider {
    /// Returns `None` when no API key is configured.
    pub(crate) fn from_settings(settings: &GeminiSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            api_base: settings.api_base.clone(),
            model_default: settings.model_default.clone(),
            allowed_models: settings.allowed_models.clone(),
        })
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderReply, Error> {
        let model = resolve_model(
            request.model.as_deref(),
            &self.allowed_models,
            &self.model_default,
        );
        let url = format!("{}/models/{}:generateContent", self.api_base, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_payload(request))
            .timeout(GENERATION_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if contains_policy_marker(&body, POLICY_MARKERS) {
                return Ok(ProviderReply::Blocked);
            }
            return Err(Error::Upstream {
                operation: OPERATION,
                status: Some(status.as_u16()),
                detail: upstream_error_detail(&body).unwrap_or_else(|| truncate_detail(&body)),
            });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        reply_from_response(parsed)
    }
}

fn request_payload(request: &GenerationRequest) -> serde_json::Value {
    let mut parts = vec![json!({ "text": request.prompt })];
    if let Some(image) = &request.image {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": image.data_base64,
            }
        }));
    }
    json!({ "contents": [{ "parts": parts }] })
}

fn reply_from_response(response: GenerateContentResponse) -> Result<ProviderReply, Error> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(no_image());
    };

    if matches!(
        candidate.finish_reason.as_deref(),
        Some("SAFETY" | "PROHIBITED_CONTENT")
    ) {
        return Ok(ProviderReply::Blocked);
    }

    candidate
        .content
        .unwrap_or_default()
        .parts
        .into_iter()
        .find_map(|part| part.inline_data)
        .map(|inline| {
            ProviderReply::Image(GeneratedImage {
                mime_type: inline.mime_type.unwrap_or_else(|| "image/png".to_string()),
                data_base64: inline.data,
            })
        })
        .ok_or_else(no_image)
}

fn no_image() -> Error {
    Error::Upstream {
        operation: OPERATION,
        status: None,
        detail: "response contained no image data".into(),
    }
}

// ── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    // both spellings appear in the wild
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
    data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InlineImage;

    fn parse(body: &str) -> GenerateContentResponse {
        serde_json::from_str(body).expect("valid response body")
    }

    #[test]
    fn payload_includes_prompt_and_inline_image() {
        let request = GenerationRequest {
            prompt: "restore".into(),
            image: Some(InlineImage {
                mime_type: "image/jpeg".into(),
                data_base64: "QUJD".into(),
            }),
            model: None,
        };
        let payload = request_payload(&request);
        assert_eq!(payload["contents"][0]["parts"][0]["text"], "restore");
        assert_eq!(
            payload["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(
            payload["contents"][0]["parts"][1]["inlineData"]["data"],
            "QUJD"
        );
    }

    #[test]
    fn payload_without_image_has_a_single_part() {
        let request = GenerationRequest {
            prompt: "colorize".into(),
            image: None,
            model: None,
        };
        let payload = request_payload(&request);
        assert_eq!(
            payload["contents"][0]["parts"]
                .as_array()
                .map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn extracts_inline_image_in_either_spelling() {
        let camel = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"inlineData":{"mimeType":"image/webp","data":"QQ=="}}
            ]}}]}"#,
        );
        match reply_from_response(camel) {
            Ok(ProviderReply::Image(image)) => {
                assert_eq!(image.mime_type, "image/webp");
                assert_eq!(image.data_base64, "QQ==");
            }
            other => panic!("expected image, got {other:?}"),
        }

        let snake = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"inline_data":{"mime_type":"image/png","data":"Qg=="}}
            ]}}]}"#,
        );
        assert!(matches!(
            reply_from_response(snake),
            Ok(ProviderReply::Image(_))
        ));
    }

    #[test]
    fn missing_mime_defaults_to_png() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[
                {"inlineData":{"data":"QQ=="}}
            ]}}]}"#,
        );
        match reply_from_response(response) {
            Ok(ProviderReply::Image(image)) => assert_eq!(image.mime_type, "image/png"),
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn safety_finish_reasons_are_blocked() {
        for reason in ["SAFETY", "PROHIBITED_CONTENT"] {
            let response = parse(&format!(
                r#"{{"candidates":[{{"finishReason":"{reason}"}}]}}"#
            ));
            assert!(
                matches!(reply_from_response(response), Ok(ProviderReply::Blocked)),
                "finishReason {reason} should block"
            );
        }
    }

    #[test]
    fn text_only_candidates_are_an_error() {
        let response = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"cannot help"}]},"finishReason":"STOP"}]}"#,
        );
        let error = reply_from_response(response).unwrap_err();
        assert!(error.to_string().contains("no image"));
    }

    #[test]
    fn empty_candidate_list_is_an_error() {
        let response = parse(r#"{"candidates":[]}"#);
        assert!(reply_from_response(response).is_err());
    }
}
