//! Adapter for the OpenRouter chat-completions API with image output.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::OpenRouterSettings;
use crate::error::{truncate_detail, Error};

use super::{
    contains_policy_marker, resolve_model, upstream_error_detail, GeneratedImage,
    GenerationProvider, GenerationRequest, ProviderReply, GENERATION_TIMEOUT,
};

const POLICY_MARKERS: &[&str] = &["policy", "safety", "not allowed", "blocked"];

const OPERATION: &str = "openrouter generate";

pub struct OpenRouterProvider {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    model_default: String,
    allowed_models: Vec<String>,
    /// Sent as `HTTP-Referer` for OpenRouter app attribution.
    referer: String,
    app_name: String,
}

impl OpenRouterProvider {
    /// Returns `None` when no API key is configured.
    pub(crate) fn from_settings(settings: &OpenRouterSettings, site_origin: &str) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            api_base: settings.api_base.clone(),
            model_default: settings.model_default.clone(),
            allowed_models: settings.allowed_models.clone(),
            referer: settings
                .site_url
                .clone()
                .unwrap_or_else(|| site_origin.to_string()),
            app_name: settings.app_name.clone(),
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        "openrouter"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderReply, Error> {
        let model = resolve_model(
            request.model.as_deref(),
            &self.allowed_models,
            &self.model_default,
        );
        let url = format!("{}/chat/completions", self.api_base);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.app_name)
            .json(&request_payload(request, &model))
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

        let parsed: ChatCompletionResponse = response.json().await?;
        reply_from_response(parsed)
    }
}

fn request_payload(request: &GenerationRequest, model: &str) -> serde_json::Value {
    let mut content = vec![json!({ "type": "text", "text": request.prompt })];
    if let Some(image) = &request.image {
        content.push(json!({
            "type": "image_url",
            "image_url": {
                "url": format!("data:{};base64,{}", image.mime_type, image.data_base64),
            }
        }));
    }
    json!({
        "model": model,
        "modalities": ["image", "text"],
        "messages": [{ "role": "user", "content": content }],
    })
}

fn reply_from_response(response: ChatCompletionResponse) -> Result<ProviderReply, Error> {
    let image_url = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.images.into_iter().next())
        .and_then(|image| image.image_url)
        .ok_or_else(no_image)?;

    let raw = image_url.url();
    if !raw.starts_with("data:image/") {
        return Err(no_image());
    }
    let (mime_type, data_base64) = split_data_url(raw).ok_or_else(|| Error::Upstream {
        operation: OPERATION,
        status: None,
        detail: "malformed image data URL".into(),
    })?;
    Ok(ProviderReply::Image(GeneratedImage {
        mime_type,
        data_base64,
    }))
}

fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime, data) = rest.split_once(";base64,")?;
    if data.is_empty() {
        return None;
    }
    Some((mime.to_string(), data.to_string()))
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
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    images: Vec<MessageImage>,
}

#[derive(Debug, Deserialize)]
struct MessageImage {
    image_url: Option<ImageUrl>,
}

/// Some models send `image_url` as `{ "url": "..." }`, others as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ImageUrl {
    Object { url: String },
    Plain(String),
}

impl ImageUrl {
    fn url(&self) -> &str {
        match self {
            Self::Object { url } => url,
            Self::Plain(url) => url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InlineImage;

    fn parse(body: &str) -> ChatCompletionResponse {
        serde_json::from_str(body).expect("valid response body")
    }

    #[test]
    fn payload_carries_model_modalities_and_data_url() {
        let request = GenerationRequest {
            prompt: "restore".into(),
            image: Some(InlineImage {
                mime_type: "image/jpeg".into(),
                data_base64: "QUJD".into(),
            }),
            model: None,
        };
        let payload = request_payload(&request, "google/gemini-2.5-flash-image-preview");
        assert_eq!(payload["model"], "google/gemini-2.5-flash-image-preview");
        assert_eq!(payload["modalities"][0], "image");
        let content = &payload["messages"][0]["content"];
        assert_eq!(content[0]["text"], "restore");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/jpeg;base64,QUJD"
        );
    }

    #[test]
    fn extracts_image_from_object_form() {
        let response = parse(
            r#"{"choices":[{"message":{"images":[
                {"image_url":{"url":"data:image/png;base64,QQ=="}}
            ]}}]}"#,
        );
        match reply_from_response(response) {
            Ok(ProviderReply::Image(image)) => {
                assert_eq!(image.mime_type, "image/png");
                assert_eq!(image.data_base64, "QQ==");
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn extracts_image_from_string_form() {
        let response = parse(
            r#"{"choices":[{"message":{"images":[
                {"image_url":"data:image/webp;base64,Qg=="}
            ]}}]}"#,
        );
        match reply_from_response(response) {
            Ok(ProviderReply::Image(image)) => assert_eq!(image.mime_type, "image/webp"),
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn non_image_data_url_is_rejected() {
        let response = parse(
            r#"{"choices":[{"message":{"images":[
                {"image_url":"data:text/plain;base64,QQ=="}
            ]}}]}"#,
        );
        assert!(reply_from_response(response).is_err());
    }

    #[test]
    fn missing_base64_separator_is_malformed() {
        let response = parse(
            r#"{"choices":[{"message":{"images":[
                {"image_url":"data:image/png,rawbytes"}
            ]}}]}"#,
        );
        let error = reply_from_response(response).unwrap_err();
        assert!(error.to_string().contains("malformed"));
    }

    #[test]
    fn text_only_reply_is_an_error() {
        let response = parse(r#"{"choices":[{"message":{"content":"sorry"}}]}"#);
        let error = reply_from_response(response).unwrap_err();
        assert!(error.to_string().contains("no image"));
    }

    #[test]
    fn split_data_url_handles_edge_cases() {
        assert_eq!(
            split_data_url("data:image/png;base64,AAAA"),
            Some(("image/png".to_string(), "AAAA".to_string()))
        );
        assert_eq!(split_data_url("data:image/png;base64,"), None);
        assert_eq!(split_data_url("https://example.com/img.png"), None);
    }
}
