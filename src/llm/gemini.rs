use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::{Config, SafetyProfile};
use crate::llm::headshot::{GeneratedImage, HeadshotGenerationError, HeadshotModel, ModelOutput};
use crate::llm::media::InlineImage;
use crate::utils::http::build_http_client;

/// Gemini `generateContent` client for image output. Built once at startup
/// and shared through the app state.
#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    safety_settings: SafetyProfile,
}

fn build_safety_settings(profile: SafetyProfile) -> Vec<Value> {
    let threshold = match profile {
        SafetyProfile::Standard => "BLOCK_MEDIUM_AND_ABOVE",
        SafetyProfile::Permissive => "OFF",
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
    ]
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

/// Loggable view of a request: text is truncated and inline images are
/// reduced to their MIME type and length.
fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_output(output: &ModelOutput) -> Value {
    json!({
        "textPreview": output.text.as_deref().map(|text| truncate_for_log(text, 200)),
        "imageParts": output.images.len(),
        "blockReason": output.block_reason,
    })
}

/// Pulls `(message, status)` out of a Google API error body when it is JSON,
/// falling back to a truncated copy of the raw body.
fn summarize_error_body(body: &str) -> (Option<String>, Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        let status = value
            .pointer("/error/status")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string());
        return (message, status, truncate_for_log(&value.to_string(), 2000));
    }

    (None, None, truncate_for_log(trimmed, 2000))
}

pub(crate) fn classify_api_error(
    model: &str,
    status: StatusCode,
    api_status: Option<&str>,
    detail: String,
) -> HeadshotGenerationError {
    let api_status = api_status.unwrap_or_default();
    if status == StatusCode::FORBIDDEN
        || status == StatusCode::UNAUTHORIZED
        || api_status == "PERMISSION_DENIED"
        || api_status == "UNAUTHENTICATED"
    {
        return HeadshotGenerationError::PermissionDenied {
            model: model.to_string(),
            detail,
        };
    }
    if status == StatusCode::NOT_FOUND
        || status == StatusCode::SERVICE_UNAVAILABLE
        || api_status == "NOT_FOUND"
        || api_status == "UNAVAILABLE"
    {
        return HeadshotGenerationError::ModelUnavailable {
            model: model.to_string(),
            detail,
        };
    }
    HeadshotGenerationError::Upstream(format!(
        "Gemini request failed with status {}: {}",
        status, detail
    ))
}

fn content_parts(content: &Value) -> Vec<&Value> {
    if let Some(parts) = content.get("parts").and_then(Value::as_array) {
        return parts.iter().collect();
    }
    if let Some(parts) = content
        .pointer("/multimodalContent/parts")
        .and_then(Value::as_array)
    {
        return parts.iter().collect();
    }
    vec![content]
}

fn inline_image(part: &Value) -> Option<GeneratedImage> {
    let inline = part.get("inlineData").or_else(|| part.get("inline_data"))?;
    let mime_type = inline
        .get("mimeType")
        .or_else(|| inline.get("mime_type"))
        .and_then(Value::as_str)
        .unwrap_or("image/png");
    let data = inline.get("data").and_then(Value::as_str)?;
    if data.is_empty() || !mime_type.starts_with("image/") {
        return None;
    }
    Some(GeneratedImage {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

/// Reduces a `generateContent` response to text and images. Content may
/// carry a `parts` array, a `multimodalContent.parts` array, or the part
/// fields directly; the first shape present wins. The last text fragment is
/// kept and images are collected in order.
pub fn normalize_response(response: &Value) -> ModelOutput {
    let mut output = ModelOutput {
        block_reason: response
            .pointer("/promptFeedback/blockReason")
            .and_then(Value::as_str)
            .map(str::to_string),
        ..Default::default()
    };

    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for candidate in candidates {
        let Some(content) = candidate.get("content") else {
            if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
                output.block_reason.get_or_insert_with(|| reason.to_string());
            }
            continue;
        };
        for part in content_parts(content) {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                output.text = Some(text.to_string());
            }
            if let Some(image) = inline_image(part) {
                output.images.push(image);
            }
        }
    }

    output
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            http: build_http_client(Duration::from_secs(config.gemini_request_timeout_seconds))?,
            api_key: config.gemini_api_key.clone(),
            base_url: config.gemini_base_url.clone(),
            model: config.gemini_image_model.clone(),
            safety_settings: config.gemini_safety_settings,
        })
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    fn build_payload(&self, prompt: &str, image: &InlineImage) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": image.mime_type, "data": image.data } }
                ]
            }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
            "safetySettings": build_safety_settings(self.safety_settings),
        })
    }

    async fn call_gemini_api(&self, payload: Value) -> Result<Value, HeadshotGenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = %self.model, payload = %payload_summary);
        }

        let response = match self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = self.redact_api_key(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, status={:?})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                );
                return Err(HeadshotGenerationError::Upstream(format!(
                    "Gemini request failed: {}",
                    err_text
                )));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let body = self.redact_api_key(&body);
            let (message, api_status, body_summary) = summarize_error_body(&body);
            warn!(
                "Gemini API error: status={}, api_status={:?}, body={}",
                status, api_status, body_summary
            );
            let detail = message.unwrap_or(body_summary);
            return Err(classify_api_error(
                &self.model,
                status,
                api_status.as_deref(),
                detail,
            ));
        }

        response.json::<Value>().await.map_err(|err| {
            HeadshotGenerationError::Upstream(format!(
                "Gemini returned an unreadable response: {}",
                self.redact_api_key(&err.to_string())
            ))
        })
    }
}

#[async_trait]
impl HeadshotModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        image: &InlineImage,
    ) -> Result<ModelOutput, HeadshotGenerationError> {
        let payload = self.build_payload(prompt, image);
        let response = self.call_gemini_api(payload).await?;
        let output = normalize_response(&response);
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(target: "llm.gemini", model = %self.model, response = %summarize_output(&output));
        }
        Ok(output)
    }
}
