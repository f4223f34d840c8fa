//! The seam between the extraction core and the external model provider.
//!
//! Everything above [`ModelTransport`] is provider-agnostic: the invoker
//! hands over instructions, image bytes, the output schema, and a
//! temperature, and gets back raw response text or a [`TransportError`].
//! Tests inject scripted implementations here; production uses
//! [`GeminiTransport`], a thin reqwest adapter.
//!
//! Transport failures are terminal for the attempt that raised them. The
//! invoker retries malformed *output*, never a broken *connection*; rate
//! limits and auth problems would only get worse under a tight retry loop.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

/// One extraction request as seen by the wire: instructions, image, contract.
#[derive(Debug)]
pub struct TransportRequest<'a> {
    pub system_instruction: &'a str,
    pub user_instruction: &'a str,
    pub image: &'a [u8],
    pub image_mime: &'a str,
    /// Structured-output schema the provider must honour.
    pub response_schema: &'a Value,
    /// Sampling temperature; the pipeline always passes 0 for determinism.
    pub temperature: f32,
}

/// Failure at the network/provider level. Not retried by the invoker.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum TransportError {
    /// The call exceeded the configured per-call timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider rejected the credentials (HTTP 401/403).
    #[error("authentication rejected: {detail}")]
    Auth { detail: String },

    /// The provider returned HTTP 429; the caller should back off.
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Connection-level failure before any HTTP status arrived.
    #[error("network error: {detail}")]
    Network { detail: String },

    /// The provider answered with a non-retryable API error.
    #[error("provider API error: {detail}")]
    Api { detail: String },
}

/// A callable that turns one [`TransportRequest`] into response text.
///
/// `Send + Sync` because batch workers share one transport behind an `Arc`.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn generate(&self, request: TransportRequest<'_>) -> Result<String, TransportError>;

    /// Provider/model label for logs and health output.
    fn model_name(&self) -> &str;
}

// ── Gemini adapter ───────────────────────────────────────────────────────

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// All safety categories are disabled: prescriptions are medical text that
/// default content filters routinely suppress, and the pipeline only ever
/// transcribes what is already on the page.
const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// [`ModelTransport`] implementation for the Google Gemini `generateContent`
/// API, with the image inlined as base64 and the schema attached as a
/// structured-output requirement.
pub struct GeminiTransport {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiTransport {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Point the adapter at a different endpoint (self-hosted proxy, test server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, request: &TransportRequest<'_>) -> Value {
        json!({
            "system_instruction": {
                "parts": [{"text": request.system_instruction}]
            },
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": request.user_instruction},
                    {"inline_data": {
                        "mime_type": request.image_mime,
                        "data": STANDARD.encode(request.image),
                    }}
                ]
            }],
            "generationConfig": {
                "temperature": request.temperature,
                "responseMimeType": "application/json",
                "responseSchema": request.response_schema,
            },
            "safetySettings": SAFETY_CATEGORIES
                .iter()
                .map(|c| json!({"category": c, "threshold": "BLOCK_NONE"}))
                .collect::<Vec<_>>(),
        })
    }
}

#[async_trait]
impl ModelTransport for GeminiTransport {
    async fn generate(&self, request: TransportRequest<'_>) -> Result<String, TransportError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let body = self.request_body(&request);
        debug!(model = %self.model, image_bytes = request.image.len(), "Calling Gemini");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network {
                detail: e.to_string(),
            })?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(TransportError::Auth {
                detail: format!("HTTP {status}"),
            });
        }
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(TransportError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransportError::Api {
                detail: format!("HTTP {status}: {}", truncate(&detail, 300)),
            });
        }

        let payload: Value = response.json().await.map_err(|e| TransportError::Api {
            detail: format!("unparseable response body: {e}"),
        })?;

        extract_text(&payload)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Pull the generated text out of a `generateContent` response, surfacing
/// block/finish reasons when the provider returned no usable candidate.
fn extract_text(payload: &Value) -> Result<String, TransportError> {
    if let Some(parts) = payload["candidates"][0]["content"]["parts"].as_array() {
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() {
            return Ok(text);
        }
    }

    let reason = payload["promptFeedback"]["blockReason"]
        .as_str()
        .or_else(|| payload["candidates"][0]["finishReason"].as_str())
        .unwrap_or("no candidates in response");
    Err(TransportError::Api {
        detail: format!("empty response: {reason}"),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_carries_schema_and_safety_off() {
        let transport = GeminiTransport::new("key", "gemini-2.0-flash-exp");
        let schema = json!({"type": "object"});
        let req = TransportRequest {
            system_instruction: "sys",
            user_instruction: "user",
            image: &[1, 2, 3],
            image_mime: "image/png",
            response_schema: &schema,
            temperature: 0.0,
        };
        let body = transport.request_body(&req);

        assert_eq!(body["generationConfig"]["temperature"], 0.0);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(body["generationConfig"]["responseSchema"], schema);

        let safety = body["safetySettings"].as_array().unwrap();
        assert_eq!(safety.len(), 4);
        assert!(safety.iter().all(|s| s["threshold"] == "BLOCK_NONE"));

        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn extract_text_joins_parts() {
        let payload = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]}
            }]
        });
        assert_eq!(extract_text(&payload).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn extract_text_reports_block_reason() {
        let payload = json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        });
        let err = extract_text(&payload).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 300), "hi");
    }
}
