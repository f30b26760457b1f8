use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{ProviderError, RetryHint, ServiceError, ServiceResult};
use crate::rate_limit::parse_duration_hint;

/// One page image handed to the vision model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// 1-based position in the source document
    pub page_number: u32,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl PageImage {
    fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// A vision-capable model that turns page images into text
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Send one prompt with `images` attached and return the raw model output
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ProviderError>;
}

/// Client for an OpenAI-compatible chat completions API
pub struct VisionClient {
    client: Client,
    config: ProviderConfig,
}

impl VisionClient {
    pub fn new(config: ProviderConfig) -> ServiceResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ServiceError::Provider(ProviderError::Connection {
                    url: config.base_url.clone(),
                    source: e,
                })
            })?;

        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        images: &[PageImage],
    ) -> Result<String, ProviderError> {
        let url = self.completions_url();

        let mut content = Vec::with_capacity(images.len() + 1);
        content.push(ContentPart::Text {
            text: prompt.to_string(),
        });
        content.extend(images.iter().map(|image| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
            },
        }));

        let request = ChatRequest {
            model,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(&url).json(&request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ProviderError::Connection {
                url: url.clone(),
                source: e,
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let hint = retry_hint_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body, hint, model));
        }

        let body = response.text().await.map_err(|e| ProviderError::Connection {
            url: url.clone(),
            source: e,
        })?;
        let chat_response: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::InvalidResponse { source: e })?;

        let text = chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ProviderError::EmptyResponse)?;

        debug!(
            model,
            images = images.len(),
            chars = text.len(),
            "Vision completion received"
        );
        Ok(text)
    }
}

/// Read the provider's backoff headers; values that do not parse are ignored
pub(crate) fn retry_hint_from_headers(headers: &HeaderMap) -> RetryHint {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };
    let millis = |v: &str| {
        v.parse::<f64>()
            .ok()
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| Duration::from_millis(n.round() as u64))
    };

    RetryHint {
        retry_after_ms: header("retry-after-ms").and_then(millis),
        retry_after: header("retry-after")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|secs| Duration::from_millis((secs * 1000.0).round() as u64)),
        reset_tokens: header("x-ratelimit-reset-tokens").and_then(parse_duration_hint),
    }
}

/// Map a non-success response to a provider error.
///
/// HTTP 429 and an error code or type mentioning a rate limit both count as
/// rate limiting; some gateways report it with other status codes.
fn classify_error(status: u16, body: &str, hint: RetryHint, model: &str) -> ProviderError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);

    let message = detail
        .as_ref()
        .and_then(|d| d.message.clone())
        .unwrap_or_else(|| body.to_string());
    let code = detail.as_ref().and_then(|d| d.code.clone());
    let error_type = detail.as_ref().and_then(|d| d.error_type.clone());

    let mentions_rate_limit = [code.as_deref(), error_type.as_deref()]
        .into_iter()
        .flatten()
        .any(|s| s.contains("rate_limit"));

    if status == 429 || mentions_rate_limit {
        return ProviderError::RateLimited {
            status,
            code,
            message,
            hint,
        };
    }

    if status == 404 || code.as_deref() == Some("model_not_found") {
        return ProviderError::ModelNotFound {
            model: model.to_string(),
        };
    }

    ProviderError::Request { status, message }
}

// Internal chat completions API types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_request_body_shape() {
        let image = PageImage {
            page_number: 1,
            mime_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        };
        let request = ChatRequest {
            model: "gpt-4o-mini",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: "read this".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image.data_url(),
                        },
                    },
                ],
            }],
            temperature: 0.0,
            max_tokens: 4096,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
    }

    #[test]
    fn test_retry_hint_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("850"));
        headers.insert("retry-after", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset-tokens", HeaderValue::from_static("1m30s"));

        let hint = retry_hint_from_headers(&headers);
        assert_eq!(hint.retry_after_ms, Some(Duration::from_millis(850)));
        assert_eq!(hint.retry_after, Some(Duration::from_secs(2)));
        assert_eq!(hint.reset_tokens, Some(Duration::from_secs(90)));

        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_hint_from_headers(&headers), RetryHint::default());
    }

    #[test]
    fn test_classify_rate_limit_by_code() {
        let body = r#"{"error":{"message":"Rate limit reached. Please try again in 850ms.","type":"tokens","code":"rate_limit_exceeded"}}"#;
        let err = classify_error(400, body, RetryHint::default(), "gpt-4o-mini");
        assert!(matches!(
            err,
            ProviderError::RateLimited { status: 400, ref message, .. } if message.contains("850ms")
        ));

        let err = classify_error(429, "slow down", RetryHint::default(), "gpt-4o-mini");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_classify_other_errors() {
        let err = classify_error(404, "{}", RetryHint::default(), "gpt-9");
        assert!(matches!(err, ProviderError::ModelNotFound { ref model } if model == "gpt-9"));

        let body = r#"{"error":{"message":"server exploded","type":"server_error"}}"#;
        let err = classify_error(500, body, RetryHint::default(), "gpt-4o");
        assert!(matches!(
            err,
            ProviderError::Request { status: 500, ref message } if message == "server exploded"
        ));
    }
}
