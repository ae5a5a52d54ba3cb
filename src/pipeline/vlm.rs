//! VLM transport: the [`VisionBackend`] seam and its HTTP implementation.
//!
//! The describer only needs "send this image with this prompt, give me the
//! answer text or a [`CallFailure`]". Keeping that behind a trait lets tests
//! and library users inject their own backend (the same role a pre-built
//! provider plays in the conversion config) while the HTTP details stay here.
//!
//! The wire format is the OpenAI-compatible chat-completions shape that most
//! hosted and self-hosted VLM gateways accept:
//!
//! ```text
//! POST {endpoint}
//! Authorization: Bearer {key}
//! { "model": …, "max_tokens": …,
//!   "messages": [{ "role": "user", "content": [
//!       { "type": "text", "text": PROMPT },
//!       { "type": "image_url", "image_url": { "url": "data:image/…;base64,…" } } ] }] }
//! ```

use crate::config::DescribeConfig;
use crate::error::{CallFailure, IeeuError};
use crate::pipeline::encode::ImagePayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One describe request as seen by a backend.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    /// Where the image came from. Used for logging only; never sent.
    pub source: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: usize,
    pub image: ImagePayload,
}

/// Anything that can answer a [`VisionRequest`].
///
/// Implementations must be safe to call concurrently: the concurrent runner
/// keeps up to `max_concurrency` requests in flight on one shared backend.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Perform one round trip. No retries; the describer owns retry policy.
    async fn complete(&self, request: &VisionRequest) -> Result<String, CallFailure>;
}

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: [ContentPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn request_body(request: &VisionRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &request.model,
        messages: [ChatMessage {
            role: "user",
            content: [
                ContentPart::Text {
                    text: &request.prompt,
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image.to_data_url(),
                    },
                },
            ],
        }],
        max_tokens: request.max_tokens,
    }
}

/// Pull `choices[0].message.content` out of a chat-completions body.
fn extract_content(body: &str) -> Result<String, CallFailure> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| CallFailure::Malformed(e.to_string()))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| CallFailure::Malformed("response has no message content".into()))
}

// ── HTTP backend ─────────────────────────────────────────────────────────

/// [`VisionBackend`] talking to an OpenAI-compatible endpoint over HTTPS.
pub struct HttpVisionBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpVisionBackend {
    /// Build a backend with a per-call timeout of `timeout_secs`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout_secs: u64,
    ) -> Result<Self, IeeuError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| IeeuError::Internal(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }

    /// Build from the endpoint, key and timeout of a validated config.
    pub fn from_config(config: &DescribeConfig) -> Result<Self, IeeuError> {
        Self::new(&config.endpoint, &config.api_key, config.timeout_secs)
    }
}

#[async_trait]
impl VisionBackend for HttpVisionBackend {
    async fn complete(&self, request: &VisionRequest) -> Result<String, CallFailure> {
        let body = serde_json::to_vec(&request_body(request))
            .map_err(|e| CallFailure::Request(e.to_string()))?;

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!("{}: HTTP {} ({} bytes)", request.source, status, text.len());

        if !status.is_success() {
            return Err(CallFailure::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        extract_content(&text)
    }
}
