//! Reasoning-service abstraction and its OpenAI-compatible HTTP client.

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure classes for a reasoning call.
///
/// `Unreachable` means the service could not be reached at all (connect
/// failure or transport timeout) and drives the MINIMAL rung; every other
/// variant means the service was reached but the call failed, which degrades
/// the owning stage instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningError {
    /// Connect/DNS failure or transport-level timeout.
    Unreachable(String),
    /// HTTP-level failure, including quota exhaustion (429).
    Failed {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated by the client.
        body: String,
    },
    /// The call succeeded but returned no usable text.
    Empty,
}

impl fmt::Display for ReasoningError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(detail) => write!(f, "reasoning service unreachable: {detail}"),
            Self::Failed { status, body } => {
                write!(f, "reasoning service returned {status}: {body}")
            }
            Self::Empty => write!(f, "reasoning service returned no text"),
        }
    }
}

impl std::error::Error for ReasoningError {}

/// Text-in/text-out reasoning service with two call sites in the pipeline.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Sends one prompt and returns the raw completion text.
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ReasoningError>;
}

/// Async chat-completions client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct OpenAiReasoner {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiReasoner {
    /// Builds a new reasoning client.
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        temperature: f32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing reasoning API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing reasoning model name");
        let mut headers = reqwest::header::HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid reasoning API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build reasoning HTTP client")?;
        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            temperature,
        })
    }
}

#[async_trait]
impl ReasoningService for OpenAiReasoner {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ReasoningError> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            max_tokens,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ReasoningError::Failed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|err| ReasoningError::Failed {
            status: status.as_u16(),
            body: format!("unparseable completion payload: {err}"),
        })?;
        let text = parsed
            .choices
            .into_iter()
            .filter_map(|choice| choice.message.content)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return Err(ReasoningError::Empty);
        }
        Ok(text)
    }
}

fn classify_transport_error(err: reqwest::Error) -> ReasoningError {
    if err.is_connect() || err.is_timeout() {
        ReasoningError::Unreachable(err.to_string())
    } else {
        ReasoningError::Failed {
            status: 0,
            body: err.to_string(),
        }
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    if body.chars().count() <= MAX {
        body.to_string()
    } else {
        body.chars().take(MAX).collect()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
