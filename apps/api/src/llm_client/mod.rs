//! LLM client: the single point of entry for all model calls in the interviewer.
//!
//! ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
//! Pipeline stages talk to the `CompletionService` port; `LlmClient` is the
//! production implementation behind it.
//!
//! Model: claude-sonnet-4-5 (fixed, not configurable)

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::interview::stages::Stage;

#[cfg(test)]
pub mod mock;
pub mod prompts;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
/// This is intentionally hardcoded to prevent accidental drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const TEMPERATURE: f32 = 0.2;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("LLM stream error: {0}")]
    Stream(String),

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// One piece of streamed model output, tagged with the stage that requested it.
#[derive(Debug, Clone, PartialEq)]
pub struct StageChunk {
    pub stage: Stage,
    pub text: String,
}

/// Finite, non-restartable sequence of streamed chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StageChunk, LlmError>> + Send>>;

/// Text-completion port consumed by the interview pipeline.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Blocking completion: returns the whole model output once it is done.
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError>;

    /// Streaming completion: yields output chunks as the model produces them.
    async fn complete_stream(
        &self,
        prompt: &str,
        system: &str,
        stage: Stage,
    ) -> Result<ChunkStream, LlmError>;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Extracts the text content from the first text block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: DeltaText,
}

#[derive(Debug, Deserialize)]
struct DeltaText {
    text: Option<String>,
}

/// The LLM client used by the interview pipeline.
/// Wraps the Anthropic Messages API with retry logic and SSE streaming.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
    timeout: Duration,
    /// Retries after the first attempt; `0` disables retrying.
    max_retries: u32,
}

impl LlmClient {
    pub fn new(api_key: String, timeout: Duration, max_retries: u32) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_key,
            timeout,
            max_retries,
        })
    }

    /// First attempt plus configured retries.
    fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn request<'a>(&self, prompt: &'a str, system: &'a str, stream: bool) -> AnthropicRequest<'a> {
        AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
            stream,
        }
    }

    async fn send(&self, body: &AnthropicRequest<'_>) -> Result<reqwest::Response, LlmError> {
        self.client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            LlmError::Http(e)
        }
    }

    /// Makes a raw call to the Claude API, returning the full response object.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub async fn call(&self, prompt: &str, system: &str) -> Result<LlmResponse, LlmError> {
        let request_body = self.request(prompt, system, false);

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..self.attempts() {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, capped at 32s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1).min(5)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self.send(&request_body).await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(e);
                    continue;
                }
            };

            let status = response.status();

            if is_retryable(status) {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(api_error(status, body));
            }

            let llm_response: LlmResponse = response.json().await?;

            debug!(
                "LLM call succeeded: input_tokens={}, output_tokens={}",
                llm_response.usage.input_tokens, llm_response.usage.output_tokens
            );

            return Ok(llm_response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: self.max_retries,
        }))
    }

    /// Opens a streaming call. No retries: a stream that already produced
    /// output cannot be replayed without duplicating tokens downstream.
    pub async fn call_stream(
        &self,
        prompt: &str,
        system: &str,
        stage: Stage,
    ) -> Result<ChunkStream, LlmError> {
        let request_body = self.request(prompt, system, true);
        let response = self.send(&request_body).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("LLM stream for {} rejected with {}", stage, status);
            return Err(api_error(status, body));
        }

        let timeout_secs = self.timeout.as_secs();
        let mut decoder = SseDecoder::default();
        let chunks = response
            .bytes_stream()
            .map(move |chunk| match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) if e.is_timeout() => vec![Err(LlmError::Timeout { secs: timeout_secs })],
                Err(e) => vec![Err(LlmError::Http(e))],
            })
            .flat_map(stream::iter)
            .map(move |delta| delta.map(|text| StageChunk { stage, text }));

        Ok(Box::pin(chunks))
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(&self, prompt: &str, system: &str) -> Result<String, LlmError> {
        let response = self.call(prompt, system).await?;
        response
            .text()
            .map(str::to_string)
            .ok_or(LlmError::EmptyContent)
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        system: &str,
        stage: Stage,
    ) -> Result<ChunkStream, LlmError> {
        self.call_stream(prompt, system, stage).await
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn api_error(status: StatusCode, body: String) -> LlmError {
    // Try to parse error message
    let message = serde_json::from_str::<AnthropicError>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

/// Incremental decoder for the Anthropic SSE wire format.
///
/// Network chunks do not respect line boundaries, so bytes are buffered
/// until a full line is available:
/// ```text
/// event: content_block_delta
/// data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"Hello"}}
/// ```
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    event: String,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, LlmError>> {
        self.buffer.extend_from_slice(bytes);

        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(|c| c == '\r' || c == '\n');

            if line.is_empty() {
                self.event.clear();
            } else if let Some(event) = line.strip_prefix("event:") {
                self.event = event.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                if let Some(item) = self.decode_data(data.trim_start()) {
                    out.push(item);
                }
            }
        }
        out
    }

    fn decode_data(&self, data: &str) -> Option<Result<String, LlmError>> {
        match self.event.as_str() {
            "content_block_delta" => match serde_json::from_str::<ContentBlockDelta>(data) {
                Ok(delta) => delta.delta.text.filter(|text| !text.is_empty()).map(Ok),
                Err(e) => {
                    warn!("Undecodable content_block_delta: {e}: {data}");
                    Some(Err(LlmError::Parse(e)))
                }
            },
            "error" => {
                let message = serde_json::from_str::<AnthropicError>(data)
                    .map(|e| e.error.message)
                    .unwrap_or_else(|_| data.to_string());
                Some(Err(LlmError::Stream(message)))
            }
            // message_start, content_block_start, ping, message_delta, message_stop
            _ => None,
        }
    }
}
