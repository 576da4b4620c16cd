//! Gemini AI provider implementation.
//!
//! Streams text from Google's Gemini `streamGenerateContent` endpoint using
//! its server-sent-events response mode.

use super::{FinishReason, ProviderError, ProviderStream, StreamChunk, TextProvider};
use async_trait::async_trait;
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Secret<String>,
    pub model: String,
    pub api_base: String,
    /// Longest wait for the connection or for the next body bytes.
    pub read_timeout: Duration,
}

/// Gemini text provider.
pub struct GeminiTextProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiTextProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        // Idle limits only: a healthy stream may run for as long as the model writes.
        let client = Client::builder()
            .connect_timeout(config.read_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| {
                ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// Build the API URL for the configured model and method.
    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/models/{}:{}",
            self.config.api_base, self.config.model, method
        )
    }
}

fn build_request(system_instruction: &str, prompt: &str) -> GenerateContentRequest {
    GenerateContentRequest {
        system_instruction: Some(Content {
            role: None,
            parts: vec![Part {
                text: system_instruction.to_string(),
            }],
        }),
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
    }
}

#[async_trait]
impl TextProvider for GeminiTextProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn generate_stream(
        &self,
        system_instruction: &str,
        prompt: &str,
    ) -> Result<ProviderStream, ProviderError> {
        let request = build_request(system_instruction, prompt);
        let url = format!("{}?alt=sse", self.api_url("streamGenerateContent"));

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Starting streaming request to Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(ProviderError::RateLimited);
            }

            return Err(ProviderError::ApiError(format!(
                "Gemini API error {}: {}",
                status, error_text
            )));
        }

        Ok(Box::pin(event_stream(response.bytes_stream())))
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.config.api_key.expose_secret().is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key not configured".to_string(),
            ));
        }

        // Fetching the model's metadata verifies both the key and the model name.
        let url = format!("{}/models/{}", self.config.api_base, self.config.model);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::ApiError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }
}

// ============================================================================
// SSE response decoding
// ============================================================================

/// Incremental decoder for a `text/event-stream` body.
///
/// Bytes are buffered until a blank line closes an event, so UTF-8 sequences
/// split across network chunks are decoded whole.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Data payload of the next complete event, if one is buffered.
    fn next_event(&mut self) -> Option<Option<String>> {
        let (end, delimiter_len) = [&b"\r\n\r\n"[..], &b"\n\n"[..]]
            .iter()
            .filter_map(|delimiter| {
                find_subslice(&self.buffer, delimiter).map(|pos| (pos, delimiter.len()))
            })
            .min_by_key(|(pos, _)| *pos)?;

        let event: Vec<u8> = self.buffer.drain(..end + delimiter_len).take(end).collect();
        Some(event_data(&String::from_utf8_lossy(&event)))
    }

    /// Flush a trailing event that was not followed by a blank line.
    fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        if rest.trim().is_empty() {
            None
        } else {
            event_data(&rest)
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Join the `data:` lines of one event; `None` when it carries no data.
fn event_data(event: &str) -> Option<String> {
    let lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

struct EventState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamChunk, ProviderError>>,
    input_tokens: i32,
    output_tokens: i32,
    finish_reason: FinishReason,
    done: bool,
}

impl<S> EventState<S> {
    /// Queue whatever one decoded event contributes. Returns false once the
    /// stream has failed.
    fn handle_data(&mut self, data: &str) -> bool {
        if data.trim().is_empty() || data == "[DONE]" {
            return true;
        }

        let response: GenerateContentResponse = match serde_json::from_str(data) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "Unparseable Gemini stream event");
                self.pending.push_back(Err(ProviderError::ApiError(format!(
                    "Malformed Gemini stream event: {}",
                    e
                ))));
                return false;
            }
        };

        if let Some(error) = response.error {
            self.pending.push_back(Err(ProviderError::ApiError(format!(
                "Gemini stream error {}: {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_default()
            ))));
            return false;
        }

        if let Some(usage) = &response.usage_metadata {
            self.input_tokens = usage.prompt_token_count.unwrap_or(self.input_tokens);
            self.output_tokens = usage.candidates_token_count.unwrap_or(self.output_tokens);
        }

        if response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_ref())
            .is_some()
        {
            self.finish_reason = FinishReason::ContentFilter;
        }

        if let Some(candidate) = response.candidates.first() {
            let text: String = candidate
                .content
                .iter()
                .flat_map(|content| content.parts.iter())
                .filter(|part| part.thought != Some(true))
                .filter_map(|part| part.text.as_deref())
                .collect();

            if !text.is_empty() {
                self.pending.push_back(Ok(StreamChunk::Text(text)));
            }

            if let Some(reason) = &candidate.finish_reason {
                self.finish_reason = FinishReason::from_api(reason);
            }
        }

        true
    }

    fn complete(&mut self) {
        self.pending.push_back(Ok(StreamChunk::Complete {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            finish_reason: self.finish_reason,
        }));
        self.done = true;
    }
}

/// Turn a Gemini SSE body into provider chunks.
///
/// The body is only polled while the returned stream is polled; dropping the
/// stream drops the body.
fn event_stream<S, E>(body: S) -> impl Stream<Item = Result<StreamChunk, ProviderError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let state = EventState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        input_tokens: 0,
        output_tokens: 0,
        finish_reason: FinishReason::Complete,
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    state.decoder.push(&bytes);
                    while let Some(event) = state.decoder.next_event() {
                        let Some(data) = event else { continue };
                        if !state.handle_data(&data) {
                            state.done = true;
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    state
                        .pending
                        .push_back(Err(ProviderError::NetworkError(e.to_string())));
                    state.done = true;
                }
                None => {
                    let ok = match state.decoder.finish() {
                        Some(data) => state.handle_data(&data),
                        None => true,
                    };
                    if ok {
                        state.complete();
                    } else {
                        state.done = true;
                    }
                }
            }
        }
    })
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}
