//! # Completion Streaming Client
//!
//! Client for an OpenAI-compatible chat-completions API, used for the live
//! interview replies (streaming) and the congruency analysis (single shot).
//!
//! ## Streaming:
//! The provider answers with server-sent events; each `data:` line carries a
//! JSON chunk with a content delta. Usage counts arrive in a trailing chunk
//! when `stream_options.include_usage` is set, and `data: [DONE]` terminates
//! the stream. The client surfaces this as a `CompletionChunk` stream where
//! exactly the last chunk has `is_final = true` and carries the usage.

use crate::session::history::ChatMessage;
use crate::session::metrics::TokenUsage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

/// Per-request generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 250,
        }
    }
}

/// One increment of a streamed completion.
#[derive(Debug, Clone)]
pub struct CompletionChunk {
    pub text: String,
    pub is_final: bool,
    pub usage: Option<TokenUsage>,
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = Result<CompletionChunk>> + Send>>;

/// Contract the orchestrator depends on for text generation.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Start a streamed completion over the given history.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<CompletionStream>;

    /// Single-shot completion; drains the stream by default. Used by the
    /// congruency analyzer, which has no use for partial output.
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<String> {
        let mut stream = self.stream(messages, params).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            text.push_str(&chunk?.text);
        }
        Ok(text)
    }
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompletionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunkBody {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent event from the completion stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Delta(String),
    Usage(TokenUsage),
    Done,
}

/// Parse a single SSE line. Returns None for blank lines, comments, and
/// chunks carrying neither content nor usage (role preludes, keep-alives).
fn parse_sse_line(line: &str) -> Result<Option<SseEvent>> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }

    let body: StreamChunkBody = serde_json::from_str(data)
        .map_err(|e| anyhow!("Malformed completion stream chunk: {}", e))?;

    if let Some(usage) = body.usage {
        return Ok(Some(SseEvent::Usage(usage)));
    }
    match body
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(Some(SseEvent::Delta(content))),
        _ => Ok(None),
    }
}

impl OpenAiCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: CompletionParams,
    ) -> Result<CompletionStream> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Completion provider returned {}: {}",
                status,
                body
            ));
        }

        debug!(model = %self.model, messages = messages.len(), "Completion stream opened");

        // SSE events can be split across network reads; keep a line buffer
        // between byte chunks and hold usage until the [DONE] terminator.
        let mut line_buffer = String::new();
        let mut pending_usage: Option<TokenUsage> = None;

        let stream = response.bytes_stream().flat_map(move |read| {
            let mut events: Vec<Result<CompletionChunk>> = Vec::new();
            match read {
                Ok(bytes) => {
                    line_buffer.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(newline) = line_buffer.find('\n') {
                        let line: String = line_buffer.drain(..=newline).collect();
                        match parse_sse_line(line.trim_end()) {
                            Ok(Some(SseEvent::Delta(text))) => {
                                events.push(Ok(CompletionChunk {
                                    text,
                                    is_final: false,
                                    usage: None,
                                }));
                            }
                            Ok(Some(SseEvent::Usage(usage))) => {
                                pending_usage = Some(usage);
                            }
                            Ok(Some(SseEvent::Done)) => {
                                events.push(Ok(CompletionChunk {
                                    text: String::new(),
                                    is_final: true,
                                    usage: pending_usage.take(),
                                }));
                            }
                            Ok(None) => {}
                            Err(e) => events.push(Err(e)),
                        }
                    }
                }
                Err(e) => {
                    events.push(Err(anyhow!("Completion stream transport error: {}", e)));
                }
            }
            futures_util::stream::iter(events)
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_delta_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            Some(SseEvent::Delta("Hello".to_string()))
        );
    }

    #[test]
    fn test_parse_done_and_usage_lines() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), Some(SseEvent::Done));

        let usage = r#"data: {"choices":[],"usage":{"prompt_tokens":812,"completion_tokens":41}}"#;
        assert_eq!(
            parse_sse_line(usage).unwrap(),
            Some(SseEvent::Usage(TokenUsage {
                prompt_tokens: 812,
                completion_tokens: 41,
            }))
        );
    }

    #[test]
    fn test_parse_skips_preludes_and_blank_lines() {
        // role prelude has no content delta
        let prelude = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(prelude).unwrap(), None);
        assert_eq!(parse_sse_line("").unwrap(), None);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_malformed_chunk() {
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let client = OpenAiCompletionClient::new("https://api.example.com/v1/", "key", "gpt-4o");
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }
}
