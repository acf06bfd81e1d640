//! OpenAI-compatible API client.
//!
//! HTTP client for the chat completions endpoint. The prompt is sent as a
//! single user message; streamed deltas are decoded from server-sent events.

use crate::config::OpenAIConfig;
use crate::llm::client::{LLMClient, LLMEventStream, LLMStreamEvent};
use crate::llm::error::LLMError;
use crate::llm::sse::SseDecoder;
use crate::llm::types::{Completion, ProviderOptions, TokenUsage};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client for OpenAI-compatible chat completion APIs.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    /// HTTP client
    client: Client,
    /// Base URL for the API
    base_url: String,
    /// Bearer token
    api_key: String,
    /// Model name
    model: String,
}

/// Request body for the chat completions API.
#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "no_stop_sequences")]
    stop: &'a [String],
    stream: bool,
}

fn no_stop_sequences(stop: &&[String]) -> bool {
    stop.is_empty()
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Non-streaming response from the API.
#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
    #[serde(default)]
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Streaming chunk from the API.
#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChatCompletionChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionChunkChoice {
    delta: ChatCompletionDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Error response from the API.
#[derive(Debug, Clone, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAIErrorDetail {
    #[serde(rename = "type")]
    error_type: Option<String>,
    message: String,
}

impl OpenAIClient {
    /// Creates a new client for `model`.
    ///
    /// # Arguments
    ///
    /// * `config` - Backend settings (base URL, timeout, platform key)
    /// * `model` - Model name sent with every request
    /// * `api_key` - Caller-supplied key; the platform key is used when `None`
    ///
    /// # Errors
    ///
    /// Returns `LLMError::invalid_config` if no API key is available, or
    /// `LLMError::network` if the HTTP client cannot be created.
    pub fn new(
        config: &OpenAIConfig,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LLMError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| config.resolve_api_key())
            .ok_or_else(|| LLMError::invalid_config("openai.api_key", "no API key configured"))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LLMError::network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    /// Returns the chat completions endpoint URL.
    fn chat_completions_endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        options: &'a ProviderOptions,
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: &options.stop,
            stream,
        }
    }

    async fn send(&self, body: &ChatCompletionRequest<'_>) -> Result<reqwest::Response, LLMError> {
        let response = self
            .client
            .post(self.chat_completions_endpoint())
            .header("content-type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| LLMError::network(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Self::parse_error_response(response).await);
        }

        Ok(response)
    }

    /// Parses an error response from the API.
    async fn parse_error_response(response: reqwest::Response) -> LLMError {
        let status = response.status();
        let status_code = status.as_u16();

        if status_code == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return LLMError::rate_limited(Duration::from_secs(retry_after));
        }

        let error_body = response.text().await.unwrap_or_default();
        Self::classify_error_body(status_code, status.canonical_reason(), &error_body)
    }

    fn classify_error_body(status_code: u16, reason: Option<&str>, body: &str) -> LLMError {
        match serde_json::from_str::<OpenAIErrorResponse>(body) {
            Ok(api_error) => match api_error.error.error_type.as_deref() {
                Some("authentication_error" | "invalid_api_key") => {
                    LLMError::authentication_failed(api_error.error.message)
                }
                _ => LLMError::api_error(
                    status_code,
                    api_error.error.message,
                    api_error.error.error_type,
                ),
            },
            Err(_) if status_code == 401 => {
                LLMError::authentication_failed(reason.unwrap_or("unauthorized"))
            }
            Err(_) => LLMError::api_error(
                status_code,
                if body.is_empty() {
                    reason.unwrap_or("Unknown error")
                } else {
                    body
                },
                None,
            ),
        }
    }

    /// Parses the data of one server-sent event.
    fn parse_sse_data(data: &str) -> Result<StreamChunk, LLMError> {
        if data == "[DONE]" {
            return Ok(StreamChunk::Done);
        }

        let chunk = serde_json::from_str::<ChatCompletionChunk>(data)
            .map_err(|e| LLMError::parse_error(format!("failed to parse SSE event: {}", e)))?;

        let finished = chunk.choices.iter().any(|c| c.finish_reason.is_some());
        let text: String = chunk
            .choices
            .into_iter()
            .filter_map(|choice| choice.delta.content)
            .collect();

        Ok(StreamChunk::Delta { text, finished })
    }
}

/// One decoded server-sent event from a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StreamChunk {
    /// A content delta, possibly empty
    Delta { text: String, finished: bool },
    /// The `[DONE]` sentinel
    Done,
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<Completion, LLMError> {
        let body = self.request_body(prompt, options, false);
        let response = self.send(&body).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LLMError::parse_error(format!("failed to parse response: {}", e)))?;

        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LLMError::parse_error("response contained no choices"))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            usage: completion
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
        })
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<LLMEventStream, LLMError> {
        let body = self.request_body(prompt, options, true);
        let response = self.send(&body).await?;

        let mut bytes = response.bytes_stream();

        let events = async_stream::stream! {
            let mut decoder = SseDecoder::new();
            let mut finished = false;
            let mut body_done = false;

            while !body_done {
                let batch = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(LLMError::stream_error(format!("stream read error: {}", e)));
                        return;
                    }
                    None => {
                        body_done = true;
                        decoder.finish().into_iter().collect()
                    }
                };

                for event in batch {
                    match Self::parse_sse_data(&event.data) {
                        Ok(StreamChunk::Done) => {
                            yield Ok(LLMStreamEvent::End);
                            return;
                        }
                        Ok(StreamChunk::Delta { text, finished: done }) => {
                            finished |= done;
                            if !text.is_empty() {
                                yield Ok(LLMStreamEvent::Token { text });
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            if finished {
                yield Ok(LLMStreamEvent::End);
            } else {
                yield Err(LLMError::stream_error("stream ended before completion"));
            }
        };

        Ok(Box::pin(events))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
