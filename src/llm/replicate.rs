//! Replicate predictions API client.
//!
//! Replicate runs each generation as a prediction job. A job is created with
//! `POST /predictions`, then either polled through its `get` URL or followed
//! through its `stream` URL, which emits `output`, `done` and `error` events.

use crate::config::ReplicateConfig;
use crate::llm::client::{LLMClient, LLMEventStream, LLMStreamEvent};
use crate::llm::error::LLMError;
use crate::llm::prediction::{Prediction, PredictionApi, PredictionStatus};
use crate::llm::sse::{SseDecoder, SseEvent};
use crate::llm::types::{Completion, ProviderOptions};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interval between status requests in [`LLMClient::complete`].
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Client for one Replicate model version.
#[derive(Debug, Clone)]
pub struct ReplicateClient {
    client: Client,
    base_url: String,
    api_key: String,
    version: String,
}

#[derive(Debug, Clone, Serialize)]
struct CreatePredictionRequest<'a> {
    version: &'a str,
    input: PredictionInput<'a>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<PredictionOutput>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    urls: PredictionUrls,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionUrls {
    get: String,
    #[serde(default)]
    stream: Option<String>,
}

/// Language models return either a single string or a list of chunks.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Text(String),
    Chunks(Vec<String>),
}

impl PredictionOutput {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Chunks(chunks) => chunks.concat(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ReplicateErrorResponse {
    detail: String,
}

impl PredictionResponse {
    fn into_status(self) -> PredictionStatus {
        match self.status.as_str() {
            "starting" => PredictionStatus::Starting,
            "processing" => PredictionStatus::Processing,
            "succeeded" => PredictionStatus::Succeeded(
                self.output
                    .map(PredictionOutput::into_text)
                    .unwrap_or_default(),
            ),
            other => {
                let reason = match self.error {
                    Some(serde_json::Value::String(message)) => message,
                    Some(serde_json::Value::Null) | None => other.to_string(),
                    Some(value) => value.to_string(),
                };
                PredictionStatus::Failed(reason)
            }
        }
    }

    fn into_prediction(self) -> Prediction {
        Prediction {
            id: self.id,
            get_url: self.urls.get,
            stream_url: self.urls.stream,
        }
    }
}

impl ReplicateClient {
    /// Creates a client for the model `version`.
    ///
    /// # Arguments
    ///
    /// * `config` - Backend settings (base URL, timeout, platform key)
    /// * `version` - Replicate model version hash
    /// * `api_key` - Caller-supplied key; the platform key is used when `None`
    ///
    /// # Errors
    ///
    /// Returns `LLMError::invalid_config` if no API key is available, or
    /// `LLMError::network` if the HTTP client cannot be created.
    pub fn new(
        config: &ReplicateConfig,
        version: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, LLMError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| config.resolve_api_key())
            .ok_or_else(|| {
                LLMError::invalid_config("replicate.api_key", "no API key configured")
            })?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LLMError::network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            version: version.into(),
        })
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.base_url)
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        options: &ProviderOptions,
        stream: bool,
    ) -> CreatePredictionRequest<'a> {
        CreatePredictionRequest {
            version: &self.version,
            input: PredictionInput {
                prompt,
                temperature: options.temperature,
                max_new_tokens: options.max_tokens,
                stop_sequences: (!options.stop.is_empty()).then(|| options.stop.join(",")),
            },
            stream,
        }
    }

    fn authorization(&self) -> String {
        format!("Token {}", self.api_key)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LLMError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let status_code = status.as_u16();
        if status_code == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10);
            return Err(LLMError::rate_limited(Duration::from_secs(retry_after)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ReplicateErrorResponse>(&body)
            .map(|e| e.detail)
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown error").to_string()
                } else {
                    body
                }
            });

        if status_code == 401 {
            return Err(LLMError::authentication_failed(message));
        }
        Err(LLMError::api_error(status_code, message, None))
    }

    /// Maps one server-sent event from the stream URL.
    ///
    /// Returns `None` for events that carry nothing for the caller.
    fn parse_stream_event(event: &SseEvent) -> Option<LLMStreamEvent> {
        match event.name() {
            "output" => Some(LLMStreamEvent::Token {
                text: event.data.clone(),
            }),
            "done" => Some(LLMStreamEvent::End),
            "error" => Some(LLMStreamEvent::Error {
                error_type: "prediction_error".to_string(),
                message: event.data.clone(),
            }),
            _ => None,
        }
    }
}

#[async_trait]
impl PredictionApi for ReplicateClient {
    async fn submit(
        &self,
        prompt: &str,
        options: &ProviderOptions,
        stream: bool,
    ) -> Result<Prediction, LLMError> {
        let response = self
            .client
            .post(self.predictions_endpoint())
            .header("Authorization", self.authorization())
            .json(&self.request_body(prompt, options, stream))
            .send()
            .await
            .map_err(|e| LLMError::network(format!("request failed: {}", e)))?;

        let created: PredictionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::parse_error(format!("failed to parse prediction: {}", e)))?;

        tracing::debug!(prediction_id = %created.id, stream, "prediction submitted");
        Ok(created.into_prediction())
    }

    async fn poll(&self, prediction: &Prediction) -> Result<PredictionStatus, LLMError> {
        let response = self
            .client
            .get(&prediction.get_url)
            .header("Authorization", self.authorization())
            .send()
            .await
            .map_err(|e| LLMError::network(format!("request failed: {}", e)))?;

        let current: PredictionResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| LLMError::parse_error(format!("failed to parse prediction: {}", e)))?;

        Ok(current.into_status())
    }

    async fn stream(&self, prediction: &Prediction) -> Result<LLMEventStream, LLMError> {
        let url = prediction.stream_url.as_deref().ok_or_else(|| {
            LLMError::stream_error(format!(
                "prediction {} was not submitted for streaming",
                prediction.id
            ))
        })?;

        let response = self
            .client
            .get(url)
            .header("Authorization", self.authorization())
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-store")
            .send()
            .await
            .map_err(|e| LLMError::network(format!("request failed: {}", e)))?;

        let mut bytes = Self::check_status(response).await?.bytes_stream();

        let events = async_stream::stream! {
            let mut decoder = SseDecoder::new();
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
                    if let Some(item) = Self::parse_stream_event(&event) {
                        let terminal = !matches!(item, LLMStreamEvent::Token { .. });
                        yield Ok(item);
                        if terminal {
                            return;
                        }
                    }
                }
            }

            yield Err(LLMError::stream_error("stream ended before completion"));
        };

        Ok(Box::pin(events))
    }

    fn provider_name(&self) -> &'static str {
        "replicate"
    }
}

#[async_trait]
impl LLMClient for ReplicateClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<Completion, LLMError> {
        let prediction = self.submit(prompt, options, false).await?;

        loop {
            match self.poll(&prediction).await? {
                PredictionStatus::Succeeded(output) => return Ok(Completion::text(output)),
                PredictionStatus::Failed(reason) => {
                    return Err(LLMError::prediction_failed(reason))
                }
                PredictionStatus::Starting | PredictionStatus::Processing => {
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<LLMEventStream, LLMError> {
        let prediction = self.submit(prompt, options, true).await?;
        self.stream(&prediction).await
    }

    fn provider_name(&self) -> &'static str {
        "replicate"
    }
}
