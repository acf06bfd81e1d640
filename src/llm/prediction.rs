//! Asynchronous prediction API abstraction.
//!
//! Backends that run generations as jobs (submit, then poll or subscribe)
//! implement `PredictionApi`. The poll provider drives the job lifecycle
//! itself so it can observe cold boots and time the processing phase.

use crate::llm::client::LLMEventStream;
use crate::llm::error::LLMError;
use crate::llm::types::ProviderOptions;
use async_trait::async_trait;

/// Handle to a submitted prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    /// Backend identifier of the job
    pub id: String,
    /// URL polled for the job status
    pub get_url: String,
    /// Server-sent events URL, present when the job was submitted for streaming
    pub stream_url: Option<String>,
}

/// Observed state of a prediction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredictionStatus {
    /// The model is still booting
    Starting,
    /// The model is generating
    Processing,
    /// The job finished with this output
    Succeeded(String),
    /// The job failed, was canceled, or errored
    Failed(String),
}

impl PredictionStatus {
    /// Returns true once the job will not change state again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Failed(_))
    }
}

/// Trait for job-style prediction backends.
#[async_trait]
pub trait PredictionApi: Send + Sync + std::fmt::Debug {
    /// Submits a prediction for `prompt`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the job.
    async fn submit(
        &self,
        prompt: &str,
        options: &ProviderOptions,
        stream: bool,
    ) -> Result<Prediction, LLMError>;

    /// Fetches the current state of a prediction.
    ///
    /// # Errors
    ///
    /// Returns an error if the status request fails or is malformed.
    async fn poll(&self, prediction: &Prediction) -> Result<PredictionStatus, LLMError>;

    /// Subscribes to the output events of a prediction submitted for streaming.
    ///
    /// # Errors
    ///
    /// Returns an error if the prediction has no stream URL or the request fails.
    async fn stream(&self, prediction: &Prediction) -> Result<LLMEventStream, LLMError>;

    /// Returns the name of this backend for logging.
    fn provider_name(&self) -> &'static str;
}
