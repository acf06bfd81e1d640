//! Backend client trait abstraction.
//!
//! This module defines the `LLMClient` trait which abstracts over the chat
//! style backends (OpenAI-compatible APIs, Replicate predictions) so the
//! single-shot and event-stream providers can drive any of them.

use crate::llm::error::LLMError;
use crate::llm::types::{Completion, ProviderOptions};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// A streaming event from a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMStreamEvent {
    /// A text fragment was generated
    Token {
        /// The text content of the fragment
        text: String,
    },
    /// The backend finished generating
    End,
    /// The backend reported an error in-band
    Error {
        /// The type of error
        error_type: String,
        /// The error message
        message: String,
    },
}

/// Type alias for boxed stream of backend events.
pub type LLMEventStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, LLMError>> + Send>>;

/// Trait for backend API clients.
///
/// # Example
///
/// ```ignore
/// use gateway_core::llm::{LLMClient, OpenAIClient, ProviderOptions};
///
/// let client = OpenAIClient::new(&config.openai, "gpt-3.5-turbo", None)?;
/// let completion = client.complete("Say hi", &ProviderOptions::default()).await?;
/// ```
#[async_trait]
pub trait LLMClient: Send + Sync + std::fmt::Debug {
    /// Sends a prompt and waits for the whole completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    async fn complete(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<Completion, LLMError>;

    /// Sends a prompt and returns the generated fragments as they arrive.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails to start.
    async fn complete_streaming(
        &self,
        prompt: &str,
        options: &ProviderOptions,
    ) -> Result<LLMEventStream, LLMError>;

    /// Returns the name of this backend for logging.
    fn provider_name(&self) -> &'static str;
}
