//! Backend clients.
//!
//! This module contains the HTTP clients for the supported backends (an
//! OpenAI-compatible chat completions API and the Replicate predictions API),
//! the traits the providers drive them through, and token counting.

mod client;
mod error;
mod openai;
mod prediction;
mod replicate;
mod sse;
mod tokens;
mod types;

pub use client::{LLMClient, LLMEventStream, LLMStreamEvent};
pub use error::{LLMError, LLMErrorKind};
pub use openai::OpenAIClient;
pub use prediction::{Prediction, PredictionApi, PredictionStatus};
pub use replicate::ReplicateClient;
pub use sse::{SseDecoder, SseEvent};
pub use tokens::count_tokens;
pub use types::{Completion, ProviderOptions, TokenUsage};
