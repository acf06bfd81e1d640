//! Incremental provider results and their reduction.

use crate::error::ErrorCode;
use crate::llm::TokenUsage;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A retrieved memory entry attached to a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identifier of the entry in the memory store
    pub id: String,
    /// The stored text
    pub content: String,
    /// Similarity to the task, higher is closer
    pub similarity: f32,
}

/// One incremental item of a provider's output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResult {
    /// Newly generated text, empty on pure warning/error/usage items
    pub text_delta: String,
    /// Tokens attributable to this item
    pub usage_delta: TokenUsage,
    /// Memory entries used to augment the task
    pub resources: Vec<Resource>,
    /// Human-readable warnings for the client
    pub warnings: Vec<String>,
    /// Set on items that report a failure
    pub error_kind: Option<ErrorCode>,
    /// True on the last item of the stream
    pub is_final: bool,
}

impl ProviderResult {
    /// A non-final text fragment.
    #[must_use]
    pub fn fragment(text: impl Into<String>) -> Self {
        Self {
            text_delta: text.into(),
            ..Self::default()
        }
    }

    /// A final item closing the stream.
    #[must_use]
    pub fn terminal(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text_delta: text.into(),
            usage_delta: usage,
            is_final: true,
            ..Self::default()
        }
    }

    /// A non-final warning.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            warnings: vec![message.into()],
            ..Self::default()
        }
    }

    /// A final item reporting a failure.
    #[must_use]
    pub fn failure(code: ErrorCode) -> Self {
        Self {
            error_kind: Some(code),
            is_final: true,
            ..Self::default()
        }
    }

    /// A non-final item carrying only retrieved resources.
    #[must_use]
    pub fn with_resources(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            ..Self::default()
        }
    }

    /// Sets the usage carried by this item.
    #[must_use]
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage_delta = usage;
        self
    }
}

/// Reduction of a result stream, reported to clients as `[INFOS]:`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccumulatedResult {
    /// All text received, in order
    pub result: String,
    /// Sum of every usage delta
    pub token_usage: TokenUsage,
    /// The last non-empty resource list seen
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

impl AccumulatedResult {
    /// Folds one item into the totals.
    pub fn absorb(&mut self, item: &ProviderResult) {
        self.result.push_str(&item.text_delta);
        self.token_usage += item.usage_delta;
        if !item.resources.is_empty() {
            self.resources = item.resources.clone();
        }
    }
}

/// The receiving end of a provider run.
///
/// An optional prelude item (retrieved resources) is yielded before anything
/// the provider sends.
#[derive(Debug)]
pub struct ResultStream {
    prelude: Option<ProviderResult>,
    rx: mpsc::Receiver<ProviderResult>,
}

impl ResultStream {
    /// Wraps a provider channel.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<ProviderResult>) -> Self {
        Self { prelude: None, rx }
    }

    /// Yields `item` before the provider's own items.
    #[must_use]
    pub fn with_prelude(mut self, item: ProviderResult) -> Self {
        self.prelude = Some(item);
        self
    }

    /// Receives the next item, or `None` once the provider is done.
    pub async fn recv(&mut self) -> Option<ProviderResult> {
        if let Some(item) = self.prelude.take() {
            return Some(item);
        }
        self.rx.recv().await
    }
}

impl Stream for ResultStream {
    type Item = ProviderResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(item) = self.prelude.take() {
            return Poll::Ready(Some(item));
        }
        self.rx.poll_recv(cx)
    }
}
