//! Event-stream provider: live fragments, then a usage-carrying terminal item.

use super::{channel, emit, ModelProvider, ProviderResult, ProviderSpec, ResultStream};
use crate::billing::BillingCallback;
use crate::error::ErrorCode;
use crate::llm::{count_tokens, LLMClient, LLMStreamEvent, ProviderOptions, TokenUsage};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::Instant;

/// Forwards a backend token stream fragment by fragment.
///
/// Fragments carry no usage. The closing item has empty text and carries the
/// prompt tokens and the tokens of the full generated text. Billable time
/// runs from the first backend event to the end of the stream, so a cold
/// boot before the first token is not charged. A stream that closes without
/// its end event is a failed run and is not billed.
#[derive(Debug, Clone)]
pub struct EventStreamProvider {
    client: Arc<dyn LLMClient>,
    spec: ProviderSpec,
}

impl EventStreamProvider {
    /// Creates a provider over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn LLMClient>, spec: ProviderSpec) -> Self {
        Self { client, spec }
    }
}

impl ModelProvider for EventStreamProvider {
    fn generate(
        &self,
        task: String,
        billing: Option<BillingCallback>,
        options: ProviderOptions,
    ) -> ResultStream {
        let (tx, stream) = channel();
        let client = Arc::clone(&self.client);
        let spec = self.spec;

        tokio::spawn(async move {
            let mut events = match client.complete_streaming(&task, &options).await {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(
                        provider = spec.name(),
                        model = spec.descriptor.model,
                        error = %e,
                        "failed to open generation stream"
                    );
                    emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                    return;
                }
            };

            let mut completion = String::new();
            let mut first_event: Option<Instant> = None;
            let mut ended = false;

            while let Some(event) = events.next().await {
                first_event.get_or_insert_with(Instant::now);

                match event {
                    Ok(LLMStreamEvent::Token { text }) => {
                        if text.is_empty() {
                            continue;
                        }
                        completion.push_str(&text);
                        emit(&tx, ProviderResult::fragment(text)).await;
                    }
                    Ok(LLMStreamEvent::End) => {
                        ended = true;
                        break;
                    }
                    Ok(LLMStreamEvent::Error {
                        error_type,
                        message,
                    }) => {
                        tracing::warn!(
                            provider = spec.name(),
                            model = spec.descriptor.model,
                            error_type = %error_type,
                            error = %message,
                            "backend reported a stream error"
                        );
                        emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            provider = spec.name(),
                            model = spec.descriptor.model,
                            error = %e,
                            "generation stream failed"
                        );
                        emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                        return;
                    }
                }
            }

            if !ended {
                tracing::warn!(
                    provider = spec.name(),
                    model = spec.descriptor.model,
                    received = completion.len(),
                    "generation stream closed before its end event"
                );
                emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                return;
            }

            let billable = first_event.map(|t| t.elapsed()).unwrap_or_default();
            let usage = TokenUsage::new(count_tokens(&task), count_tokens(&completion));

            emit(&tx, ProviderResult::terminal(String::new(), usage)).await;
            spec.bill(billing.as_ref(), usage, &completion, billable);
        });

        stream
    }

    fn name(&self) -> &'static str {
        self.spec.name()
    }

    fn provider_model(&self) -> (&'static str, &'static str) {
        self.spec.provider_model()
    }

    fn credits_per_second(&self) -> Option<f64> {
        self.spec.descriptor.credits_per_second
    }

    fn does_follow_rate_limit(&self) -> bool {
        self.spec.meter.follows_rate_limit()
    }
}
