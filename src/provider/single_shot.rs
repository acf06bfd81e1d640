//! Single-shot provider: one call, one terminal item.

use super::{channel, emit, ModelProvider, ProviderResult, ProviderSpec, ResultStream};
use crate::billing::BillingCallback;
use crate::error::ErrorCode;
use crate::llm::{count_tokens, LLMClient, ProviderOptions, TokenUsage};
use std::sync::Arc;
use tokio::time::Instant;

/// Runs each task as one blocking backend call.
#[derive(Debug, Clone)]
pub struct SingleShotProvider {
    client: Arc<dyn LLMClient>,
    spec: ProviderSpec,
}

impl SingleShotProvider {
    /// Creates a provider over `client`.
    #[must_use]
    pub fn new(client: Arc<dyn LLMClient>, spec: ProviderSpec) -> Self {
        Self { client, spec }
    }
}

impl ModelProvider for SingleShotProvider {
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
            let started = Instant::now();

            match client.complete(&task, &options).await {
                Ok(completion) => {
                    let usage = completion.usage.unwrap_or_else(|| {
                        TokenUsage::new(count_tokens(&task), count_tokens(&completion.content))
                    });
                    let elapsed = started.elapsed();

                    emit(&tx, ProviderResult::terminal(completion.content.clone(), usage)).await;
                    spec.bill(billing.as_ref(), usage, &completion.content, elapsed);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = spec.name(),
                        model = spec.descriptor.model,
                        error = %e,
                        "single-shot generation failed"
                    );
                    emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingRecord;
    use crate::llm::{Completion, LLMError, LLMEventStream};
    use crate::provider::{resolve, ProviderKind};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FixedClient(Result<Completion, LLMError>);

    #[async_trait]
    impl LLMClient for FixedClient {
        async fn complete(&self, _: &str, _: &ProviderOptions) -> Result<Completion, LLMError> {
            self.0.clone()
        }

        async fn complete_streaming(
            &self,
            _: &str,
            _: &ProviderOptions,
        ) -> Result<LLMEventStream, LLMError> {
            Err(LLMError::stream_error("not streaming"))
        }

        fn provider_name(&self) -> &'static str {
            "fixed"
        }
    }

    fn provider(result: Result<Completion, LLMError>) -> SingleShotProvider {
        let descriptor = resolve(ProviderKind::OpenAI, "gpt-3.5-turbo").unwrap();
        SingleShotProvider::new(
            Arc::new(FixedClient(result)),
            ProviderSpec::new(descriptor, false),
        )
    }

    fn recorder() -> (BillingCallback, Arc<Mutex<Vec<BillingRecord>>>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&records);
        let callback: BillingCallback = Arc::new(move |r| sink.lock().unwrap().push(r));
        (callback, records)
    }

    #[tokio::test]
    async fn success_emits_one_terminal_item_and_bills_once() {
        let completion = Completion {
            content: "Paris".to_string(),
            usage: Some(TokenUsage::new(11, 1)),
        };
        let (billing, records) = recorder();

        let items: Vec<_> = provider(Ok(completion))
            .generate("Capital of France?".into(), Some(billing), ProviderOptions::default())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_final);
        assert_eq!(items[0].text_delta, "Paris");
        assert_eq!(items[0].usage_delta, TokenUsage::new(11, 1));

        let records = records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].completion, "Paris");
        assert_eq!(records[0].credits, None);
    }

    #[tokio::test]
    async fn missing_usage_is_counted_locally() {
        let items: Vec<_> = provider(Ok(Completion::text("Hello there")))
            .generate("Say hello".into(), None, ProviderOptions::default())
            .collect()
            .await;

        let usage = items[0].usage_delta;
        assert_eq!(usage.input, count_tokens("Say hello"));
        assert_eq!(usage.output, count_tokens("Hello there"));
    }

    #[tokio::test]
    async fn call_failure_is_generation_error_without_billing() {
        let (billing, records) = recorder();

        let items: Vec<_> = provider(Err(LLMError::network("connection reset")))
            .generate("task".into(), Some(billing), ProviderOptions::default())
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].error_kind, Some(ErrorCode::GenerationError));
        assert!(items[0].is_final);
        assert!(records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn billing_happens_even_if_stream_is_dropped() {
        let (billing, records) = recorder();

        let stream = provider(Ok(Completion::text("x"))).generate(
            "task".into(),
            Some(billing),
            ProviderOptions::default(),
        );
        drop(stream);

        for _ in 0..50 {
            if !records.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(records.lock().unwrap().len(), 1);
    }
}
