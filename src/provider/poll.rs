//! Poll-to-completion provider.
//!
//! The task is submitted as a prediction job and its status is fetched once
//! a second until it succeeds or fails. A job still `starting` more than
//! [`COLD_BOOT_THRESHOLD`] after submission gets one warning item. Billable
//! time starts at the last observation of `starting`, so boot latency is not
//! charged.

use super::{channel, emit, ModelProvider, ProviderResult, ProviderSpec, ResultStream};
use crate::billing::BillingCallback;
use crate::error::ErrorCode;
use crate::llm::{count_tokens, PredictionApi, PredictionStatus, ProviderOptions, TokenUsage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Delay between two status requests.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Time a job may spend starting before the client is warned.
pub const COLD_BOOT_THRESHOLD: Duration = Duration::from_secs(10);

/// Warning sent when a job is slow to start.
pub const COLD_BOOT_WARNING: &str = "The model is taking longer than usual to start up. \
It's probably due to a cold boot on the provider's side. \
It will respond eventually but it can take some time.";

/// Submits a job and polls it to completion.
#[derive(Debug, Clone)]
pub struct PollProvider {
    api: Arc<dyn PredictionApi>,
    spec: ProviderSpec,
}

impl PollProvider {
    /// Creates a provider over `api`.
    #[must_use]
    pub fn new(api: Arc<dyn PredictionApi>, spec: ProviderSpec) -> Self {
        Self { api, spec }
    }
}

impl ModelProvider for PollProvider {
    fn generate(
        &self,
        task: String,
        billing: Option<BillingCallback>,
        options: ProviderOptions,
    ) -> ResultStream {
        let (tx, stream) = channel();
        let api = Arc::clone(&self.api);
        let spec = self.spec;

        tokio::spawn(async move {
            let submitted_at = Instant::now();
            let mut processing_since = submitted_at;

            let prediction = match api.submit(&task, &options, false).await {
                Ok(prediction) => prediction,
                Err(e) => {
                    tracing::warn!(
                        provider = spec.name(),
                        model = spec.descriptor.model,
                        error = %e,
                        "failed to submit prediction"
                    );
                    emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                    return;
                }
            };

            let mut warned = false;

            loop {
                let status = match api.poll(&prediction).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!(
                            prediction_id = %prediction.id,
                            error = %e,
                            "failed to poll prediction"
                        );
                        emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                        return;
                    }
                };

                match status {
                    PredictionStatus::Starting => {
                        processing_since = Instant::now();
                        if !warned && submitted_at.elapsed() > COLD_BOOT_THRESHOLD {
                            warned = true;
                            tracing::info!(prediction_id = %prediction.id, "cold boot detected");
                            emit(&tx, ProviderResult::warning(COLD_BOOT_WARNING)).await;
                        }
                    }
                    PredictionStatus::Processing => {}
                    PredictionStatus::Succeeded(output) => {
                        let billable = processing_since.elapsed();
                        let usage = TokenUsage::new(count_tokens(&task), count_tokens(&output));

                        emit(&tx, ProviderResult::terminal(output.clone(), usage)).await;
                        spec.bill(billing.as_ref(), usage, &output, billable);
                        return;
                    }
                    PredictionStatus::Failed(reason) => {
                        tracing::warn!(
                            prediction_id = %prediction.id,
                            reason = %reason,
                            "prediction failed"
                        );
                        emit(&tx, ProviderResult::failure(ErrorCode::GenerationError)).await;
                        return;
                    }
                }

                tokio::time::sleep(POLL_INTERVAL).await;
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
