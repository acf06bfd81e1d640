//! Providers: one uniform result stream over heterogeneous backends.
//!
//! A provider runs one task against one model on a spawned task and delivers
//! [`ProviderResult`] items through a bounded channel. Three delivery models
//! are supported:
//!
//! - [`SingleShotProvider`]: one blocking call, one terminal item
//! - [`EventStreamProvider`]: live fragments, then an empty terminal item
//!   carrying the usage
//! - [`PollProvider`]: submit a job and poll it once a second
//!
//! Every provider invokes its billing callback exactly once when the backend
//! run completes successfully, whether or not anyone is still reading.

mod catalog;
mod event_stream;
mod factory;
mod poll;
mod result;
mod single_shot;

pub use catalog::{models, resolve, DeliveryMode, ProviderDescriptor, ProviderKind};
pub use event_stream::EventStreamProvider;
pub use factory::{BackendFactory, HttpBackends};
pub use poll::{PollProvider, COLD_BOOT_THRESHOLD, COLD_BOOT_WARNING, POLL_INTERVAL};
pub use result::{AccumulatedResult, ProviderResult, Resource, ResultStream};
pub use single_shot::SingleShotProvider;

use crate::billing::{BillingCallback, BillingRecord, CreditMeter};
use crate::llm::{LLMError, ProviderOptions, TokenUsage};
use std::time::Duration;
use tokio::sync::mpsc;

/// Capacity of the channel between a provider task and its consumer.
pub const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Common capability of every provider variant.
pub trait ModelProvider: Send + Sync + std::fmt::Debug {
    /// Starts generating `task` and returns the result stream.
    ///
    /// Must be called from within a tokio runtime.
    fn generate(
        &self,
        task: String,
        billing: Option<BillingCallback>,
        options: ProviderOptions,
    ) -> ResultStream;

    /// Returns the provider name.
    fn name(&self) -> &'static str;

    /// Returns `(provider, model)`.
    fn provider_model(&self) -> (&'static str, &'static str);

    /// Returns the time-based rate, `None` for token-priced models.
    fn credits_per_second(&self) -> Option<f64>;

    /// Returns true if the platform must enforce credits for this run.
    fn does_follow_rate_limit(&self) -> bool;
}

/// A model bound to the way its runs are charged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderSpec {
    /// Static model metadata
    pub descriptor: ProviderDescriptor,
    /// How runs are charged, fixed from the caller's credentials
    pub meter: CreditMeter,
}

impl ProviderSpec {
    /// Binds `descriptor` to the meter implied by the caller's credentials.
    #[must_use]
    pub fn new(descriptor: ProviderDescriptor, caller_credentials: bool) -> Self {
        Self {
            descriptor,
            meter: CreditMeter::for_run(descriptor.credits_per_second, caller_credentials),
        }
    }

    /// Returns the provider name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.descriptor.provider.as_str()
    }

    /// Returns `(provider, model)`.
    #[must_use]
    pub fn provider_model(&self) -> (&'static str, &'static str) {
        (self.descriptor.provider.as_str(), self.descriptor.model)
    }

    /// Builds the billing record for a completed run.
    #[must_use]
    pub fn record(&self, usage: TokenUsage, completion: &str, billable: Duration) -> BillingRecord {
        BillingRecord::new(
            self.descriptor.provider.as_str(),
            self.descriptor.model,
            usage.input,
            usage.output,
            completion,
            self.meter.charge(billable),
        )
    }

    /// Reports a completed run to `billing`, if any.
    pub fn bill(
        &self,
        billing: Option<&BillingCallback>,
        usage: TokenUsage,
        completion: &str,
        billable: Duration,
    ) {
        let record = self.record(usage, completion, billable);
        tracing::debug!(
            provider = %record.provider,
            model = %record.model,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            credits = ?record.credits,
            "provider run billed"
        );
        if let Some(billing) = billing {
            billing(record);
        }
    }
}

/// The closed set of provider variants.
#[derive(Debug)]
pub enum Provider {
    /// One call, one terminal item
    SingleShot(SingleShotProvider),
    /// Live token stream
    EventStream(EventStreamProvider),
    /// Submitted job, polled to completion
    Poll(PollProvider),
}

impl Provider {
    fn inner(&self) -> &dyn ModelProvider {
        match self {
            Self::SingleShot(p) => p,
            Self::EventStream(p) => p,
            Self::Poll(p) => p,
        }
    }

    /// Builds the provider that serves `spec`.
    ///
    /// Streaming is used when it was requested and the model supports it;
    /// otherwise the model's own completion mode applies.
    ///
    /// # Errors
    ///
    /// Returns the backend construction error.
    pub fn build(
        spec: ProviderSpec,
        streaming: bool,
        backends: &dyn BackendFactory,
        api_key: Option<String>,
    ) -> Result<Self, LLMError> {
        let descriptor = &spec.descriptor;

        if streaming && descriptor.streaming {
            let client = backends.chat_client(descriptor, api_key)?;
            return Ok(Self::EventStream(EventStreamProvider::new(client, spec)));
        }

        match descriptor.completion {
            DeliveryMode::SingleShot => {
                let client = backends.chat_client(descriptor, api_key)?;
                Ok(Self::SingleShot(SingleShotProvider::new(client, spec)))
            }
            DeliveryMode::Poll => {
                let api = backends.prediction_api(descriptor, api_key)?;
                Ok(Self::Poll(PollProvider::new(api, spec)))
            }
        }
    }
}

impl ModelProvider for Provider {
    fn generate(
        &self,
        task: String,
        billing: Option<BillingCallback>,
        options: ProviderOptions,
    ) -> ResultStream {
        self.inner().generate(task, billing, options)
    }

    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn provider_model(&self) -> (&'static str, &'static str) {
        self.inner().provider_model()
    }

    fn credits_per_second(&self) -> Option<f64> {
        self.inner().credits_per_second()
    }

    fn does_follow_rate_limit(&self) -> bool {
        self.inner().does_follow_rate_limit()
    }
}

/// Opens the channel a provider task writes into.
pub(crate) fn channel() -> (mpsc::Sender<ProviderResult>, ResultStream) {
    let (tx, rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
    (tx, ResultStream::new(rx))
}

/// Sends `item`, ignoring a consumer that has gone away.
///
/// The provider run continues regardless so billing still happens.
pub(crate) async fn emit(tx: &mpsc::Sender<ProviderResult>, item: ProviderResult) {
    if tx.send(item).await.is_err() {
        tracing::trace!("result consumer dropped, continuing run");
    }
}
