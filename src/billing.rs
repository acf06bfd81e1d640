//! Credit metering and billing records.
//!
//! Time-metered models cost `floor(seconds * credits_per_second) + 1`
//! credits per completed run. Callers that bring their own provider key are
//! never charged. Token-priced models carry no time-based credits; the usage
//! ledger prices them from the token counts on the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// How a provider run is charged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CreditMeter {
    /// Charged by processing time
    Metered {
        /// Credits per second of processing
        credits_per_second: f64,
    },
    /// Charged by the ledger from token counts
    TokenPriced,
    /// The caller supplied their own credentials
    CallerCredentials,
}

impl CreditMeter {
    /// Picks the meter for a provider run.
    ///
    /// # Arguments
    ///
    /// * `credits_per_second` - The model's time rate, if it has one
    /// * `caller_credentials` - Whether the caller supplied their own key
    #[must_use]
    pub fn for_run(credits_per_second: Option<f64>, caller_credentials: bool) -> Self {
        match (caller_credentials, credits_per_second) {
            (true, _) => Self::CallerCredentials,
            (false, Some(credits_per_second)) => Self::Metered { credits_per_second },
            (false, None) => Self::TokenPriced,
        }
    }

    /// Returns the credits owed for `billable` processing time.
    ///
    /// `None` means the run is priced from tokens instead.
    #[must_use]
    pub fn charge(&self, billable: Duration) -> Option<u64> {
        match self {
            Self::Metered { credits_per_second } => {
                let credits = (billable.as_secs_f64() * credits_per_second).floor();
                // `as` saturates on overflow.
                Some((credits.max(0.0) as u64).saturating_add(1))
            }
            Self::TokenPriced => None,
            Self::CallerCredentials => Some(0),
        }
    }

    /// Returns true if the platform must enforce the caller's credit limit.
    #[must_use]
    pub fn follows_rate_limit(&self) -> bool {
        !matches!(self, Self::CallerCredentials)
    }
}

/// One completed provider run, as reported to the usage ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRecord {
    /// Provider name (`openai`, `replicate`)
    pub provider: String,
    /// Model name
    pub model: String,
    /// Prompt tokens
    pub input_tokens: u32,
    /// Generated tokens
    pub output_tokens: u32,
    /// The generated text
    pub completion: String,
    /// Time-based credits, `None` for token-priced runs
    pub credits: Option<u64>,
    /// When the run completed
    pub recorded_at: DateTime<Utc>,
}

impl BillingRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        input_tokens: u32,
        output_tokens: u32,
        completion: impl Into<String>,
        credits: Option<u64>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            completion: completion.into(),
            credits,
            recorded_at: Utc::now(),
        }
    }
}

/// Callback invoked once per completed provider run.
pub type BillingCallback = Arc<dyn Fn(BillingRecord) + Send + Sync>;
