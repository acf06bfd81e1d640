//! The static model table.
//!
//! Every servable `(provider, model)` pair is listed here once, together with
//! the backend version it runs on, whether it can stream tokens and how it is
//! billed. The table is built on first use and never changes afterwards.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// The backends the gateway can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions
    OpenAI,
    /// Replicate predictions
    Replicate,
}

impl ProviderKind {
    /// Returns the provider's wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::Replicate => "replicate",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Self::OpenAI),
            "replicate" => Ok(Self::Replicate),
            other => Err(GatewayError::invalid_provider(other)),
        }
    }
}

/// How a model's whole completion is obtained when it is not streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// One blocking request returns the completion
    SingleShot,
    /// A job is submitted and polled until it finishes
    Poll,
}

/// Static metadata for one servable model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderDescriptor {
    /// Backend that serves the model
    pub provider: ProviderKind,
    /// Public model name
    pub model: &'static str,
    /// Backend version hash, for backends that pin versions
    pub version_id: Option<&'static str>,
    /// Whether the backend can stream tokens for this model
    pub streaming: bool,
    /// Time-based price, `None` for token-priced models
    pub credits_per_second: Option<f64>,
    /// How non-streamed completions are obtained
    pub completion: DeliveryMode,
}

static CATALOG: LazyLock<Vec<ProviderDescriptor>> = LazyLock::new(|| {
    let openai = |model: &'static str| ProviderDescriptor {
        provider: ProviderKind::OpenAI,
        model,
        version_id: None,
        streaming: true,
        credits_per_second: None,
        completion: DeliveryMode::SingleShot,
    };
    let replicate = |model: &'static str,
                     version: &'static str,
                     streaming: bool,
                     credits_per_second: f64| ProviderDescriptor {
        provider: ProviderKind::Replicate,
        model,
        version_id: Some(version),
        streaming,
        credits_per_second: Some(credits_per_second),
        completion: DeliveryMode::Poll,
    };

    vec![
        openai("gpt-3.5-turbo"),
        openai("gpt-3.5-turbo-16k"),
        openai("gpt-4"),
        replicate(
            "llama-2-70b-chat",
            "02e509c789964a7ea8736978a43525956ef40397be9033abf9fd2badfe68c9e3",
            true,
            14000.0,
        ),
        replicate(
            "replit-code-v1-3b",
            "b84f4c074b807211cd75e3e8b1589b6399052125b4c27106e43d47189e8415ad",
            true,
            11500.0,
        ),
        replicate(
            "wizard-mega-13b-awq",
            "a4be2a7c75e51c53b22167d44de3333436f1aa9253a201d2619cf74286478599",
            false,
            7250.0,
        ),
        replicate(
            "airoboros-llama-2-70b",
            "ae090a64e6b4468d7fa85c6ca33c979b3cd941c12b1cfa2a237b4a7aa6ebaac4",
            true,
            14000.0,
        ),
    ]
});

/// Looks up a model in the table.
///
/// # Errors
///
/// Returns `unknown_model` if the provider does not serve `model`.
pub fn resolve(provider: ProviderKind, model: &str) -> Result<ProviderDescriptor, GatewayError> {
    CATALOG
        .iter()
        .find(|d| d.provider == provider && d.model == model)
        .copied()
        .ok_or_else(|| GatewayError::unknown_model(provider.as_str(), model))
}

/// Returns every model the gateway can serve.
#[must_use]
pub fn models() -> &'static [ProviderDescriptor] {
    &CATALOG
}
