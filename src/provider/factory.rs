//! Construction of backend clients for a resolved model.

use super::{ProviderDescriptor, ProviderKind};
use crate::config::{GatewayConfig, OpenAIConfig, ReplicateConfig};
use crate::llm::{LLMClient, LLMError, OpenAIClient, PredictionApi, ReplicateClient};
use std::sync::Arc;

/// Builds the backend a provider runs against.
///
/// `api_key` is the caller's own key for the descriptor's provider; when it
/// is `None` the platform key from configuration is used.
pub trait BackendFactory: Send + Sync {
    /// Returns a chat-style client for single-shot or streamed runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created.
    fn chat_client(
        &self,
        descriptor: &ProviderDescriptor,
        api_key: Option<String>,
    ) -> Result<Arc<dyn LLMClient>, LLMError>;

    /// Returns a job-style client for polled runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or the provider has
    /// no job API.
    fn prediction_api(
        &self,
        descriptor: &ProviderDescriptor,
        api_key: Option<String>,
    ) -> Result<Arc<dyn PredictionApi>, LLMError>;
}

/// Real HTTP backends configured from [`GatewayConfig`].
#[derive(Debug, Clone, Default)]
pub struct HttpBackends {
    openai: OpenAIConfig,
    replicate: ReplicateConfig,
}

impl HttpBackends {
    /// Creates the factory from the backend sections of `config`.
    #[must_use]
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            openai: config.openai.clone(),
            replicate: config.replicate.clone(),
        }
    }

    fn replicate_client(
        &self,
        descriptor: &ProviderDescriptor,
        api_key: Option<String>,
    ) -> Result<ReplicateClient, LLMError> {
        let version = descriptor.version_id.ok_or_else(|| {
            LLMError::invalid_config(
                "replicate.version",
                format!("model '{}' has no pinned version", descriptor.model),
            )
        })?;
        ReplicateClient::new(&self.replicate, version, api_key)
    }
}

impl BackendFactory for HttpBackends {
    fn chat_client(
        &self,
        descriptor: &ProviderDescriptor,
        api_key: Option<String>,
    ) -> Result<Arc<dyn LLMClient>, LLMError> {
        match descriptor.provider {
            ProviderKind::OpenAI => Ok(Arc::new(OpenAIClient::new(
                &self.openai,
                descriptor.model,
                api_key,
            )?)),
            ProviderKind::Replicate => Ok(Arc::new(self.replicate_client(descriptor, api_key)?)),
        }
    }

    fn prediction_api(
        &self,
        descriptor: &ProviderDescriptor,
        api_key: Option<String>,
    ) -> Result<Arc<dyn PredictionApi>, LLMError> {
        match descriptor.provider {
            ProviderKind::Replicate => Ok(Arc::new(self.replicate_client(descriptor, api_key)?)),
            ProviderKind::OpenAI => Err(LLMError::invalid_config(
                "provider",
                "openai has no prediction API",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LLMErrorKind;
    use crate::provider::resolve;

    fn backends_without_platform_keys() -> HttpBackends {
        let mut config = GatewayConfig::default();
        config.openai.api_key_env = None;
        config.openai.api_key = None;
        config.replicate.api_key_env = None;
        config.replicate.api_key = None;
        HttpBackends::new(&config)
    }

    #[test]
    fn caller_key_is_enough_to_build_clients() {
        let backends = backends_without_platform_keys();

        let gpt = resolve(ProviderKind::OpenAI, "gpt-4").unwrap();
        let client = backends.chat_client(&gpt, Some("sk-test".into())).unwrap();
        assert_eq!(client.provider_name(), "openai");

        let llama = resolve(ProviderKind::Replicate, "llama-2-70b-chat").unwrap();
        let api = backends
            .prediction_api(&llama, Some("r8-test".into()))
            .unwrap();
        assert_eq!(api.provider_name(), "replicate");
    }

    #[test]
    fn missing_key_is_invalid_config() {
        let backends = backends_without_platform_keys();
        let gpt = resolve(ProviderKind::OpenAI, "gpt-4").unwrap();

        let err = backends.chat_client(&gpt, None).unwrap_err();
        assert!(matches!(err.kind, LLMErrorKind::InvalidConfig { .. }));
    }

    #[test]
    fn openai_has_no_prediction_api() {
        let backends = backends_without_platform_keys();
        let gpt = resolve(ProviderKind::OpenAI, "gpt-4").unwrap();

        assert!(backends.prediction_api(&gpt, Some("sk".into())).is_err());
    }
}
