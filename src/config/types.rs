//! Configuration types for the gateway.
//!
//! These structures map directly to the TOML configuration file format:
//!
//! ```toml
//! [openai]
//! api_key_env = "OPENAI_API_KEY"
//! base_url = "https://api.openai.com/v1"
//!
//! [replicate]
//! api_key_env = "REPLICATE_API_KEY"
//! timeout_secs = 60
//!
//! [content]
//! max_chars_per_source = 1000
//!
//! [logging]
//! level = "debug"
//!
//! [server]
//! listen = "0.0.0.0:8080"
//! ```

use crate::error::GatewayError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// OpenAI-compatible backend settings
    #[serde(default)]
    pub openai: OpenAIConfig,

    /// Replicate backend settings
    #[serde(default)]
    pub replicate: ReplicateConfig,

    /// Content augmentation settings
    #[serde(default)]
    pub content: ContentConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// WebSocket server settings (binary only)
    #[serde(default)]
    pub server: ServerConfig,
}

impl GatewayConfig {
    /// Creates a configuration with every default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the values serde cannot check on its own.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field.
    pub fn validate(&self) -> Result<(), GatewayError> {
        validate_base_url("openai.base_url", &self.openai.base_url)?;
        validate_base_url("replicate.base_url", &self.replicate.base_url)?;

        if self.content.max_chars_per_source == 0 {
            return Err(GatewayError::configuration(
                "content.max_chars_per_source",
                "must be greater than zero",
            ));
        }

        Ok(())
    }
}

fn validate_base_url(field: &str, value: &str) -> Result<(), GatewayError> {
    let url = Url::parse(value)
        .map_err(|e| GatewayError::configuration(field, format!("invalid URL '{value}': {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(GatewayError::configuration(
            field,
            format!("unsupported URL scheme: {scheme}; use http or https"),
        )),
    }
}

/// Resolves an API key from an environment variable or a direct value.
///
/// The environment variable wins when it is set and non-empty.
fn resolve_key(api_key_env: Option<&str>, api_key: Option<&str>) -> Option<String> {
    if let Some(env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }

    api_key.filter(|k| !k.is_empty()).map(str::to_string)
}

/// Settings for the OpenAI-compatible chat completions backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Environment variable holding the platform API key
    pub api_key_env: Option<String>,
    /// Direct API key value (discouraged - use api_key_env instead)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl OpenAIConfig {
    /// Resolves the platform API key.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key_env.as_deref(), self.api_key.as_deref())
    }

    /// Returns the request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for the Replicate predictions backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicateConfig {
    /// Base URL for the API
    pub base_url: String,
    /// Environment variable holding the platform API key
    pub api_key_env: Option<String>,
    /// Direct API key value (discouraged - use api_key_env instead)
    pub api_key: Option<String>,
    /// Timeout for each individual HTTP request, in seconds
    pub timeout_secs: u64,
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.replicate.com/v1".to_string(),
            api_key_env: Some("REPLICATE_API_KEY".to_string()),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl ReplicateConfig {
    /// Resolves the platform API key.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_key(self.api_key_env.as_deref(), self.api_key.as_deref())
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings for web content augmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    /// Characters kept from each fetched source before `...` is appended
    pub max_chars_per_source: usize,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_chars_per_source: 1000,
        }
    }
}

/// Settings for the bundled WebSocket server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on
    pub listen: String,
    /// Credits granted to each user by the in-memory usage ledger
    pub credits_per_user: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            credits_per_user: 1_000_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayErrorKind;
    use crate::logging::LogLevel;

    #[test]
    fn default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.content.max_chars_per_source, 1000);
        assert_eq!(config.openai.base_url, "https://api.openai.com/v1");
        assert_eq!(config.replicate.base_url, "https://api.replicate.com/v1");
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let toml_str = r#"
[replicate]
timeout_secs = 5

[logging]
level = "Debug"
        "#;

        let config: GatewayConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.replicate.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.replicate.api_key_env,
            Some("REPLICATE_API_KEY".to_string())
        );
        assert_eq!(config.openai, OpenAIConfig::default());
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut config = GatewayConfig::default();
        config.openai.base_url = "not a url".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err.kind, GatewayErrorKind::Configuration { .. }));
        assert!(err.to_string().contains("openai.base_url"));
    }

    #[test]
    fn validate_rejects_non_http_scheme() {
        let mut config = GatewayConfig::default();
        config.replicate.base_url = "ftp://api.replicate.com".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported URL scheme"));
    }

    #[test]
    fn validate_rejects_zero_content_limit() {
        let mut config = GatewayConfig::default();
        config.content.max_chars_per_source = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_key_prefers_environment() {
        std::env::set_var("GATEWAY_CORE_TEST_KEY_PREFERRED", "from-env");

        let key = resolve_key(Some("GATEWAY_CORE_TEST_KEY_PREFERRED"), Some("direct"));
        assert_eq!(key, Some("from-env".to_string()));
    }

    #[test]
    fn resolve_key_falls_back_to_direct_value() {
        let key = resolve_key(Some("GATEWAY_CORE_TEST_KEY_UNSET"), Some("direct"));
        assert_eq!(key, Some("direct".to_string()));

        assert_eq!(resolve_key(None, Some("")), None);
        assert_eq!(resolve_key(None, None), None);
    }

    #[test]
    fn config_serialization_roundtrip() {
        let config = GatewayConfig::default();

        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: GatewayConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, deserialized);
    }
}
