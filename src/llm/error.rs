//! Backend client error types.
//!
//! Errors raised while talking to a provider backend: network failures,
//! API error responses, malformed payloads, and failed predictions.

use std::fmt;
use std::time::Duration;

/// Errors that can occur in a backend client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LLMError {
    /// The specific error that occurred
    pub kind: LLMErrorKind,
}

/// Specific backend error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LLMErrorKind {
    /// Network error when communicating with the API
    Network {
        /// Description of the network error
        message: String,
    },
    /// The upstream API rate limited us
    RateLimited {
        /// Time the upstream asked us to wait
        retry_after: Duration,
    },
    /// API returned an error response
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
        /// Error type from the API (if available)
        error_type: Option<String>,
    },
    /// Authentication failed
    AuthenticationFailed {
        /// Reason for authentication failure
        reason: String,
    },
    /// Streaming error
    StreamError {
        /// Description of the streaming error
        message: String,
    },
    /// JSON parsing error
    ParseError {
        /// Description of the parse error
        message: String,
    },
    /// Configuration error
    InvalidConfig {
        /// The configuration field that was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },
    /// A submitted prediction finished unsuccessfully
    PredictionFailed {
        /// The status or error reported by the backend
        reason: String,
    },
}

impl LLMError {
    /// Creates a new LLMError with the given kind.
    #[must_use]
    pub fn new(kind: LLMErrorKind) -> Self {
        Self { kind }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::Network {
            message: message.into(),
        })
    }

    /// Creates a rate limited error.
    #[must_use]
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::new(LLMErrorKind::RateLimited { retry_after })
    }

    /// Creates an API error.
    #[must_use]
    pub fn api_error(
        status_code: u16,
        message: impl Into<String>,
        error_type: Option<String>,
    ) -> Self {
        Self::new(LLMErrorKind::ApiError {
            status_code,
            message: message.into(),
            error_type,
        })
    }

    /// Creates an authentication failed error.
    #[must_use]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::AuthenticationFailed {
            reason: reason.into(),
        })
    }

    /// Creates a stream error.
    #[must_use]
    pub fn stream_error(message: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::StreamError {
            message: message.into(),
        })
    }

    /// Creates a parse error.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::ParseError {
            message: message.into(),
        })
    }

    /// Creates an invalid config error.
    #[must_use]
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates a prediction failed error.
    #[must_use]
    pub fn prediction_failed(reason: impl Into<String>) -> Self {
        Self::new(LLMErrorKind::PredictionFailed {
            reason: reason.into(),
        })
    }
}

impl fmt::Display for LLMError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            LLMErrorKind::Network { message } => {
                write!(
                    f,
                    "network error communicating with provider API: {}; check network connectivity",
                    message
                )
            }
            LLMErrorKind::RateLimited { retry_after } => {
                write!(
                    f,
                    "provider rate limit exceeded; retry after {} seconds",
                    retry_after.as_secs()
                )
            }
            LLMErrorKind::ApiError {
                status_code,
                message,
                error_type,
            } => {
                if let Some(error_type) = error_type {
                    write!(
                        f,
                        "API error (HTTP {}): {} (type: {})",
                        status_code, message, error_type
                    )
                } else {
                    write!(f, "API error (HTTP {}): {}", status_code, message)
                }
            }
            LLMErrorKind::AuthenticationFailed { reason } => {
                write!(
                    f,
                    "authentication failed: {}; verify API key is valid",
                    reason
                )
            }
            LLMErrorKind::StreamError { message } => {
                write!(f, "streaming error: {}", message)
            }
            LLMErrorKind::ParseError { message } => {
                write!(f, "failed to parse API response: {}", message)
            }
            LLMErrorKind::InvalidConfig { field, reason } => {
                write!(f, "invalid configuration for '{}': {}", field, reason)
            }
            LLMErrorKind::PredictionFailed { reason } => {
                write!(f, "prediction failed: {}", reason)
            }
        }
    }
}

impl std::error::Error for LLMError {}
