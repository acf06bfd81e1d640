//! Error types for the generation gateway.
//!
//! Every failure that can reach a client carries a short machine-readable
//! [`ErrorCode`]. The human-readable `Display` output is for logs only and is
//! never written to the client.
//!
//! No external error crates (anyhow, thiserror, eyre) are used.

use crate::collaborators::{ContentError, MemoryError};
use crate::llm::LLMError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable failure codes delivered to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The duplex transport failed to read or write a frame
    TransportError,
    /// The request was rejected before dispatch
    InvalidInput,
    /// The request frame was not valid JSON
    InvalidJson,
    /// The request frame was not a text frame
    InvalidMessageType,
    /// Too many web sources were requested
    #[serde(rename = "error_website_exceeds_limit")]
    WebsiteExceedsLimit,
    /// The fetched web content is too large
    #[serde(rename = "error_websites_content_exceeds")]
    WebsitesContentExceeds,
    /// The web search produced no usable content
    #[serde(rename = "error_no_content_found")]
    NoContentFound,
    /// A web page could not be fetched
    #[serde(rename = "error_fetch_webpage")]
    FetchWebpage,
    /// A fetched web page could not be parsed
    #[serde(rename = "error_parse_content")]
    ParseContent,
    /// The search page itself could not be visited
    #[serde(rename = "error_visit_base_url")]
    VisitBaseUrl,
    /// A referenced resource (e.g. a memory) does not exist
    NotFound,
    /// The memory backend failed
    MemoryUnavailable,
    /// The usage ledger failed
    UsageUnavailable,
    /// The model is not in the provider table
    UnknownModel,
    /// The provider name is not recognized
    InvalidProvider,
    /// The caller exhausted their credits
    RateLimitReached,
    /// The provider backend could not be constructed
    LlmInitFailed,
    /// A single provider call failed
    GenerationError,
    /// Typed generation exhausted its attempts
    GenerationFailed,
    /// A failure with no more specific cause
    InternalError,
}

impl ErrorCode {
    /// Returns the wire representation of this code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransportError => "transport_error",
            Self::InvalidInput => "invalid_input",
            Self::InvalidJson => "invalid_json",
            Self::InvalidMessageType => "invalid_message_type",
            Self::WebsiteExceedsLimit => "error_website_exceeds_limit",
            Self::WebsitesContentExceeds => "error_websites_content_exceeds",
            Self::NoContentFound => "error_no_content_found",
            Self::FetchWebpage => "error_fetch_webpage",
            Self::ParseContent => "error_parse_content",
            Self::VisitBaseUrl => "error_visit_base_url",
            Self::NotFound => "not_found",
            Self::MemoryUnavailable => "memory_unavailable",
            Self::UsageUnavailable => "usage_unavailable",
            Self::UnknownModel => "unknown_model",
            Self::InvalidProvider => "invalid_provider",
            Self::RateLimitReached => "rate_limit_reached",
            Self::LlmInitFailed => "llm_init_failed",
            Self::GenerationError => "generation_error",
            Self::GenerationFailed => "generation_failed",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the gateway core.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayError {
    /// The specific error that occurred
    pub kind: GatewayErrorKind,
}

/// Specific gateway error types.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayErrorKind {
    /// Reading or writing a client frame failed
    Transport {
        /// Description of the transport failure
        message: String,
    },
    /// The request was rejected before dispatch
    InvalidInput {
        /// Why the request was rejected
        reason: String,
    },
    /// The request frame could not be decoded
    InvalidJson {
        /// The decoder's complaint
        reason: String,
    },
    /// The request frame was binary
    InvalidMessageType,
    /// The content augmentation collaborator failed
    Content(ContentError),
    /// The memory collaborator failed
    Memory(MemoryError),
    /// The usage ledger failed
    UsageUnavailable {
        /// Description of the ledger failure
        reason: String,
    },
    /// The `(provider, model)` pair is not in the provider table
    UnknownModel {
        /// The provider that was asked for
        provider: String,
        /// The model that was asked for
        model: String,
    },
    /// The provider name is not recognized
    InvalidProvider {
        /// The provider name that was asked for
        name: String,
    },
    /// The caller has no credits left
    RateLimitReached {
        /// The user that hit the limit
        user_id: String,
    },
    /// The provider backend could not be constructed
    ProviderInit(LLMError),
    /// Configuration could not be loaded
    Configuration {
        /// The configuration field that was invalid
        field: String,
        /// Why it was invalid
        reason: String,
    },
    /// A background task died
    Internal {
        /// Description of the failure
        reason: String,
    },
}

impl GatewayError {
    /// Creates a new GatewayError with the given kind.
    #[must_use]
    pub fn new(kind: GatewayErrorKind) -> Self {
        Self { kind }
    }

    /// Creates a transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Transport {
            message: message.into(),
        })
    }

    /// Creates an invalid input error.
    #[must_use]
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidInput {
            reason: reason.into(),
        })
    }

    /// Creates an invalid JSON error.
    #[must_use]
    pub fn invalid_json(reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidJson {
            reason: reason.into(),
        })
    }

    /// Creates an unknown model error.
    #[must_use]
    pub fn unknown_model(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::UnknownModel {
            provider: provider.into(),
            model: model.into(),
        })
    }

    /// Creates an invalid provider error.
    #[must_use]
    pub fn invalid_provider(name: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidProvider { name: name.into() })
    }

    /// Creates a rate limit error.
    #[must_use]
    pub fn rate_limit_reached(user_id: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::RateLimitReached {
            user_id: user_id.into(),
        })
    }

    /// Creates a usage ledger error.
    #[must_use]
    pub fn usage_unavailable(reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::UsageUnavailable {
            reason: reason.into(),
        })
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Configuration {
            field: field.into(),
            reason: reason.into(),
        })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Internal {
            reason: reason.into(),
        })
    }

    /// Returns the machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match &self.kind {
            GatewayErrorKind::Transport { .. } => ErrorCode::TransportError,
            GatewayErrorKind::InvalidInput { .. } => ErrorCode::InvalidInput,
            GatewayErrorKind::InvalidJson { .. } => ErrorCode::InvalidJson,
            GatewayErrorKind::InvalidMessageType => ErrorCode::InvalidMessageType,
            GatewayErrorKind::Content(e) => e.code(),
            GatewayErrorKind::Memory(e) => e.code(),
            GatewayErrorKind::UsageUnavailable { .. } => ErrorCode::UsageUnavailable,
            GatewayErrorKind::UnknownModel { .. } => ErrorCode::UnknownModel,
            GatewayErrorKind::InvalidProvider { .. } => ErrorCode::InvalidProvider,
            GatewayErrorKind::RateLimitReached { .. } => ErrorCode::RateLimitReached,
            GatewayErrorKind::ProviderInit(_) => ErrorCode::LlmInitFailed,
            GatewayErrorKind::Configuration { .. } | GatewayErrorKind::Internal { .. } => {
                ErrorCode::InternalError
            }
        }
    }

    /// Returns true if this is a transport failure.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self.kind, GatewayErrorKind::Transport { .. })
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            GatewayErrorKind::Transport { message } => {
                write!(f, "transport error: {}", message)
            }
            GatewayErrorKind::InvalidInput { reason } => {
                write!(f, "invalid input: {}", reason)
            }
            GatewayErrorKind::InvalidJson { reason } => {
                write!(f, "request is not valid JSON: {}", reason)
            }
            GatewayErrorKind::InvalidMessageType => {
                write!(f, "request must be sent as a text frame")
            }
            GatewayErrorKind::Content(e) => write!(f, "content augmentation failed: {}", e),
            GatewayErrorKind::Memory(e) => write!(f, "memory retrieval failed: {}", e),
            GatewayErrorKind::UsageUnavailable { reason } => {
                write!(f, "usage ledger unavailable: {}", reason)
            }
            GatewayErrorKind::UnknownModel { provider, model } => {
                write!(
                    f,
                    "unknown model '{}' for provider '{}'; check the provider table",
                    model, provider
                )
            }
            GatewayErrorKind::InvalidProvider { name } => {
                write!(f, "invalid provider '{}'", name)
            }
            GatewayErrorKind::RateLimitReached { user_id } => {
                write!(f, "user '{}' has reached their usage limit", user_id)
            }
            GatewayErrorKind::ProviderInit(e) => {
                write!(f, "failed to initialize provider: {}", e)
            }
            GatewayErrorKind::Configuration { field, reason } => {
                write!(f, "invalid configuration for '{}': {}", field, reason)
            }
            GatewayErrorKind::Internal { reason } => write!(f, "internal error: {}", reason),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<ContentError> for GatewayError {
    fn from(error: ContentError) -> Self {
        Self::new(GatewayErrorKind::Content(error))
    }
}

impl From<MemoryError> for GatewayError {
    fn from(error: MemoryError) -> Self {
        Self::new(GatewayErrorKind::Memory(error))
    }
}
