//! Contracts the gateway core needs from the rest of the platform.
//!
//! Storage of usage, memories and events, and web content retrieval live
//! outside this crate. The orchestrator and the stream session only see the
//! traits below; [`in_memory`] provides process-local implementations for the
//! binary and for tests.

pub mod in_memory;

use crate::billing::BillingRecord;
use crate::error::{ErrorCode, GatewayError};
use crate::provider::{ProviderKind, Resource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Who is asking, and with which of their own provider keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    /// Platform user identifier
    pub user_id: String,
    /// Keys the caller supplied for specific providers
    pub custom_keys: BTreeMap<ProviderKind, String>,
}

impl AuthContext {
    /// Creates a context for `user_id` with no custom keys.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            custom_keys: BTreeMap::new(),
        }
    }

    /// Adds the caller's own key for `provider`.
    #[must_use]
    pub fn with_key(mut self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.custom_keys.insert(provider, key.into());
        self
    }

    /// Returns the caller's key for `provider`, if any.
    #[must_use]
    pub fn key_for(&self, provider: ProviderKind) -> Option<&str> {
        self.custom_keys
            .get(&provider)
            .map(String::as_str)
            .filter(|k| !k.is_empty())
    }

    /// Returns true if the caller pays `provider` directly.
    #[must_use]
    pub fn is_custom_key(&self, provider: ProviderKind) -> bool {
        self.key_for(provider).is_some()
    }
}

/// Failures of the web content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// Too many sources were requested
    ExceedsLimit,
    /// The combined content is too large
    ContentExceeds,
    /// Nothing usable was found
    NoContentFound,
    /// A page could not be downloaded
    Fetch(String),
    /// A page could not be turned into text
    Parse(String),
    /// The search page could not be visited
    Visit(String),
}

impl ContentError {
    /// Returns the client-facing code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ExceedsLimit => ErrorCode::WebsiteExceedsLimit,
            Self::ContentExceeds => ErrorCode::WebsitesContentExceeds,
            Self::NoContentFound => ErrorCode::NoContentFound,
            Self::Fetch(_) => ErrorCode::FetchWebpage,
            Self::Parse(_) => ErrorCode::ParseContent,
            Self::Visit(_) => ErrorCode::VisitBaseUrl,
        }
    }
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExceedsLimit => write!(f, "too many websites requested"),
            Self::ContentExceeds => write!(f, "website content exceeds the limit"),
            Self::NoContentFound => write!(f, "no content found"),
            Self::Fetch(reason) => write!(f, "failed to fetch webpage: {}", reason),
            Self::Parse(reason) => write!(f, "failed to parse webpage: {}", reason),
            Self::Visit(reason) => write!(f, "failed to visit search page: {}", reason),
        }
    }
}

impl std::error::Error for ContentError {}

/// Failures of the memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The memory does not exist or is not visible to the user
    NotFound {
        /// The requested memory
        memory_id: String,
    },
    /// The store could not be queried
    Backend(String),
}

impl MemoryError {
    /// Returns the client-facing code.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Backend(_) => ErrorCode::MemoryUnavailable,
        }
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { memory_id } => write!(f, "memory '{}' not found", memory_id),
            Self::Backend(reason) => write!(f, "memory store unavailable: {}", reason),
        }
    }
}

impl std::error::Error for MemoryError {}

/// The usage ledger could not be read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageError {
    /// What went wrong
    pub reason: String,
}

impl UsageError {
    /// Creates a usage error.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usage ledger error: {}", self.reason)
    }
}

impl std::error::Error for UsageError {}

impl From<UsageError> for GatewayError {
    fn from(error: UsageError) -> Self {
        GatewayError::usage_unavailable(error.reason)
    }
}

/// One page of web content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    /// Where the content came from
    pub url: String,
    /// Extracted text
    pub content: String,
}

/// Records each request and what was sent back.
#[async_trait]
pub trait EventRecorder: Send + Sync + fmt::Debug {
    /// Called once per session with the raw request frame, the forwarded
    /// text or error code, and the user.
    async fn record_event(&self, raw_request: &str, response: &str, user_id: &str);
}

/// Per-user credit accounting.
#[async_trait]
pub trait UsageLedger: Send + Sync + fmt::Debug {
    /// Returns true if `user_id` may not start another metered run.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    async fn rate_limit_reached(&self, user_id: &str) -> Result<bool, UsageError>;

    /// Charges a completed provider run to `user_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be written.
    async fn record_usage(&self, user_id: &str, record: BillingRecord) -> Result<(), UsageError>;
}

/// Retrieval over a user's stored memories.
#[async_trait]
pub trait MemoryStore: Send + Sync + fmt::Debug {
    /// Returns the entries of `memory_id` most relevant to `task`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the memory does not exist for `user_id`.
    async fn retrieve(
        &self,
        user_id: &str,
        memory_id: &str,
        task: &str,
    ) -> Result<Vec<Resource>, MemoryError>;
}

/// Web search used to augment tasks.
#[async_trait]
pub trait ContentSource: Send + Sync + fmt::Debug {
    /// Fetches pages relevant to `query`.
    ///
    /// # Errors
    ///
    /// Returns the [`ContentError`] describing why nothing usable came back.
    async fn fetch(&self, query: &str) -> Result<Vec<FetchedContent>, ContentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_key_is_per_provider() {
        let auth = AuthContext::new("u1").with_key(ProviderKind::Replicate, "r8_abc");

        assert!(auth.is_custom_key(ProviderKind::Replicate));
        assert!(!auth.is_custom_key(ProviderKind::OpenAI));
        assert_eq!(auth.key_for(ProviderKind::Replicate), Some("r8_abc"));
    }

    #[test]
    fn empty_key_does_not_count() {
        let auth = AuthContext::new("u1").with_key(ProviderKind::OpenAI, "");
        assert!(!auth.is_custom_key(ProviderKind::OpenAI));
    }

    #[test]
    fn usage_error_maps_to_usage_unavailable() {
        let error: GatewayError = UsageError::new("connection refused").into();
        assert_eq!(error.code(), ErrorCode::UsageUnavailable);
    }
}
