//! Process-local collaborators.
//!
//! Nothing here survives a restart. They back the standalone binary and the
//! tests.

use super::{
    ContentError, ContentSource, EventRecorder, FetchedContent, MemoryError, MemoryStore,
    UsageError, UsageLedger,
};
use crate::billing::BillingRecord;
use crate::provider::Resource;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Maximum number of entries returned by one memory retrieval.
pub const MATCH_COUNT: usize = 10;

/// Credit ledger with the same budget for every user.
///
/// Token-priced runs are charged one credit per token.
#[derive(Debug)]
pub struct InMemoryLedger {
    budget: u64,
    spent: Mutex<HashMap<String, u64>>,
}

impl InMemoryLedger {
    /// Creates a ledger granting `budget` credits to each user.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            spent: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the credits `user_id` has used so far.
    pub async fn spent(&self, user_id: &str) -> u64 {
        self.spent.lock().await.get(user_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl UsageLedger for InMemoryLedger {
    async fn rate_limit_reached(&self, user_id: &str) -> Result<bool, UsageError> {
        Ok(self.spent(user_id).await >= self.budget)
    }

    async fn record_usage(&self, user_id: &str, record: BillingRecord) -> Result<(), UsageError> {
        let charge = record.credits.unwrap_or_else(|| {
            u64::from(record.input_tokens).saturating_add(u64::from(record.output_tokens))
        });

        let mut spent = self.spent.lock().await;
        let total = spent.entry(user_id.to_string()).or_insert(0);
        *total = total.saturating_add(charge);

        tracing::debug!(
            user_id,
            provider = %record.provider,
            model = %record.model,
            credits = charge,
            total = *total,
            "usage recorded"
        );
        Ok(())
    }
}

/// Memory entries kept per `(user, memory)` pair.
#[derive(Debug, Default)]
pub struct InMemoryMemoryStore {
    entries: Mutex<HashMap<(String, String), Vec<(String, String)>>>,
}

impl InMemoryMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `memory_id` for `user_id` if it does not exist yet.
    pub async fn create(&self, user_id: &str, memory_id: &str) {
        self.entries
            .lock()
            .await
            .entry((user_id.to_string(), memory_id.to_string()))
            .or_default();
    }

    /// Adds an entry to a memory, creating the memory if needed.
    pub async fn add(&self, user_id: &str, memory_id: &str, id: &str, content: &str) {
        self.entries
            .lock()
            .await
            .entry((user_id.to_string(), memory_id.to_string()))
            .or_default()
            .push((id.to_string(), content.to_string()));
    }
}

/// Share of distinct lowercase words the two texts have in common.
fn similarity(a: &str, b: &str) -> f32 {
    let words = |s: &str| -> HashSet<String> {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    let (a, b) = (words(a), words(b));
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f32 / union as f32
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn retrieve(
        &self,
        user_id: &str,
        memory_id: &str,
        task: &str,
    ) -> Result<Vec<Resource>, MemoryError> {
        let entries = self.entries.lock().await;
        let memory = entries
            .get(&(user_id.to_string(), memory_id.to_string()))
            .ok_or_else(|| MemoryError::NotFound {
                memory_id: memory_id.to_string(),
            })?;

        let mut matches: Vec<Resource> = memory
            .iter()
            .map(|(id, content)| Resource {
                id: id.clone(),
                content: content.clone(),
                similarity: similarity(task, content),
            })
            .filter(|r| r.similarity > 0.0)
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(MATCH_COUNT);

        Ok(matches)
    }
}

/// Content source serving a fixed set of pages for every query.
#[derive(Debug, Clone, Default)]
pub struct StaticContentSource {
    pages: Vec<FetchedContent>,
}

impl StaticContentSource {
    /// Creates a source that always finds nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a source returning `pages`.
    #[must_use]
    pub fn with_pages(pages: Vec<FetchedContent>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl ContentSource for StaticContentSource {
    async fn fetch(&self, _query: &str) -> Result<Vec<FetchedContent>, ContentError> {
        if self.pages.is_empty() {
            return Err(ContentError::NoContentFound);
        }
        Ok(self.pages.clone())
    }
}

/// A recorded request and its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// The raw request frame
    pub request: String,
    /// The forwarded text or error code
    pub response: String,
    /// The requesting user
    pub user_id: String,
}

/// Event recorder that logs each event and keeps it in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl InMemoryEventRecorder {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every event recorded so far.
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventRecorder for InMemoryEventRecorder {
    async fn record_event(&self, raw_request: &str, response: &str, user_id: &str) {
        tracing::info!(
            user_id,
            request_bytes = raw_request.len(),
            response_bytes = response.len(),
            "request completed"
        );
        self.events.lock().await.push(RecordedEvent {
            request: raw_request.to_string(),
            response: response.to_string(),
            user_id: user_id.to_string(),
        });
    }
}

/// Event recorder that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

#[async_trait]
impl EventRecorder for TracingEventRecorder {
    async fn record_event(&self, raw_request: &str, response: &str, user_id: &str) {
        tracing::info!(
            user_id,
            request = raw_request,
            response_bytes = response.len(),
            "request completed"
        );
    }
}
