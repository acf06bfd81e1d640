//! Generation orchestrator.
//!
//! Turns one [`GenerationRequest`] into one running provider:
//!
//! 1. validate the request and resolve `(provider, model)`
//! 2. enforce the caller's credit limit, unless they use their own key
//! 3. augment the task with memory entries and web content
//! 4. start exactly one provider (or the typed validator) and return its
//!    [`ResultStream`]
//!
//! Every failure before dispatch is returned as a [`GatewayError`] whose
//! [`code`](GatewayError::code) is what the client sees.

use crate::billing::{BillingCallback, BillingRecord};
use crate::collaborators::{AuthContext, ContentSource, FetchedContent, MemoryStore, UsageLedger};
use crate::error::{GatewayError, GatewayErrorKind};
use crate::llm::ProviderOptions;
use crate::provider::{
    resolve, BackendFactory, DeliveryMode, ModelProvider, Provider, ProviderKind, ProviderResult,
    ProviderSpec, Resource, ResultStream,
};
use crate::typed::{TypeDescriptor, TypedGenerator};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};

/// Characters kept from each web source when none is configured.
pub const DEFAULT_MAX_CHARS_PER_SOURCE: usize = 1000;

const SOURCE_SEPARATOR: &str = "\n==========\n";

static WHITESPACE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\p{Zs}]{2,}").expect("constant whitespace pattern"));

fn default_provider() -> String {
    ProviderKind::OpenAI.as_str().to_string()
}

fn default_streaming() -> bool {
    true
}

/// A client's generation request, as sent in the first session frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// What to generate
    pub task: String,
    /// Declared output type; the output is validated JSON when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    /// Provider name, `openai` by default
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name, the provider's default model when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Whether tokens should be forwarded as they are generated
    #[serde(default = "default_streaming")]
    pub streaming: bool,
    /// Memory to retrieve context from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    /// Whether to send the `[INFOS]:` summary at the end
    #[serde(default)]
    pub infos: bool,
    /// Whether to augment the task with web content
    #[serde(default)]
    pub web: bool,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Stop sequences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl GenerationRequest {
    /// Creates a streaming request for `task` with every other field defaulted.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            output_schema: None,
            provider: default_provider(),
            model: None,
            streaming: true,
            memory_id: None,
            infos: false,
            web: false,
            temperature: None,
            max_tokens: None,
            stop: Vec::new(),
        }
    }

    /// Returns the memory id, treating an empty string as absent.
    #[must_use]
    pub fn memory_id(&self) -> Option<&str> {
        self.memory_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Returns the backend options carried by the request.
    #[must_use]
    pub fn options(&self) -> ProviderOptions {
        ProviderOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: self.stop.clone(),
        }
    }
}

/// Model used when a request names a provider but no model.
#[must_use]
pub fn default_model(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::OpenAI => "gpt-3.5-turbo",
        ProviderKind::Replicate => "llama-2-70b-chat",
    }
}

/// Resolves requests to running providers.
#[derive(Clone)]
pub struct Orchestrator {
    backends: Arc<dyn BackendFactory>,
    ledger: Arc<dyn UsageLedger>,
    memory: Arc<dyn MemoryStore>,
    content: Arc<dyn ContentSource>,
    max_chars_per_source: usize,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("ledger", &self.ledger)
            .field("memory", &self.memory)
            .field("content", &self.content)
            .field("max_chars_per_source", &self.max_chars_per_source)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over its collaborators.
    #[must_use]
    pub fn new(
        backends: Arc<dyn BackendFactory>,
        ledger: Arc<dyn UsageLedger>,
        memory: Arc<dyn MemoryStore>,
        content: Arc<dyn ContentSource>,
    ) -> Self {
        Self {
            backends,
            ledger,
            memory,
            content,
            max_chars_per_source: DEFAULT_MAX_CHARS_PER_SOURCE,
        }
    }

    /// Sets how many characters of each web source reach the prompt.
    #[must_use]
    pub fn with_max_chars_per_source(mut self, max_chars: usize) -> Self {
        self.max_chars_per_source = max_chars;
        self
    }

    /// Starts generating `request` on behalf of `auth`.
    ///
    /// # Errors
    ///
    /// Returns the error that prevented dispatch. Failures after dispatch are
    /// reported as items of the returned stream.
    pub async fn start(
        &self,
        auth: &AuthContext,
        request: &GenerationRequest,
    ) -> Result<ResultStream, GatewayError> {
        if request.task.trim().is_empty() {
            return Err(GatewayError::invalid_input("task must not be empty"));
        }
        if let Some(t) = request.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(GatewayError::invalid_input(format!(
                    "temperature {} is outside 0..=2",
                    t
                )));
            }
        }
        let schema = request
            .output_schema
            .as_ref()
            .map(TypeDescriptor::from_json)
            .transpose()
            .map_err(|e| GatewayError::invalid_input(e.to_string()))?;

        let kind: ProviderKind = request.provider.parse()?;
        let model = request.model.as_deref().unwrap_or(default_model(kind));
        let descriptor = resolve(kind, model)?;

        let caller_credentials = auth.is_custom_key(kind);
        if !caller_credentials && self.ledger.rate_limit_reached(&auth.user_id).await? {
            tracing::info!(user_id = %auth.user_id, "rate limit reached");
            return Err(GatewayError::rate_limit_reached(&auth.user_id));
        }

        let resources = match request.memory_id() {
            Some(memory_id) => {
                self.memory
                    .retrieve(&auth.user_id, memory_id, &request.task)
                    .await?
            }
            None => Vec::new(),
        };
        let pages = if request.web {
            self.content.fetch(&request.task).await?
        } else {
            Vec::new()
        };
        let task = compose_task(
            &request.task,
            &resources,
            &pages,
            self.max_chars_per_source,
        );

        let spec = ProviderSpec::new(descriptor, caller_credentials);
        let api_key = auth.key_for(kind).map(str::to_string);
        let billing = self.billing_callback(&auth.user_id);
        let options = request.options();

        tracing::info!(
            user_id = %auth.user_id,
            provider = kind.as_str(),
            model = descriptor.model,
            streaming = request.streaming,
            typed = schema.is_some(),
            caller_credentials,
            resources = resources.len(),
            web_sources = pages.len(),
            "starting generation"
        );

        let stream = match schema {
            Some(schema) => {
                let generator = match descriptor.completion {
                    DeliveryMode::SingleShot => self
                        .backends
                        .chat_client(&descriptor, api_key)
                        .map(|client| TypedGenerator::new(client, spec, schema)),
                    DeliveryMode::Poll => self
                        .backends
                        .prediction_api(&descriptor, api_key)
                        .map(|api| TypedGenerator::polling(api, spec, schema)),
                }
                .map_err(|e| GatewayError::new(GatewayErrorKind::ProviderInit(e)))?;
                generator.generate(task, Some(billing), options)
            }
            None => {
                let provider =
                    Provider::build(spec, request.streaming, self.backends.as_ref(), api_key)
                        .map_err(|e| GatewayError::new(GatewayErrorKind::ProviderInit(e)))?;
                provider.generate(task, Some(billing), options)
            }
        };

        if resources.is_empty() {
            Ok(stream)
        } else {
            Ok(stream.with_prelude(ProviderResult::with_resources(resources)))
        }
    }

    /// Forwards each completed run to the usage ledger.
    fn billing_callback(&self, user_id: &str) -> BillingCallback {
        let ledger = Arc::clone(&self.ledger);
        let user_id = user_id.to_string();

        Arc::new(move |record: BillingRecord| {
            let ledger = Arc::clone(&ledger);
            let user_id = user_id.clone();
            tokio::spawn(async move {
                if let Err(e) = ledger.record_usage(&user_id, record).await {
                    tracing::error!(user_id = %user_id, error = %e, "failed to record usage");
                }
            });
        })
    }
}

/// Trims a web source and cuts it to `max_chars` characters.
fn truncate_source(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    let collapsed = WHITESPACE_RUNS.replace_all(content, " ").into_owned();

    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Builds the prompt actually sent to the provider.
///
/// Memory entries come first, then web sources, then the task itself.
#[must_use]
pub fn compose_task(
    task: &str,
    resources: &[Resource],
    pages: &[FetchedContent],
    max_chars_per_source: usize,
) -> String {
    if resources.is_empty() && pages.is_empty() {
        return task.to_string();
    }

    let mut prompt = String::new();

    if !resources.is_empty() {
        prompt.push_str("Here is some information that may help with the task:\n");
        for resource in resources {
            prompt.push_str(&resource.content);
            prompt.push_str(SOURCE_SEPARATOR);
        }
        prompt.push('\n');
    }

    if !pages.is_empty() {
        prompt.push_str("Here is some content found on the web:\n");
        for (i, page) in pages.iter().enumerate() {
            prompt.push_str(&format!(
                "Site {} ({}): {}",
                i + 1,
                page.url,
                truncate_source(&page.content, max_chars_per_source)
            ));
            prompt.push_str(SOURCE_SEPARATOR);
        }
        prompt.push('\n');
    }

    prompt.push_str("Task:\n");
    prompt.push_str(task);
    prompt
}
