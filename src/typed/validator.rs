//! Bounded retry loop for structured output.
//!
//! The pure part ([`strip_code_fence`], [`ValidationAttempt::check`]) decides
//! whether one raw completion is acceptable. [`TypedGenerator`] owns the
//! attempt loop and the usage accounting. Chat attempts are billed here;
//! prediction jobs are billed by the poll provider that runs them, so their
//! boot time stays free.

use super::schema::TypeDescriptor;
use crate::billing::BillingCallback;
use crate::error::ErrorCode;
use crate::llm::{count_tokens, LLMClient, PredictionApi, ProviderOptions, TokenUsage};
use crate::provider::{
    channel, emit, ModelProvider, PollProvider, ProviderResult, ProviderSpec, ResultStream,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Maximum number of backend calls for one typed request.
pub const MAX_ATTEMPTS: u32 = 5;

/// Builds the prompt asking for a single JSON answer of type `schema`.
#[must_use]
pub fn typed_prompt(schema: &TypeDescriptor, task: &str) -> String {
    format!(
        "Your goal is to write a JSON object that accomplishes a specific task.\n\
         Strings inside the JSON must be plain text, without markdown or HTML unless the task asks for it.\n\
         The JSON object must follow this type:\n```\n{}\n```\n\
         The task you must accomplish:\n{}\n\n\
         Answer with the JSON only, in a single json markdown code block with the keys described above. \
         Do not include any other text.\n\
         Keep the JSON on a single line, without newlines outside of strings.",
        schema.render(),
        task
    )
}

/// Removes surrounding fence markers and a leading language tag.
#[must_use]
pub fn strip_code_fence(raw: &str) -> &str {
    let body = raw.trim().trim_matches('`');

    if let Some(rest) = body.strip_prefix("json") {
        return rest.trim();
    }

    if let Some((first, rest)) = body.split_once('\n') {
        if is_language_tag(first.trim()) {
            return rest.trim();
        }
    }

    body.trim()
}

fn is_language_tag(word: &str) -> bool {
    !word.is_empty()
        && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+')
        && !matches!(word, "true" | "false" | "null")
        && word.parse::<f64>().is_err()
}

/// One backend answer and its verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationAttempt {
    /// Zero-based attempt number
    pub index: u32,
    /// The completion as returned, empty if the call failed
    pub raw_output: String,
    /// The decoded JSON, if the output parsed
    pub parsed: Option<Value>,
    /// True if the output parsed and matched the declared type
    pub valid: bool,
}

impl ValidationAttempt {
    /// Judges `raw_output` against `schema`.
    #[must_use]
    pub fn check(index: u32, raw_output: String, schema: &TypeDescriptor) -> Self {
        let parsed = serde_json::from_str::<Value>(strip_code_fence(&raw_output)).ok();
        let valid = parsed.as_ref().is_some_and(|v| schema.matches(v));

        Self {
            index,
            raw_output,
            parsed,
            valid,
        }
    }

    fn failed_call(index: u32) -> Self {
        Self {
            index,
            raw_output: String::new(),
            parsed: None,
            valid: false,
        }
    }
}

/// Result of a typed generation.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedOutcome {
    /// An attempt produced a matching value
    Valid {
        /// The accepted value
        value: Value,
        /// Usage summed over every attempt made
        usage: TokenUsage,
        /// Every attempt, the accepted one last
        attempts: Vec<ValidationAttempt>,
    },
    /// All attempts were rejected
    Failed {
        /// Usage summed over every attempt made
        usage: TokenUsage,
        /// Every attempt
        attempts: Vec<ValidationAttempt>,
    },
}

impl TypedOutcome {
    /// Returns the value delivered to the caller.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Valid { value, .. } => value.clone(),
            Self::Failed { .. } => json!({ "error": ErrorCode::GenerationFailed.as_str() }),
        }
    }

    /// Returns the usage summed over all attempts.
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        match self {
            Self::Valid { usage, .. } | Self::Failed { usage, .. } => *usage,
        }
    }

    /// Returns the attempts made.
    #[must_use]
    pub fn attempts(&self) -> &[ValidationAttempt] {
        match self {
            Self::Valid { attempts, .. } | Self::Failed { attempts, .. } => attempts,
        }
    }

    /// Converts the outcome into the terminal item of a result stream.
    #[must_use]
    pub fn into_result(self) -> ProviderResult {
        match self {
            Self::Valid { value, usage, .. } => ProviderResult::terminal(value.to_string(), usage),
            Self::Failed { usage, .. } => {
                ProviderResult::failure(ErrorCode::GenerationFailed).with_usage(usage)
            }
        }
    }
}

/// Where one attempt runs.
#[derive(Debug, Clone)]
enum AttemptBackend {
    /// One chat completion per attempt
    Chat(Arc<dyn LLMClient>),
    /// One prediction job per attempt, polled to completion
    Poll(PollProvider),
}

/// Output of one successful backend call.
struct AttemptOutput {
    content: String,
    usage: TokenUsage,
}

/// Drives a backend until it answers with a value of the declared type.
#[derive(Debug, Clone)]
pub struct TypedGenerator {
    backend: AttemptBackend,
    spec: ProviderSpec,
    schema: TypeDescriptor,
}

impl TypedGenerator {
    /// Creates a generator for `schema` over a chat `client`.
    #[must_use]
    pub fn new(client: Arc<dyn LLMClient>, spec: ProviderSpec, schema: TypeDescriptor) -> Self {
        Self {
            backend: AttemptBackend::Chat(client),
            spec,
            schema,
        }
    }

    /// Creates a generator whose attempts are prediction jobs on `api`.
    ///
    /// Each job reports cold boots like a plain poll run and is billed for
    /// its processing time only.
    #[must_use]
    pub fn polling(
        api: Arc<dyn PredictionApi>,
        spec: ProviderSpec,
        schema: TypeDescriptor,
    ) -> Self {
        Self {
            backend: AttemptBackend::Poll(PollProvider::new(api, spec)),
            spec,
            schema,
        }
    }

    /// Runs up to [`MAX_ATTEMPTS`] backend calls.
    ///
    /// Each completed call is billed, whether or not its output is accepted.
    /// A failed call consumes an attempt and costs nothing.
    pub async fn run(
        &self,
        task: &str,
        billing: Option<&BillingCallback>,
        options: &ProviderOptions,
    ) -> TypedOutcome {
        self.run_reporting(task, billing, options, None).await
    }

    async fn run_reporting(
        &self,
        task: &str,
        billing: Option<&BillingCallback>,
        options: &ProviderOptions,
        progress: Option<&mpsc::Sender<ProviderResult>>,
    ) -> TypedOutcome {
        let prompt = typed_prompt(&self.schema, task);
        let mut usage = TokenUsage::default();
        let mut attempts = Vec::with_capacity(MAX_ATTEMPTS as usize);
        let mut warned = false;

        for index in 0..MAX_ATTEMPTS {
            tracing::debug!(
                provider = self.spec.name(),
                model = self.spec.descriptor.model,
                attempt = index + 1,
                max_attempts = MAX_ATTEMPTS,
                "typed generation attempt"
            );

            let output = match &self.backend {
                AttemptBackend::Chat(client) => {
                    self.chat_attempt(client.as_ref(), &prompt, billing, options).await
                }
                AttemptBackend::Poll(provider) => {
                    poll_attempt(provider, &prompt, billing, options, progress, &mut warned).await
                }
            };
            let Some(output) = output else {
                tracing::warn!(attempt = index + 1, "typed generation call failed");
                attempts.push(ValidationAttempt::failed_call(index));
                continue;
            };
            usage += output.usage;

            let attempt = ValidationAttempt::check(index, output.content, &self.schema);
            let accepted = attempt.parsed.clone().filter(|_| attempt.valid);
            attempts.push(attempt);

            if let Some(value) = accepted {
                tracing::info!(attempt = index + 1, "typed generation succeeded");
                return TypedOutcome::Valid {
                    value,
                    usage,
                    attempts,
                };
            }
            tracing::debug!(attempt = index + 1, "typed output rejected");
        }

        tracing::warn!(
            provider = self.spec.name(),
            model = self.spec.descriptor.model,
            attempts = MAX_ATTEMPTS,
            "typed generation failed"
        );
        TypedOutcome::Failed { usage, attempts }
    }

    async fn chat_attempt(
        &self,
        client: &dyn LLMClient,
        prompt: &str,
        billing: Option<&BillingCallback>,
        options: &ProviderOptions,
    ) -> Option<AttemptOutput> {
        let started = Instant::now();
        let completion = match client.complete(prompt, options).await {
            Ok(completion) => completion,
            Err(e) => {
                tracing::debug!(error = %e, "chat completion failed");
                return None;
            }
        };

        let usage = completion.usage.unwrap_or_else(|| {
            TokenUsage::new(count_tokens(prompt), count_tokens(&completion.content))
        });
        self.spec
            .bill(billing, usage, &completion.content, started.elapsed());

        Some(AttemptOutput {
            content: completion.content,
            usage,
        })
    }

    /// Runs the loop on a spawned task and delivers one terminal item.
    ///
    /// Cold-boot warnings from prediction jobs are forwarded as they happen,
    /// at most once per generation.
    #[must_use]
    pub fn generate(
        &self,
        task: String,
        billing: Option<BillingCallback>,
        options: ProviderOptions,
    ) -> ResultStream {
        let (tx, stream) = channel();
        let generator = self.clone();

        tokio::spawn(async move {
            let outcome = generator
                .run_reporting(&task, billing.as_ref(), &options, Some(&tx))
                .await;
            emit(&tx, outcome.into_result()).await;
        });

        stream
    }
}

/// Runs one prediction job, which bills itself on success.
async fn poll_attempt(
    provider: &PollProvider,
    prompt: &str,
    billing: Option<&BillingCallback>,
    options: &ProviderOptions,
    progress: Option<&mpsc::Sender<ProviderResult>>,
    warned: &mut bool,
) -> Option<AttemptOutput> {
    let mut items = provider.generate(prompt.to_string(), billing.cloned(), options.clone());
    let mut output = None;

    // drained to the end so the job has billed before the next attempt
    while let Some(item) = items.recv().await {
        if !item.warnings.is_empty() && !*warned {
            *warned = true;
            if let Some(tx) = progress {
                for warning in &item.warnings {
                    emit(tx, ProviderResult::warning(warning.clone())).await;
                }
            }
        }
        if item.is_final && item.error_kind.is_none() {
            output = Some(AttemptOutput {
                content: item.text_delta,
                usage: item.usage_delta,
            });
        }
    }

    output
}
