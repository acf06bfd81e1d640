//! # gateway-core: generation core of an LLM gateway
//!
//! Accepts a generation task, runs it on one of several backend model
//! providers and streams the result to a client over a cancellable duplex
//! connection.
//!
//! ## Architecture
//!
//! - **Providers**: single-shot, event-stream and poll-to-completion backends
//!   behind one incremental result stream
//! - **Typed output**: bounded retries until the output matches a declared type
//! - **Billing**: time-based credits per model, waived for caller-supplied keys
//! - **Orchestrator**: validation, rate limiting, task augmentation, dispatch
//! - **Stream session**: forwards results to the client and honours `STOP`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gateway_core::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), GatewayError> {
//!     let config = gateway_core::config::load()?;
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(HttpBackends::new(&config)),
//!         Arc::new(InMemoryLedger::new(config.server.credits_per_user)),
//!         Arc::new(InMemoryMemoryStore::new()),
//!         Arc::new(StaticContentSource::empty()),
//!     );
//!
//!     let mut stream = orchestrator
//!         .start(&AuthContext::new("user"), &GenerationRequest::new("Say hi"))
//!         .await?;
//!     while let Some(item) = stream.recv().await {
//!         print!("{}", item.text_delta);
//!     }
//!     Ok(())
//! }
//! ```

pub mod billing;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod orchestrator;
pub mod provider;
pub mod session;
pub mod transport;
pub mod typed;
pub mod types;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::billing::{BillingCallback, BillingRecord, CreditMeter};
    pub use crate::collaborators::in_memory::{
        InMemoryEventRecorder, InMemoryLedger, InMemoryMemoryStore, StaticContentSource,
        TracingEventRecorder,
    };
    pub use crate::collaborators::{
        AuthContext, ContentSource, EventRecorder, MemoryStore, UsageLedger,
    };
    pub use crate::config::GatewayConfig;
    pub use crate::error::{ErrorCode, GatewayError, GatewayErrorKind};
    pub use crate::llm::{ProviderOptions, TokenUsage};
    pub use crate::orchestrator::{GenerationRequest, Orchestrator};
    pub use crate::provider::{
        AccumulatedResult, HttpBackends, ModelProvider, ProviderKind, ProviderResult,
        ResultStream,
    };
    pub use crate::session::{SessionSummary, StreamSession};
    pub use crate::transport::{Frame, FrameSink, FrameSource};
    pub use crate::types::RequestId;
}
