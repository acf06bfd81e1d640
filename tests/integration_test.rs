//! Integration tests for gateway-core.
//!
//! These tests drive whole sessions through the public API:
//! - WebSocket transport, streaming and `STOP`
//! - Typed generation retries
//! - Poll provider cold-boot warnings and credit accounting
//! - Configuration files feeding the HTTP backends

use async_trait::async_trait;
use futures::StreamExt;
use gateway_core::llm::{
    Completion, LLMClient, LLMError, LLMEventStream, LLMStreamEvent, Prediction, PredictionApi,
    PredictionStatus, ProviderOptions, TokenUsage,
};
use gateway_core::prelude::*;
use gateway_core::provider::{BackendFactory, ProviderDescriptor, COLD_BOOT_WARNING};
use gateway_core::session::{STOP_COMMAND, WARNING_PREFIX};
use gateway_core::transport::{ChannelSink, ChannelSource};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Backend behaviour shared by every client the factory hands out.
#[derive(Debug, Default)]
struct Script {
    fragments: Vec<String>,
    fragment_delay: Duration,
    answers: Mutex<VecDeque<String>>,
    statuses: Mutex<VecDeque<PredictionStatus>>,
    calls: AtomicU32,
}

impl Script {
    fn streaming(fragments: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            fragments: fragments.iter().map(|s| s.to_string()).collect(),
            fragment_delay: delay,
            ..Self::default()
        })
    }

    fn answering(answers: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        })
    }

    fn polling(statuses: Vec<PredictionStatus>) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.into()),
            ..Self::default()
        })
    }
}

#[async_trait]
impl LLMClient for Script {
    async fn complete(&self, _: &str, _: &ProviderOptions) -> Result<Completion, LLMError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let answer = self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "I cannot do that".to_string());
        Ok(Completion {
            content: answer,
            usage: Some(TokenUsage::new(10, 5)),
        })
    }

    async fn complete_streaming(
        &self,
        _: &str,
        _: &ProviderOptions,
    ) -> Result<LLMEventStream, LLMError> {
        let fragments = self.fragments.clone();
        let delay = self.fragment_delay;
        Ok(Box::pin(async_stream::stream! {
            for text in fragments {
                tokio::time::sleep(delay).await;
                yield Ok(LLMStreamEvent::Token { text });
            }
            yield Ok(LLMStreamEvent::End);
        }))
    }

    fn provider_name(&self) -> &'static str {
        "script"
    }
}

#[async_trait]
impl PredictionApi for Script {
    async fn submit(&self, _: &str, _: &ProviderOptions, _: bool) -> Result<Prediction, LLMError> {
        Ok(Prediction {
            id: "pred-1".to_string(),
            get_url: "https://predictions.invalid/pred-1".to_string(),
            stream_url: None,
        })
    }

    async fn poll(&self, _: &Prediction) -> Result<PredictionStatus, LLMError> {
        let mut statuses = self.statuses.lock().unwrap();
        let status = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        status.ok_or_else(|| LLMError::network("no status scripted"))
    }

    async fn stream(&self, _: &Prediction) -> Result<LLMEventStream, LLMError> {
        Err(LLMError::stream_error("not scripted"))
    }

    fn provider_name(&self) -> &'static str {
        "script"
    }
}

struct ScriptBackends(Arc<Script>);

impl BackendFactory for ScriptBackends {
    fn chat_client(
        &self,
        _: &ProviderDescriptor,
        _: Option<String>,
    ) -> Result<Arc<dyn LLMClient>, LLMError> {
        Ok(self.0.clone())
    }

    fn prediction_api(
        &self,
        _: &ProviderDescriptor,
        _: Option<String>,
    ) -> Result<Arc<dyn PredictionApi>, LLMError> {
        Ok(self.0.clone())
    }
}

struct Gateway {
    session: StreamSession,
    ledger: Arc<InMemoryLedger>,
    recorder: Arc<InMemoryEventRecorder>,
}

fn gateway(script: Arc<Script>, budget: u64) -> Gateway {
    let ledger = Arc::new(InMemoryLedger::new(budget));
    let recorder = Arc::new(InMemoryEventRecorder::new());
    let orchestrator = Orchestrator::new(
        Arc::new(ScriptBackends(script)),
        ledger.clone(),
        Arc::new(InMemoryMemoryStore::new()),
        Arc::new(StaticContentSource::empty()),
    );
    Gateway {
        session: StreamSession::new(orchestrator, recorder.clone()),
        ledger,
        recorder,
    }
}

/// Runs one in-process session and returns every frame written.
async fn run_session(gateway: &Gateway, auth: &AuthContext, request: &str) -> Vec<String> {
    let (mut sink, mut out) = ChannelSink::pair();
    let (tx, source) = ChannelSource::pair();
    tx.send(Frame::Text(request.to_string())).unwrap();

    gateway.session.run(auth, &mut sink, source).await.unwrap();
    drop(sink);

    let mut frames = Vec::new();
    while let Some(frame) = out.recv().await {
        frames.push(frame);
    }
    frames
}

/// Waits for spawned ledger writes to land.
async fn spent_eventually(ledger: &InMemoryLedger, user_id: &str, expected: u64) -> u64 {
    for _ in 0..100 {
        if ledger.spent(user_id).await == expected {
            break;
        }
        tokio::task::yield_now().await;
    }
    ledger.spent(user_id).await
}

async fn websocket_pair() -> (
    WebSocketStream<tokio::io::DuplexStream>,
    WebSocketStream<tokio::io::DuplexStream>,
) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    tokio::join!(
        WebSocketStream::from_raw_socket(client_io, Role::Client, None),
        WebSocketStream::from_raw_socket(server_io, Role::Server, None),
    )
}

async fn next_text(client: &mut WebSocketStream<tokio::io::DuplexStream>) -> Option<String> {
    while let Some(message) = client.next().await {
        match message.ok()? {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

#[tokio::test]
async fn test_websocket_session_streams_and_terminates() {
    let gateway = gateway(Script::streaming(&["Hel", "lo", "!"], Duration::ZERO), 1_000_000);
    let (mut client, server) = websocket_pair().await;
    let (mut sink, source) = server.split();

    futures::SinkExt::send(&mut client, Message::Text(r#"{"task":"greet"}"#.into()))
        .await
        .unwrap();

    let auth = AuthContext::new("ws-user");
    let summary = gateway.session.run(&auth, &mut sink, source).await.unwrap();

    let mut frames = Vec::new();
    for _ in 0..4 {
        frames.push(next_text(&mut client).await.unwrap());
    }
    assert_eq!(frames, vec!["Hel", "lo", "!", ""]);
    assert_eq!(summary.forwarded, "Hello!");

    let events = gateway.recorder.events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].user_id, "ws-user");
}

#[tokio::test]
async fn test_stop_over_websocket_ends_with_one_empty_frame() {
    let fragments: Vec<String> = (0..40).map(|i| format!("w{} ", i)).collect();
    let fragments: Vec<&str> = fragments.iter().map(String::as_str).collect();
    let gateway = gateway(Script::streaming(&fragments, Duration::from_millis(25)), 1_000_000);
    let (mut client, server) = websocket_pair().await;
    let (mut sink, source) = server.split();

    futures::SinkExt::send(&mut client, Message::Text(r#"{"task":"talk"}"#.into()))
        .await
        .unwrap();

    let client_task = tokio::spawn(async move {
        let first = next_text(&mut client).await.unwrap();
        futures::SinkExt::send(&mut client, Message::Text(STOP_COMMAND.into()))
            .await
            .unwrap();
        let mut after = Vec::new();
        while let Some(frame) = next_text(&mut client).await {
            let done = frame.is_empty();
            after.push(frame);
            if done {
                break;
            }
        }
        (first, after)
    });

    let auth = AuthContext::new("u1");
    let summary = gateway.session.run(&auth, &mut sink, source).await.unwrap();
    let (first, after) = client_task.await.unwrap();

    assert_eq!(first, "w0 ");
    assert!(summary.cancelled);
    assert_eq!(after.last().map(String::as_str), Some(""));
    assert!(after.len() <= 2, "frames after STOP: {:?}", after);
    assert!(summary.forwarded.starts_with("w0 "));
}

#[tokio::test]
async fn test_typed_request_retries_until_valid() {
    let script = Script::answering(&["Sure, here you go", "```json\n{\"name\":", "```json\n{\"name\":\"a\"}\n```"]);
    let gateway = gateway(script.clone(), 1_000_000);

    let frames = run_session(
        &gateway,
        &AuthContext::new("u1"),
        r#"{"task":"name a thing","output_schema":{"name":"string"}}"#,
    )
    .await;

    assert_eq!(frames, vec![r#"{"name":"a"}"#.to_string(), String::new()]);
    assert_eq!(script.calls.load(Ordering::SeqCst), 3);
    // token-priced: (10 + 5) tokens for each of the three attempts
    assert_eq!(spent_eventually(&gateway.ledger, "u1", 45).await, 45);
}

#[tokio::test]
async fn test_typed_request_gives_up_after_five_attempts() {
    let script = Script::answering(&[]);
    let gateway = gateway(script.clone(), 1_000_000);

    let frames = run_session(
        &gateway,
        &AuthContext::new("u1"),
        r#"{"task":"name a thing","output_schema":{"name":"string"}}"#,
    )
    .await;

    assert_eq!(frames, vec!["[ERROR]:generation_failed".to_string(), String::new()]);
    assert_eq!(script.calls.load(Ordering::SeqCst), 5);
    assert_eq!(
        gateway.recorder.events().await[0].response,
        "generation_failed"
    );
}

#[tokio::test(start_paused = true)]
async fn test_cold_boot_warning_is_sent_once_and_boot_is_not_billed() {
    let mut statuses = vec![PredictionStatus::Starting; 15];
    statuses.push(PredictionStatus::Succeeded("done".to_string()));
    let gateway = gateway(Script::polling(statuses), 1_000_000);

    let frames = run_session(
        &gateway,
        &AuthContext::new("u1"),
        r#"{"task":"slow","provider":"replicate","model":"wizard-mega-13b-awq"}"#,
    )
    .await;

    assert_eq!(
        frames,
        vec![
            format!("{}{}", WARNING_PREFIX, COLD_BOOT_WARNING),
            "done".to_string(),
            String::new(),
        ]
    );
    // last `starting` at t=14, success at t=15: one second at 7250 credits/s
    assert_eq!(spent_eventually(&gateway.ledger, "u1", 7251).await, 7251);
}

#[tokio::test]
async fn test_caller_key_bypasses_exhausted_budget() {
    let gateway = gateway(Script::streaming(&["ok"], Duration::ZERO), 0);
    let request = r#"{"task":"t","provider":"replicate","model":"llama-2-70b-chat"}"#;

    let frames = run_session(&gateway, &AuthContext::new("u1"), request).await;
    assert_eq!(frames, vec!["[ERROR]:rate_limit_reached".to_string(), String::new()]);

    let own_key = AuthContext::new("u1").with_key(ProviderKind::Replicate, "r8_own");
    let frames = run_session(&gateway, &own_key, request).await;
    assert_eq!(frames, vec!["ok".to_string(), String::new()]);

    tokio::task::yield_now().await;
    assert_eq!(gateway.ledger.spent("u1").await, 0);
}

#[tokio::test]
async fn test_unknown_provider_and_model_codes() {
    let gateway = gateway(Script::streaming(&[], Duration::ZERO), 1_000_000);
    let auth = AuthContext::new("u1");

    let frames = run_session(&gateway, &auth, r#"{"task":"t","provider":"cohere"}"#).await;
    assert_eq!(frames[0], "[ERROR]:invalid_provider");

    let frames = run_session(
        &gateway,
        &auth,
        r#"{"task":"t","provider":"replicate","model":"gpt-4"}"#,
    )
    .await;
    assert_eq!(frames[0], "[ERROR]:unknown_model");
}

#[test]
fn test_config_file_feeds_http_backends() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[openai]
base_url = "http://localhost:9999/v1"
api_key = "sk-from-file"

[replicate]
api_key = "r8-from-file"

[content]
max_chars_per_source = 500
"#
    )
    .unwrap();

    let config = gateway_core::config::from_path(file.path()).unwrap();
    assert_eq!(config.openai.base_url, "http://localhost:9999/v1");
    assert_eq!(config.content.max_chars_per_source, 500);

    let backends = HttpBackends::new(&config);
    let gpt = gateway_core::provider::resolve(ProviderKind::OpenAI, "gpt-4").unwrap();
    let llama =
        gateway_core::provider::resolve(ProviderKind::Replicate, "llama-2-70b-chat").unwrap();

    assert!(backends.chat_client(&gpt, None).is_ok());
    assert!(backends.prediction_api(&llama, None).is_ok());
}
