//! Stream session: one request, one connection, one result stream.
//!
//! The first client frame carries a JSON [`GenerationRequest`]. The session
//! starts it through the [`Orchestrator`] and forwards the result stream as
//! text frames while a reader task watches the connection for `STOP`.
//!
//! Frames written to the client:
//!
//! | frame                  | when                                         |
//! |------------------------|----------------------------------------------|
//! | `<text>`               | each non-empty text delta                    |
//! | `[WARNING]:<text>`     | each warning carried by an item              |
//! | `[ERROR]:<code>`       | an error item, or a failure before dispatch  |
//! | `[INFOS]:<json>`       | at the end, if a memory and infos were asked |
//! | empty                  | always last, exactly once                    |
//!
//! A failed write ends the session immediately without the empty frame.

use crate::collaborators::{AuthContext, EventRecorder};
use crate::error::{ErrorCode, GatewayError, GatewayErrorKind};
use crate::orchestrator::{GenerationRequest, Orchestrator};
use crate::provider::{AccumulatedResult, ResultStream};
use crate::transport::{Frame, FrameSink, FrameSource};
use crate::types::RequestId;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

/// Client frame that cancels the running generation.
pub const STOP_COMMAND: &str = "STOP";
/// Prefix of the final metadata frame.
pub const INFOS_PREFIX: &str = "[INFOS]:";
/// Prefix of warning frames.
pub const WARNING_PREFIX: &str = "[WARNING]:";
/// Prefix of error frames.
pub const ERROR_PREFIX: &str = "[ERROR]:";

/// What happened during one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    /// Identifier used in the session's log span
    pub request_id: RequestId,
    /// Text written to the client, in order
    pub forwarded: String,
    /// Totals over every item received
    pub accumulated: AccumulatedResult,
    /// True if the client sent `STOP`
    pub cancelled: bool,
    /// The error code sent to the client, if any
    pub error: Option<ErrorCode>,
}

impl SessionSummary {
    fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            forwarded: String::new(),
            accumulated: AccumulatedResult::default(),
            cancelled: false,
            error: None,
        }
    }

    /// The response reported to the event recorder.
    fn response(&self) -> &str {
        match self.error {
            Some(code) => code.as_str(),
            None => &self.forwarded,
        }
    }
}

/// Serves generation requests over duplex connections.
#[derive(Debug, Clone)]
pub struct StreamSession {
    orchestrator: Orchestrator,
    recorder: Arc<dyn EventRecorder>,
}

impl StreamSession {
    /// Creates a session handler.
    #[must_use]
    pub fn new(orchestrator: Orchestrator, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            orchestrator,
            recorder,
        }
    }

    /// Runs one session to completion.
    ///
    /// Request-level failures (bad frame, bad JSON, rejected request) are
    /// reported to the client and return `Ok` with the error in the summary.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the request could not be read or a frame
    /// could not be written.
    pub async fn run<K, S>(
        &self,
        auth: &AuthContext,
        sink: &mut K,
        source: S,
    ) -> Result<SessionSummary, GatewayError>
    where
        K: FrameSink + ?Sized,
        S: FrameSource + 'static,
    {
        let request_id = RequestId::generate();
        let span = tracing::info_span!(
            "session",
            request_id = %request_id,
            user_id = %auth.user_id
        );
        self.serve(request_id, auth, sink, source)
            .instrument(span)
            .await
    }

    async fn serve<K, S>(
        &self,
        request_id: RequestId,
        auth: &AuthContext,
        sink: &mut K,
        mut source: S,
    ) -> Result<SessionSummary, GatewayError>
    where
        K: FrameSink + ?Sized,
        S: FrameSource + 'static,
    {
        let mut summary = SessionSummary::new(request_id);

        let raw = match source.next_frame().await {
            Some(Ok(Frame::Text(raw))) => raw,
            Some(Ok(Frame::Binary(_))) => {
                let error = GatewayError::new(GatewayErrorKind::InvalidMessageType);
                return self.reject(summary, auth, "", sink, error).await;
            }
            Some(Err(e)) => return self.abort(auth, "", e).await,
            None => {
                let e = GatewayError::transport("connection closed before a request was sent");
                return self.abort(auth, "", e).await;
            }
        };

        let request: GenerationRequest = match serde_json::from_str(&raw) {
            Ok(request) => request,
            Err(e) => {
                let error = GatewayError::invalid_json(e.to_string());
                return self.reject(summary, auth, &raw, sink, error).await;
            }
        };

        let stream = match self.orchestrator.start(auth, &request).await {
            Ok(stream) => stream,
            Err(error) => return self.reject(summary, auth, &raw, sink, error).await,
        };

        let (control_tx, control_rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let reader = tokio::spawn(read_controls(source, control_tx).in_current_span());
        let control = tokio::spawn(cancel_on_stop(control_rx, cancel_tx).in_current_span());

        let forwarded = forward(stream, &request, &mut cancel_rx, &mut *sink, &mut summary).await;

        reader.abort();
        control.abort();

        if let Err(e) = forwarded {
            return self.abort(auth, &raw, e).await;
        }

        tracing::info!(
            cancelled = summary.cancelled,
            input_tokens = summary.accumulated.token_usage.input,
            output_tokens = summary.accumulated.token_usage.output,
            error = ?summary.error,
            "session finished"
        );
        self.recorder
            .record_event(&raw, summary.response(), &auth.user_id)
            .await;
        sink.send_text("").await?;

        Ok(summary)
    }

    /// Reports a request-level failure and closes the session normally.
    async fn reject<K>(
        &self,
        mut summary: SessionSummary,
        auth: &AuthContext,
        raw: &str,
        sink: &mut K,
        error: GatewayError,
    ) -> Result<SessionSummary, GatewayError>
    where
        K: FrameSink + ?Sized,
    {
        let code = error.code();
        tracing::warn!(code = %code, error = %error, "request rejected");
        summary.error = Some(code);

        let written = sink.send_text(&format!("{}{}", ERROR_PREFIX, code)).await;
        if let Err(e) = written {
            return self.abort(auth, raw, e).await;
        }

        self.recorder
            .record_event(raw, code.as_str(), &auth.user_id)
            .await;
        sink.send_text("").await?;

        Ok(summary)
    }

    /// Ends a session whose transport failed.
    async fn abort(
        &self,
        auth: &AuthContext,
        raw: &str,
        error: GatewayError,
    ) -> Result<SessionSummary, GatewayError> {
        tracing::warn!(error = %error, "session aborted");
        self.recorder
            .record_event(raw, ErrorCode::TransportError.as_str(), &auth.user_id)
            .await;
        Err(error)
    }
}

/// Forwards items until the stream ends or the client cancels.
///
/// The cancel signal is awaited alongside the stream, so `STOP` takes effect
/// while the provider is silent.
async fn forward<K>(
    mut stream: ResultStream,
    request: &GenerationRequest,
    cancel: &mut watch::Receiver<bool>,
    sink: &mut K,
    summary: &mut SessionSummary,
) -> Result<(), GatewayError>
where
    K: FrameSink + ?Sized,
{
    // false once the control task is gone without a STOP
    let mut watching = true;

    loop {
        let item = tokio::select! {
            biased;
            changed = cancel.changed(), if watching => {
                match changed {
                    Ok(()) if *cancel.borrow_and_update() => {
                        summary.cancelled = true;
                        break;
                    }
                    Ok(()) => continue,
                    Err(_) => {
                        watching = false;
                        continue;
                    }
                }
            }
            item = stream.recv() => item,
        };
        let Some(item) = item else { break };

        summary.accumulated.absorb(&item);

        let cancelled = *cancel.borrow();
        if cancelled {
            summary.cancelled = true;
            break;
        }

        for warning in &item.warnings {
            sink.send_text(&format!("{}{}", WARNING_PREFIX, warning))
                .await?;
        }
        if !item.text_delta.is_empty() {
            sink.send_text(&item.text_delta).await?;
            summary.forwarded.push_str(&item.text_delta);
        }
        if let Some(code) = item.error_kind {
            sink.send_text(&format!("{}{}", ERROR_PREFIX, code)).await?;
            summary.error = Some(code);
        }
    }

    if summary.cancelled {
        tracing::info!("generation cancelled by client");
    }

    if request.memory_id().is_some() && request.infos {
        let infos = serde_json::to_string(&summary.accumulated)
            .map_err(|e| GatewayError::internal(format!("failed to encode infos: {}", e)))?;
        sink.send_text(&format!("{}{}", INFOS_PREFIX, infos)).await?;
    }

    Ok(())
}

/// Reads client frames and reports every `STOP`.
async fn read_controls<S: FrameSource>(mut source: S, control: mpsc::Sender<()>) {
    while let Some(frame) = source.next_frame().await {
        match frame {
            Ok(Frame::Text(text)) if text == STOP_COMMAND => {
                if control.send(()).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "client read failed");
                break;
            }
        }
    }
}

/// Turns the first `STOP` into the cancellation signal.
async fn cancel_on_stop(mut control: mpsc::Receiver<()>, cancel: watch::Sender<bool>) {
    if control.recv().await.is_some() {
        tracing::debug!("stop requested");
        cancel.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::in_memory::{
        InMemoryEventRecorder, InMemoryLedger, InMemoryMemoryStore, StaticContentSource,
    };
    use crate::llm::{
        Completion, LLMClient, LLMError, LLMEventStream, LLMStreamEvent, PredictionApi,
        ProviderOptions,
    };
    use crate::provider::{BackendFactory, ProviderDescriptor};
    use crate::transport::{ChannelSink, ChannelSource};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Streams `count` numbered fragments, `delay` apart.
    #[derive(Debug)]
    struct Counter {
        count: usize,
        delay: Duration,
    }

    #[async_trait]
    impl LLMClient for Counter {
        async fn complete(&self, _: &str, _: &ProviderOptions) -> Result<Completion, LLMError> {
            Err(LLMError::network("down"))
        }

        async fn complete_streaming(
            &self,
            _: &str,
            _: &ProviderOptions,
        ) -> Result<LLMEventStream, LLMError> {
            let (count, delay) = (self.count, self.delay);
            Ok(Box::pin(async_stream::stream! {
                for i in 0..count {
                    tokio::time::sleep(delay).await;
                    yield Ok(LLMStreamEvent::Token { text: format!("t{} ", i) });
                }
                yield Ok(LLMStreamEvent::End);
            }))
        }

        fn provider_name(&self) -> &'static str {
            "counter"
        }
    }

    #[derive(Debug)]
    struct CounterBackends {
        count: usize,
        delay: Duration,
    }

    impl BackendFactory for CounterBackends {
        fn chat_client(
            &self,
            _: &ProviderDescriptor,
            _: Option<String>,
        ) -> Result<Arc<dyn LLMClient>, LLMError> {
            Ok(Arc::new(Counter {
                count: self.count,
                delay: self.delay,
            }))
        }

        fn prediction_api(
            &self,
            _: &ProviderDescriptor,
            _: Option<String>,
        ) -> Result<Arc<dyn PredictionApi>, LLMError> {
            Err(LLMError::invalid_config("provider", "no jobs"))
        }
    }

    struct Harness {
        session: StreamSession,
        recorder: Arc<InMemoryEventRecorder>,
        memory: Arc<InMemoryMemoryStore>,
    }

    fn harness(count: usize, delay: Duration) -> Harness {
        let recorder = Arc::new(InMemoryEventRecorder::new());
        let memory = Arc::new(InMemoryMemoryStore::new());
        let orchestrator = Orchestrator::new(
            Arc::new(CounterBackends { count, delay }),
            Arc::new(InMemoryLedger::new(1_000_000)),
            memory.clone(),
            Arc::new(StaticContentSource::empty()),
        );
        Harness {
            session: StreamSession::new(orchestrator, recorder.clone()),
            recorder,
            memory,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn forwards_fragments_then_one_empty_frame() {
        let h = harness(3, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count"}"#.into())).unwrap();

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(drain(&mut out), vec!["t0 ", "t1 ", "t2 ", ""]);
        assert_eq!(summary.forwarded, "t0 t1 t2 ");
        assert!(summary.request_id.to_string().starts_with("req_"));
        assert!(!summary.cancelled);
        assert!(summary.accumulated.token_usage.input > 0);

        let events = h.recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response, "t0 t1 t2 ");
        assert_eq!(events[0].request, r#"{"task":"count"}"#);
    }

    #[tokio::test]
    async fn binary_first_frame_is_rejected() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Binary(vec![1, 2])).unwrap();

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(summary.error, Some(ErrorCode::InvalidMessageType));
        assert_eq!(drain(&mut out), vec!["[ERROR]:invalid_message_type", ""]);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text("{task".into())).unwrap();

        h.session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(drain(&mut out), vec!["[ERROR]:invalid_json", ""]);
        assert_eq!(h.recorder.events().await[0].response, "invalid_json");
    }

    #[tokio::test]
    async fn dispatch_failures_are_reported_as_codes() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"x","model":"gpt-9"}"#.into()))
            .unwrap();

        h.session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(drain(&mut out), vec!["[ERROR]:unknown_model", ""]);
    }

    #[tokio::test]
    async fn generation_error_item_is_forwarded_as_code() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"x","streaming":false}"#.into()))
            .unwrap();

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(summary.error, Some(ErrorCode::GenerationError));
        assert_eq!(drain(&mut out), vec!["[ERROR]:generation_error", ""]);
        assert_eq!(h.recorder.events().await[0].response, "generation_error");
    }

    #[tokio::test]
    async fn infos_frame_precedes_empty_frame() {
        let h = harness(2, Duration::ZERO);
        h.memory.create("u1", "m1").await;
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(
            r#"{"task":"count","memory_id":"m1","infos":true}"#.into(),
        ))
        .unwrap();

        h.session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        let frames = drain(&mut out);
        assert_eq!(frames.len(), 4);
        let infos = frames[2].strip_prefix(INFOS_PREFIX).unwrap();
        let infos: serde_json::Value = serde_json::from_str(infos).unwrap();
        assert_eq!(infos["result"], "t0 t1 ");
        assert_eq!(frames[3], "");
    }

    #[tokio::test]
    async fn infos_need_a_memory() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count","infos":true}"#.into()))
            .unwrap();

        h.session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert_eq!(drain(&mut out), vec!["t0 ", ""]);
    }

    #[tokio::test]
    async fn stop_halts_forwarding() {
        let h = harness(50, Duration::from_millis(20));
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count"}"#.into())).unwrap();

        let client = tokio::spawn(async move {
            let first = out.recv().await.unwrap();
            tx.send(Frame::Text(STOP_COMMAND.into())).unwrap();
            let mut rest = Vec::new();
            while let Some(frame) = out.recv().await {
                rest.push(frame);
            }
            (first, rest, tx)
        });

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();
        drop(sink);

        let (first, rest, _tx) = client.await.unwrap();
        assert_eq!(first, "t0 ");
        assert!(summary.cancelled);
        assert_eq!(rest.last().map(String::as_str), Some(""));
        assert_eq!(rest.iter().filter(|f| f.is_empty()).count(), 1);
        // at most one fragment can be in flight when STOP lands
        assert!(rest.len() <= 2);
        assert!(summary.forwarded.len() < "t0 ".len() * 50);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_session_while_provider_is_silent() {
        let h = harness(3, Duration::from_secs(30));
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count"}"#.into())).unwrap();

        let client = tokio::spawn(async move {
            let first = out.recv().await.unwrap();
            let stopped_at = tokio::time::Instant::now();
            tx.send(Frame::Text(STOP_COMMAND.into())).unwrap();
            let mut rest = Vec::new();
            while let Some(frame) = out.recv().await {
                rest.push(frame);
            }
            (first, rest, stopped_at, tx)
        });

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();
        let finished_at = tokio::time::Instant::now();
        drop(sink);

        let (first, rest, stopped_at, _tx) = client.await.unwrap();
        assert_eq!(first, "t0 ");
        assert!(summary.cancelled);
        assert_eq!(rest, vec![""]);
        assert_eq!(summary.forwarded, "t0 ");
        assert!(finished_at - stopped_at < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn client_hangup_without_stop_still_forwards_everything() {
        let h = harness(3, Duration::from_millis(5));
        let (mut sink, mut out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count"}"#.into())).unwrap();
        drop(tx);

        let summary = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap();

        assert!(!summary.cancelled);
        assert_eq!(drain(&mut out), vec!["t0 ", "t1 ", "t2 ", ""]);
    }

    #[tokio::test]
    async fn write_failure_aborts_without_terminal_frame() {
        let h = harness(3, Duration::ZERO);
        let (mut sink, out) = ChannelSink::pair();
        drop(out);
        let (tx, source) = ChannelSource::pair();
        tx.send(Frame::Text(r#"{"task":"count"}"#.into())).unwrap();

        let err = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::TransportError);
        let events = h.recorder.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].response, "transport_error");
    }

    #[tokio::test]
    async fn closed_connection_before_request_is_transport_error() {
        let h = harness(1, Duration::ZERO);
        let (mut sink, _out) = ChannelSink::pair();
        let (tx, source) = ChannelSource::pair();
        drop(tx);

        let err = h
            .session
            .run(&AuthContext::new("u1"), &mut sink, source)
            .await
            .unwrap_err();

        assert!(err.is_transport());
    }
}
