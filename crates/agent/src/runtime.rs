//! The run boundary.
//!
//! [`AgentRuntime::run`] validates a raw AG-UI run input, registers the run,
//! and spawns one task in which the reasoning loop (producer of
//! [`AgentEvent`]s) and the protocol adapter (their consumer) are joined.
//! The caller reads [`ProtocolEvent`]s from the returned receiver; dropping
//! it cancels the run.
//!
//! [`AgentEvent`]: reagent_core::AgentEvent

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use reagent_audit::{AuditLogger, HttpRequestMeta};
use reagent_core::error::ValidationError;
use reagent_core::event::EventSink;
use reagent_core::protocol::{ProtocolEvent, codes};
use reagent_core::run::{RunRequest, correlation_ids, validate_run_input};
use reagent_providers::ModelResolver;
use reagent_telemetry::{MetricsRegistry, names};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::adapter::{RunEnd, StreamingProtocolAdapter};
use crate::react::{LoopStop, ReasoningLoop};

/// Capacity of the per-run event channels.
const CHANNEL_CAPACITY: usize = 128;

type RunKey = (String, String);

/// Cancellation tokens of in-flight runs.
#[derive(Default)]
struct ActiveRuns {
    runs: Mutex<HashMap<RunKey, CancellationToken>>,
}

impl ActiveRuns {
    /// Register a run; `None` if the same `(thread, run)` is in flight.
    fn register(&self, key: RunKey) -> Option<CancellationToken> {
        let mut runs = self.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if runs.contains_key(&key) {
            return None;
        }
        let token = CancellationToken::new();
        runs.insert(key, token.clone());
        Some(token)
    }

    fn cancel(&self, key: &RunKey) -> bool {
        match self.runs.lock().unwrap_or_else(PoisonError::into_inner).get(key) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn remove(&self, key: &RunKey) {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).remove(key);
    }

    fn len(&self) -> usize {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Unregisters a run when its task ends, however it ends.
struct Registration {
    registry: Arc<ActiveRuns>,
    key: RunKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

/// Accepts run requests and drives each one on its own task.
pub struct AgentRuntime {
    reasoning: Arc<ReasoningLoop>,
    resolver: Arc<ModelResolver>,
    audit: Arc<AuditLogger>,
    metrics: Arc<MetricsRegistry>,
    active: Arc<ActiveRuns>,
}

impl AgentRuntime {
    pub fn new(
        reasoning: ReasoningLoop,
        resolver: Arc<ModelResolver>,
        audit: Arc<AuditLogger>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            reasoning: Arc::new(reasoning),
            resolver,
            audit,
            metrics,
            active: Arc::new(ActiveRuns::default()),
        }
    }

    /// Validate `raw` and start the run.
    ///
    /// An invalid input yields a receiver holding a single
    /// `RUN_ERROR{VALIDATION_ERROR}`; nothing else happens.
    pub fn run(&self, raw: &Value) -> mpsc::Receiver<ProtocolEvent> {
        match validate_run_input(raw) {
            Ok(request) => self.start(request),
            Err(error) => single_event(self.reject(raw, &error)),
        }
    }

    /// Record a validation failure and build the `RUN_ERROR` describing it.
    pub fn reject(&self, raw: &Value, error: &ValidationError) -> ProtocolEvent {
        let (thread_id, run_id) = correlation_ids(raw);
        let thread_id = thread_id.unwrap_or_else(|| "unknown".into());
        let run_id = run_id.unwrap_or_else(|| "unknown".into());
        warn!(thread_id = %thread_id, run_id = %run_id, errors = ?error.errors, "Rejected run input");
        self.audit.log_validation_error(&thread_id, &run_id, &error.errors);

        let event = ProtocolEvent::run_error(&thread_id, &run_id, error.to_string(), codes::VALIDATION_ERROR);
        self.audit.log_event(&event);
        event
    }

    /// Start a validated run.
    pub fn start(&self, request: RunRequest) -> mpsc::Receiver<ProtocolEvent> {
        let key = (request.thread_id.clone(), request.run_id.clone());
        let Some(cancel) = self.active.register(key.clone()) else {
            warn!(thread_id = %key.0, run_id = %key.1, "Run already active");
            let event = ProtocolEvent::run_error(
                &key.0,
                &key.1,
                format!("Run {} on thread {} is already active", key.1, key.0),
                codes::RUN_ALREADY_ACTIVE,
            );
            self.audit.log_event(&event);
            return single_event(event);
        };
        let registration = Registration {
            registry: self.active.clone(),
            key,
        };

        let model_id = self.resolver.resolve(request.model_id.as_deref());
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let span = info_span!(
            "run",
            thread_id = %request.thread_id,
            run_id = %request.run_id,
            request_id = tracing::field::Empty,
        );

        let reasoning = self.reasoning.clone();
        let audit = self.audit.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(
            async move {
                let watch = out_tx.clone();
                let mut adapter =
                    StreamingProtocolAdapter::start(&request.thread_id, &request.run_id, audit, out_tx).await;
                tracing::Span::current().record("request_id", adapter.request_id());
                info!(
                    model_id = %model_id,
                    messages = request.messages.len(),
                    client_tools = request.client_tools.len(),
                    "Run started"
                );

                let (sink, mut events) = EventSink::channel(CHANNEL_CAPACITY);
                let producer = {
                    let cancel = cancel.clone();
                    async move {
                        let result = reasoning.run(request, model_id, &sink, &cancel).await;
                        drop(sink);
                        result
                    }
                };
                let consumer = async {
                    let mut consumer_gone = false;
                    loop {
                        tokio::select! {
                            event = events.recv() => match event {
                                Some(event) => adapter.handle(event).await,
                                None => break,
                            },
                            _ = watch.closed(), if !consumer_gone => {
                                debug!("Event receiver dropped, cancelling run");
                                consumer_gone = true;
                                cancel.cancel();
                            }
                        }
                    }
                };
                let (result, ()) = tokio::join!(producer, consumer);

                let end = match result {
                    Ok(outcome) if outcome.stop == LoopStop::Cancelled => RunEnd::Cancelled,
                    Ok(_) => RunEnd::Finished,
                    Err(error) => RunEnd::failed(error.code(), error.user_message()),
                };
                metrics.increment(names::RUNS, 1, &[("outcome", end.outcome().as_str())]);
                adapter.finish(end).await;

                // Unregister before the stream closes.
                drop(registration);
                drop(watch);
            }
            .instrument(span),
        );

        out_rx
    }

    /// Request cancellation of an in-flight run. Returns whether it was found.
    pub fn cancel(&self, thread_id: &str, run_id: &str) -> bool {
        let found = self.active.cancel(&(thread_id.to_string(), run_id.to_string()));
        if found {
            info!(thread_id, run_id, "Run cancellation requested");
        }
        found
    }

    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    pub fn log_http_request(&self, thread_id: &str, run_id: &str, meta: HttpRequestMeta) {
        self.audit.log_http_request(thread_id, run_id, meta);
    }

    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }
}

fn single_event(event: ProtocolEvent) -> mpsc::Receiver<ProtocolEvent> {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(event);
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use async_trait::async_trait;
    use reagent_audit::MemorySink;
    use reagent_config::RetryConfig;
    use reagent_core::error::ModelError;
    use reagent_core::model::{ConverseRequest, ConverseStream, ModelBackend};
    use reagent_core::protocol::ProtocolEventKind;
    use reagent_providers::{ModelClient, ScriptedTurn};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        harness: Harness,
        runtime: AgentRuntime,
        audit: Arc<MemorySink>,
    }

    async fn fixture(turns: Vec<ScriptedTurn>) -> Fixture {
        let harness = Harness::new(turns).await;
        let audit = Arc::new(MemorySink::new());
        let runtime = AgentRuntime::new(
            harness.reasoning_loop(10),
            Arc::new(ModelResolver::new("configured-model")),
            Arc::new(AuditLogger::new().with_sink(audit.clone())),
            harness.metrics.clone(),
        );
        Fixture {
            harness,
            runtime,
            audit,
        }
    }

    fn input(thread: &str, run: &str, text: &str) -> Value {
        json!({
            "threadId": thread,
            "runId": run,
            "messages": [{"id": "m1", "role": "user", "content": text}],
            "tools": [],
            "context": [],
            "state": {},
            "forwardedProps": {}
        })
    }

    fn types(events: &[ProtocolEvent]) -> Vec<&'static str> {
        events.iter().map(ProtocolEvent::event_type).collect()
    }

    /// Never produces a chunk; keeps every stream open.
    #[derive(Default)]
    struct StalledBackend {
        open: Mutex<Vec<mpsc::Sender<Result<reagent_core::ConverseChunk, ModelError>>>>,
    }

    #[async_trait]
    impl ModelBackend for StalledBackend {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn converse(&self, _request: ConverseRequest) -> Result<ConverseStream, ModelError> {
            let (tx, rx) = mpsc::channel(1);
            self.open.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
            Ok(rx)
        }
    }

    async fn stalled_runtime() -> AgentRuntime {
        let harness = Harness::new(Vec::new()).await;
        let client = Arc::new(ModelClient::new(
            Arc::new(StalledBackend::default()),
            RetryConfig::default(),
            harness.metrics.clone(),
        ));
        let reasoning = ReasoningLoop::new(
            client,
            harness.tools.clone(),
            harness.prompt.clone(),
            harness.metrics.clone(),
        );
        AgentRuntime::new(
            reasoning,
            Arc::new(ModelResolver::new("m")),
            Arc::new(AuditLogger::new()),
            harness.metrics.clone(),
        )
    }

    #[tokio::test]
    async fn empty_messages_yield_single_validation_error() {
        let f = fixture(vec![ScriptedTurn::text("never")]).await;
        let events = drain(f.runtime.run(&json!({"threadId": "t", "runId": "r", "messages": []}))).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0].kind,
            ProtocolEventKind::RunError { code: Some(code), .. } if code == codes::VALIDATION_ERROR
        ));
        assert_eq!(events[0].thread_id, "t");
        assert_eq!(f.harness.backend.call_count(), 0);
        assert_eq!(f.harness.metrics.counter_total(names::RUNS), 0);
        assert_eq!(f.audit.kinds(), vec!["VALIDATION_ERROR", "EVENT"]);
    }

    #[tokio::test]
    async fn tool_run_streams_a_complete_sequence() {
        let f = fixture(vec![
            ScriptedTurn::tool_use("Checking.", vec![tool_call("t1", "search__logs", json!({"query": "500"}))]),
            ScriptedTurn::text("Two errors."),
        ])
        .await;
        let events = drain(f.runtime.run(&input("thread-1", "run-1", "any errors?"))).await;

        assert_eq!(
            types(&events),
            vec![
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "TOOL_CALL_START",
                "TOOL_CALL_ARGS",
                "TOOL_CALL_END",
                "TOOL_CALL_RESULT",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "RUN_FINISHED",
            ]
        );
        assert_eq!(f.harness.metrics.counter(names::RUNS, &[("outcome", "success")]), 1);
        assert_eq!(f.runtime.active_runs(), 0);

        let kinds = f.audit.kinds();
        assert_eq!(kinds.first(), Some(&"REQUEST_START"));
        assert_eq!(kinds.last(), Some(&"REQUEST_END"));
        assert_eq!(kinds.iter().filter(|k| **k == "EVENT").count(), events.len());
    }

    #[tokio::test]
    async fn forwarded_model_id_is_used() {
        let f = fixture(vec![ScriptedTurn::text("a"), ScriptedTurn::text("b")]).await;
        let mut raw = input("t", "r1", "hi");
        raw["forwardedProps"] = json!({"modelId": "picked-model"});
        drain(f.runtime.run(&raw)).await;
        drain(f.runtime.run(&input("t", "r2", "hi"))).await;

        let requests = f.harness.backend.requests();
        assert_eq!(requests[0].model_id, "picked-model");
        assert_eq!(requests[1].model_id, "configured-model");
    }

    #[tokio::test]
    async fn model_failure_ends_with_its_code() {
        let f = fixture(vec![ScriptedTurn::Fail(ModelError::CredentialsExpired("expired".into()))]).await;
        let events = drain(f.runtime.run(&input("t", "r", "hi"))).await;

        let terminal: Vec<&ProtocolEvent> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert!(matches!(
            &terminal[0].kind,
            ProtocolEventKind::RunError { code: Some(code), .. } if code == "CREDENTIALS_EXPIRED"
        ));
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            ProtocolEventKind::TextMessageContent { delta, .. } if delta.starts_with("\n\nError: Model credentials expired")
        )));
        assert_eq!(f.harness.metrics.counter(names::RUNS, &[("outcome", "error")]), 1);
    }

    #[tokio::test]
    async fn duplicate_run_is_rejected_and_cancel_ends_the_first() {
        let runtime = stalled_runtime().await;
        let first = runtime.run(&input("t", "r", "hi"));
        assert_eq!(runtime.active_runs(), 1);

        let second = drain(runtime.run(&input("t", "r", "hi"))).await;
        assert_eq!(second.len(), 1);
        assert!(matches!(
            &second[0].kind,
            ProtocolEventKind::RunError { code: Some(code), .. } if code == codes::RUN_ALREADY_ACTIVE
        ));

        assert!(runtime.cancel("t", "r"));
        let events = drain(first).await;
        assert_eq!(events.first().unwrap().event_type(), "RUN_STARTED");
        let last = events.last().unwrap();
        assert!(matches!(
            &last.kind,
            ProtocolEventKind::RunError { code: Some(code), .. } if code == codes::CANCELLED
        ));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(runtime.active_runs(), 0);
        assert!(!runtime.cancel("t", "r"));
    }

    #[tokio::test]
    async fn dropping_the_receiver_cancels_the_run() {
        let runtime = stalled_runtime().await;
        drop(runtime.run(&input("t", "r", "hi")));

        for _ in 0..200 {
            if runtime.active_runs() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(runtime.active_runs(), 0);
    }
}
