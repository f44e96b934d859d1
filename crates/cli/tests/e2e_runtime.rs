//! End-to-end tests for the Reagent runtime.
//!
//! These drive a fully built agent (scripted model, in-process tool
//! provider, file audit sink) from raw run input to the protocol stream.

use std::sync::{Arc, Mutex};

use reagent_agent::{Agent, AgentBuilder};
use reagent_audit::{JsonlFileSink, MemorySink};
use reagent_config::AppConfig;
use reagent_core::error::ToolError;
use reagent_core::protocol::{ProtocolEvent, ProtocolEventKind};
use reagent_core::tool::{ToolCall, ToolCallContext, ToolDeclaration, ToolOrigin, ToolOutput, ToolProvider};
use reagent_providers::{ScriptedBackend, ScriptedTurn};
use serde_json::{Value, json};

// ── Inventory provider ───────────────────────────────────────────────────

/// Answers `lookup` with a stock count and remembers the thread it ran for.
#[derive(Default)]
struct InventoryProvider {
    threads: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ToolProvider for InventoryProvider {
    fn name(&self) -> &str {
        "inventory"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDeclaration>, ToolError> {
        Ok(vec![ToolDeclaration {
            name: "lookup".into(),
            description: "Stock level for a SKU".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"sku": {"type": "string"}},
                "required": ["sku"]
            }),
            origin: ToolOrigin::Server {
                provider: "inventory".into(),
            },
        }])
    }

    async fn call_tool(
        &self,
        _name: &str,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<ToolOutput, ToolError> {
        self.threads.lock().unwrap().push(context.thread_id.clone());
        Ok(ToolOutput::json(json!({"sku": arguments["sku"], "in_stock": 42})))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

struct Fixture {
    agent: Agent,
    backend: Arc<ScriptedBackend>,
    inventory: Arc<InventoryProvider>,
    audit: Arc<MemorySink>,
    dir: tempfile::TempDir,
}

async fn fixture(turns: Vec<ScriptedTurn>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.audit.dir = dir.path().to_path_buf();
    config.agent.pacing_step_ms = 0;
    config.model.default_model = "e2e-model".into();

    let backend = Arc::new(ScriptedBackend::new(turns));
    let inventory = Arc::new(InventoryProvider::default());
    let audit = Arc::new(MemorySink::new());
    let agent = AgentBuilder::new(config)
        .with_backend(backend.clone())
        .with_provider("inventory", inventory.clone())
        .with_audit_sink(audit.clone())
        .build()
        .await
        .unwrap();

    Fixture {
        agent,
        backend,
        inventory,
        audit,
        dir,
    }
}

fn input(thread: &str, run: &str, extra: Value) -> Value {
    let mut input = json!({
        "threadId": thread,
        "runId": run,
        "messages": [{"id": "m1", "role": "user", "content": "How many SKU-7 do we have?"}],
    });
    if let (Value::Object(base), Value::Object(extra)) = (&mut input, extra) {
        base.extend(extra);
    }
    input
}

async fn collect(agent: &Agent, input: &Value) -> Vec<ProtocolEvent> {
    let mut rx = agent.runtime.run(input);
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn types(events: &[ProtocolEvent]) -> Vec<&'static str> {
    events.iter().map(ProtocolEvent::event_type).collect()
}

fn lookup_call() -> ToolCall {
    ToolCall {
        id: "call-1".into(),
        name: "inventory__lookup".into(),
        input: json!({"sku": "SKU-7"}),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_round_then_answer() {
    let f = fixture(vec![
        ScriptedTurn::tool_use("Checking stock.", vec![lookup_call()]),
        ScriptedTurn::text("We have 42 units of SKU-7."),
    ])
    .await;

    let events = collect(&f.agent, &input("thread-1", "run-1", json!({}))).await;
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

    let result = events
        .iter()
        .find_map(|e| match &e.kind {
            ProtocolEventKind::ToolCallResult { content, tool_call_id, .. } => Some((tool_call_id, content)),
            _ => None,
        })
        .unwrap();
    assert_eq!(result.0, "call-1");
    assert!(result.1.contains("42"));

    assert_eq!(f.backend.call_count(), 2);
    assert_eq!(*f.inventory.threads.lock().unwrap(), vec!["thread-1".to_string()]);

    // Every record reaches both the memory sink and the thread's file.
    let log = std::fs::read_to_string(JsonlFileSink::new(f.dir.path()).path_for("thread-1")).unwrap();
    assert_eq!(log.lines().count(), f.audit.records().len());
    assert_eq!(f.audit.kinds().first().copied(), Some("REQUEST_START"));
    assert_eq!(f.audit.kinds().last().copied(), Some("REQUEST_END"));
}

#[tokio::test]
async fn client_tool_is_handed_back() {
    let f = fixture(vec![ScriptedTurn::tool_use(
        "",
        vec![ToolCall {
            id: "call-9".into(),
            name: "client__open_dashboard".into(),
            input: json!({"name": "stock"}),
        }],
    )])
    .await;

    let events = collect(
        &f.agent,
        &input(
            "thread-2",
            "run-1",
            json!({"tools": [{"name": "open_dashboard", "description": "Open a dashboard", "parameters": {"type": "object"}}]}),
        ),
    )
    .await;

    let kinds = types(&events);
    assert!(kinds.contains(&"TOOL_CALL_START"));
    assert!(!kinds.contains(&"TOOL_CALL_RESULT"));
    assert_eq!(kinds.last(), Some(&"RUN_FINISHED"));
    assert_eq!(f.backend.call_count(), 1);
    assert!(f.inventory.threads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ppl_answer_carries_state_delta() {
    let f = fixture(vec![ScriptedTurn::text(
        "Run this:\n```ppl\nsource=orders | where sku = 'SKU-7' | stats count()\n```",
    )])
    .await;

    let events = collect(&f.agent, &input("thread-3", "run-1", json!({}))).await;
    let delta = events
        .iter()
        .find_map(|e| match &e.kind {
            ProtocolEventKind::StateDelta { delta } => Some(delta.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(delta["ppl_query"]["dataset"], "orders");
    assert_eq!(types(&events).last(), Some(&"RUN_FINISHED"));
}

#[tokio::test]
async fn invalid_input_never_reaches_the_model() {
    let f = fixture(vec![ScriptedTurn::text("unused")]).await;

    let events = collect(&f.agent, &json!({"threadId": "thread-4", "messages": "nope"})).await;
    assert_eq!(events.len(), 1);
    match &events[0].kind {
        ProtocolEventKind::RunError { code, .. } => assert_eq!(code.as_deref(), Some("VALIDATION_ERROR")),
        other => panic!("expected RUN_ERROR, got {other:?}"),
    }
    assert_eq!(events[0].run_id, "unknown");
    assert_eq!(f.backend.call_count(), 0);
}
