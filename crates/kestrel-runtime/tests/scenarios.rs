use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Map, Value};

use kestrel_core::config::RuntimeConfig;
use kestrel_core::error::Result;
use kestrel_core::event::{EventBus, RunEvent};
use kestrel_core::types::{FieldType, NodeCategory, NodeOutput, NodeSchema, OutputField, RiskLevel};
use kestrel_nodes::builtin::flow::DelayNode;
use kestrel_nodes::builtin::session::ClickElementNode;
use kestrel_nodes::{NodeHandler, NodeRegistry, RunContext};
use kestrel_runtime::{Graph, NodeInstance, Orchestrator, RunRequest, RunStore};
use kestrel_store::SqliteDataStore;
use kestrel_test_utils::{test_policy, MockDataStore, MockSession, SessionAction};

fn orchestrator(root: &std::path::Path, registry: NodeRegistry) -> Orchestrator {
    orchestrator_with(root, registry, RuntimeConfig::default())
}

fn orchestrator_with(root: &std::path::Path, registry: NodeRegistry, config: RuntimeConfig) -> Orchestrator {
    Orchestrator::new(
        Arc::new(registry),
        Arc::new(test_policy(root)),
        Arc::new(RunStore::new()),
        config,
    )
}

fn profile(v: Value) -> Map<String, Value> {
    v.as_object().cloned().unwrap()
}

fn start(target: &str) -> NodeInstance {
    NodeInstance::new("start").connect("next", target)
}

// ── Custom nodes ────────────────────────────────────────────────

/// Emits a sensitive `token` and a plain `user`.
struct IssueTokenNode;

impl NodeHandler for IssueTokenNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("issue_token", "Issue Token", NodeCategory::Data, RiskLevel::Low)
            .output("token", OutputField::sensitive(FieldType::String))
            .output("user", OutputField::new(FieldType::String))
    }

    fn execute<'a>(&'a self, _inputs: Map<String, Value>, _ctx: &'a mut RunContext) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            Ok(NodeOutput::next()
                .with("token", json!("s3cr3t"))
                .with("user", json!("ada")))
        })
    }
}

/// Holds the `gauge` lock for a while and records peak concurrency.
struct GaugeNode {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl NodeHandler for GaugeNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("gauge", "Gauge", NodeCategory::Flow, RiskLevel::Low).locks(&["gauge"])
    }

    fn execute<'a>(&'a self, _inputs: Map<String, Value>, _ctx: &'a mut RunContext) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(NodeOutput::next())
        })
    }
}

/// Records the run's tracked entry, as serialized JSON, each time it executes.
struct SnapshotNode {
    store: Arc<RunStore>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl NodeHandler for SnapshotNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("snapshot", "Snapshot", NodeCategory::Flow, RiskLevel::Low)
    }

    fn execute<'a>(&'a self, _inputs: Map<String, Value>, ctx: &'a mut RunContext) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            if let Some(entry) = self.store.get(ctx.run_id()) {
                self.seen.lock().unwrap().push(serde_json::to_string(&entry).unwrap());
            }
            Ok(NodeOutput::next())
        })
    }
}

// ── Scenarios ───────────────────────────────────────────────────

#[tokio::test]
async fn staff_cannot_delete_rows() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let store = Arc::new(MockDataStore::new());
    let graph = Graph::new().with_node("s", start("del")).with_node(
        "del",
        NodeInstance::new("db_delete").with_data(json!({"table": "users", "filter": {"id": 7}})),
    );

    let result = orch
        .run(&graph, RunRequest::new("staff").with_data_store(store.clone()))
        .await;

    assert_eq!(result.error_kind(), Some("AccessDenied"));
    assert!(result.is_policy_violation());
    match &result.status {
        kestrel_runtime::RunStatus::Failed { message, .. } => assert!(message.contains("db:delete"), "{}", message),
        other => panic!("unexpected status: {:?}", other),
    }
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn profile_secret_reaches_session_but_not_variables() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let session = Arc::new(MockSession::new().with_element(".u").with_element("#go"));
    let graph = Graph::new()
        .with_node("s", start("type"))
        .with_node(
            "type",
            NodeInstance::new("type_text")
                .with_data(json!({"selector": ".u", "text": "{{profile.username}}"}))
                .connect("next", "click"),
        )
        .with_node("click", NodeInstance::new("click_element").with_data(json!({"selector": "#go"})));

    let result = orch
        .run(
            &graph,
            RunRequest::new("staff")
                .with_profile(profile(json!({"username": "alice"})))
                .with_session(session.clone()),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.executed(), vec!["s", "type", "click"]);
    assert_eq!(
        session.actions(),
        vec![
            SessionAction::TypeText(".u".into(), "alice".into()),
            SessionAction::Click("#go".into()),
        ]
    );
    let dump = serde_json::to_string(&result.variables).unwrap();
    assert!(!dump.contains("alice"));
}

#[tokio::test]
async fn file_nodes_stay_inside_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());

    let write = Graph::new().with_node("s", start("w")).with_node(
        "w",
        NodeInstance::new("file_write")
            .with_data(json!({"path": "out/report.txt", "content": "ok"}))
            .connect("next", "r"),
    ).with_node(
        "r",
        NodeInstance::new("file_read")
            .with_data(json!({"path": "out/report.txt"}))
            .save("content", "report"),
    );
    let result = orch.run(&write, RunRequest::new("staff")).await;
    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.variables["report"], json!("ok"));
    assert!(dir.path().join("out/report.txt").exists());

    let escape = Graph::new().with_node("s", start("r")).with_node(
        "r",
        NodeInstance::new("file_read").with_data(json!({"path": "../../etc/passwd"})),
    );
    let result = orch.run(&escape, RunRequest::new("staff")).await;
    assert_eq!(result.error_kind(), Some("SandboxTraversal"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_runs_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Arc::new(orchestrator(dir.path(), NodeRegistry::with_builtins()));

    let failing = Arc::new(
        Graph::new()
            .with_node("s", start("click"))
            .with_node("click", NodeInstance::new("click_element").with_data(json!({"selector": "#gone"}))),
    );
    let passing = Arc::new(
        Graph::new()
            .with_node("s", start("set"))
            .with_node(
                "set",
                NodeInstance::new("set_variable").with_data(json!({"name": "done", "value": true})),
            ),
    );

    let a = orch.start_run(
        failing,
        RunRequest::new("staff").with_session(Arc::new(MockSession::new().failing_on("#gone"))),
    );
    let b = orch.start_run(passing, RunRequest::new("staff"));
    assert_ne!(a.run_id, b.run_id);

    let (a, b) = (a.wait().await.unwrap(), b.wait().await.unwrap());
    assert_eq!(a.error_kind(), Some("Session"));
    assert!(b.is_completed());
    assert_eq!(b.variables["done"], json!(true));
    assert!(!a.variables.contains_key("done"));
    assert!(orch.store().is_empty());
}

#[tokio::test]
async fn empty_filter_refused_even_for_admin() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let store = Arc::new(MockDataStore::new());

    for node_type in ["db_delete", "db_update"] {
        let graph = Graph::new().with_node("s", start("n")).with_node(
            "n",
            NodeInstance::new(node_type).with_data(json!({"table": "users", "filter": {}, "values": {"a": 1}})),
        );
        let result = orch
            .run(&graph, RunRequest::new("admin").with_data_store(store.clone()))
            .await;
        assert_eq!(result.error_kind(), Some("DbEmptyWhere"), "{}", node_type);
    }
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn absent_or_null_filter_is_an_empty_where() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let store = Arc::new(MockDataStore::new());

    for node_type in ["db_delete", "db_update"] {
        for data in [
            json!({"table": "users", "values": {"a": 1}}),
            json!({"table": "users", "values": {"a": 1}, "filter": null}),
        ] {
            let graph = Graph::new()
                .with_node("s", start("n"))
                .with_node("n", NodeInstance::new(node_type).with_data(data.clone()));
            let result = orch
                .run(&graph, RunRequest::new("admin").with_data_store(store.clone()))
                .await;
            assert_eq!(result.error_kind(), Some("DbEmptyWhere"), "{} {}", node_type, data);
        }
    }
    assert!(store.statements().is_empty());
}

#[tokio::test]
async fn profile_value_cannot_be_copied_into_variables() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let secrets = profile(json!({"password": "hunter2"}));

    for value in [json!("{{profile.password}}"), json!({"nested": ["pw: {{profile.password}}"]})] {
        let graph = Graph::new().with_node("s", start("set")).with_node(
            "set",
            NodeInstance::new("set_variable").with_data(json!({"name": "copy", "value": value})),
        );
        let result = orch
            .run(&graph, RunRequest::new("staff").with_profile(secrets.clone()))
            .await;
        assert_eq!(result.error_kind(), Some("SensitiveMappingViolation"));
        assert!(!serde_json::to_string(&result).unwrap().contains("hunter2"));
    }
}

#[tokio::test]
async fn profile_value_cannot_leave_through_a_url() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let graph = Graph::new().with_node("s", start("get")).with_node(
        "get",
        NodeInstance::new("http_request").with_data(json!({"url": "https://public.example/?k={{profile.api_key}}"})),
    );
    let result = orch
        .run(
            &graph,
            RunRequest::new("admin").with_profile(profile(json!({"api_key": "k-123"}))),
        )
        .await;
    assert_eq!(result.error_kind(), Some("SensitiveMappingViolation"));
    assert!(result.is_policy_violation());
    assert!(!serde_json::to_string(&result).unwrap().contains("k-123"));
}

#[tokio::test]
async fn http_request_refuses_private_ipv6_targets() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    for (url, kind) in [
        ("http://[fe80::1]/", "EgressDenylist"),
        ("http://[::1]:8080/", "EgressDenylist"),
        ("https://link-local.example/", "EgressDnsPrivateIp"),
        ("https://v6-loopback.example/", "EgressDnsPrivateIp"),
    ] {
        let graph = Graph::new()
            .with_node("s", start("get"))
            .with_node("get", NodeInstance::new("http_request").with_data(json!({"url": url})));
        let result = orch.run(&graph, RunRequest::new("admin")).await;
        assert_eq!(result.error_kind(), Some(kind), "{}", url);
    }
}

#[tokio::test]
async fn secrets_stay_out_of_tracked_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RunStore::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NodeRegistry::with_builtins();
    registry.register(IssueTokenNode);
    registry.register(SnapshotNode {
        store: store.clone(),
        seen: seen.clone(),
    });
    let orch = Orchestrator::new(
        Arc::new(registry),
        Arc::new(test_policy(dir.path())),
        store.clone(),
        RuntimeConfig::default(),
    );
    let session = Arc::new(MockSession::new().with_element("#user").with_element("#pw"));
    let graph = Graph::new()
        .with_node("s", start("t"))
        .with_node(
            "t",
            NodeInstance::new("issue_token")
                .save("user", "who")
                .connect("next", "snap1"),
        )
        .with_node("snap1", NodeInstance::new("snapshot").connect("next", "user"))
        .with_node(
            "user",
            NodeInstance::new("type_text")
                .with_data(json!({"selector": "#user", "text": "{{profile.username}}"}))
                .connect("next", "pw"),
        )
        .with_node(
            "pw",
            NodeInstance::new("type_text")
                .with_data(json!({"selector": "#pw", "text": "{{profile.t.token}}"}))
                .connect("next", "snap2"),
        )
        .with_node("snap2", NodeInstance::new("snapshot"));

    let result = orch
        .run(
            &graph,
            RunRequest::new("staff")
                .with_profile(profile(json!({"username": "alice"})))
                .with_session(session.clone()),
        )
        .await;

    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(
        session.actions(),
        vec![
            SessionAction::TypeText("#user".into(), "alice".into()),
            SessionAction::TypeText("#pw".into(), "s3cr3t".into()),
        ]
    );
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|entry| entry.contains("\"who\":\"ada\"")));
    for text in seen.iter().chain(std::iter::once(&serde_json::to_string(&result).unwrap())) {
        assert!(!text.contains("alice"), "{}", text);
        assert!(!text.contains("s3cr3t"), "{}", text);
    }
}

#[tokio::test]
async fn slow_node_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::new();
    registry.register_schema(ClickElementNode.schema().timeout_ms(20), Arc::new(ClickElementNode));
    let orch = orchestrator(dir.path(), registry);
    let session = Arc::new(MockSession::new().with_delay(Duration::from_millis(500)));

    let graph = Graph::new()
        .with_node("s", start("click"))
        .with_node("click", NodeInstance::new("click_element").with_data(json!({"selector": "#go"})));
    let result = orch
        .run(&graph, RunRequest::new("staff").with_session(session))
        .await;

    assert_eq!(result.error_kind(), Some("Timeout"));
    assert!(!result.is_policy_violation());
}

#[tokio::test]
async fn default_timeout_applies_when_schema_has_none() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        default_timeout_ms: Some(20),
        ..RuntimeConfig::default()
    };
    let mut registry = NodeRegistry::with_builtins();
    let mut schema = DelayNode.schema();
    schema.timeout_ms = None;
    registry.register_schema(schema, Arc::new(DelayNode));
    let orch = orchestrator_with(dir.path(), registry, config);
    let graph = Graph::new()
        .with_node("s", start("wait"))
        .with_node("wait", NodeInstance::new("delay").with_data(json!({"ms": 500})));

    let result = orch.run(&graph, RunRequest::new("staff")).await;
    assert_eq!(result.error_kind(), Some("Timeout"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn resource_lock_serialises_runs() {
    let dir = tempfile::tempdir().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut registry = NodeRegistry::new();
    registry.register(GaugeNode {
        active: active.clone(),
        peak: peak.clone(),
    });
    let orch = Arc::new(orchestrator(dir.path(), registry));
    let graph = Arc::new(
        Graph::new()
            .with_node("s", start("p"))
            .with_node("p", NodeInstance::new("gauge")),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| orch.start_run(graph.clone(), RunRequest::new("viewer")))
        .collect();
    for handle in handles {
        assert!(handle.wait().await.unwrap().is_completed());
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unregistered_node_is_skipped_and_not_followed() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let graph = Graph::new()
        .with_node("s", start("ghost").connect("next", "after"))
        .with_node("ghost", NodeInstance::new("teleport").connect("next", "hidden"))
        .with_node(
            "hidden",
            NodeInstance::new("set_variable").with_data(json!({"name": "hidden", "value": 1})),
        )
        .with_node(
            "after",
            NodeInstance::new("set_variable").with_data(json!({"name": "after", "value": 2})),
        );

    let result = orch.run(&graph, RunRequest::new("staff")).await;
    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.executed(), vec!["s", "after"]);
    assert!(result.steps.iter().any(|s| s.node_id == "ghost" && s.skipped));
    assert!(!result.variables.contains_key("hidden"));
}

#[tokio::test]
async fn cycle_hits_step_limit() {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        max_steps: 10,
        ..RuntimeConfig::default()
    };
    let orch = orchestrator_with(dir.path(), NodeRegistry::with_builtins(), config);
    let graph = Graph::new()
        .with_node("s", start("a"))
        .with_node(
            "a",
            NodeInstance::new("set_variable")
                .with_data(json!({"name": "x", "value": 1}))
                .connect("next", "b"),
        )
        .with_node(
            "b",
            NodeInstance::new("set_variable")
                .with_data(json!({"name": "y", "value": 2}))
                .connect("next", "a"),
        );

    let result = orch.run(&graph, RunRequest::new("staff")).await;
    assert_eq!(result.error_kind(), Some("StepLimitExceeded"));
    assert_eq!(result.steps.len(), 10);
}

#[tokio::test]
async fn condition_branches_on_saved_variable() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let store = Arc::new(MockDataStore::new().with_rows(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]));
    let graph = Graph::new()
        .with_node("s", start("select"))
        .with_node(
            "select",
            NodeInstance::new("db_select")
                .with_data(json!({"table": "orders"}))
                .save("count", "order_count")
                .connect("next", "check"),
        )
        .with_node(
            "check",
            NodeInstance::new("condition")
                .with_data(json!({"expression": "order_count > 2"}))
                .connect("true", "many")
                .connect("false", "few"),
        )
        .with_node(
            "many",
            NodeInstance::new("set_variable").with_data(json!({"name": "bucket", "value": "many"})),
        )
        .with_node(
            "few",
            NodeInstance::new("set_variable").with_data(json!({"name": "bucket", "value": "few"})),
        );

    let result = orch
        .run(&graph, RunRequest::new("admin").with_data_store(store))
        .await;
    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.variables["order_count"], json!(3));
    assert_eq!(result.variables["bucket"], json!("many"));
    assert_eq!(result.executed(), vec!["s", "select", "check", "many"]);
    assert_eq!(result.steps[2].port.as_deref(), Some("true"));
}

#[tokio::test]
async fn sensitive_output_cannot_be_mapped() {
    let dir = tempfile::tempdir().unwrap();
    let mut registry = NodeRegistry::with_builtins();
    registry.register(IssueTokenNode);
    let orch = orchestrator(dir.path(), registry);

    let leaky = Graph::new()
        .with_node("s", start("t"))
        .with_node("t", NodeInstance::new("issue_token").save("token", "tok"));
    let result = orch.run(&leaky, RunRequest::new("viewer")).await;
    assert_eq!(result.error_kind(), Some("SensitiveMappingViolation"));
    assert!(!result.variables.contains_key("tok"));

    // Sensitive outputs stay reachable through the profile namespace only.
    let session = Arc::new(MockSession::new().with_element("#pw"));
    let routed = Graph::new()
        .with_node("s", start("t"))
        .with_node(
            "t",
            NodeInstance::new("issue_token")
                .save("user", "who")
                .connect("next", "type"),
        )
        .with_node(
            "type",
            NodeInstance::new("type_text").with_data(json!({"selector": "#pw", "text": "{{profile.t.token}}"})),
        );
    let result = orch
        .run(&routed, RunRequest::new("staff").with_session(session.clone()))
        .await;
    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.variables["who"], json!("ada"));
    assert_eq!(
        session.actions(),
        vec![SessionAction::TypeText("#pw".into(), "s3cr3t".into())]
    );
    assert!(!serde_json::to_string(&result.variables).unwrap().contains("s3cr3t"));
}

#[tokio::test]
async fn graph_without_start_completes_empty() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());
    let graph = Graph::new().with_node(
        "lonely",
        NodeInstance::new("set_variable").with_data(json!({"name": "x", "value": 1})),
    );
    let result = orch.run(&graph, RunRequest::new("staff")).await;
    assert!(result.is_completed());
    assert!(result.steps.is_empty());
}

#[tokio::test]
async fn events_follow_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(EventBus::new(64));
    let mut rx = bus.subscribe();
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins()).with_event_bus(bus);
    let graph = Graph::new()
        .with_node("s", start("set"))
        .with_node(
            "set",
            NodeInstance::new("set_variable").with_data(json!({"name": "x", "value": 1})),
        );

    let result = orch.run(&graph, RunRequest::new("staff")).await;
    assert!(result.is_completed());

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            RunEvent::RunStarted { .. } => "run_started",
            RunEvent::NodeStarted { .. } => "node_started",
            RunEvent::NodeCompleted { .. } => "node_completed",
            RunEvent::NodeSkipped { .. } => "node_skipped",
            RunEvent::RunCompleted { .. } => "run_completed",
            RunEvent::RunFailed { .. } => "run_failed",
        });
    }
    assert_eq!(kinds, vec!["run_started", "node_started", "node_completed", "run_completed"]);
}

#[tokio::test]
async fn sqlite_round_trip_through_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteDataStore::open(&dir.path().join("app.db")).unwrap();
    store
        .execute_batch("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, active INTEGER)")
        .unwrap();
    let store = Arc::new(store);
    let orch = orchestrator(dir.path(), NodeRegistry::with_builtins());

    let graph = Graph::new()
        .with_node("s", start("ins"))
        .with_node(
            "ins",
            NodeInstance::new("db_insert")
                .with_data(json!({"table": "users", "values": {"id": 1, "name": "ada", "active": true}}))
                .connect("next", "ins2"),
        )
        .with_node(
            "ins2",
            NodeInstance::new("db_insert")
                .with_data(json!({"table": "users", "values": {"id": 2, "name": "bob", "active": false}}))
                .connect("next", "upd"),
        )
        .with_node(
            "upd",
            NodeInstance::new("db_update")
                .with_data(json!({"table": "users", "values": {"name": "bobby"}, "filter": {"id": 2}}))
                .save("affected", "updated")
                .connect("next", "sel"),
        )
        .with_node(
            "sel",
            NodeInstance::new("db_select")
                .with_data(json!({"table": "users", "columns": ["name"], "filter": {"active": 0}}))
                .save("rows", "inactive"),
        );

    let result = orch
        .run(&graph, RunRequest::new("admin").with_data_store(store))
        .await;
    assert!(result.is_completed(), "{:?}", result.status);
    assert_eq!(result.variables["updated"], json!(1));
    assert_eq!(result.variables["inactive"], json!([{"name": "bobby"}]));
}
