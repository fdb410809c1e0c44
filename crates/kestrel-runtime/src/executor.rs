//! Run orchestrator. Walks a graph from its start node, one node at a time.
//!
//! Per node: resolve placeholders, validate, pass the policy gate, take the
//! declared resource locks, call the handler under its timeout, apply the
//! guarded `save_as` mappings, then recurse into the chosen port's targets
//! in declared order. The first error ends the run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use kestrel_core::config::RuntimeConfig;
use kestrel_core::error::{KestrelError, Result};
use kestrel_core::event::{EventBus, RunEvent};
use kestrel_core::traits::{DataStore, SessionHandle};
use kestrel_core::types::{NodeOutput, RunId, DEFAULT_PORT, START_NODE_TYPE};
use kestrel_nodes::{resolve_variables, validate, NodeRegistry, RegistryEntry, RunContext};
use kestrel_policy::PolicyEngine;

use crate::gate::PolicyGate;
use crate::graph::{Graph, NodeInstance};
use crate::locks::LockManager;
use crate::store::{RunState, RunStore};

/// Everything a caller supplies to start a run.
pub struct RunRequest {
    pub role: String,
    /// Secret bag, reachable from placeholders as `profile.*` only.
    pub profile: Map<String, Value>,
    pub session: Option<Arc<dyn SessionHandle>>,
    pub data_store: Option<Arc<dyn DataStore>>,
}

impl RunRequest {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            profile: Map::new(),
            session: None,
            data_store: None,
        }
    }

    pub fn with_profile(mut self, profile: Map<String, Value>) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_session(mut self, session: Arc<dyn SessionHandle>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(store);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed {
        kind: String,
        message: String,
        /// Refused by policy rather than failed in infrastructure.
        policy_violation: bool,
    },
}

/// One visited node.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub node_id: String,
    pub node_type: String,
    /// Port taken; `None` when the node was skipped.
    pub port: Option<String>,
    pub elapsed_ms: u64,
    pub skipped: bool,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub status: RunStatus,
    pub steps: Vec<StepRecord>,
    /// Final variable bag. Secrets never appear here.
    pub variables: Map<String, Value>,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self.status,
            RunStatus::Failed {
                policy_violation: true,
                ..
            }
        )
    }

    pub fn error_kind(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Completed => None,
            RunStatus::Failed { kind, .. } => Some(kind),
        }
    }

    /// Ids of the nodes that actually executed, in order.
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| !s.skipped)
            .map(|s| s.node_id.as_str())
            .collect()
    }
}

/// A run started in the background.
pub struct RunHandle {
    pub run_id: RunId,
    result: oneshot::Receiver<RunResult>,
}

impl RunHandle {
    pub async fn wait(self) -> Result<RunResult> {
        let run_id = self.run_id;
        self.result
            .await
            .map_err(|_| KestrelError::Graph(format!("run {} ended without a result", run_id)))
    }
}

struct Walk {
    ctx: RunContext,
    steps: Vec<StepRecord>,
}

pub struct Orchestrator {
    registry: Arc<NodeRegistry>,
    policy: Arc<PolicyEngine>,
    gate: PolicyGate,
    store: Arc<RunStore>,
    locks: LockManager,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<NodeRegistry>,
        policy: Arc<PolicyEngine>,
        store: Arc<RunStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            registry,
            gate: PolicyGate::new(policy.clone()),
            policy,
            store,
            locks: LockManager::new(),
            event_bus: Arc::new(EventBus::default()),
            config,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<RunStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Run a graph to completion.
    pub async fn run(&self, graph: &Graph, request: RunRequest) -> RunResult {
        self.run_with_id(RunId::new(), graph, request).await
    }

    /// Spawn a run on the tokio runtime; the result arrives on the handle.
    pub fn start_run(self: &Arc<Self>, graph: Arc<Graph>, request: RunRequest) -> RunHandle {
        let run_id = RunId::new();
        let (tx, rx) = oneshot::channel();
        let orchestrator = Arc::clone(self);
        let id = run_id.clone();
        tokio::spawn(async move {
            let result = orchestrator.run_with_id(id, &graph, request).await;
            // The caller may have dropped the handle.
            let _ = tx.send(result);
        });
        RunHandle { run_id, result: rx }
    }

    async fn run_with_id(&self, run_id: RunId, graph: &Graph, request: RunRequest) -> RunResult {
        let started = Instant::now();
        let RunRequest {
            role,
            profile,
            session,
            data_store,
        } = request;

        let mut ctx = RunContext::new(run_id.clone(), role.clone(), self.policy.clone())
            .with_profile(profile);
        if let Some(session) = session {
            ctx = ctx.with_session(session);
        }
        if let Some(store) = data_store {
            ctx = ctx.with_data_store(store);
        }

        self.store.insert(run_id.clone(), role.clone());
        info!(run_id = %run_id, role = %role, nodes = graph.nodes.len(), "Run started");
        self.event_bus.publish(RunEvent::RunStarted {
            run_id: run_id.clone(),
            role,
        });

        let mut walk = Walk {
            ctx,
            steps: Vec::new(),
        };
        let outcome = match graph.start_node() {
            Ok(Some(start)) => self.step(graph, start, &mut walk).await,
            Ok(None) => {
                info!(run_id = %run_id, "Graph has no start node, nothing to run");
                Ok(())
            }
            Err(e) => Err(e),
        };

        let Walk { ctx, steps } = walk;
        let status = match outcome {
            Ok(()) => {
                self.store.set_state(&run_id, RunState::Completed);
                info!(run_id = %run_id, steps = steps.len(), "Run completed");
                self.event_bus.publish(RunEvent::RunCompleted {
                    run_id: run_id.clone(),
                    steps: steps.len(),
                });
                RunStatus::Completed
            }
            Err(e) => {
                let kind = e.kind().to_string();
                self.store.set_state(&run_id, RunState::Failed { kind: kind.clone() });
                error!(run_id = %run_id, kind = %kind, error = %e, "Run failed");
                self.event_bus.publish(RunEvent::RunFailed {
                    run_id: run_id.clone(),
                    kind: kind.clone(),
                    message: e.to_string(),
                });
                RunStatus::Failed {
                    kind,
                    message: e.to_string(),
                    policy_violation: e.is_policy_violation(),
                }
            }
        };
        self.store.remove(&run_id);

        RunResult {
            run_id,
            status,
            steps,
            variables: ctx.into_variables(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    fn step<'a>(
        &'a self,
        graph: &'a Graph,
        node_id: &'a str,
        walk: &'a mut Walk,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if walk.ctx.bump_steps() > self.config.max_steps {
                return Err(KestrelError::StepLimitExceeded(self.config.max_steps));
            }
            let run_id = walk.ctx.run_id().clone();

            let Some(node) = graph.node(node_id) else {
                warn!(run_id = %run_id, node_id, "Connection targets a missing node, ignored");
                return Ok(());
            };
            self.store.set_state(
                &run_id,
                RunState::Running {
                    node_id: node_id.to_string(),
                },
            );

            let port = if node.node_type == START_NODE_TYPE {
                walk.steps.push(StepRecord {
                    node_id: node_id.to_string(),
                    node_type: node.node_type.clone(),
                    port: Some(DEFAULT_PORT.to_string()),
                    elapsed_ms: 0,
                    skipped: false,
                });
                DEFAULT_PORT.to_string()
            } else {
                let Some(entry) = self.registry.get(&node.node_type) else {
                    warn!(run_id = %run_id, node_id, node_type = %node.node_type, "Node type not registered, skipped");
                    self.event_bus.publish(RunEvent::NodeSkipped {
                        run_id,
                        node_id: node_id.to_string(),
                        reason: format!("node type `{}` is not registered", node.node_type),
                    });
                    walk.steps.push(StepRecord {
                        node_id: node_id.to_string(),
                        node_type: node.node_type.clone(),
                        port: None,
                        elapsed_ms: 0,
                        skipped: true,
                    });
                    return Ok(());
                };

                self.event_bus.publish(RunEvent::NodeStarted {
                    run_id: run_id.clone(),
                    node_id: node_id.to_string(),
                    node_type: node.node_type.clone(),
                });
                let started = Instant::now();
                let output = self.invoke(&entry, node_id, node, &mut walk.ctx).await?;
                let elapsed_ms = started.elapsed().as_millis() as u64;

                for (key, variable) in &node.save_as {
                    self.policy.guard_mapping(&entry.schema, key)?;
                    match output.data.get(key) {
                        Some(value) => walk.ctx.set_variable(variable.clone(), value.clone()),
                        None => debug!(run_id = %run_id, node_id, key = %key, "Mapped output absent"),
                    }
                }
                walk.ctx.set_last_result(node_id, &entry.schema, &output.data);
                self.store.snapshot_variables(&run_id, walk.ctx.variables());

                debug!(run_id = %run_id, node_id, port = %output.port, elapsed_ms, "Node completed");
                self.event_bus.publish(RunEvent::NodeCompleted {
                    run_id,
                    node_id: node_id.to_string(),
                    port: output.port.clone(),
                    elapsed_ms,
                });
                walk.steps.push(StepRecord {
                    node_id: node_id.to_string(),
                    node_type: node.node_type.clone(),
                    port: Some(output.port.clone()),
                    elapsed_ms,
                    skipped: false,
                });
                output.port
            };

            for target in node.targets(&port) {
                self.step(graph, target, walk).await?;
            }
            Ok(())
        })
    }

    async fn invoke(
        &self,
        entry: &RegistryEntry,
        node_id: &str,
        node: &NodeInstance,
        ctx: &mut RunContext,
    ) -> Result<NodeOutput> {
        let schema = &entry.schema;
        let resolved = resolve_variables(&node.data, schema, ctx)?;
        // An absent filter must read as DbEmptyWhere, not MissingRequiredInput.
        self.gate.check_filters(schema, &resolved)?;
        let validated = validate(resolved, schema)?;
        let inputs = self.gate.check(ctx.role(), schema, validated).await?;

        let _locks = if self.config.enforce_locks {
            Some(self.locks.acquire(&schema.resource_locks).await)
        } else {
            None
        };

        let call = entry.handler.execute(inputs, ctx);
        match schema.timeout_ms.or(self.config.default_timeout_ms) {
            Some(timeout_ms) => tokio::time::timeout(Duration::from_millis(timeout_ms), call)
                .await
                .map_err(|_| KestrelError::Timeout {
                    node: node_id.to_string(),
                    timeout_ms,
                })?,
            None => call.await,
        }
    }
}
