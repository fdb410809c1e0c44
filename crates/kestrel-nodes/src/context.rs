use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::traits::{DataStore, SessionHandle};
use kestrel_core::types::{NodeSchema, RunId};
use kestrel_policy::PolicyEngine;

/// Reserved placeholder namespace that reads from the secret bag.
pub const PROFILE_NAMESPACE: &str = "profile";

/// Per-run state threaded through every node call.
///
/// The secret bag (the caller's profile plus sensitive node outputs) is kept
/// apart from the variable bag. Nothing in this type copies from one into
/// the other.
pub struct RunContext {
    run_id: RunId,
    role: String,
    variables: Map<String, Value>,
    secrets: Map<String, Value>,
    last_result: Option<Map<String, Value>>,
    session: Option<Arc<dyn SessionHandle>>,
    data_store: Option<Arc<dyn DataStore>>,
    policy: Arc<PolicyEngine>,
    steps: usize,
}

impl RunContext {
    pub fn new(run_id: RunId, role: impl Into<String>, policy: Arc<PolicyEngine>) -> Self {
        Self {
            run_id,
            role: role.into(),
            variables: Map::new(),
            secrets: Map::new(),
            last_result: None,
            session: None,
            data_store: None,
            policy,
            steps: 0,
        }
    }

    pub fn with_profile(mut self, profile: Map<String, Value>) -> Self {
        self.secrets = profile;
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

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn session(&self) -> Result<Arc<dyn SessionHandle>> {
        self.session
            .clone()
            .ok_or_else(|| KestrelError::Session("no session attached to this run".to_string()))
    }

    pub fn data_store(&self) -> Result<Arc<dyn DataStore>> {
        self.data_store
            .clone()
            .ok_or_else(|| KestrelError::Database("no data store attached to this run".to_string()))
    }

    // ── Variables ───────────────────────────────────────────────

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn into_variables(self) -> Map<String, Value> {
        self.variables
    }

    /// Look up a dotted path. `profile.` paths read the secret bag, every
    /// other path reads the variable bag. Array elements are addressed by
    /// numeric segments.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        if first == PROFILE_NAMESPACE {
            let key = segments.next()?;
            walk(self.secrets.get(key)?, segments)
        } else {
            walk(self.variables.get(first)?, segments)
        }
    }

    // ── Results ─────────────────────────────────────────────────

    pub fn last_result(&self) -> Option<&Map<String, Value>> {
        self.last_result.as_ref()
    }

    /// Store a node's outputs as the last result. Outputs the schema marks
    /// sensitive go to the secret bag under `<node id>.<key>` instead.
    pub fn set_last_result(&mut self, node_id: &str, schema: &NodeSchema, data: &Map<String, Value>) {
        let mut visible = Map::new();
        for (key, value) in data {
            if schema.is_output_sensitive(key) {
                let slot = self
                    .secrets
                    .entry(node_id.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(bag) = slot {
                    bag.insert(key.clone(), value.clone());
                }
            } else {
                visible.insert(key.clone(), value.clone());
            }
        }
        self.last_result = Some(visible);
    }

    // ── Steps ───────────────────────────────────────────────────

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Count one step and return the new total.
    pub fn bump_steps(&mut self) -> usize {
        self.steps += 1;
        self.steps
    }
}

fn walk<'a>(mut current: &'a Value, segments: std::str::Split<'_, char>) -> Option<&'a Value> {
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("role", &self.role)
            .field("variables", &self.variables)
            .field("secrets", &format_args!("<{} redacted>", self.secrets.len()))
            .field("has_session", &self.session.is_some())
            .field("has_data_store", &self.data_store.is_some())
            .field("steps", &self.steps)
            .finish()
    }
}
