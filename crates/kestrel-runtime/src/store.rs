use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use kestrel_core::types::RunId;

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running { node_id: String },
    Completed,
    Failed { kind: String },
}

/// One tracked run.
#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub run_id: RunId,
    pub role: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    /// Variable bag as of the last finished step. Never holds secrets.
    pub variables: Map<String, Value>,
}

/// Tracks in-flight runs. Owned by whoever builds the orchestrator and
/// passed in explicitly.
pub struct RunStore {
    runs: Mutex<HashMap<RunId, RunEntry>>,
}

impl RunStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunId, RunEntry>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, run_id: RunId, role: impl Into<String>) {
        let entry = RunEntry {
            run_id: run_id.clone(),
            role: role.into(),
            state: RunState::Idle,
            started_at: Utc::now(),
            variables: Map::new(),
        };
        self.runs().insert(run_id, entry);
    }

    pub fn set_state(&self, run_id: &RunId, state: RunState) {
        if let Some(entry) = self.runs().get_mut(run_id) {
            entry.state = state;
        }
    }

    pub fn snapshot_variables(&self, run_id: &RunId, variables: &Map<String, Value>) {
        if let Some(entry) = self.runs().get_mut(run_id) {
            entry.variables = variables.clone();
        }
    }

    pub fn get(&self, run_id: &RunId) -> Option<RunEntry> {
        self.runs().get(run_id).cloned()
    }

    pub fn remove(&self, run_id: &RunId) -> Option<RunEntry> {
        self.runs().remove(run_id)
    }

    /// Ids of every tracked run.
    pub fn active(&self) -> Vec<RunId> {
        self.runs().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.runs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs().is_empty()
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new()
    }
}
