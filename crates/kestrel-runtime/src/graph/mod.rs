//! Graph documents: nodes keyed by id, wired port → targets.
//!
//! A graph has at most one `start` node. Runs begin there and walk the
//! output ports depth-first.

pub mod lint;
pub mod node;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::START_NODE_TYPE;

pub use lint::{lint, LintIssue, Severity};
pub use node::NodeInstance;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub nodes: HashMap<String, NodeInstance>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| KestrelError::Graph(format!("invalid graph document: {}", e)))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn with_node(mut self, id: impl Into<String>, node: NodeInstance) -> Self {
        self.nodes.insert(id.into(), node);
        self
    }

    pub fn node(&self, id: &str) -> Option<&NodeInstance> {
        self.nodes.get(id)
    }

    /// The unique start node. `None` when the graph has none; more than one is an error.
    pub fn start_node(&self) -> Result<Option<&str>> {
        let mut starts: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.node_type == START_NODE_TYPE)
            .map(|(id, _)| id.as_str())
            .collect();
        match starts.len() {
            0 => Ok(None),
            1 => Ok(starts.pop()),
            _ => {
                starts.sort_unstable();
                Err(KestrelError::Graph(format!(
                    "graph has {} start nodes: {}",
                    starts.len(),
                    starts.join(", ")
                )))
            }
        }
    }
}
