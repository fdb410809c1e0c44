use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node placed in a graph document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInstance {
    /// Registered node type identifier.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Raw inputs, possibly holding `{{path}}` placeholders.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Output port → target node ids, followed in declared order.
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    /// Output key → variable name.
    #[serde(default, alias = "saveAs")]
    pub save_as: BTreeMap<String, String>,
}

impl NodeInstance {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            data: Map::new(),
            outputs: BTreeMap::new(),
            save_as: BTreeMap::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data = map;
        }
        self
    }

    /// Append a target to an output port.
    pub fn connect(mut self, port: impl Into<String>, target: impl Into<String>) -> Self {
        self.outputs.entry(port.into()).or_default().push(target.into());
        self
    }

    pub fn save(mut self, output_key: impl Into<String>, variable: impl Into<String>) -> Self {
        self.save_as.insert(output_key.into(), variable.into());
        self
    }

    /// Targets wired to a port; empty when the port has no connections.
    pub fn targets(&self, port: &str) -> &[String] {
        self.outputs.get(port).map(Vec::as_slice).unwrap_or(&[])
    }
}
