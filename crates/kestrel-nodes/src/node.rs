use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{NodeOutput, NodeSchema};

use crate::context::RunContext;

/// A single executable graph step.
///
/// Handlers receive inputs that have already been resolved, validated and
/// passed through the policy gate.
pub trait NodeHandler: Send + Sync + 'static {
    /// Declared schema. Registration rejects schemas without an id or capability set.
    fn schema(&self) -> NodeSchema;

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>>;
}

/// Deserialize validated inputs into a node's typed input struct.
pub fn parse_inputs<T: DeserializeOwned>(node: &str, inputs: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(inputs)).map_err(|e| KestrelError::NodeExecution {
        node: node.to_string(),
        message: format!("invalid inputs: {}", e),
    })
}
