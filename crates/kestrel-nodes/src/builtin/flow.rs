use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use kestrel_core::error::Result;
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel, START_NODE_TYPE,
};

use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

/// Longest pause a delay node accepts.
const MAX_DELAY_MS: i64 = 300_000;

// ── StartNode ───────────────────────────────────────────────────

/// Entry point of every graph. The orchestrator steps over it without
/// checks; it is registered so editors see it in the catalogue.
pub struct StartNode;

impl NodeHandler for StartNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new(START_NODE_TYPE, "Start", NodeCategory::Flow, RiskLevel::Low)
            .describe("Entry point of a graph.")
            .idempotent()
    }

    fn execute<'a>(
        &'a self,
        _inputs: Map<String, Value>,
        _ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async { Ok(NodeOutput::next()) })
    }
}

// ── ConditionNode ───────────────────────────────────────────────

pub struct ConditionNode;

#[derive(Deserialize)]
struct ConditionInput {
    expression: String,
}

impl NodeHandler for ConditionNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("condition", "Condition", NodeCategory::Flow, RiskLevel::Low)
            .describe("Evaluate a boolean expression over run variables and branch on `true` or `false`.")
            .requires(&["logic:condition"])
            .idempotent()
            .input(
                "expression",
                InputField::required(FieldType::String).describe("e.g. `count > 3 && status == \"ok\"`"),
            )
            .output("result", OutputField::new(FieldType::Boolean))
            .check(PolicyCheck::Expression("expression".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: ConditionInput = parse_inputs("condition", inputs)?;
            let result = ctx
                .policy()
                .evaluate_condition(&p.expression, ctx.variables())?;
            debug!(run_id = %ctx.run_id(), result, "Condition evaluated");
            let port = if result { "true" } else { "false" };
            Ok(NodeOutput::on_port(port).with("result", json!(result)))
        })
    }
}

// ── SetVariableNode ─────────────────────────────────────────────

pub struct SetVariableNode;

#[derive(Deserialize)]
struct SetVariableInput {
    name: String,
    value: Value,
}

impl NodeHandler for SetVariableNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("set_variable", "Set Variable", NodeCategory::Flow, RiskLevel::Low)
            .describe("Store a value in the run's variable bag.")
            .requires(&["logic:variable"])
            .idempotent()
            .input(
                "name",
                InputField::required(FieldType::String).with_pattern(r"^[A-Za-z_][A-Za-z0-9_]*$"),
            )
            .input("value", InputField::required(FieldType::Any))
            .output("value", OutputField::new(FieldType::Any))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: SetVariableInput = parse_inputs("set_variable", inputs)?;
            debug!(run_id = %ctx.run_id(), name = %p.name, "Variable set");
            ctx.set_variable(p.name, p.value.clone());
            Ok(NodeOutput::next().with("value", p.value))
        })
    }
}

// ── DelayNode ───────────────────────────────────────────────────

pub struct DelayNode;

#[derive(Deserialize)]
struct DelayInput {
    ms: i64,
}

impl NodeHandler for DelayNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("delay", "Delay", NodeCategory::Flow, RiskLevel::Low)
            .describe("Pause the run for a number of milliseconds.")
            .requires(&["logic:delay"])
            .idempotent()
            .input("ms", InputField::required(FieldType::Integer))
            .timeout_ms(MAX_DELAY_MS as u64 + 1_000)
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        _ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: DelayInput = parse_inputs("delay", inputs)?;
            let ms = p.ms.clamp(0, MAX_DELAY_MS) as u64;
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(NodeOutput::next())
        })
    }
}

// ── LogNode ─────────────────────────────────────────────────────

pub struct LogNode;

#[derive(Deserialize)]
struct LogInput {
    message: String,
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "info".into()
}

impl NodeHandler for LogNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("log", "Log", NodeCategory::Flow, RiskLevel::Low)
            .describe("Write a message to the run log.")
            .requires(&["logic:log"])
            .idempotent()
            .input("message", InputField::required(FieldType::String))
            .input(
                "level",
                InputField::new(FieldType::String)
                    .with_default(json!("info"))
                    .with_enum(vec![json!("debug"), json!("info"), json!("warn")]),
            )
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: LogInput = parse_inputs("log", inputs)?;
            let run_id = ctx.run_id();
            match p.level.as_str() {
                "debug" => debug!(run_id = %run_id, message = %p.message, "Graph log"),
                "warn" => warn!(run_id = %run_id, message = %p.message, "Graph log"),
                _ => info!(run_id = %run_id, message = %p.message, "Graph log"),
            }
            Ok(NodeOutput::next())
        })
    }
}
