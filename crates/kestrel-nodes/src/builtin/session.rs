use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel,
};

use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

/// Lock token held by every node that drives the session.
pub const TAB_LOCK: &str = "browser:tab";

const DEFAULT_WAIT_MS: u64 = 10_000;

fn selector_field() -> InputField {
    InputField::required(FieldType::String).describe("CSS selector")
}

#[derive(Deserialize)]
struct SelectorInput {
    selector: String,
}

// ── NavigateNode ────────────────────────────────────────────────

pub struct NavigateNode;

#[derive(Deserialize)]
struct NavigateInput {
    url: String,
}

impl NodeHandler for NavigateNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("navigate", "Navigate", NodeCategory::Session, RiskLevel::Medium)
            .describe("Open a URL in the session. Private and non-web targets are refused.")
            .requires(&["browser:navigate"])
            .locks(&[TAB_LOCK])
            .idempotent()
            .input("url", InputField::required(FieldType::String))
            .output("url", OutputField::new(FieldType::String))
            .timeout_ms(30_000)
            .check(PolicyCheck::Egress("url".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: NavigateInput = parse_inputs("navigate", inputs)?;
            let session = ctx.session()?;
            session.navigate(p.url.clone()).await?;
            debug!(run_id = %ctx.run_id(), url = %p.url, "Navigated");
            Ok(NodeOutput::next().with("url", json!(p.url)))
        })
    }
}

// ── ClickElementNode ────────────────────────────────────────────

pub struct ClickElementNode;

impl NodeHandler for ClickElementNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("click_element", "Click Element", NodeCategory::Session, RiskLevel::Medium)
            .describe("Click the first element matching a selector.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .input("selector", selector_field())
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: SelectorInput = parse_inputs("click_element", inputs)?;
            ctx.session()?.click(p.selector).await?;
            Ok(NodeOutput::next())
        })
    }
}

// ── TypeTextNode ────────────────────────────────────────────────

pub struct TypeTextNode;

#[derive(Deserialize)]
struct TypeTextInput {
    selector: String,
    text: String,
}

impl NodeHandler for TypeTextNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("type_text", "Type Text", NodeCategory::Session, RiskLevel::Medium)
            .describe("Type text into an input element.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .input("selector", selector_field())
            .input("text", InputField::required(FieldType::String).sensitive())
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: TypeTextInput = parse_inputs("type_text", inputs)?;
            debug!(run_id = %ctx.run_id(), selector = %p.selector, chars = p.text.chars().count(), "Typing text");
            ctx.session()?.type_text(p.selector, p.text).await?;
            Ok(NodeOutput::next())
        })
    }
}

// ── WaitForNode ─────────────────────────────────────────────────

pub struct WaitForNode;

#[derive(Deserialize)]
struct WaitForInput {
    #[serde(default)]
    selector: Option<String>,
    #[serde(default)]
    navigation: bool,
    #[serde(default = "default_wait_ms")]
    timeout_ms: u64,
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

impl NodeHandler for WaitForNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("wait_for", "Wait For", NodeCategory::Session, RiskLevel::Low)
            .describe("Wait for an element to appear, or for the next navigation to finish.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .idempotent()
            .input("selector", InputField::new(FieldType::String))
            .input(
                "navigation",
                InputField::new(FieldType::Boolean).with_default(json!(false)),
            )
            .input(
                "timeout_ms",
                InputField::new(FieldType::Integer).with_default(json!(DEFAULT_WAIT_MS)),
            )
            .timeout_ms(120_000)
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: WaitForInput = parse_inputs("wait_for", inputs)?;
            let timeout = Duration::from_millis(p.timeout_ms);
            let session = ctx.session()?;
            if p.navigation {
                session.wait_for_navigation(timeout).await?;
            } else {
                let selector = p.selector.ok_or_else(|| KestrelError::MissingRequiredInput {
                    field: "selector".into(),
                })?;
                session.wait_for_selector(selector, timeout).await?;
            }
            Ok(NodeOutput::next())
        })
    }
}

// ── ReadTextNode ────────────────────────────────────────────────

pub struct ReadTextNode;

impl NodeHandler for ReadTextNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("read_text", "Read Text", NodeCategory::Session, RiskLevel::Low)
            .describe("Read the text content of an element.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .idempotent()
            .input("selector", selector_field())
            .output("text", OutputField::new(FieldType::String))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: SelectorInput = parse_inputs("read_text", inputs)?;
            let text = ctx.session()?.read_text(p.selector).await?;
            Ok(NodeOutput::next().with("text", json!(text)))
        })
    }
}

// ── CurrentUrlNode ──────────────────────────────────────────────

pub struct CurrentUrlNode;

impl NodeHandler for CurrentUrlNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("current_url", "Current URL", NodeCategory::Session, RiskLevel::Low)
            .describe("Report the session's current URL.")
            .requires(&["browser:basic"])
            .idempotent()
            .output("url", OutputField::new(FieldType::String))
    }

    fn execute<'a>(
        &'a self,
        _inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let url = ctx.session()?.current_url().await?;
            Ok(NodeOutput::next().with("url", json!(url)))
        })
    }
}
