use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use kestrel_core::error::Result;
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel,
};

use super::session::TAB_LOCK;
use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

// ── FindElementNode ─────────────────────────────────────────────

pub struct FindElementNode;

#[derive(Deserialize)]
struct FindElementInput {
    selector: String,
}

impl NodeHandler for FindElementNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("find_element", "Find Element", NodeCategory::Interaction, RiskLevel::Low)
            .describe("Branch on whether an element exists: port `found` or `missing`.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .idempotent()
            .input("selector", InputField::required(FieldType::String))
            .output("found", OutputField::new(FieldType::Boolean))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: FindElementInput = parse_inputs("find_element", inputs)?;
            let found = ctx.session()?.find_element(p.selector).await?;
            let port = if found { "found" } else { "missing" };
            Ok(NodeOutput::on_port(port).with("found", json!(found)))
        })
    }
}

// ── PressKeyNode ────────────────────────────────────────────────

pub struct PressKeyNode;

#[derive(Deserialize)]
struct PressKeyInput {
    key: String,
}

impl NodeHandler for PressKeyNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("press_key", "Press Key", NodeCategory::Interaction, RiskLevel::Low)
            .describe("Send one named key (`Enter`, `Tab`, `ArrowDown`, ...) to the focused element.")
            .requires(&["browser:basic"])
            .locks(&[TAB_LOCK])
            .input(
                "key",
                InputField::required(FieldType::String).with_pattern(r"^[A-Za-z0-9]{1,20}$"),
            )
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: PressKeyInput = parse_inputs("press_key", inputs)?;
            ctx.session()?.press_key(p.key).await?;
            Ok(NodeOutput::next())
        })
    }
}

// ── UploadFileNode ──────────────────────────────────────────────

pub struct UploadFileNode;

#[derive(Deserialize)]
struct UploadFileInput {
    selector: String,
    /// Already replaced by the sandbox-resolved path.
    path: PathBuf,
}

impl NodeHandler for UploadFileNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("upload_file", "Upload File", NodeCategory::Interaction, RiskLevel::High)
            .describe("Attach a file from a sandbox root to a file input.")
            .requires(&["browser:upload", "data:local"])
            .locks(&[TAB_LOCK])
            .input("selector", InputField::required(FieldType::String))
            .input("path", InputField::required(FieldType::String))
            .output("path", OutputField::new(FieldType::String))
            .check(PolicyCheck::SandboxPath("path".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: UploadFileInput = parse_inputs("upload_file", inputs)?;
            if !tokio::fs::try_exists(&p.path).await? {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} does not exist", p.path.display()),
                )
                .into());
            }
            debug!(run_id = %ctx.run_id(), path = %p.path.display(), "Uploading file");
            let shown = p.path.display().to_string();
            ctx.session()?.upload_file(p.selector, p.path).await?;
            Ok(NodeOutput::next().with("path", json!(shown)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use kestrel_core::types::RunId;
    use kestrel_test_utils::{test_policy, MockSession, SessionAction};

    fn inputs(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn find_element_ports() {
        let session = Arc::new(MockSession::new().with_element("#banner"));
        let mut ctx = RunContext::new(RunId::new(), "staff", Arc::new(test_policy(&std::env::temp_dir())))
            .with_session(session);

        let out = FindElementNode
            .execute(inputs(json!({"selector": "#banner"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.port, "found");
        let out = FindElementNode
            .execute(inputs(json!({"selector": "#nope"})), &mut ctx)
            .await
            .unwrap();
        assert_eq!(out.port, "missing");
        assert_eq!(out.data["found"], json!(false));
    }

    #[tokio::test]
    async fn upload_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cv.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let session = Arc::new(MockSession::new());
        let mut ctx = RunContext::new(RunId::new(), "staff", Arc::new(test_policy(dir.path())))
            .with_session(session.clone());

        UploadFileNode
            .execute(
                inputs(json!({"selector": "#cv", "path": file.display().to_string()})),
                &mut ctx,
            )
            .await
            .unwrap();
        assert_eq!(
            session.actions(),
            vec![SessionAction::UploadFile("#cv".into(), file.clone())]
        );

        let err = UploadFileNode
            .execute(
                inputs(json!({"selector": "#cv", "path": dir.path().join("missing.pdf").display().to_string()})),
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Io");
    }

    #[test]
    fn press_key_pattern() {
        let schema = PressKeyNode.schema();
        assert!(crate::contract::validate(inputs(json!({"key": "Enter"})), &schema).is_ok());
        let err = crate::contract::validate(inputs(json!({"key": "Ctrl+Alt+Del"})), &schema).unwrap_err();
        assert_eq!(err.kind(), "PatternMismatch");
    }
}
