use std::path::PathBuf;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel,
};

use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

/// Largest file `file_read` will load.
const MAX_READ_BYTES: u64 = 1024 * 1024;

// ── FileReadNode ────────────────────────────────────────────────

pub struct FileReadNode;

#[derive(Deserialize)]
struct FileReadInput {
    path: PathBuf,
}

impl NodeHandler for FileReadNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("file_read", "Read File", NodeCategory::Data, RiskLevel::Medium)
            .describe("Read a UTF-8 text file inside a sandbox root.")
            .requires(&["data:local"])
            .idempotent()
            .input("path", InputField::required(FieldType::String))
            .output("content", OutputField::new(FieldType::String))
            .output("bytes", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::SandboxPath("path".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        _ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: FileReadInput = parse_inputs("file_read", inputs)?;
            let meta = tokio::fs::metadata(&p.path).await?;
            if meta.len() > MAX_READ_BYTES {
                return Err(KestrelError::NodeExecution {
                    node: "file_read".into(),
                    message: format!(
                        "{} is {} bytes, limit is {}",
                        p.path.display(),
                        meta.len(),
                        MAX_READ_BYTES
                    ),
                });
            }
            let content = tokio::fs::read_to_string(&p.path).await?;
            Ok(NodeOutput::next()
                .with("bytes", json!(content.len()))
                .with("content", json!(content)))
        })
    }
}

// ── FileWriteNode ───────────────────────────────────────────────

pub struct FileWriteNode;

#[derive(Deserialize)]
struct FileWriteInput {
    path: PathBuf,
    content: String,
    #[serde(default)]
    append: bool,
}

impl NodeHandler for FileWriteNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("file_write", "Write File", NodeCategory::Data, RiskLevel::High)
            .describe("Write or append text to a file inside a sandbox root.")
            .requires(&["data:local"])
            .locks(&["fs:write"])
            .input("path", InputField::required(FieldType::String))
            .input("content", InputField::required(FieldType::String))
            .input("append", InputField::new(FieldType::Boolean).with_default(json!(false)))
            .output("path", OutputField::new(FieldType::String))
            .output("bytes", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::SandboxPath("path".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: FileWriteInput = parse_inputs("file_write", inputs)?;
            if let Some(parent) = p.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(p.append)
                .truncate(!p.append)
                .open(&p.path)
                .await?;
            file.write_all(p.content.as_bytes()).await?;
            file.flush().await?;
            debug!(run_id = %ctx.run_id(), path = %p.path.display(), bytes = p.content.len(), "File written");
            Ok(NodeOutput::next()
                .with("path", json!(p.path.display().to_string()))
                .with("bytes", json!(p.content.len())))
        })
    }
}
