use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use kestrel_core::error::Result;
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel,
};

use super::sql;
use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

/// Lock token held by every node that writes to the data store.
pub const DB_LOCK: &str = "db:global";

const DEFAULT_LIMIT: u64 = 100;

fn table_field() -> InputField {
    InputField::required(FieldType::String).describe("Table name")
}

fn filter_field(required: bool) -> InputField {
    let field = if required {
        InputField::required(FieldType::Object)
    } else {
        InputField::new(FieldType::Object).with_default(json!({}))
    };
    field.describe("Column → value equality filter; null matches IS NULL")
}

// ── DbSelectNode ────────────────────────────────────────────────

pub struct DbSelectNode;

#[derive(Deserialize)]
struct SelectInput {
    table: String,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    filter: Map<String, Value>,
    #[serde(default = "default_limit")]
    limit: u64,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

impl NodeHandler for DbSelectNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("db_select", "Select Rows", NodeCategory::Data, RiskLevel::Low)
            .describe("Read rows matching a filter.")
            .requires(&["db:read"])
            .idempotent()
            .input("table", table_field())
            .input("columns", InputField::new(FieldType::Array).with_default(json!([])))
            .input("filter", filter_field(false))
            .input(
                "limit",
                InputField::new(FieldType::Integer).with_default(json!(DEFAULT_LIMIT)),
            )
            .output("rows", OutputField::new(FieldType::Array))
            .output("count", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::SqlIdentifier("table".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: SelectInput = parse_inputs("db_select", inputs)?;
            let stmt = sql::select(&p.table, &p.columns, &p.filter, Some(p.limit))?;
            let rows = ctx.data_store()?.query(stmt.sql, stmt.params).await?;
            let count = rows.len();
            let rows: Vec<Value> = rows.into_iter().map(Value::Object).collect();
            Ok(NodeOutput::next()
                .with("rows", Value::Array(rows))
                .with("count", json!(count)))
        })
    }
}

// ── DbInsertNode ────────────────────────────────────────────────

pub struct DbInsertNode;

#[derive(Deserialize)]
struct InsertInput {
    table: String,
    values: Map<String, Value>,
}

impl NodeHandler for DbInsertNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("db_insert", "Insert Row", NodeCategory::Data, RiskLevel::Medium)
            .describe("Insert one row.")
            .requires(&["db:write"])
            .locks(&[DB_LOCK])
            .input("table", table_field())
            .input("values", InputField::required(FieldType::Object))
            .output("affected", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::SqlIdentifier("table".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: InsertInput = parse_inputs("db_insert", inputs)?;
            let stmt = sql::insert(&p.table, &p.values)?;
            let affected = ctx.data_store()?.execute(stmt.sql, stmt.params).await?;
            info!(run_id = %ctx.run_id(), table = %p.table, affected, "Rows inserted");
            Ok(NodeOutput::next().with("affected", json!(affected)))
        })
    }
}

// ── DbUpdateNode ────────────────────────────────────────────────

pub struct DbUpdateNode;

#[derive(Deserialize)]
struct UpdateInput {
    table: String,
    values: Map<String, Value>,
    filter: Map<String, Value>,
}

impl NodeHandler for DbUpdateNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("db_update", "Update Rows", NodeCategory::Data, RiskLevel::High)
            .describe("Update rows matching a non-empty filter.")
            .requires(&["db:write"])
            .locks(&[DB_LOCK])
            .input("table", table_field())
            .input("values", InputField::required(FieldType::Object))
            .input("filter", filter_field(true))
            .output("affected", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::RequireFilter("filter".into()))
            .check(PolicyCheck::SqlIdentifier("table".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: UpdateInput = parse_inputs("db_update", inputs)?;
            let stmt = sql::update(&p.table, &p.values, &p.filter)?;
            let affected = ctx.data_store()?.execute(stmt.sql, stmt.params).await?;
            info!(run_id = %ctx.run_id(), table = %p.table, affected, "Rows updated");
            Ok(NodeOutput::next().with("affected", json!(affected)))
        })
    }
}

// ── DbDeleteNode ────────────────────────────────────────────────

pub struct DbDeleteNode;

#[derive(Deserialize)]
struct DeleteInput {
    table: String,
    filter: Map<String, Value>,
}

impl NodeHandler for DbDeleteNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("db_delete", "Delete Rows", NodeCategory::Data, RiskLevel::Critical)
            .describe("Delete rows matching a non-empty filter.")
            .requires(&["db:delete"])
            .locks(&[DB_LOCK])
            .input("table", table_field())
            .input("filter", filter_field(true))
            .output("affected", OutputField::new(FieldType::Integer))
            .check(PolicyCheck::RequireFilter("filter".into()))
            .check(PolicyCheck::SqlIdentifier("table".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: DeleteInput = parse_inputs("db_delete", inputs)?;
            let stmt = sql::delete(&p.table, &p.filter)?;
            let affected = ctx.data_store()?.execute(stmt.sql, stmt.params).await?;
            info!(run_id = %ctx.run_id(), table = %p.table, affected, "Rows deleted");
            Ok(NodeOutput::next().with("affected", json!(affected)))
        })
    }
}
