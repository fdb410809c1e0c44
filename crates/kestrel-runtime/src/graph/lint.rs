//! Load-time checks for graph documents.
//!
//! Execution stays lenient about unresolved placeholders; lint reports them
//! ahead of time together with the structural problems a run would hit.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use kestrel_core::types::START_NODE_TYPE;
use kestrel_nodes::context::PROFILE_NAMESPACE;
use kestrel_nodes::{placeholders, references_profile, NodeRegistry};

use super::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    pub severity: Severity,
    /// Empty for graph-level issues.
    pub node_id: String,
    pub message: String,
}

impl LintIssue {
    fn new(severity: Severity, node_id: &str, message: impl Into<String>) -> Self {
        Self {
            severity,
            node_id: node_id.to_string(),
            message: message.into(),
        }
    }
}

/// Check a graph against the registry. Issues are sorted by node id.
pub fn lint(graph: &Graph, registry: &NodeRegistry) -> Vec<LintIssue> {
    let mut issues = Vec::new();

    if let Err(e) = graph.start_node() {
        issues.push(LintIssue::new(Severity::Error, "", e.to_string()));
    } else if matches!(graph.start_node(), Ok(None)) {
        issues.push(LintIssue::new(
            Severity::Warning,
            "",
            "graph has no start node; runs will complete without steps",
        ));
    }

    // Variables some node may write. Order of execution is not modelled.
    let produced: BTreeSet<&str> = graph
        .nodes
        .values()
        .flat_map(|n| {
            let saved = n.save_as.values().map(String::as_str);
            let set = (n.node_type == "set_variable")
                .then(|| n.data.get("name").and_then(Value::as_str))
                .flatten();
            saved.chain(set)
        })
        .collect();

    for (id, node) in &graph.nodes {
        for (port, targets) in &node.outputs {
            for target in targets {
                if !graph.nodes.contains_key(target) {
                    issues.push(LintIssue::new(
                        Severity::Warning,
                        id,
                        format!("port `{}` targets unknown node `{}`", port, target),
                    ));
                }
            }
        }

        if node.node_type == START_NODE_TYPE {
            continue;
        }

        let Some(entry) = registry.get(&node.node_type) else {
            issues.push(LintIssue::new(
                Severity::Warning,
                id,
                format!("node type `{}` is not registered; it will be skipped", node.node_type),
            ));
            continue;
        };
        let schema = &entry.schema;

        for (key, variable) in &node.save_as {
            if schema.is_output_sensitive(key) {
                issues.push(LintIssue::new(
                    Severity::Error,
                    id,
                    format!("output `{}` is sensitive and cannot be saved as `{}`", key, variable),
                ));
            } else if !schema.outputs.contains_key(key) {
                issues.push(LintIssue::new(
                    Severity::Warning,
                    id,
                    format!("`{}` declares no output `{}`", schema.id, key),
                ));
            }
        }

        for (name, field) in &schema.inputs {
            if field.required && field.default.is_none() && !node.data.contains_key(name) {
                issues.push(LintIssue::new(
                    Severity::Error,
                    id,
                    format!("required input `{}` is missing", name),
                ));
            }
        }

        for (key, value) in &node.data {
            if !schema.is_input_sensitive(key) && references_profile(value) {
                issues.push(LintIssue::new(
                    Severity::Error,
                    id,
                    format!("input `{}` is not sensitive and cannot reference `{}.*`", key, PROFILE_NAMESPACE),
                ));
            }
        }

        for path in placeholders(&Value::Object(node.data.clone())) {
            let root = path.split('.').next().unwrap_or_default();
            if root != PROFILE_NAMESPACE && !produced.contains(root) {
                issues.push(LintIssue::new(
                    Severity::Warning,
                    id,
                    format!("`{{{{{}}}}}` is never set by this graph and will stay unresolved", path),
                ));
            }
        }
    }

    issues.sort_by(|a, b| a.node_id.cmp(&b.node_id).then(a.message.cmp(&b.message)));
    issues
}
