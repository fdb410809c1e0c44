use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{InputField, NodeCategory, NodeSchema, OutputField, RiskLevel};

use crate::loader;
use crate::node::NodeHandler;

/// Validated node type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeTypeId(String);

impl NodeTypeId {
    /// Lowercase ASCII letters, digits and underscores, starting with a letter.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut chars = raw.chars();
        let valid = chars.next().is_some_and(|c| c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(KestrelError::InvalidSchema(format!(
                "invalid node type identifier: {:?}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered node: its validated schema and the handler behind it.
#[derive(Clone)]
pub struct RegistryEntry {
    pub schema: Arc<NodeSchema>,
    pub handler: Arc<dyn NodeHandler>,
}

/// Registry of available node types.
pub struct NodeRegistry {
    entries: HashMap<NodeTypeId, RegistryEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node under its own schema.
    pub fn register(&mut self, node: impl NodeHandler) -> bool {
        let schema = node.schema();
        self.register_schema(schema, Arc::new(node))
    }

    /// Register a handler under an explicit schema. Returns `false` when the
    /// schema is rejected; an existing entry with the same id is replaced.
    pub fn register_schema(&mut self, schema: NodeSchema, handler: Arc<dyn NodeHandler>) -> bool {
        if schema.id.trim().is_empty() {
            warn!(name = %schema.name, "Rejecting node schema without an identifier");
            return false;
        }
        let id = match NodeTypeId::parse(&schema.id) {
            Ok(id) => id,
            Err(e) => {
                warn!(node_type = %schema.id, error = %e, "Rejecting node schema");
                return false;
            }
        };
        if schema.capabilities.is_none() {
            warn!(node_type = %id, "Rejecting node schema without a capability set");
            return false;
        }
        if let Some((field, _)) = schema
            .inputs
            .iter()
            .find(|(_, f)| f.pattern.as_deref().is_some_and(|p| regex::Regex::new(p).is_err()))
        {
            warn!(node_type = %id, field = %field, "Rejecting node schema with an invalid pattern");
            return false;
        }

        let entry = RegistryEntry {
            schema: Arc::new(schema),
            handler,
        };
        if self.entries.insert(id.clone(), entry).is_some() {
            debug!(node_type = %id, "Node type re-registered, previous entry replaced");
        }
        true
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        match NodeTypeId::parse(id) {
            Ok(id) => self.entries.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<RegistryEntry> {
        let id = NodeTypeId::parse(id).ok()?;
        self.entries.get(&id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Registered ids, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.entries.keys().map(|id| id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Public description of every node type, sorted by id. Defaults of
    /// sensitive inputs are stripped.
    pub fn export_catalogue(&self) -> Vec<CatalogueEntry> {
        let mut catalogue: Vec<CatalogueEntry> = self
            .entries
            .values()
            .map(|entry| CatalogueEntry::from_schema(&entry.schema))
            .collect();
        catalogue.sort_by(|a, b| a.id.cmp(&b.id));
        catalogue
    }

    /// Registry with every built-in category loaded.
    pub fn with_builtins() -> Self {
        Self::with_categories(&NodeCategory::ALL)
    }

    pub fn with_categories(categories: &[NodeCategory]) -> Self {
        let mut registry = Self::new();
        for category in categories {
            let added = loader::register_category(&mut registry, *category);
            debug!(category = %category, added, "Built-in nodes registered");
        }
        registry
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// One node type as exposed to editors and other clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogueEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: NodeCategory,
    pub risk_level: RiskLevel,
    pub inputs: BTreeMap<String, InputField>,
    pub outputs: BTreeMap<String, OutputField>,
    pub capabilities: Vec<String>,
}

impl CatalogueEntry {
    fn from_schema(schema: &NodeSchema) -> Self {
        let inputs = schema
            .inputs
            .iter()
            .map(|(name, field)| {
                let mut field = field.clone();
                if field.sensitive {
                    field.default = None;
                }
                (name.clone(), field)
            })
            .collect();
        Self {
            id: schema.id.clone(),
            name: schema.name.clone(),
            description: schema.description.clone(),
            category: schema.category,
            risk_level: schema.risk_level,
            inputs,
            outputs: schema.outputs.clone(),
            capabilities: schema
                .required_capabilities()
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}
