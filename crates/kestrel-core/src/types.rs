use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::Capability;

/// Type name of the reserved, policy-free entry node.
pub const START_NODE_TYPE: &str = "start";

/// Output port followed when a node does not pick one.
pub const DEFAULT_PORT: &str = "next";

/// Unique run identifier.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Informational severity label. Not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// Grouping used by the loader and the editor catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeCategory {
    Session,
    Interaction,
    Data,
    Network,
    Flow,
}

impl NodeCategory {
    pub const ALL: [NodeCategory; 5] = [
        Self::Session,
        Self::Interaction,
        Self::Data,
        Self::Network,
        Self::Flow,
    ];
}

impl fmt::Display for NodeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session => write!(f, "session"),
            Self::Interaction => write!(f, "interaction"),
            Self::Data => write!(f, "data"),
            Self::Network => write!(f, "network"),
            Self::Flow => write!(f, "flow"),
        }
    }
}

impl std::str::FromStr for NodeCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "interaction" => Ok(Self::Interaction),
            "data" => Ok(Self::Data),
            "network" => Ok(Self::Network),
            "flow" => Ok(Self::Flow),
            other => Err(format!("unknown node category: {}", other)),
        }
    }
}

/// Declared type of an input or output field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Any => "any",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputField {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
            allowed: None,
            pattern: None,
            sensitive: false,
            description: None,
        }
    }

    pub fn required(field_type: FieldType) -> Self {
        Self {
            required: true,
            ..Self::new(field_type)
        }
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_enum(mut self, values: Vec<serde_json::Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub sensitive: bool,
}

impl OutputField {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            sensitive: false,
        }
    }

    pub fn sensitive(field_type: FieldType) -> Self {
        Self {
            field_type,
            sensitive: true,
        }
    }
}

/// A node-specific Policy Engine check applied to one validated input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", content = "field", rename_all = "snake_case")]
pub enum PolicyCheck {
    /// Path input goes through the filesystem sandbox; the resolved path replaces it.
    SandboxPath(String),
    /// URL input goes through the egress fortress.
    Egress(String),
    /// Expression input must compile under the safe grammar.
    Expression(String),
    /// Filter object input must be non-empty.
    RequireFilter(String),
    /// Identifier input must be a plain SQL identifier.
    SqlIdentifier(String),
}

impl PolicyCheck {
    pub fn field(&self) -> &str {
        match self {
            Self::SandboxPath(f)
            | Self::Egress(f)
            | Self::Expression(f)
            | Self::RequireFilter(f)
            | Self::SqlIdentifier(f) => f,
        }
    }
}

/// Static description of a node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSchema {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: NodeCategory,
    pub risk_level: RiskLevel,
    /// `None` means the schema never declared its capabilities.
    #[serde(default)]
    pub capabilities: Option<Vec<Capability>>,
    #[serde(default)]
    pub resource_locks: Vec<String>,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputField>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub policy_checks: Vec<PolicyCheck>,
}

impl NodeSchema {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: NodeCategory,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            category,
            risk_level,
            capabilities: Some(vec![]),
            resource_locks: vec![],
            idempotent: false,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            timeout_ms: None,
            policy_checks: vec![],
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    /// Set required capabilities. Strings that fail to parse are dropped with a warning.
    pub fn requires(mut self, caps: &[&str]) -> Self {
        let parsed = caps
            .iter()
            .filter_map(|c| match c.parse::<Capability>() {
                Ok(cap) => Some(cap),
                Err(e) => {
                    tracing::warn!(capability = %c, error = %e, "Invalid capability, skipping");
                    None
                }
            })
            .collect();
        self.capabilities = Some(parsed);
        self
    }

    pub fn locks(mut self, tokens: &[&str]) -> Self {
        self.resource_locks = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn input(mut self, name: impl Into<String>, field: InputField) -> Self {
        self.inputs.insert(name.into(), field);
        self
    }

    pub fn output(mut self, name: impl Into<String>, field: OutputField) -> Self {
        self.outputs.insert(name.into(), field);
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    pub fn check(mut self, check: PolicyCheck) -> Self {
        self.policy_checks.push(check);
        self
    }

    /// Required capabilities, empty when undeclared.
    pub fn required_capabilities(&self) -> &[Capability] {
        self.capabilities.as_deref().unwrap_or(&[])
    }

    pub fn is_output_sensitive(&self, key: &str) -> bool {
        self.outputs.get(key).is_some_and(|o| o.sensitive)
    }

    pub fn is_input_sensitive(&self, key: &str) -> bool {
        self.inputs.get(key).is_some_and(|i| i.sensitive)
    }
}

/// Result of a node invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Output port whose connections are followed next.
    pub port: String,
}

impl NodeOutput {
    /// Empty output on the default port.
    pub fn next() -> Self {
        Self {
            data: serde_json::Map::new(),
            port: DEFAULT_PORT.to_string(),
        }
    }

    /// Output on a named port.
    pub fn on_port(port: impl Into<String>) -> Self {
        Self {
            data: serde_json::Map::new(),
            port: port.into(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_is_a_uuid_string() {
        let id = RunId::new();
        assert!(Uuid::parse_str(id.as_str()).is_ok());
        assert_ne!(id, RunId::new());
        assert_eq!(serde_json::to_value(&id).unwrap(), json!(id.as_str()));
    }

    #[test]
    fn schema_builder() {
        let schema = NodeSchema::new("db_delete", "Delete Rows", NodeCategory::Data, RiskLevel::High)
            .requires(&["db:delete", "not a :: capability"])
            .locks(&["db:global"])
            .input("table", InputField::required(FieldType::String))
            .input("secret", InputField::new(FieldType::String).sensitive())
            .output("affected", OutputField::new(FieldType::Integer))
            .output("token", OutputField::sensitive(FieldType::String))
            .check(PolicyCheck::RequireFilter("filter".into()));

        assert_eq!(schema.required_capabilities().len(), 1);
        assert_eq!(schema.required_capabilities()[0].to_string(), "db:delete");
        assert_eq!(schema.resource_locks, vec!["db:global"]);
        assert!(schema.is_output_sensitive("token"));
        assert!(!schema.is_output_sensitive("affected"));
        assert!(!schema.is_output_sensitive("missing"));
        assert!(schema.is_input_sensitive("secret"));
        assert!(!schema.is_input_sensitive("table"));
        assert_eq!(schema.policy_checks[0].field(), "filter");
    }

    #[test]
    fn schema_deserializes_without_capabilities() {
        let schema: NodeSchema = serde_json::from_value(json!({
            "id": "x",
            "name": "X",
            "category": "flow",
            "riskLevel": "Low"
        }))
        .unwrap();
        assert!(schema.capabilities.is_none());
        assert!(schema.required_capabilities().is_empty());
    }

    #[test]
    fn input_field_serde_uses_enum_key() {
        let field = InputField::new(FieldType::String).with_enum(vec![json!("GET"), json!("POST")]);
        let v = serde_json::to_value(&field).unwrap();
        assert_eq!(v["enum"], json!(["GET", "POST"]));
        assert_eq!(v["type"], json!("string"));
    }

    #[test]
    fn category_parse() {
        assert_eq!("Data".parse::<NodeCategory>().unwrap(), NodeCategory::Data);
        assert!("gui".parse::<NodeCategory>().is_err());
        assert_eq!(NodeCategory::Interaction.to_string(), "interaction");
    }

    #[test]
    fn node_output_builders() {
        let out = NodeOutput::next().with("text", json!("hi"));
        assert_eq!(out.port, DEFAULT_PORT);
        assert_eq!(out.data["text"], json!("hi"));
        assert_eq!(NodeOutput::on_port("true").port, "true");
    }
}
