use thiserror::Error;

#[derive(Debug, Error)]
pub enum KestrelError {
    // Authorization errors
    #[error("Access denied: role '{role}' lacks capability '{capability}'")]
    AccessDenied { role: String, capability: String },

    // Egress errors
    #[error("Egress blocked: scheme not allowed for {0}")]
    EgressProtocol(String),

    #[error("Egress blocked: {host} is a private address")]
    EgressDenylist { host: String },

    #[error("Egress blocked: {host} resolves to private address {addr}")]
    EgressDnsPrivateIp { host: String, addr: String },

    // Filesystem sandbox errors
    #[error("Sandbox traversal rejected: {0}")]
    SandboxTraversal(String),

    #[error("Path outside sandbox roots: {0}")]
    SandboxOutsideRoot(String),

    // Data store safety errors
    #[error("Refusing {operation} on '{table}' without a filter")]
    DbEmptyWhere { operation: String, table: String },

    #[error("Invalid SQL identifier: {0}")]
    DbInvalidIdentifier(String),

    // Data flow errors
    #[error("Sensitive value cannot flow through '{field}' of node type '{node_type}'")]
    SensitiveMappingViolation { node_type: String, field: String },

    #[error("Unsafe expression: {0}")]
    UnsafeExpression(String),

    // Input validation errors
    #[error("Missing required input: {field}")]
    MissingRequiredInput { field: String },

    #[error("Invalid type for input '{field}': expected {expected}")]
    InvalidType { field: String, expected: String },

    #[error("Invalid value for input '{field}': {value} is not an allowed value")]
    InvalidEnumValue { field: String, value: String },

    #[error("Input '{field}' does not match pattern {pattern}")]
    PatternMismatch { field: String, pattern: String },

    // Execution errors
    #[error("Node timeout after {timeout_ms}ms: {node}")]
    Timeout { node: String, timeout_ms: u64 },

    #[error("Run exceeded max steps ({0})")]
    StepLimitExceeded(usize),

    #[error("Node execution failed: {node}: {message}")]
    NodeExecution { node: String, message: String },

    #[error("Invalid node schema: {0}")]
    InvalidSchema(String),

    #[error("Graph error: {0}")]
    Graph(String),

    // Collaborator errors
    #[error("Session error: {0}")]
    Session(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("HTTP error: {0}")]
    Http(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KestrelError {
    /// Stable string identifier for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessDenied { .. } => "AccessDenied",
            Self::EgressProtocol(_) => "EgressProtocol",
            Self::EgressDenylist { .. } => "EgressDenylist",
            Self::EgressDnsPrivateIp { .. } => "EgressDnsPrivateIp",
            Self::SandboxTraversal(_) => "SandboxTraversal",
            Self::SandboxOutsideRoot(_) => "SandboxOutsideRoot",
            Self::DbEmptyWhere { .. } => "DbEmptyWhere",
            Self::DbInvalidIdentifier(_) => "DbInvalidIdentifier",
            Self::SensitiveMappingViolation { .. } => "SensitiveMappingViolation",
            Self::UnsafeExpression(_) => "UnsafeExpression",
            Self::MissingRequiredInput { .. } => "MissingRequiredInput",
            Self::InvalidType { .. } => "InvalidType",
            Self::InvalidEnumValue { .. } => "InvalidEnumValue",
            Self::PatternMismatch { .. } => "PatternMismatch",
            Self::Timeout { .. } => "Timeout",
            Self::StepLimitExceeded(_) => "StepLimitExceeded",
            Self::NodeExecution { .. } => "NodeExecution",
            Self::InvalidSchema(_) => "InvalidSchema",
            Self::Graph(_) => "Graph",
            Self::Session(_) => "Session",
            Self::Database(_) => "Database",
            Self::Http(_) => "Http",
            Self::Config(_) => "Config",
            Self::ConfigNotFound(_) => "ConfigNotFound",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
        }
    }

    /// Whether this error is a policy or safety violation rather than an
    /// infrastructure failure.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            Self::AccessDenied { .. }
                | Self::EgressProtocol(_)
                | Self::EgressDenylist { .. }
                | Self::EgressDnsPrivateIp { .. }
                | Self::SandboxTraversal(_)
                | Self::SandboxOutsideRoot(_)
                | Self::DbEmptyWhere { .. }
                | Self::DbInvalidIdentifier(_)
                | Self::SensitiveMappingViolation { .. }
                | Self::UnsafeExpression(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, KestrelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable() {
        let err = KestrelError::AccessDenied {
            role: "staff".into(),
            capability: "db:delete".into(),
        };
        assert_eq!(err.kind(), "AccessDenied");
        assert_eq!(
            err.to_string(),
            "Access denied: role 'staff' lacks capability 'db:delete'"
        );

        let err = KestrelError::DbEmptyWhere {
            operation: "delete".into(),
            table: "users".into(),
        };
        assert_eq!(err.kind(), "DbEmptyWhere");
    }

    #[test]
    fn policy_violations_are_classified() {
        assert!(KestrelError::SandboxTraversal("../x".into()).is_policy_violation());
        assert!(KestrelError::UnsafeExpression("x".into()).is_policy_violation());
        assert!(!KestrelError::Session("gone".into()).is_policy_violation());
        assert!(!KestrelError::Timeout {
            node: "n1".into(),
            timeout_ms: 10
        }
        .is_policy_violation());
    }
}
