//! Policy Engine: the sole authority consulted before any privileged step.
//!
//! Stateless beyond its fixed configuration: the role → grant map, the
//! sandbox roots and the egress rules. Every check returns a typed
//! [`KestrelError`] naming the violation.

pub mod egress;
pub mod expr;
pub mod sandbox;

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use kestrel_core::config::PolicyConfig;
use kestrel_core::error::{KestrelError, Result};
use kestrel_core::security::{Capability, RoleMap};
use kestrel_core::types::NodeSchema;

pub use egress::{is_private_ip, EgressPolicy, EgressTarget, Resolver, StaticResolver, SystemResolver};
pub use sandbox::Sandbox;

pub struct PolicyEngine {
    roles: RoleMap,
    sandbox: Sandbox,
    egress: EgressPolicy,
}

impl PolicyEngine {
    pub fn new(roles: RoleMap, config: &PolicyConfig) -> Self {
        Self {
            roles,
            sandbox: Sandbox::from_config(config),
            egress: EgressPolicy::new(config.allowed_schemes.clone()),
        }
    }

    /// Replace the resolver used for domain egress checks.
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.egress = self.egress.with_resolver(resolver);
        self
    }

    pub fn roles(&self) -> &RoleMap {
        &self.roles
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    // ── Capabilities ────────────────────────────────────────────

    /// True when every required capability is covered. Vacuously true for none.
    pub fn has_capability(&self, role: &str, required: &[Capability]) -> bool {
        self.roles.first_missing(role, required).is_none()
    }

    /// Like [`has_capability`](Self::has_capability) but names the first missing capability.
    pub fn require_capabilities(&self, role: &str, required: &[Capability]) -> Result<()> {
        match self.roles.first_missing(role, required) {
            None => Ok(()),
            Some(missing) => Err(KestrelError::AccessDenied {
                role: role.to_string(),
                capability: missing.to_string(),
            }),
        }
    }

    // ── Egress ──────────────────────────────────────────────────

    pub async fn check_egress(&self, url: &str) -> Result<EgressTarget> {
        self.egress.check(url).await
    }

    // ── Filesystem ──────────────────────────────────────────────

    pub fn resolve_path(&self, candidate: &str) -> Result<PathBuf> {
        let resolved = self.sandbox.resolve(candidate)?;
        debug!(path = %resolved.display(), "Sandbox path resolved");
        Ok(resolved)
    }

    // ── Expressions ─────────────────────────────────────────────

    pub fn compile_expression(&self, expr: &str) -> Result<()> {
        expr::compile(expr)
    }

    pub fn evaluate(&self, expr: &str, vars: &serde_json::Map<String, Value>) -> Result<Value> {
        expr::evaluate(expr, vars)
    }

    pub fn evaluate_condition(
        &self,
        expr: &str,
        vars: &serde_json::Map<String, Value>,
    ) -> Result<bool> {
        expr::evaluate_condition(expr, vars)
    }

    // ── Data guards ─────────────────────────────────────────────

    /// Must pass before an output value enters the variable bag or expression scope.
    pub fn guard_mapping(&self, schema: &NodeSchema, output_key: &str) -> Result<()> {
        if schema.is_output_sensitive(output_key) {
            return Err(KestrelError::SensitiveMappingViolation {
                node_type: schema.id.clone(),
                field: output_key.to_string(),
            });
        }
        Ok(())
    }

    /// A write or delete must carry a non-empty filter object.
    pub fn require_filter(&self, operation: &str, table: &str, filter: Option<&Value>) -> Result<()> {
        let empty = match filter {
            None | Some(Value::Null) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(_) => false,
        };
        if empty {
            return Err(KestrelError::DbEmptyWhere {
                operation: operation.to_string(),
                table: table.to_string(),
            });
        }
        Ok(())
    }

    pub fn check_identifier(&self, ident: &str) -> Result<()> {
        check_identifier(ident)
    }
}

/// Table and column names are interpolated into SQL only after this passes.
pub fn check_identifier(ident: &str) -> Result<()> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let re = IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));
    if re.is_match(ident) {
        Ok(())
    } else {
        Err(KestrelError::DbInvalidIdentifier(ident.to_string()))
    }
}
