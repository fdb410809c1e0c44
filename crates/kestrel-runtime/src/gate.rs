use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{NodeSchema, PolicyCheck};
use kestrel_policy::PolicyEngine;

/// Runs every check a node schema declares, between input
/// validation and the node call.
///
/// Filter checks run first so an unguarded write is refused whatever the
/// caller's role. Then the capability check, then the remaining checks in
/// declaration order.
pub struct PolicyGate {
    policy: Arc<PolicyEngine>,
}

impl PolicyGate {
    pub fn new(policy: Arc<PolicyEngine>) -> Self {
        Self { policy }
    }

    /// Check validated inputs and return them, with sandboxed paths replaced
    /// by their resolved form.
    pub async fn check(
        &self,
        role: &str,
        schema: &NodeSchema,
        inputs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        match self.check_inner(role, schema, inputs).await {
            Ok(inputs) => Ok(inputs),
            Err(e) => {
                warn!(role, node_type = %schema.id, kind = e.kind(), error = %e, "Policy gate refused node");
                Err(e)
            }
        }
    }

    /// Run only the filter checks. An absent or null filter counts as empty.
    pub fn check_filters(&self, schema: &NodeSchema, inputs: &Map<String, Value>) -> Result<()> {
        for check in &schema.policy_checks {
            if let PolicyCheck::RequireFilter(field) = check {
                let table = inputs
                    .get("table")
                    .and_then(Value::as_str)
                    .unwrap_or(schema.id.as_str());
                self.policy.require_filter(&schema.id, table, inputs.get(field))?;
            }
        }
        Ok(())
    }

    async fn check_inner(
        &self,
        role: &str,
        schema: &NodeSchema,
        mut inputs: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        self.check_filters(schema, &inputs)?;

        self.policy
            .require_capabilities(role, schema.required_capabilities())?;

        for check in &schema.policy_checks {
            let field = check.field();
            let Some(value) = inputs.get(field) else {
                continue;
            };
            if matches!(check, PolicyCheck::RequireFilter(_)) {
                continue;
            }
            let Some(text) = value.as_str() else {
                return Err(KestrelError::InvalidType {
                    field: field.to_string(),
                    expected: "string".to_string(),
                });
            };

            match check {
                PolicyCheck::SandboxPath(_) => {
                    let resolved = self.policy.resolve_path(text)?;
                    inputs.insert(field.to_string(), Value::String(resolved.display().to_string()));
                }
                PolicyCheck::Egress(_) => {
                    self.policy.check_egress(text).await?;
                }
                PolicyCheck::Expression(_) => {
                    self.policy.compile_expression(text)?;
                }
                PolicyCheck::SqlIdentifier(_) => {
                    self.policy.check_identifier(text)?;
                }
                PolicyCheck::RequireFilter(_) => {}
            }
        }

        debug!(role, node_type = %schema.id, "Policy gate passed");
        Ok(inputs)
    }
}
