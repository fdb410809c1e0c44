//! The node contract: input validation and `{{path}}` substitution.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Number, Value};
use tracing::warn;

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{FieldType, InputField, NodeSchema};

use crate::context::{RunContext, PROFILE_NAMESPACE};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_][A-Za-z0-9_.\-]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

// ── Validation ──────────────────────────────────────────────────

/// Validate inputs against a schema, applying defaults and coercions.
///
/// Fields the schema does not declare pass through unchanged.
pub fn validate(mut inputs: Map<String, Value>, schema: &NodeSchema) -> Result<Map<String, Value>> {
    for (name, field) in &schema.inputs {
        let present = inputs.get(name).filter(|v| !v.is_null()).cloned();
        let value = match present {
            Some(value) => value,
            None if field.required => {
                return Err(KestrelError::MissingRequiredInput {
                    field: name.clone(),
                })
            }
            None => {
                if let Some(default) = &field.default {
                    inputs.insert(name.clone(), default.clone());
                }
                continue;
            }
        };

        let value = coerce(name, field.field_type, value)?;
        check_enum(name, field, &value)?;
        check_pattern(name, field, &value)?;
        inputs.insert(name.clone(), value);
    }
    Ok(inputs)
}

fn coerce(name: &str, expected: FieldType, value: Value) -> Result<Value> {
    let mismatch = || KestrelError::InvalidType {
        field: name.to_string(),
        expected: expected.to_string(),
    };

    match (expected, value) {
        (FieldType::Any, v) => Ok(v),

        (FieldType::String, Value::String(s)) => Ok(Value::String(s)),
        (FieldType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (FieldType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (FieldType::Number, Value::Number(n)) => Ok(Value::Number(n)),
        (FieldType::Number, Value::String(s)) => {
            let parsed: f64 = s.trim().parse().map_err(|_| mismatch())?;
            number_value(parsed).ok_or_else(mismatch)
        }

        (FieldType::Integer, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() {
                Ok(Value::Number(n))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Ok(Value::from(f as i64))
                    }
                    _ => Err(mismatch()),
                }
            }
        }
        (FieldType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch()),

        (FieldType::Boolean, Value::Bool(b)) => Ok(Value::Bool(b)),
        (FieldType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(mismatch()),
        },

        (FieldType::Object, v @ Value::Object(_)) => Ok(v),
        (FieldType::Array, v @ Value::Array(_)) => Ok(v),

        _ => Err(mismatch()),
    }
}

/// Integral values stay integers so `"5"` and `5` validate to the same thing.
fn number_value(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        return Some(Value::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number)
}

fn check_enum(name: &str, field: &InputField, value: &Value) -> Result<()> {
    let Some(allowed) = &field.allowed else {
        return Ok(());
    };
    if allowed.contains(value) {
        return Ok(());
    }
    let shown = if field.sensitive {
        "<redacted>".to_string()
    } else {
        value.to_string()
    };
    Err(KestrelError::InvalidEnumValue {
        field: name.to_string(),
        value: shown,
    })
}

fn check_pattern(name: &str, field: &InputField, value: &Value) -> Result<()> {
    let (Some(pattern), Value::String(s)) = (&field.pattern, value) else {
        return Ok(());
    };
    let re = Regex::new(pattern)
        .map_err(|e| KestrelError::InvalidSchema(format!("pattern for {}: {}", name, e)))?;
    if re.is_match(s) {
        Ok(())
    } else {
        Err(KestrelError::PatternMismatch {
            field: name.to_string(),
            pattern: pattern.clone(),
        })
    }
}

// ── Variable substitution ───────────────────────────────────────

/// Substitute `{{path}}` placeholders in every string, recursively.
///
/// A string that is exactly one placeholder takes the resolved value with
/// its JSON type. Unresolvable placeholders are left as written.
///
/// `profile.*` placeholders may only appear under inputs the schema marks
/// sensitive; anywhere else they fail with `SensitiveMappingViolation`.
pub fn resolve_variables(
    inputs: &Map<String, Value>,
    schema: &NodeSchema,
    ctx: &RunContext,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (key, value) in inputs {
        if !schema.is_input_sensitive(key) && references_profile(value) {
            return Err(KestrelError::SensitiveMappingViolation {
                node_type: schema.id.clone(),
                field: key.clone(),
            });
        }
        out.insert(key.clone(), resolve_value(value, ctx));
    }
    Ok(out)
}

/// Whether a value holds any placeholder rooted in the profile namespace.
pub fn references_profile(value: &Value) -> bool {
    placeholders(value).iter().any(|path| is_profile_path(path))
}

fn is_profile_path(path: &str) -> bool {
    path.split('.').next() == Some(PROFILE_NAMESPACE)
}

fn resolve_value(value: &Value, ctx: &RunContext) -> Value {
    match value {
        Value::String(s) => resolve_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(s: &str, ctx: &RunContext) -> Value {
    let re = placeholder_re();

    if let Some(caps) = re.captures(s) {
        let whole = caps.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len());
        if whole {
            let path = &caps[1];
            return match ctx.lookup(path) {
                Some(value) => value.clone(),
                None => {
                    warn!(run_id = %ctx.run_id(), path, "Unresolved template variable left in place");
                    Value::String(s.to_string())
                }
            };
        }
    } else {
        return Value::String(s.to_string());
    }

    let replaced = re.replace_all(s, |caps: &Captures<'_>| match ctx.lookup(&caps[1]) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => {
            warn!(run_id = %ctx.run_id(), path = &caps[1], "Unresolved template variable left in place");
            caps[0].to_string()
        }
    });
    Value::String(replaced.into_owned())
}

/// Every placeholder path a value references, in document order.
pub fn placeholders(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_placeholders(value, &mut out);
    out
}

fn collect_placeholders(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in placeholder_re().captures_iter(s) {
                out.push(caps[1].to_string());
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_placeholders(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_placeholders(v, out)),
        _ => {}
    }
}
