//! Restricted expression evaluation.
//!
//! Expressions are compiled to evalexpr operator trees and evaluated against
//! an immutable context built from a flat variable map, so assignments,
//! definitions and chained statements that mutate state fail to evaluate.
//! Function calls are refused at compile time, and builtins are disabled in
//! the evaluation context as well.

use std::collections::BTreeMap;

use evalexpr::{
    build_operator_tree, Context, ContextWithMutableVariables, DefaultNumericTypes,
    HashMapContext, Node,
};
use serde_json::Value;

use kestrel_core::error::{KestrelError, Result};

type ExprValue = evalexpr::Value<DefaultNumericTypes>;

/// Longest expression accepted.
const MAX_EXPRESSION_LEN: usize = 1024;

/// Compile an expression without evaluating it.
pub fn compile(expr: &str) -> Result<()> {
    parse(expr).map(|_| ())
}

fn parse(expr: &str) -> Result<Node<DefaultNumericTypes>> {
    check_length(expr)?;
    let tree = build_operator_tree::<DefaultNumericTypes>(expr)
        .map_err(|e| KestrelError::UnsafeExpression(format!("{}: {}", expr, e)))?;
    if let Some(name) = tree.iter_function_identifiers().next() {
        return Err(KestrelError::UnsafeExpression(format!(
            "{}: function `{}` is not allowed",
            expr, name
        )));
    }
    Ok(tree)
}

/// Evaluate an expression against a variable map.
pub fn evaluate(expr: &str, vars: &serde_json::Map<String, Value>) -> Result<Value> {
    let tree = parse(expr)?;

    let mut context: HashMapContext<DefaultNumericTypes> = HashMapContext::new();
    context
        .set_builtin_functions_disabled(true)
        .map_err(|e| KestrelError::UnsafeExpression(e.to_string()))?;
    for (name, value) in flatten(vars) {
        if let Some(v) = to_expr_value(&value) {
            context
                .set_value(name, v)
                .map_err(|e| KestrelError::UnsafeExpression(e.to_string()))?;
        }
    }

    let result = tree
        .eval_with_context(&context)
        .map_err(|e| KestrelError::UnsafeExpression(format!("{}: {}", expr, e)))?;
    Ok(from_expr_value(result))
}

/// Evaluate an expression that must produce a boolean.
pub fn evaluate_condition(expr: &str, vars: &serde_json::Map<String, Value>) -> Result<bool> {
    match evaluate(expr, vars)? {
        Value::Bool(b) => Ok(b),
        other => Err(KestrelError::UnsafeExpression(format!(
            "{}: expected a boolean, got {}",
            expr, other
        ))),
    }
}

/// Flatten nested objects into dotted keys: `{"a": {"b": 1}}` → `a.b = 1`.
pub fn flatten(vars: &serde_json::Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in vars {
        flatten_into(key, value, &mut out);
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

fn check_length(expr: &str) -> Result<()> {
    if expr.trim().is_empty() {
        return Err(KestrelError::UnsafeExpression("empty expression".to_string()));
    }
    if expr.len() > MAX_EXPRESSION_LEN {
        return Err(KestrelError::UnsafeExpression(format!(
            "expression longer than {} characters",
            MAX_EXPRESSION_LEN
        )));
    }
    Ok(())
}

fn to_expr_value(value: &Value) -> Option<ExprValue> {
    match value {
        Value::Bool(b) => Some(ExprValue::Boolean(*b)),
        Value::String(s) => Some(ExprValue::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(ExprValue::from_int(i))
            } else {
                n.as_f64().map(ExprValue::from_float)
            }
        }
        Value::Array(items) => {
            let converted: Option<Vec<ExprValue>> = items.iter().map(to_expr_value).collect();
            converted.map(ExprValue::Tuple)
        }
        Value::Null => Some(ExprValue::Empty),
        Value::Object(_) => None,
    }
}

fn from_expr_value(value: ExprValue) -> Value {
    match value {
        ExprValue::Boolean(b) => Value::Bool(b),
        ExprValue::String(s) => Value::String(s),
        ExprValue::Int(i) => Value::from(i),
        ExprValue::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ExprValue::Tuple(items) => Value::Array(items.into_iter().map(from_expr_value).collect()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn arithmetic_and_comparison() {
        let v = vars(json!({"count": 4, "price": 2.5, "user": {"name": "alice"}}));
        assert_eq!(evaluate("count * 2 + 1", &v).unwrap(), json!(9));
        assert_eq!(evaluate("price * 2.0", &v).unwrap(), json!(5.0));
        assert!(evaluate_condition("count > 3 && user.name == \"alice\"", &v).unwrap());
        assert!(!evaluate_condition("count >= 10 || false", &v).unwrap());
    }

    #[test]
    fn unknown_variable_is_unsafe() {
        let err = evaluate("missing > 1", &serde_json::Map::new()).unwrap_err();
        assert_eq!(err.kind(), "UnsafeExpression");
    }

    #[test]
    fn assignment_is_rejected() {
        let v = vars(json!({"a": 1}));
        let err = evaluate("a = 5", &v).unwrap_err();
        assert_eq!(err.kind(), "UnsafeExpression");
        let err = evaluate("b = 1; b", &v).unwrap_err();
        assert_eq!(err.kind(), "UnsafeExpression");
    }

    #[test]
    fn function_calls_are_rejected() {
        let v = vars(json!({"s": "abc"}));
        for expr in ["max(1, 2) > 0", "str::len(s) == 3", "math::abs(-1) == 1"] {
            assert_eq!(compile(expr).unwrap_err().kind(), "UnsafeExpression", "{}", expr);
            assert_eq!(evaluate(expr, &v).unwrap_err().kind(), "UnsafeExpression", "{}", expr);
        }
    }

    #[test]
    fn malformed_expression_fails_to_compile() {
        assert_eq!(compile("(1 +").unwrap_err().kind(), "UnsafeExpression");
        assert_eq!(compile("").unwrap_err().kind(), "UnsafeExpression");
        assert!(compile("a > 1 && b").is_ok());
        let long = "1 + ".repeat(400) + "1";
        assert_eq!(compile(&long).unwrap_err().kind(), "UnsafeExpression");
    }

    #[test]
    fn condition_requires_boolean() {
        let v = vars(json!({"a": 1}));
        let err = evaluate_condition("a + 1", &v).unwrap_err();
        assert_eq!(err.kind(), "UnsafeExpression");
    }

    #[test]
    fn flatten_nested() {
        let flat = flatten(&vars(json!({"a": {"b": {"c": 1}}, "d": [1, 2]})));
        assert_eq!(flat.get("a.b.c"), Some(&json!(1)));
        assert_eq!(flat.get("d"), Some(&json!([1, 2])));
        assert!(!flat.contains_key("a"));
    }
}
