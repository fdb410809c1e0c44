use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use kestrel_core::error::{KestrelError, Result};
use kestrel_core::types::{
    FieldType, InputField, NodeCategory, NodeOutput, NodeSchema, OutputField, PolicyCheck,
    RiskLevel,
};
use kestrel_policy::EgressTarget;

use crate::context::RunContext;
use crate::node::{parse_inputs, NodeHandler};

/// Response bodies are cut at this many bytes.
const MAX_BODY_BYTES: usize = 100_000;

// ── HttpRequestNode ─────────────────────────────────────────────

pub struct HttpRequestNode;

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    auth_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

fn default_method() -> String {
    "GET".into()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn http_error(e: impl std::fmt::Display) -> KestrelError {
    KestrelError::Http(e.to_string())
}

/// Client that connects only to the vetted addresses. Redirect targets would
/// skip the egress check, so redirects are not followed.
fn pinned_client(target: &EgressTarget, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none());
    if let Some(domain) = target.domain() {
        if target.addrs.is_empty() {
            return Err(KestrelError::Http(format!("could not resolve {}", domain)));
        }
        builder = builder.resolve_to_addrs(domain, &target.addrs);
    }
    builder.build().map_err(http_error)
}

impl NodeHandler for HttpRequestNode {
    fn schema(&self) -> NodeSchema {
        NodeSchema::new("http_request", "HTTP Request", NodeCategory::Network, RiskLevel::High)
            .describe("Make an HTTP request to a public address. Redirects are not followed.")
            .requires(&["net:http"])
            .input("url", InputField::required(FieldType::String))
            .input(
                "method",
                InputField::new(FieldType::String)
                    .with_default(json!("GET"))
                    .with_enum(
                        ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"]
                            .iter()
                            .map(|m| json!(m))
                            .collect(),
                    ),
            )
            .input("headers", InputField::new(FieldType::Object).with_default(json!({})))
            .input("body", InputField::new(FieldType::Any))
            .input(
                "auth_token",
                InputField::new(FieldType::String)
                    .sensitive()
                    .describe("Sent as a bearer token"),
            )
            .input(
                "timeout_ms",
                InputField::new(FieldType::Integer).with_default(json!(default_timeout_ms())),
            )
            .output("status", OutputField::new(FieldType::Integer))
            .output("headers", OutputField::sensitive(FieldType::Object))
            .output("body", OutputField::new(FieldType::String))
            .output("truncated", OutputField::new(FieldType::Boolean))
            .timeout_ms(60_000)
            .check(PolicyCheck::Egress("url".into()))
    }

    fn execute<'a>(
        &'a self,
        inputs: Map<String, Value>,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, Result<NodeOutput>> {
        Box::pin(async move {
            let p: HttpRequestInput = parse_inputs("http_request", inputs)?;
            let target = ctx.policy().check_egress(&p.url).await?;
            let client = pinned_client(&target, Duration::from_millis(p.timeout_ms))?;

            let method = p
                .method
                .to_uppercase()
                .parse::<reqwest::Method>()
                .map_err(http_error)?;

            let mut req = client.request(method.clone(), target.url.clone());
            for (k, v) in &p.headers {
                req = req.header(k.as_str(), v.as_str());
            }
            if let Some(token) = &p.auth_token {
                req = req.bearer_auth(token);
            }
            req = match p.body {
                None | Some(Value::Null) => req,
                Some(Value::String(text)) => req.body(text),
                Some(other) => req.json(&other),
            };

            let resp = req.send().await.map_err(http_error)?;
            let status = resp.status().as_u16();
            let headers: Map<String, Value> = resp
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), json!(v))))
                .collect();
            let mut body = resp.text().await.map_err(http_error)?;
            let truncated = body.len() > MAX_BODY_BYTES;
            if truncated {
                let mut cut = MAX_BODY_BYTES;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }

            debug!(run_id = %ctx.run_id(), method = %method, status, truncated, "HTTP request finished");
            Ok(NodeOutput::next()
                .with("status", json!(status))
                .with("headers", Value::Object(headers))
                .with("body", json!(body))
                .with("truncated", json!(truncated)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::validate;

    #[test]
    fn method_must_be_known() {
        let schema = HttpRequestNode.schema();
        let inputs = json!({"url": "https://public.example", "method": "TRACE"});
        let err = validate(inputs.as_object().cloned().unwrap(), &schema).unwrap_err();
        assert_eq!(err.kind(), "InvalidEnumValue");
    }

    #[test]
    fn auth_token_is_sensitive_without_default() {
        let schema = HttpRequestNode.schema();
        let token = &schema.inputs["auth_token"];
        assert!(token.sensitive);
        assert!(token.default.is_none());
        assert!(schema
            .policy_checks
            .contains(&PolicyCheck::Egress("url".into())));
    }

    #[test]
    fn response_headers_cannot_be_mapped() {
        let schema = HttpRequestNode.schema();
        assert!(schema.is_output_sensitive("headers"));
        assert!(!schema.is_output_sensitive("status"));
        assert!(!schema.is_output_sensitive("body"));
    }

    #[test]
    fn unresolved_domain_is_not_dialled() {
        let target = EgressTarget {
            url: "https://unknown.example/".parse().unwrap(),
            addrs: Vec::new(),
        };
        let err = pinned_client(&target, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), "Http");

        let literal = EgressTarget {
            url: "https://93.184.216.34/".parse().unwrap(),
            addrs: vec!["93.184.216.34:443".parse().unwrap()],
        };
        assert!(pinned_client(&literal, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn defaults_applied() {
        let schema = HttpRequestNode.schema();
        let inputs = json!({"url": "https://public.example"});
        let out = validate(inputs.as_object().cloned().unwrap(), &schema).unwrap();
        assert_eq!(out["method"], json!("GET"));
        assert_eq!(out["timeout_ms"], json!(30_000));
        assert_eq!(out["headers"], json!({}));
    }
}
