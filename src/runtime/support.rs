//! Node Executor support library
//!
//! Stateless helpers consumed by the engine: per-node timeouts, structural template
//! resolution, retry with exponential backoff, log redaction, result validation,
//! permission pre-checks and error formatting.

use crate::error::NodeError;
use crate::runtime::conditions::text_of;
use crate::runtime::context::ContextView;
use crate::workflow::{Node, NodeKind};
use regex::{Captures, Regex};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("static placeholder pattern"));

/// Key fragments whose values are masked before a result is logged.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "secret",
    "token",
    "key",
    "auth",
    "credential",
    "private",
    "session",
    "cookie",
];

const REDACTED: &str = "[REDACTED]";

/// Race a node future against a deadline.
pub async fn with_timeout<T, F>(deadline: Duration, future: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    tokio::time::timeout(deadline, future)
        .await
        .map_err(|_| NodeError::Timeout(deadline))?
}

/// Substitute `{{source.path}}` placeholders throughout a config document.
///
/// A string consisting of a single placeholder takes the resolved value with its JSON type;
/// placeholders inside longer strings are replaced by the value's text. Placeholders that
/// do not resolve (or resolve to `null`) are left verbatim.
pub fn resolve_templates(config: &Value, view: &ContextView<'_>) -> Value {
    match config {
        Value::String(text) => resolve_string(text, view),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve_templates(item, view)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve_templates(value, view)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(text: &str, view: &ContextView<'_>) -> Value {
    if let Some(captures) = PLACEHOLDER.captures(text) {
        if captures.get(0).is_some_and(|m| m.start() == 0 && m.end() == text.len()) {
            return lookup(&captures[1], view).unwrap_or_else(|| Value::String(text.to_string()));
        }
    }

    let replaced = PLACEHOLDER.replace_all(text, |captures: &Captures<'_>| match lookup(&captures[1], view) {
        Some(value) => text_of(&value),
        None => captures[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

fn lookup(expression: &str, view: &ContextView<'_>) -> Option<Value> {
    view.template_value(expression).filter(|value| !value.is_null())
}

/// Re-run `operation` up to `attempts` times, doubling the delay after each failure.
/// The last error is returned when every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = attempts.max(1);
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, ?delay, "Operation failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

/// Deep copy of `value` with values under sensitive keys masked.
pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, inner)| {
                    let lowered = key.to_lowercase();
                    if SENSITIVE_KEYS.iter().any(|word| lowered.contains(word)) {
                        (key.clone(), Value::String(REDACTED.into()))
                    } else {
                        (key.clone(), redact(inner))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Reject empty node results and results that cannot be serialized.
pub fn validate_result(node_id: &str, result: &Value) -> Result<(), NodeError> {
    if result.is_null() {
        return Err(NodeError::InvalidResult {
            node_id: node_id.to_string(),
            reason: "result is null".into(),
        });
    }
    serde_json::to_string(result).map_err(|e| NodeError::InvalidResult {
        node_id: node_id.to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// Action nodes run external components and need a user to run them as.
pub fn check_permissions(node: &Node, user_id: Option<&str>) -> Result<(), NodeError> {
    match node.node_type {
        NodeKind::Action if user_id.map_or(true, |id| id.trim().is_empty()) => Err(NodeError::PermissionDenied(
            format!("action node '{}' requires a user", node.node_id),
        )),
        _ => Ok(()),
    }
}

/// Uniform result envelope stored on execution records.
pub fn format_node_result(node_id: &str, result: Result<&Value, &str>) -> Value {
    let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    match result {
        Ok(data) => json!({
            "success": true,
            "nodeId": node_id,
            "data": data,
            "timestamp": timestamp,
        }),
        Err(message) => json!({
            "success": false,
            "nodeId": node_id,
            "error": message,
            "timestamp": timestamp,
        }),
    }
}

/// Structured description of a failure, written to the failing node's audit row.
pub fn error_context(node: &Node, error: &dyn std::error::Error) -> Value {
    let mut chain = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push(Value::String(cause.to_string()));
        source = cause.source();
    }

    let mut context = Map::new();
    context.insert("message".into(), Value::String(error.to_string()));
    context.insert("nodeId".into(), Value::String(node.node_id.clone()));
    context.insert("nodeType".into(), Value::String(node.node_type.as_str().into()));
    if let Some(component) = &node.component_key {
        context.insert("component".into(), Value::String(component.clone()));
    }
    if !chain.is_empty() {
        context.insert("causes".into(), Value::Array(chain));
    }
    Value::Object(context)
}
