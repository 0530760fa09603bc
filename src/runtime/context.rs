//! Per-execution runtime context
//!
//! Every execution allocates its own [`RuntimeContext`]; the `node_results` map is the only
//! state mutated during a walk and is never shared between executions.

use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Trigger payload, variables and the results accumulated while walking the graph
#[derive(Debug)]
pub struct RuntimeContext {
    pub execution_id: String,
    pub workflow_id: String,
    pub user_id: Option<String>,
    pub trigger_data: Value,
    pub variables: Map<String, Value>,
    /// Recorded node results keyed by node id
    node_results: RwLock<HashMap<String, Value>>,
}

impl RuntimeContext {
    pub fn new(
        execution_id: String,
        workflow_id: String,
        user_id: Option<String>,
        trigger_data: Value,
        variables: Map<String, Value>,
    ) -> Self {
        Self {
            execution_id,
            workflow_id,
            user_id,
            trigger_data,
            variables,
            node_results: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_result(&self, node_id: &str, result: Value) {
        self.node_results.write().await.insert(node_id.to_string(), result);
    }

    /// Snapshot of every recorded result, in map iteration order.
    pub async fn all_results(&self) -> Vec<Value> {
        self.node_results.read().await.values().cloned().collect()
    }

    pub async fn results_snapshot(&self) -> HashMap<String, Value> {
        self.node_results.read().await.clone()
    }

    /// Read-only view used by condition evaluation and templating.
    pub fn view<'a>(
        &'a self,
        node_results: &'a HashMap<String, Value>,
        current: Option<&'a Value>,
    ) -> ContextView<'a> {
        ContextView {
            trigger: &self.trigger_data,
            variables: &self.variables,
            node_results,
            current,
        }
    }
}

/// Borrowed snapshot of a context, resolvable with dotted paths
///
/// The first path segment selects a region: `trigger`, `variables`, `nodes.<id>` or `current`.
#[derive(Debug, Clone, Copy)]
pub struct ContextView<'a> {
    pub trigger: &'a Value,
    pub variables: &'a Map<String, Value>,
    pub node_results: &'a HashMap<String, Value>,
    /// Result of the node whose outgoing connection is being evaluated
    pub current: Option<&'a Value>,
}

impl<'a> ContextView<'a> {
    /// Resolve a condition field. An unknown first segment is dropped and the rest is
    /// read from the trigger payload; missing segments resolve to `null`.
    pub fn field_value(&self, path: &str) -> Value {
        self.lookup(path, true).unwrap_or(Value::Null)
    }

    /// Resolve a template expression. Only the known regions are addressable.
    pub fn template_value(&self, path: &str) -> Option<Value> {
        self.lookup(path, false)
    }

    fn lookup(&self, path: &str, default_to_trigger: bool) -> Option<Value> {
        let segments: Vec<&str> = path.trim().split('.').filter(|s| !s.is_empty()).collect();
        let (source, rest) = segments.split_first()?;

        match *source {
            "trigger" => walk(self.trigger, rest).cloned(),
            "variables" => match rest.split_first() {
                None => Some(Value::Object(self.variables.clone())),
                Some((name, tail)) => walk(self.variables.get(*name)?, tail).cloned(),
            },
            "nodes" => {
                let (node_id, tail) = rest.split_first()?;
                let result = self.node_results.get(*node_id)?;
                walk_result(result, tail).cloned()
            }
            "current" => walk_result(self.current?, rest).cloned(),
            _ if default_to_trigger => walk(self.trigger, rest).cloned(),
            _ => None,
        }
    }
}

/// Paths into a node result address its `data` payload when it has one, unless they
/// explicitly start with `data`.
fn walk_result<'v>(result: &'v Value, path: &[&str]) -> Option<&'v Value> {
    if path.first() == Some(&"data") {
        return walk(result, path);
    }
    match result.get("data") {
        Some(data) if !data.is_null() => walk(data, path),
        _ => walk(result, path),
    }
}

fn walk<'v>(root: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
