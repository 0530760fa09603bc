//! Workflow Engine
//!
//! Loads a workflow, validates it into a [`WorkflowGraph`] and walks it from the trigger
//! node. Each visited node is timed out individually, recorded into the per-execution
//! context and audited; qualifying outgoing connections are followed concurrently and
//! joined before the walk returns.

use crate::error::{ConfigError, ExecutionError, NodeError};
use crate::runtime::audit::AuditSink;
use crate::runtime::conditions::{evaluate_conditions, evaluate_group};
use crate::runtime::context::RuntimeContext;
use crate::runtime::runner::ComponentRunner;
use crate::runtime::support::{
    check_permissions, error_context, format_node_result, redact, resolve_templates, validate_result,
    with_timeout,
};
use crate::storage::{ExecutionRecord, ExecutionStatus, NodeContextRecord, Storage};
use crate::workflow::{ConditionGroup, ConnectionCondition, Node, NodeKind, WorkflowGraph};
use chrono::Utc;
use futures::future::{try_join_all, BoxFuture};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one successful execution
///
/// `leaves` holds the result of every terminal node reached, one per path, in the order
/// the branches were authored. A linear workflow yields exactly one leaf.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub leaves: Vec<Value>,
}

/// DAG executor shared by every stimulus
///
/// Holds no per-execution state; concurrent calls are independent.
pub struct WorkflowEngine {
    storage: Arc<dyn Storage>,
    runner: Arc<dyn ComponentRunner>,
    audit: AuditSink,
    node_timeout: Duration,
}

impl WorkflowEngine {
    pub fn new(storage: Arc<dyn Storage>, runner: Arc<dyn ComponentRunner>, node_timeout: Duration) -> Self {
        Self {
            audit: AuditSink::new(storage.clone()),
            storage,
            runner,
            node_timeout,
        }
    }

    pub fn audit(&self) -> &AuditSink {
        &self.audit
    }

    /// Run a workflow end to end for one stimulus.
    ///
    /// The execution row is created before the workflow is loaded and moves to a terminal
    /// status exactly once. Action nodes that already ran are not rolled back on failure.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        trigger_data: Value,
        user_id: Option<&str>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let execution_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();

        tracing::info!("🚀 Starting workflow execution: {} ({})", workflow_id, execution_id);

        self.audit
            .execution_started(&ExecutionRecord {
                id: execution_id.clone(),
                workflow_id: workflow_id.to_string(),
                status: ExecutionStatus::Running,
                started_at: Utc::now(),
                finished_at: None,
                logs: Value::Null,
            })
            .await;

        let walked = self.walk(&execution_id, workflow_id, trigger_data, user_id).await;

        match walked {
            Ok(leaves) => {
                let logs = json!({ "leaves": leaves });
                self.audit
                    .execution_finished(&execution_id, ExecutionStatus::Success, &logs)
                    .await;
                tracing::info!(
                    "✅ Workflow {} completed in {:?} ({} leaf results)",
                    workflow_id,
                    started.elapsed(),
                    leaves.len()
                );
                Ok(ExecutionOutcome { execution_id, leaves })
            }
            Err(e) => {
                let message = e.to_string();
                let logs = format_node_result(e.failed_node().unwrap_or(workflow_id), Err(&message));
                self.audit
                    .execution_finished(&execution_id, ExecutionStatus::Failed, &logs)
                    .await;
                tracing::error!("❌ Workflow {} failed after {:?}: {}", workflow_id, started.elapsed(), message);
                Err(e)
            }
        }
    }

    async fn walk(
        &self,
        execution_id: &str,
        workflow_id: &str,
        trigger_data: Value,
        user_id: Option<&str>,
    ) -> Result<Vec<Value>, ExecutionError> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| ExecutionError::WorkflowNotFound(workflow_id.to_string()))?
            .into_graph_form();

        let graph = WorkflowGraph::build(&workflow)?;
        let user_id = user_id.map(str::to_string).or_else(|| workflow.owner_id.clone());

        let context = RuntimeContext::new(
            execution_id.to_string(),
            workflow.id.clone(),
            user_id,
            trigger_data,
            workflow.variables.clone(),
        );

        self.execute_node(&graph, graph.trigger(), &context).await
    }

    /// Execute one node and everything reachable from it through qualifying connections.
    fn execute_node<'a>(
        &'a self,
        graph: &'a WorkflowGraph,
        node: &'a Node,
        context: &'a RuntimeContext,
    ) -> BoxFuture<'a, Result<Vec<Value>, ExecutionError>> {
        Box::pin(async move {
            let started = Instant::now();
            tracing::debug!("🔧 Executing {} node: {}", node.node_type.as_str(), node.node_id);

            let outcome = match with_timeout(self.node_timeout, self.run_node(node, context)).await {
                Ok(result) => validate_result(&node.node_id, &result).map(|_| result),
                Err(e) => Err(e),
            };
            let duration_ms = started.elapsed().as_millis() as i64;
            let input = json!({ "trigger": context.trigger_data, "config": node.config });

            let result = match outcome {
                Ok(result) => result,
                Err(e) => {
                    self.audit
                        .node_finished(&NodeContextRecord {
                            execution_id: context.execution_id.clone(),
                            node_id: node.node_id.clone(),
                            node_type: node.node_type.as_str().to_string(),
                            input,
                            output: Value::Null,
                            error: Some(error_context(node, &e)),
                            duration_ms,
                            finished_at: Utc::now(),
                        })
                        .await;
                    return Err(ExecutionError::Node {
                        node_id: node.node_id.clone(),
                        source: e,
                    });
                }
            };

            tracing::debug!(node_id = %node.node_id, duration_ms, output = %redact(&result), "Node finished");

            context.record_result(&node.node_id, result.clone()).await;
            self.audit
                .node_finished(&NodeContextRecord {
                    execution_id: context.execution_id.clone(),
                    node_id: node.node_id.clone(),
                    node_type: node.node_type.as_str().to_string(),
                    input,
                    output: result.clone(),
                    error: None,
                    duration_ms,
                    finished_at: Utc::now(),
                })
                .await;

            let next = self.next_nodes(graph, node, &result, context).await;
            if next.is_empty() {
                return Ok(vec![result]);
            }

            let branches = next
                .into_iter()
                .map(|next_node| self.execute_node(graph, next_node, context));
            let leaves = try_join_all(branches).await?;
            Ok(leaves.into_iter().flatten().collect())
        })
    }

    async fn run_node(&self, node: &Node, context: &RuntimeContext) -> Result<Value, NodeError> {
        match node.node_type {
            NodeKind::Trigger => Ok(json!({
                "success": true,
                "data": context.trigger_data,
                "nodeId": node.node_id,
                "timestamp": Utc::now().to_rfc3339(),
            })),
            NodeKind::Condition => {
                let group = ConditionGroup::from_node_config(&node.node_id, &node.config)?;
                let results = context.results_snapshot().await;
                let passed = evaluate_conditions(&group.conditions, group.logic, &context.view(&results, None));
                tracing::debug!("🔀 Condition {} evaluated to {}", node.node_id, passed);
                Ok(json!({
                    "success": true,
                    "conditionResult": passed,
                    "nodeId": node.node_id,
                    "conditions": group.conditions,
                }))
            }
            NodeKind::Action => {
                check_permissions(node, context.user_id.as_deref())?;
                let component = node
                    .component_key
                    .as_deref()
                    .filter(|key| !key.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingComponentKey(node.node_id.clone()))?;

                let results = context.results_snapshot().await;
                let props = resolve_templates(&node.config, &context.view(&results, None));
                tracing::debug!(component, props = %redact(&props), "Invoking component");

                let data = self
                    .runner
                    .run(component, props, context.user_id.as_deref())
                    .await
                    .map_err(|e| NodeError::Component {
                        component: component.to_string(),
                        message: format!("{:#}", e),
                    })?;

                Ok(json!({
                    "success": true,
                    "data": data,
                    "nodeId": node.node_id,
                    "component": component,
                }))
            }
            NodeKind::Merge => {
                let merged = context.all_results().await;
                Ok(json!({
                    "success": true,
                    "mergedCount": merged.len(),
                    "data": merged,
                    "nodeId": node.node_id,
                }))
            }
        }
    }

    /// Targets of the outgoing connections whose gate holds for `result`.
    async fn next_nodes<'g>(
        &self,
        graph: &'g WorkflowGraph,
        node: &Node,
        result: &Value,
        context: &RuntimeContext,
    ) -> Vec<&'g Node> {
        let outgoing = graph.outgoing(&node.node_id);
        if outgoing.is_empty() {
            return Vec::new();
        }

        let results = context.results_snapshot().await;
        let view = context.view(&results, Some(result));
        let condition_result = result.get("conditionResult").and_then(Value::as_bool);

        outgoing
            .into_iter()
            .filter(|(connection, _)| match connection.condition_type {
                ConnectionCondition::Always => true,
                ConnectionCondition::True => condition_result == Some(true),
                ConnectionCondition::False => condition_result == Some(false),
                ConnectionCondition::Custom => connection
                    .condition_config
                    .as_ref()
                    .map_or(true, |group| evaluate_group(group, &view)),
            })
            .map(|(_, target)| target)
            .collect()
    }
}
