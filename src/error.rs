//! Error taxonomy shared by the engine, the trigger subsystem and storage.

use std::time::Duration;
use thiserror::Error;

/// Authoring mistakes that make a workflow or trigger unusable. Never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("workflow '{0}' has no trigger node")]
    MissingTrigger(String),

    #[error("workflow '{workflow_id}' has {count} trigger nodes, expected exactly one")]
    DuplicateTrigger { workflow_id: String, count: usize },

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("workflow graph contains a cycle")]
    CycleDetected,

    #[error("condition node '{0}' has no valid condition list")]
    InvalidConditions(String),

    #[error("condition is incomplete: {0}")]
    IncompleteCondition(String),

    #[error("action node '{0}' has no component key")]
    MissingComponentKey(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("unsupported HTTP method '{0}' for webhook")]
    InvalidWebhookMethod(String),

    #[error("unsupported trigger type '{0}'")]
    UnsupportedTriggerType(String),
}

/// Persistence failures from the storage collaborator.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

/// Failure of a single node while it runs.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node execution exceeded timeout ({0:?})")]
    Timeout(Duration),

    #[error("component '{component}' failed: {message}")]
    Component { component: String, message: String },

    #[error("node '{node_id}' produced an invalid result: {reason}")]
    InvalidResult { node_id: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure of a whole workflow execution, surfaced to the stimulus that started it.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("node '{node_id}' failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ExecutionError {
    /// Node id of the failing node, when the failure happened inside the graph walk.
    pub fn failed_node(&self) -> Option<&str> {
        match self {
            ExecutionError::Node { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Errors raised by the trigger lifecycle methods.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Webhook(#[from] crate::triggers::WebhookError),
}
