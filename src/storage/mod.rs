//! Persistence collaborator
//!
//! Workflow definitions, execution audit rows and webhook endpoints. The engine and the
//! trigger subsystem only ever talk to the [`Storage`] trait; [`SqliteStorage`] is the
//! production implementation.

pub mod sqlite;

use crate::error::StorageError;
use crate::workflow::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

pub use sqlite::SqliteStorage;

/// Lifecycle of one execution; mutated exactly once from `Running` to a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = StorageError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "running" => Ok(ExecutionStatus::Running),
            "success" => Ok(ExecutionStatus::Success),
            "failed" => Ok(ExecutionStatus::Failed),
            other => Err(StorageError::Corrupt(format!("unknown execution status '{}'", other))),
        }
    }
}

/// One end-to-end run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Final result on success, error details on failure
    pub logs: Value,
}

/// Write-once audit row for one visited node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeContextRecord {
    pub execution_id: String,
    pub node_id: String,
    pub node_type: String,
    pub input: Value,
    pub output: Value,
    pub error: Option<Value>,
    pub duration_ms: i64,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate over the executions of one workflow
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionSummary {
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub average_duration_ms: f64,
}

/// An inbound webhook address bound to a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    pub id: String,
    pub workflow_id: String,
    /// Opaque random token, the only addressing of the endpoint
    pub path: String,
    pub http_method: String,
    /// Never serialized; handed out once at creation
    #[serde(skip_serializing, default)]
    pub secret_token: Option<String>,
    pub is_active: bool,
    pub total_triggers: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Persistence operations used by the engine and trigger subsystem
///
/// No multi-row transactional guarantees are required; each call is atomic on its own row.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError>;
    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StorageError>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError>;
    async fn list_active_workflows(&self) -> Result<Vec<Workflow>, StorageError>;
    async fn delete_workflow(&self, id: &str) -> Result<bool, StorageError>;

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StorageError>;
    async fn complete_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        logs: &Value,
    ) -> Result<(), StorageError>;
    async fn insert_node_context(&self, record: &NodeContextRecord) -> Result<(), StorageError>;
    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, StorageError>;
    async fn list_node_contexts(&self, execution_id: &str) -> Result<Vec<NodeContextRecord>, StorageError>;
    async fn execution_summary(&self, workflow_id: &str) -> Result<ExecutionSummary, StorageError>;

    async fn insert_webhook(&self, endpoint: &WebhookEndpoint) -> Result<(), StorageError>;
    async fn get_webhook(&self, id: &str) -> Result<Option<WebhookEndpoint>, StorageError>;
    async fn list_webhooks(&self) -> Result<Vec<WebhookEndpoint>, StorageError>;
    async fn list_workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookEndpoint>, StorageError>;
    async fn set_webhook_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Option<WebhookEndpoint>, StorageError>;
    async fn delete_webhook(&self, id: &str) -> Result<Option<WebhookEndpoint>, StorageError>;
    async fn record_webhook_trigger(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError>;
    /// Remove endpoints whose workflow no longer exists; returns the number removed.
    async fn delete_orphan_webhooks(&self) -> Result<u64, StorageError>;
}
