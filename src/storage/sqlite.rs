//! SQLite persistence layer
//!
//! Workflows are stored as JSON definitions next to a few indexed lookup columns. Audit rows
//! and webhook endpoints are plain tables. Timestamps are RFC 3339 text in UTC.

use super::{
    ExecutionRecord, ExecutionStatus, ExecutionSummary, NodeContextRecord, Storage,
    WebhookEndpoint,
};
use crate::error::StorageError;
use crate::workflow::Workflow;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// SQLite-backed [`Storage`]
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn parse_json(raw: Option<String>) -> Result<Value, StorageError> {
    match raw {
        Some(text) => Ok(serde_json::from_str(&text)?),
        None => Ok(Value::Null),
    }
}

impl SqliteStorage {
    /// Open (creating if missing) the database behind a sqlx SQLite URL and initialise the schema.
    ///
    /// In-memory URLs get a single long-lived connection so every caller sees the same database.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Fresh private in-memory database.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    /// Ids of every execution of a workflow, oldest first.
    #[cfg(test)]
    pub(crate) async fn execution_ids(&self, workflow_id: &str) -> Result<Vec<String>, StorageError> {
        let ids = sqlx::query_scalar("SELECT id FROM executions WHERE workflow_id = ? ORDER BY started_at")
            .bind(workflow_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// Create all tables. Safe to call multiple times (uses IF NOT EXISTS).
    pub async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                owner_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                logs TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_contexts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                input_data TEXT,
                output_data TEXT,
                error_data TEXT,
                duration_ms INTEGER NOT NULL,
                finished_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_endpoints (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                webhook_path TEXT NOT NULL UNIQUE,
                http_method TEXT NOT NULL,
                secret_token TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                total_triggers INTEGER NOT NULL DEFAULT 0,
                last_triggered_at TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_workflow ON executions(workflow_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_contexts_execution ON execution_contexts(execution_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhooks_workflow ON webhook_endpoints(workflow_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn workflow_from_row(row: &SqliteRow) -> Result<Workflow, StorageError> {
        let definition: String = row.try_get("definition")?;
        let mut workflow: Workflow = serde_json::from_str(&definition)?;
        // Lookup columns win over whatever the definition document says.
        workflow.id = row.try_get("id")?;
        workflow.is_active = row.try_get("is_active")?;
        Ok(workflow)
    }

    fn execution_from_row(row: &SqliteRow) -> Result<ExecutionRecord, StorageError> {
        let status: String = row.try_get("status")?;
        let started_at: String = row.try_get("started_at")?;
        Ok(ExecutionRecord {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            status: status.parse()?,
            started_at: parse_timestamp(&started_at)?,
            finished_at: parse_optional_timestamp(row.try_get("finished_at")?)?,
            logs: parse_json(row.try_get("logs")?)?,
        })
    }

    fn context_from_row(row: &SqliteRow) -> Result<NodeContextRecord, StorageError> {
        let finished_at: String = row.try_get("finished_at")?;
        let error: Option<String> = row.try_get("error_data")?;
        Ok(NodeContextRecord {
            execution_id: row.try_get("execution_id")?,
            node_id: row.try_get("node_id")?,
            node_type: row.try_get("node_type")?,
            input: parse_json(row.try_get("input_data")?)?,
            output: parse_json(row.try_get("output_data")?)?,
            error: error.map(|text| serde_json::from_str(&text)).transpose()?,
            duration_ms: row.try_get("duration_ms")?,
            finished_at: parse_timestamp(&finished_at)?,
        })
    }

    fn webhook_from_row(row: &SqliteRow) -> Result<WebhookEndpoint, StorageError> {
        let created_at: String = row.try_get("created_at")?;
        Ok(WebhookEndpoint {
            id: row.try_get("id")?,
            workflow_id: row.try_get("workflow_id")?,
            path: row.try_get("webhook_path")?,
            http_method: row.try_get("http_method")?,
            secret_token: row.try_get("secret_token")?,
            is_active: row.try_get("is_active")?,
            total_triggers: row.try_get("total_triggers")?,
            last_triggered_at: parse_optional_timestamp(row.try_get("last_triggered_at")?)?,
            created_at: parse_timestamp(&created_at)?,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn save_workflow(&self, workflow: &Workflow) -> Result<(), StorageError> {
        let definition = serde_json::to_string(workflow)?;
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, owner_id, is_active, definition, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                is_active = excluded.is_active,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.owner_id)
        .bind(workflow.is_active)
        .bind(&definition)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StorageError> {
        let row = sqlx::query("SELECT id, is_active, definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::workflow_from_row).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query("SELECT id, is_active, definition FROM workflows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::workflow_from_row).collect()
    }

    async fn list_active_workflows(&self) -> Result<Vec<Workflow>, StorageError> {
        let rows = sqlx::query("SELECT id, is_active, definition FROM workflows WHERE is_active = 1")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::workflow_from_row).collect()
    }

    async fn delete_workflow(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_execution(&self, record: &ExecutionRecord) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO executions (id, workflow_id, status, started_at, finished_at, logs) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.workflow_id)
        .bind(record.status.as_str())
        .bind(timestamp(record.started_at))
        .bind(record.finished_at.map(timestamp))
        .bind(serde_json::to_string(&record.logs)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn complete_execution(
        &self,
        id: &str,
        status: ExecutionStatus,
        logs: &Value,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE executions SET status = ?, finished_at = ?, logs = ? WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(serde_json::to_string(logs)?)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_node_context(&self, record: &NodeContextRecord) -> Result<(), StorageError> {
        let error = record.error.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO execution_contexts
                (execution_id, node_id, node_type, input_data, output_data, error_data, duration_ms, finished_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.execution_id)
        .bind(&record.node_id)
        .bind(&record.node_type)
        .bind(serde_json::to_string(&record.input)?)
        .bind(serde_json::to_string(&record.output)?)
        .bind(error)
        .bind(record.duration_ms)
        .bind(timestamp(record.finished_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, StorageError> {
        let row = sqlx::query(
            "SELECT id, workflow_id, status, started_at, finished_at, logs FROM executions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::execution_from_row).transpose()
    }

    async fn list_node_contexts(&self, execution_id: &str) -> Result<Vec<NodeContextRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT execution_id, node_id, node_type, input_data, output_data, error_data, duration_ms, finished_at
            FROM execution_contexts WHERE execution_id = ? ORDER BY id
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::context_from_row).collect()
    }

    async fn execution_summary(&self, workflow_id: &str) -> Result<ExecutionSummary, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS succeeded,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
                AVG((julianday(finished_at) - julianday(started_at)) * 86400000.0) AS average_duration_ms
            FROM executions WHERE workflow_id = ?
            "#,
        )
        .bind(workflow_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ExecutionSummary {
            total: row.try_get("total")?,
            succeeded: row.try_get("succeeded")?,
            failed: row.try_get("failed")?,
            average_duration_ms: row
                .try_get::<Option<f64>, _>("average_duration_ms")?
                .unwrap_or(0.0),
        })
    }

    async fn insert_webhook(&self, endpoint: &WebhookEndpoint) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints
                (id, workflow_id, webhook_path, http_method, secret_token, is_active, total_triggers, last_triggered_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&endpoint.id)
        .bind(&endpoint.workflow_id)
        .bind(&endpoint.path)
        .bind(&endpoint.http_method)
        .bind(&endpoint.secret_token)
        .bind(endpoint.is_active)
        .bind(endpoint.total_triggers)
        .bind(endpoint.last_triggered_at.map(timestamp))
        .bind(timestamp(endpoint.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<WebhookEndpoint>, StorageError> {
        let row = sqlx::query("SELECT * FROM webhook_endpoints WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::webhook_from_row).transpose()
    }

    async fn list_webhooks(&self) -> Result<Vec<WebhookEndpoint>, StorageError> {
        let rows = sqlx::query("SELECT * FROM webhook_endpoints")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::webhook_from_row).collect()
    }

    async fn list_workflow_webhooks(&self, workflow_id: &str) -> Result<Vec<WebhookEndpoint>, StorageError> {
        let rows = sqlx::query(
            "SELECT * FROM webhook_endpoints WHERE workflow_id = ? ORDER BY created_at DESC",
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::webhook_from_row).collect()
    }

    async fn set_webhook_active(
        &self,
        id: &str,
        active: bool,
    ) -> Result<Option<WebhookEndpoint>, StorageError> {
        let result = sqlx::query("UPDATE webhook_endpoints SET is_active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_webhook(id).await
    }

    async fn delete_webhook(&self, id: &str) -> Result<Option<WebhookEndpoint>, StorageError> {
        let Some(endpoint) = self.get_webhook(id).await? else {
            return Ok(None);
        };

        sqlx::query("DELETE FROM webhook_endpoints WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(Some(endpoint))
    }

    async fn record_webhook_trigger(&self, id: &str, at: DateTime<Utc>) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE webhook_endpoints SET total_triggers = total_triggers + 1, last_triggered_at = ? WHERE id = ?",
        )
        .bind(timestamp(at))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_orphan_webhooks(&self) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM webhook_endpoints WHERE workflow_id NOT IN (SELECT id FROM workflows)",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_workflow(id: &str, active: bool) -> Workflow {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("Workflow {}", id),
            "owner_id": "user-1",
            "is_active": active,
            "nodes": [{ "node_id": "t", "node_type": "trigger" }],
            "variables": { "budget": 100 }
        }))
        .unwrap()
    }

    fn sample_webhook(id: &str, workflow_id: &str, path: &str) -> WebhookEndpoint {
        WebhookEndpoint {
            id: id.to_string(),
            workflow_id: workflow_id.to_string(),
            path: path.to_string(),
            http_method: "POST".to_string(),
            secret_token: Some("s3cret".to_string()),
            is_active: true,
            total_triggers: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn workflow_crud_and_active_filter() {
        let storage = SqliteStorage::in_memory().await.unwrap();

        storage.save_workflow(&sample_workflow("wf-1", true)).await.unwrap();
        storage.save_workflow(&sample_workflow("wf-2", false)).await.unwrap();

        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.owner_id.as_deref(), Some("user-1"));
        assert_eq!(loaded.variables.get("budget"), Some(&json!(100)));

        assert_eq!(storage.list_workflows().await.unwrap().len(), 2);
        let active = storage.list_active_workflows().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "wf-1");

        assert!(storage.delete_workflow("wf-1").await.unwrap());
        assert!(!storage.delete_workflow("wf-1").await.unwrap());
        assert!(storage.get_workflow("wf-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn execution_is_completed_once() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let record = ExecutionRecord {
            id: "exec-1".into(),
            workflow_id: "wf-1".into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            logs: Value::Null,
        };
        storage.insert_execution(&record).await.unwrap();

        storage
            .complete_execution("exec-1", ExecutionStatus::Success, &json!({ "finalResult": [] }))
            .await
            .unwrap();
        storage
            .complete_execution("exec-1", ExecutionStatus::Failed, &json!({ "error": "late" }))
            .await
            .unwrap();

        let stored = storage.get_execution("exec-1").await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.finished_at.is_some());
        assert_eq!(stored.logs, json!({ "finalResult": [] }));

        let summary = storage.execution_summary("wf-1").await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn node_contexts_round_trip_in_insertion_order() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        for (node_id, error) in [("t", None), ("a", Some(json!({ "message": "boom" })))] {
            storage
                .insert_node_context(&NodeContextRecord {
                    execution_id: "exec-1".into(),
                    node_id: node_id.into(),
                    node_type: "action".into(),
                    input: json!({ "x": 1 }),
                    output: Value::Null,
                    error,
                    duration_ms: 4,
                    finished_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let rows = storage.list_node_contexts("exec-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].node_id, "t");
        assert!(rows[0].error.is_none());
        assert_eq!(rows[1].error, Some(json!({ "message": "boom" })));
        assert!(storage.list_node_contexts("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn webhook_lifecycle_and_orphan_sweep() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        storage.save_workflow(&sample_workflow("wf-1", true)).await.unwrap();
        storage.insert_webhook(&sample_webhook("wh-1", "wf-1", "aaaa")).await.unwrap();
        storage.insert_webhook(&sample_webhook("wh-2", "wf-gone", "bbbb")).await.unwrap();

        storage.record_webhook_trigger("wh-1", Utc::now()).await.unwrap();
        storage.record_webhook_trigger("wh-1", Utc::now()).await.unwrap();
        let hook = storage.get_webhook("wh-1").await.unwrap().unwrap();
        assert_eq!(hook.total_triggers, 2);
        assert!(hook.last_triggered_at.is_some());
        assert_eq!(hook.secret_token.as_deref(), Some("s3cret"));

        let toggled = storage.set_webhook_active("wh-1", false).await.unwrap().unwrap();
        assert!(!toggled.is_active);
        assert!(storage.set_webhook_active("missing", true).await.unwrap().is_none());

        assert_eq!(storage.delete_orphan_webhooks().await.unwrap(), 1);
        let remaining = storage.list_webhooks().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "wh-1");

        let deleted = storage.delete_webhook("wh-1").await.unwrap().unwrap();
        assert_eq!(deleted.path, "aaaa");
        assert!(storage.list_workflow_webhooks("wf-1").await.unwrap().is_empty());
    }
}
