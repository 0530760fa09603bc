//! Non-fatal audit channel
//!
//! Execution and node-context rows are informational. Failures to write them are logged
//! on the `relayflow::audit` target and counted, never surfaced to the execution.

use crate::storage::{ExecutionRecord, ExecutionStatus, NodeContextRecord, Storage};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub struct AuditSink {
    storage: Arc<dyn Storage>,
    failures: AtomicU64,
}

impl AuditSink {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            failures: AtomicU64::new(0),
        }
    }

    pub async fn execution_started(&self, record: &ExecutionRecord) {
        if let Err(e) = self.storage.insert_execution(record).await {
            self.failed("insert_execution", &record.id, &e);
        }
    }

    pub async fn execution_finished(&self, execution_id: &str, status: ExecutionStatus, logs: &Value) {
        if let Err(e) = self.storage.complete_execution(execution_id, status, logs).await {
            self.failed("complete_execution", execution_id, &e);
        }
    }

    pub async fn node_finished(&self, record: &NodeContextRecord) {
        if let Err(e) = self.storage.insert_node_context(record).await {
            self.failed("insert_node_context", &record.execution_id, &e);
        }
    }

    /// Number of audit writes dropped since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    fn failed(&self, operation: &str, execution_id: &str, error: &dyn std::fmt::Display) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::error!(
            target: "relayflow::audit",
            operation,
            execution_id,
            error = %error,
            "Audit write failed"
        );
    }
}
