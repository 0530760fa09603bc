//! Trigger Manager
//!
//! Owns every running schedule timer (one per workflow) on a tokio-cron-scheduler
//! `JobScheduler`, delegates webhook endpoints to the [`WebhookManager`], and is the only
//! component that starts executions from external stimuli. Lifecycle methods are
//! serialized through one mutex; the timer registry is keyed by workflow id.

use crate::error::{ConfigError, TriggerError};
use crate::runtime::WorkflowEngine;
use crate::storage::Storage;
use crate::triggers::webhooks::{validate_method, CreatedWebhook, WebhookManager, WebhookView};
use crate::workflow::types::{SCHEDULE_TRIGGER, WEBHOOK_TRIGGER};
use crate::workflow::{Node, NodeKind, TriggerKind, Workflow};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Lifecycle of one workflow's schedule timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerState {
    Stopped,
    Starting,
    Running,
    Restarting,
}

/// A running (or starting) timer bound to `(workflow_id, cron)`
#[derive(Debug, Clone)]
pub struct ScheduledTrigger {
    pub job_id: Option<Uuid>,
    pub cron: String,
    pub timezone: String,
    pub state: TriggerState,
}

/// Trigger creation request
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerConfig {
    Schedule { cron: String, timezone: Option<String> },
    Webhook { method: Option<String>, use_secret: bool },
}

impl TriggerConfig {
    /// Build from a trigger type name and its loosely typed config document.
    pub fn from_parts(trigger_type: &str, config: &Value) -> Result<Self, ConfigError> {
        let text = |key: &str| config.get(key).and_then(Value::as_str).map(str::to_string);
        match trigger_type {
            "schedule" => Ok(TriggerConfig::Schedule {
                cron: text("cron")
                    .or_else(|| text("schedule"))
                    .ok_or_else(|| ConfigError::InvalidCron {
                        expression: String::new(),
                        reason: "cron expression is required".into(),
                    })?,
                timezone: text("timezone"),
            }),
            "webhook" => Ok(TriggerConfig::Webhook {
                method: text("method"),
                use_secret: config
                    .get("useSecret")
                    .or_else(|| config.get("use_secret"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            other => Err(ConfigError::UnsupportedTriggerType(other.to_string())),
        }
    }
}

/// Next-run information returned for schedules
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    pub cron: String,
    pub timezone: String,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CreatedTrigger {
    Schedule { node: Node, schedule: ScheduleInfo },
    Webhook { node: Node, webhook: CreatedWebhook },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStats {
    pub node_id: String,
    pub cron: String,
    pub timezone: String,
    pub state: TriggerState,
    pub is_running: bool,
    pub next_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStats {
    pub webhooks: Vec<WebhookView>,
    pub schedules: Vec<ScheduleStats>,
    pub total_triggers: usize,
    pub active_triggers: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTriggerResult {
    pub success: bool,
    pub execution_id: String,
    pub trigger_data: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub orphan_webhooks_removed: u64,
    pub timers_stopped: usize,
}

pub struct TriggerManager {
    storage: Arc<dyn Storage>,
    engine: Arc<WorkflowEngine>,
    webhooks: Arc<WebhookManager>,
    scheduler: RwLock<JobScheduler>,
    schedules: RwLock<HashMap<String, ScheduledTrigger>>,
    lifecycle: Mutex<()>,
    running: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerManager {
    pub async fn new(
        storage: Arc<dyn Storage>,
        engine: Arc<WorkflowEngine>,
        webhooks: Arc<WebhookManager>,
    ) -> Result<Self, TriggerError> {
        Ok(Self {
            storage,
            engine,
            webhooks,
            scheduler: RwLock::new(JobScheduler::new().await?),
            schedules: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(()),
            running: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        })
    }

    pub fn webhooks(&self) -> &Arc<WebhookManager> {
        &self.webhooks
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start one timer per active schedule-triggered workflow and load the webhook cache.
    ///
    /// A workflow with a broken cron expression is logged and skipped.
    pub async fn start(&self) -> Result<(), TriggerError> {
        let _guard = self.lifecycle.lock().await;
        if self.is_running() {
            tracing::warn!("Trigger manager already started");
            return Ok(());
        }

        tracing::info!("⏰ Starting trigger manager");

        let workflows = self.storage.list_active_workflows().await?;
        let mut started = 0;
        for workflow in workflows {
            let workflow = workflow.into_graph_form();
            if workflow.trigger_node().and_then(Node::trigger_kind) != Some(TriggerKind::Schedule) {
                continue;
            }
            match self.schedule_workflow(&workflow).await {
                Ok(()) => started += 1,
                Err(e) => tracing::error!("❌ Failed to schedule workflow {}: {}", workflow.id, e),
            }
        }

        self.webhooks.load_webhooks().await?;
        self.scheduler.read().await.start().await?;
        self.running.store(true, Ordering::SeqCst);
        for entry in self.schedules.write().await.values_mut() {
            if entry.job_id.is_some() {
                entry.state = TriggerState::Running;
            }
        }

        tracing::info!("✅ Trigger manager started with {} scheduled workflows", started);
        Ok(())
    }

    /// Stop every timer, end the periodic cleanup task and shut the scheduler down.
    /// A later `start` begins afresh.
    pub async fn stop(&self) -> Result<(), TriggerError> {
        let _guard = self.lifecycle.lock().await;
        if let Some(task) = self.cleanup_task.lock().await.take() {
            task.abort();
            tracing::debug!("🧹 Periodic trigger cleanup stopped");
        }
        if !self.is_running() {
            return Ok(());
        }

        tracing::info!("⏹️ Stopping trigger manager");

        let workflow_ids: Vec<String> = self.schedules.read().await.keys().cloned().collect();
        for workflow_id in &workflow_ids {
            self.unschedule(workflow_id).await;
        }

        let mut scheduler = self.scheduler.write().await;
        scheduler.shutdown().await?;
        *scheduler = JobScheduler::new().await?;
        self.running.store(false, Ordering::SeqCst);

        tracing::info!("✅ Trigger manager stopped ({} timers)", workflow_ids.len());
        Ok(())
    }

    /// Create (or replace) the trigger of a workflow.
    pub async fn create_trigger(
        &self,
        workflow_id: &str,
        config: TriggerConfig,
    ) -> Result<CreatedTrigger, TriggerError> {
        let mut workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| TriggerError::WorkflowNotFound(workflow_id.to_string()))?
            .into_graph_form();
        let stamp = Utc::now().timestamp_millis();

        match config {
            TriggerConfig::Schedule { cron, timezone } => {
                let normalized = normalize_cron(&cron)?;
                let timezone = timezone.unwrap_or_else(|| "UTC".to_string());
                let node = workflow
                    .set_trigger(Node {
                        node_id: format!("schedule_trigger_{}", stamp),
                        node_type: NodeKind::Trigger,
                        component_key: Some(SCHEDULE_TRIGGER.to_string()),
                        config: json!({ "cron": cron, "timezone": timezone }),
                    })
                    .clone();
                self.storage.save_workflow(&workflow).await?;
                self.restart_workflow_trigger(workflow_id).await?;

                Ok(CreatedTrigger::Schedule {
                    node,
                    schedule: ScheduleInfo {
                        next_run: next_run(&normalized),
                        cron,
                        timezone,
                    },
                })
            }
            TriggerConfig::Webhook { method, use_secret } => {
                let method = validate_method(method.as_deref().unwrap_or("POST"))?;
                let node = workflow
                    .set_trigger(Node {
                        node_id: format!("webhook_trigger_{}", stamp),
                        node_type: NodeKind::Trigger,
                        component_key: Some(WEBHOOK_TRIGGER.to_string()),
                        config: json!({ "method": method, "useSecret": use_secret }),
                    })
                    .clone();
                self.storage.save_workflow(&workflow).await?;

                let webhook = self
                    .webhooks
                    .create_webhook(workflow_id, Some(&method), use_secret)
                    .await?;
                self.restart_workflow_trigger(workflow_id).await?;

                Ok(CreatedTrigger::Webhook { node, webhook })
            }
        }
    }

    /// Tear down the workflow's timer and re-create it from the persisted trigger node.
    ///
    /// Missing or inactive workflows end up with no timer.
    pub async fn restart_workflow_trigger(&self, workflow_id: &str) -> Result<(), TriggerError> {
        let _guard = self.lifecycle.lock().await;

        if let Some(entry) = self.schedules.write().await.get_mut(workflow_id) {
            entry.state = TriggerState::Restarting;
        }
        self.unschedule(workflow_id).await;

        let Some(workflow) = self.storage.get_workflow(workflow_id).await? else {
            tracing::warn!("Workflow {} not found, trigger left stopped", workflow_id);
            return Ok(());
        };
        if !workflow.is_active {
            tracing::warn!("Workflow {} is inactive, trigger left stopped", workflow_id);
            return Ok(());
        }

        let workflow = workflow.into_graph_form();
        match workflow.trigger_node().and_then(Node::trigger_kind) {
            Some(TriggerKind::Schedule) => self.schedule_workflow(&workflow).await?,
            Some(TriggerKind::Webhook) => {
                self.webhooks.load_webhooks().await?;
            }
            other => tracing::debug!(workflow_id, ?other, "No timer needed for trigger"),
        }

        tracing::info!("🔄 Trigger restarted for workflow {}", workflow_id);
        Ok(())
    }

    /// Stop the workflow's timer and delete its webhooks, used when a workflow is deleted.
    pub async fn remove_workflow(&self, workflow_id: &str) -> Result<(), TriggerError> {
        let _guard = self.lifecycle.lock().await;
        self.unschedule(workflow_id).await;
        let removed = self.webhooks.delete_workflow_webhooks(workflow_id).await?;
        tracing::info!("🗑️ Removed triggers for workflow {} ({} webhooks)", workflow_id, removed);
        Ok(())
    }

    /// Delete orphan webhooks, stop timers of missing or inactive workflows, reload the cache.
    pub async fn cleanup_inactive_triggers(&self) -> Result<CleanupReport, TriggerError> {
        let _guard = self.lifecycle.lock().await;

        let orphan_webhooks_removed = self.storage.delete_orphan_webhooks().await?;

        let scheduled: Vec<String> = self.schedules.read().await.keys().cloned().collect();
        let mut timers_stopped = 0;
        for workflow_id in scheduled {
            let keep = match self.storage.get_workflow(&workflow_id).await? {
                Some(workflow) => {
                    workflow.is_active
                        && workflow.trigger_node().and_then(Node::trigger_kind) == Some(TriggerKind::Schedule)
                }
                None => false,
            };
            if !keep && self.unschedule(&workflow_id).await {
                timers_stopped += 1;
            }
        }

        self.webhooks.load_webhooks().await?;

        tracing::info!(
            "🧹 Trigger cleanup removed {} orphan webhooks and stopped {} timers",
            orphan_webhooks_removed,
            timers_stopped
        );
        Ok(CleanupReport {
            orphan_webhooks_removed,
            timers_stopped,
        })
    }

    pub async fn trigger_stats(&self, workflow_id: &str) -> Result<TriggerStats, TriggerError> {
        let webhooks = self.webhooks.workflow_webhooks(workflow_id).await?;

        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| TriggerError::WorkflowNotFound(workflow_id.to_string()))?
            .into_graph_form();

        let registry = self.schedules.read().await;
        let schedules: Vec<ScheduleStats> = workflow
            .trigger_nodes()
            .filter(|node| node.trigger_kind() == Some(TriggerKind::Schedule))
            .map(|node| {
                let cron = node.cron_expression().unwrap_or_default().to_string();
                let state = registry
                    .get(workflow_id)
                    .map(|entry| entry.state)
                    .unwrap_or(TriggerState::Stopped);
                ScheduleStats {
                    node_id: node.node_id.clone(),
                    next_run: normalize_cron(&cron).ok().and_then(|c| next_run(&c)),
                    timezone: timezone_of(node),
                    cron,
                    is_running: state == TriggerState::Running,
                    state,
                }
            })
            .collect();

        let active_triggers = webhooks.iter().filter(|w| w.endpoint.is_active).count()
            + schedules.iter().filter(|s| s.is_running).count();

        Ok(TriggerStats {
            total_triggers: webhooks.len() + schedules.len(),
            active_triggers,
            webhooks,
            schedules,
        })
    }

    /// Run a workflow by hand with a synthetic trigger payload.
    pub async fn test_trigger(
        &self,
        workflow_id: &str,
        trigger_type: Option<&str>,
    ) -> Result<TestTriggerResult, TriggerError> {
        let trigger_data = json!({
            "trigger": trigger_type.unwrap_or("manual"),
            "test": true,
            "triggeredAt": Utc::now().to_rfc3339(),
            "message": "Manual trigger test",
        });

        tracing::info!("🧪 Manual trigger test for workflow {}", workflow_id);
        let outcome = self
            .engine
            .execute_workflow(workflow_id, trigger_data.clone(), None)
            .await?;

        Ok(TestTriggerResult {
            success: true,
            execution_id: outcome.execution_id,
            trigger_data,
        })
    }

    /// Registry snapshot: workflow id with its cron and state.
    pub async fn scheduled(&self) -> HashMap<String, ScheduledTrigger> {
        self.schedules.read().await.clone()
    }

    /// Periodically run [`Self::cleanup_inactive_triggers`] until [`Self::stop`].
    ///
    /// Replaces a previously spawned cleanup task. The task only holds a weak reference
    /// and ends on its own once the manager is dropped.
    pub async fn spawn_cleanup(self: &Arc<Self>, every: Duration) {
        let manager: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.cleanup_inactive_triggers().await {
                    tracing::error!("❌ Periodic trigger cleanup failed: {}", e);
                }
            }
        });

        if let Some(previous) = self.cleanup_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Whether a periodic cleanup task is alive.
    pub async fn has_cleanup_task(&self) -> bool {
        self.cleanup_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start the timer of one workflow. Callers hold the lifecycle lock.
    async fn schedule_workflow(&self, workflow: &Workflow) -> Result<(), TriggerError> {
        let node = workflow
            .trigger_node()
            .ok_or_else(|| ConfigError::MissingTrigger(workflow.id.clone()))?;
        let cron = node.cron_expression().ok_or_else(|| ConfigError::InvalidCron {
            expression: String::new(),
            reason: "cron expression is missing".into(),
        })?;
        let normalized = normalize_cron(cron)?;
        let timezone = timezone_of(node);
        if !timezone.eq_ignore_ascii_case("UTC") {
            tracing::warn!(
                workflow_id = %workflow.id,
                timezone = %timezone,
                "Non-UTC timezone is recorded but schedules run in UTC"
            );
        }

        self.unschedule(&workflow.id).await;
        self.schedules.write().await.insert(
            workflow.id.clone(),
            ScheduledTrigger {
                job_id: None,
                cron: normalized.clone(),
                timezone: timezone.clone(),
                state: TriggerState::Starting,
            },
        );

        let engine = Arc::clone(&self.engine);
        let workflow_id = workflow.id.clone();
        let workflow_name = workflow.name.clone();
        let schedule = normalized.clone();
        let job = Job::new_async(normalized.as_str(), move |_uuid, _l| {
            let engine = Arc::clone(&engine);
            let workflow_id = workflow_id.clone();
            let workflow_name = workflow_name.clone();
            let schedule = schedule.clone();
            Box::pin(async move {
                run_scheduled(&engine, &workflow_id, &workflow_name, &schedule).await;
            })
        });

        let added = match job {
            Ok(job) => self.scheduler.read().await.add(job).await,
            Err(e) => Err(e),
        };
        let job_id = match added {
            Ok(job_id) => job_id,
            Err(e) => {
                self.schedules.write().await.remove(&workflow.id);
                return Err(e.into());
            }
        };

        // Jobs added while the scheduler is stopped only fire after `start`.
        let running = self.is_running();
        if let Some(entry) = self.schedules.write().await.get_mut(&workflow.id) {
            entry.job_id = Some(job_id);
            if running {
                entry.state = TriggerState::Running;
            }
        }

        tracing::info!("⏰ Scheduled workflow {} ({}) with cron {}", workflow.id, workflow.name, normalized);
        Ok(())
    }

    /// Remove a workflow's timer; returns whether one existed.
    async fn unschedule(&self, workflow_id: &str) -> bool {
        let Some(entry) = self.schedules.write().await.remove(workflow_id) else {
            return false;
        };
        if let Some(job_id) = entry.job_id {
            if let Err(e) = self.scheduler.read().await.remove(&job_id).await {
                tracing::warn!("⚠️ Failed to remove job for workflow {}: {}", workflow_id, e);
            }
        }
        tracing::debug!("🛑 Timer stopped for workflow {}", workflow_id);
        true
    }
}

/// Body of a timer tick. Failures are logged and the timer keeps running.
pub async fn run_scheduled(engine: &WorkflowEngine, workflow_id: &str, workflow_name: &str, schedule: &str) {
    tracing::debug!("🔔 Schedule fired for workflow {}", workflow_id);
    let payload = schedule_payload(workflow_id, workflow_name, schedule);
    match engine.execute_workflow(workflow_id, payload, None).await {
        Ok(outcome) => tracing::info!(
            "✅ Scheduled workflow {} completed ({})",
            workflow_id,
            outcome.execution_id
        ),
        Err(e) => tracing::error!("❌ Scheduled workflow {} failed: {}", workflow_id, e),
    }
}

/// Trigger payload of a schedule tick.
pub fn schedule_payload(workflow_id: &str, workflow_name: &str, schedule: &str) -> Value {
    json!({
        "trigger": "schedule",
        "schedule": schedule,
        "triggeredAt": Utc::now().to_rfc3339(),
        "workflow": { "id": workflow_id, "name": workflow_name },
    })
}

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Validate a cron expression, accepting the 5-field form by pinning seconds to 0.
///
/// Five-field expressions use standard day-of-week numbering (0 or 7 is Sunday); their
/// numeric weekdays are rewritten as names before parsing.
pub fn normalize_cron(expression: &str) -> Result<String, ConfigError> {
    let trimmed = expression.trim();
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => format!(
            "0 {} {}",
            fields[..4].join(" "),
            weekday_names(fields[4]).ok_or_else(|| ConfigError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("invalid day-of-week field '{}'", fields[4]),
            })?
        ),
        6 | 7 => trimmed.to_string(),
        n => {
            return Err(ConfigError::InvalidCron {
                expression: expression.to_string(),
                reason: format!("expected 5 to 7 fields, found {}", n),
            })
        }
    };

    Schedule::from_str(&normalized).map_err(|e| ConfigError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;
    Ok(normalized)
}

/// Rewrite numeric weekdays (0-7, Sunday first) of a day-of-week field as names.
///
/// Numeric ranges are expanded into name lists so `5-7` never wraps; other tokens are kept.
fn weekday_names(field: &str) -> Option<String> {
    let number = |token: &str| -> Option<usize> {
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        token.parse().ok().filter(|day| *day < WEEKDAYS.len())
    };
    let is_numeric = |token: &str| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit());

    let mut items = Vec::new();
    for item in field.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        match range.split_once('-') {
            Some((from, to)) if is_numeric(from) && is_numeric(to) => {
                let (from, to) = (number(from)?, number(to)?);
                let step = match step {
                    Some(step) => step.parse::<usize>().ok().filter(|step| *step > 0)?,
                    None => 1,
                };
                if from > to {
                    return None;
                }
                for day in (from..=to).step_by(step) {
                    let name = WEEKDAYS[day].to_string();
                    if !items.contains(&name) {
                        items.push(name);
                    }
                }
            }
            _ if is_numeric(range) => {
                let name = WEEKDAYS[number(range)?];
                items.push(match step {
                    Some(step) => format!("{}/{}", name, step),
                    None => name.to_string(),
                });
            }
            _ => items.push(item.to_string()),
        }
    }
    Some(items.join(","))
}

/// Next fire time of a normalized expression.
pub fn next_run(normalized: &str) -> Option<DateTime<Utc>> {
    Schedule::from_str(normalized).ok()?.upcoming(Utc).next()
}

fn timezone_of(node: &Node) -> String {
    node.config
        .get("timezone")
        .and_then(Value::as_str)
        .unwrap_or("UTC")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BuiltinComponentRunner;
    use crate::storage::SqliteStorage;

    struct Harness {
        storage: Arc<SqliteStorage>,
        manager: TriggerManager,
    }

    async fn harness() -> Harness {
        let storage = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let engine = Arc::new(WorkflowEngine::new(
            storage.clone(),
            Arc::new(BuiltinComponentRunner::default()),
            Duration::from_secs(5),
        ));
        let webhooks = Arc::new(WebhookManager::new(storage.clone(), engine.clone(), "http://localhost"));
        let manager = TriggerManager::new(storage.clone(), engine, webhooks).await.unwrap();
        Harness { storage, manager }
    }

    async fn save_scheduled(storage: &SqliteStorage, id: &str, cron: &str) -> Workflow {
        let workflow: Workflow = serde_json::from_value(json!({
            "id": id, "name": format!("{} name", id), "owner_id": "user-1",
            "nodes": [
                { "node_id": "t", "node_type": "trigger", "component_key": "schedule-trigger",
                  "config": { "cron": cron } },
                { "node_id": "a", "node_type": "action", "component_key": "echo",
                  "config": { "when": "{{trigger.triggeredAt}}" } }
            ],
            "connections": [{ "from_node_id": "t", "to_node_id": "a" }]
        }))
        .unwrap();
        storage.save_workflow(&workflow).await.unwrap();
        workflow
    }

    #[test]
    fn cron_expressions_are_normalized_and_validated() {
        assert_eq!(normalize_cron("*/5 * * * *").unwrap(), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 0 9 * * Mon").unwrap(), "0 0 9 * * Mon");
        assert!(matches!(normalize_cron("every day"), Err(ConfigError::InvalidCron { .. })));
        assert!(normalize_cron("61 * * * *").is_err());
        assert!(next_run("0 0 * * * *").unwrap() > Utc::now());
    }

    #[test]
    fn five_field_weekdays_count_from_sunday() {
        use chrono::{Datelike, Weekday};

        let monday = normalize_cron("0 9 * * 1").unwrap();
        assert_eq!(monday, "0 0 9 * * Mon");
        assert_eq!(next_run(&monday).unwrap().weekday(), Weekday::Mon);

        let sunday = normalize_cron("0 9 * * 0").unwrap();
        assert_eq!(next_run(&sunday).unwrap().weekday(), Weekday::Sun);
        assert_eq!(normalize_cron("0 9 * * 7").unwrap(), "0 0 9 * * Sun");

        assert_eq!(normalize_cron("30 8 * * 1-5").unwrap(), "0 30 8 * * Mon,Tue,Wed,Thu,Fri");
        assert_eq!(normalize_cron("0 8 * * 5-7").unwrap(), "0 0 8 * * Fri,Sat,Sun");
        assert_eq!(normalize_cron("0 8 * * 0,6").unwrap(), "0 0 8 * * Sun,Sat");
        assert_eq!(normalize_cron("0 8 * * Mon-Fri").unwrap(), "0 0 8 * * Mon-Fri");
        assert!(normalize_cron("0 8 * * 8").is_err());
    }

    #[test]
    fn trigger_config_from_parts() {
        assert_eq!(
            TriggerConfig::from_parts("webhook", &json!({ "method": "PUT", "useSecret": true })).unwrap(),
            TriggerConfig::Webhook {
                method: Some("PUT".into()),
                use_secret: true
            }
        );
        assert!(matches!(
            TriggerConfig::from_parts("email", &json!({})),
            Err(ConfigError::UnsupportedTriggerType(t)) if t == "email"
        ));
        assert!(TriggerConfig::from_parts("schedule", &json!({})).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_after_cron_change_leaves_one_timer() {
        let h = harness().await;
        save_scheduled(&h.storage, "wf", "0 0 * * * *").await;
        save_scheduled(&h.storage, "broken", "not a cron").await;

        h.manager.start().await.unwrap();
        let before = h.manager.scheduled().await;
        assert_eq!(before.len(), 1);
        assert_eq!(before["wf"].state, TriggerState::Running);
        let old_job = before["wf"].job_id;

        let created = h
            .manager
            .create_trigger(
                "wf",
                TriggerConfig::Schedule {
                    cron: "*/30 * * * *".into(),
                    timezone: None,
                },
            )
            .await
            .unwrap();
        assert!(matches!(created, CreatedTrigger::Schedule { ref schedule, .. } if schedule.next_run.is_some()));

        h.manager.restart_workflow_trigger("wf").await.unwrap();

        let after = h.manager.scheduled().await;
        assert_eq!(after.len(), 1);
        assert_eq!(after["wf"].cron, "0 */30 * * * *");
        assert_ne!(after["wf"].job_id, old_job);

        let stored = h.storage.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.trigger_nodes().count(), 1);
        assert_eq!(stored.connections[0].from_node_id, stored.nodes[0].node_id);

        h.manager.stop().await.unwrap();
        assert!(h.manager.scheduled().await.is_empty());
        assert!(!h.manager.is_running());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalid_cron_is_rejected_before_persisting() {
        let h = harness().await;
        save_scheduled(&h.storage, "wf", "0 0 * * * *").await;

        let err = h
            .manager
            .create_trigger(
                "wf",
                TriggerConfig::Schedule {
                    cron: "bogus".into(),
                    timezone: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriggerError::Config(ConfigError::InvalidCron { .. })));

        let stored = h.storage.get_workflow("wf").await.unwrap().unwrap();
        assert_eq!(stored.nodes[0].cron_expression(), Some("0 0 * * * *"));

        let missing = h
            .manager
            .create_trigger("ghost", TriggerConfig::Webhook { method: None, use_secret: false })
            .await
            .unwrap_err();
        assert!(matches!(missing, TriggerError::WorkflowNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn switching_to_webhook_stops_the_timer() {
        let h = harness().await;
        save_scheduled(&h.storage, "wf", "0 0 * * * *").await;
        h.manager.start().await.unwrap();

        let created = h
            .manager
            .create_trigger(
                "wf",
                TriggerConfig::Webhook {
                    method: Some("post".into()),
                    use_secret: true,
                },
            )
            .await
            .unwrap();
        let CreatedTrigger::Webhook { webhook, node } = created else {
            panic!("expected webhook trigger");
        };
        assert_eq!(node.component_key.as_deref(), Some(WEBHOOK_TRIGGER));
        assert!(webhook.secret_token.is_some());
        assert!(h.manager.scheduled().await.is_empty());
        assert!(h.manager.webhooks().cached(&webhook.path).is_some());

        let stats = h.manager.trigger_stats("wf").await.unwrap();
        assert_eq!(stats.webhooks.len(), 1);
        assert!(stats.schedules.is_empty());
        assert_eq!((stats.total_triggers, stats.active_triggers), (1, 1));

        h.manager.remove_workflow("wf").await.unwrap();
        assert!(h.manager.webhooks().cached(&webhook.path).is_none());
        h.manager.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cleanup_stops_inactive_and_removes_orphans() {
        let h = harness().await;
        let mut workflow = save_scheduled(&h.storage, "wf", "0 0 * * * *").await;
        save_scheduled(&h.storage, "gone", "0 0 * * * *").await;
        h.manager.start().await.unwrap();
        h.manager
            .webhooks()
            .create_webhook("gone", None, false)
            .await
            .unwrap();
        assert_eq!(h.manager.scheduled().await.len(), 2);

        let stats = h.manager.trigger_stats("wf").await.unwrap();
        assert!(stats.schedules[0].is_running);
        assert!(stats.schedules[0].next_run.is_some());

        workflow.is_active = false;
        h.storage.save_workflow(&workflow).await.unwrap();
        h.storage.delete_workflow("gone").await.unwrap();

        let report = h.manager.cleanup_inactive_triggers().await.unwrap();
        assert_eq!(report.timers_stopped, 2);
        assert_eq!(report.orphan_webhooks_removed, 1);
        assert!(h.manager.scheduled().await.is_empty());
        assert_eq!(h.manager.webhooks().cached_count(), 0);
        h.manager.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timers_created_while_stopped_are_not_reported_running() {
        let h = harness().await;
        save_scheduled(&h.storage, "wf", "0 0 * * * *").await;

        h.manager.restart_workflow_trigger("wf").await.unwrap();
        let pending = h.manager.scheduled().await;
        assert_eq!(pending["wf"].state, TriggerState::Starting);
        assert!(pending["wf"].job_id.is_some());
        let stats = h.manager.trigger_stats("wf").await.unwrap();
        assert!(!stats.schedules[0].is_running);
        assert_eq!(stats.active_triggers, 0);

        h.manager.start().await.unwrap();
        assert_eq!(h.manager.scheduled().await["wf"].state, TriggerState::Running);

        h.manager.stop().await.unwrap();
        h.manager.restart_workflow_trigger("wf").await.unwrap();
        assert_eq!(h.manager.scheduled().await["wf"].state, TriggerState::Starting);
        assert!(!h.manager.trigger_stats("wf").await.unwrap().schedules[0].is_running);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_ends_the_periodic_cleanup_task() {
        let h = harness().await;
        let manager = Arc::new(h.manager);
        manager.start().await.unwrap();

        manager.spawn_cleanup(Duration::from_secs(3600)).await;
        assert!(manager.has_cleanup_task().await);

        manager.stop().await.unwrap();
        assert!(!manager.has_cleanup_task().await);
        assert_eq!(Arc::strong_count(&manager), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduled_tick_and_manual_test_execute_the_workflow() {
        let h = harness().await;
        save_scheduled(&h.storage, "wf", "0 0 * * * *").await;

        let payload = schedule_payload("wf", "wf name", "0 0 * * * *");
        assert_eq!(payload["trigger"], json!("schedule"));
        assert_eq!(payload["workflow"], json!({ "id": "wf", "name": "wf name" }));

        let engine = WorkflowEngine::new(
            h.storage.clone(),
            Arc::new(BuiltinComponentRunner::default()),
            Duration::from_secs(5),
        );
        run_scheduled(&engine, "wf", "wf name", "0 0 * * * *").await;
        assert_eq!(h.storage.execution_summary("wf").await.unwrap().succeeded, 1);

        let tested = h.manager.test_trigger("wf", None).await.unwrap();
        assert!(tested.success);
        assert_eq!(tested.trigger_data["trigger"], json!("manual"));
        assert_eq!(h.storage.execution_summary("wf").await.unwrap().succeeded, 2);
    }
}
