/// relayflow: workflow automation core
///
/// DAG execution of trigger, condition, action and merge nodes, with cron timers and
/// webhook endpoints as the external stimuli that start executions.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Workflow definitions and the validated DAG view
pub mod workflow;

// Persistence trait and the SQLite implementation
pub mod storage;

// Runtime execution engine - conditions, templating, components, DAG walk
pub mod runtime;

// Cron timers and webhook endpoints
pub mod triggers;

// HTTP API layer - workflow management, triggers and inbound webhooks
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use runtime::{ComponentRunner, ExecutionOutcome, WorkflowEngine};
pub use server::start_server;
pub use storage::{SqliteStorage, Storage};
pub use triggers::{TriggerManager, WebhookManager};
pub use workflow::{Connection, Node, NodeKind, Workflow};
