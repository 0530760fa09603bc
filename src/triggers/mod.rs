//! Trigger subsystem
//!
//! Cron timers and webhook endpoints that start workflow executions.

// Webhook path cache, dispatch and endpoint management
pub mod webhooks;

// Cron timer registry and trigger lifecycle
pub mod manager;

pub use manager::{CreatedTrigger, TriggerConfig, TriggerManager, TriggerState};
pub use webhooks::{WebhookError, WebhookManager, WebhookRequest};
