//! Runtime Execution Engine
//!
//! This module walks workflow DAGs and provides everything a walk needs:
//! - Condition evaluation over the per-execution context
//! - Template resolution, timeouts, retries and redaction helpers
//! - The component runner seam used by action nodes
//! - Non-fatal audit writes

// Condition Evaluator (pure functions)
pub mod conditions;

// Per-execution context and dotted path resolution
pub mod context;

// Node Executor support library
pub mod support;

// Component runner trait and the built-in components
pub mod runner;

// Audit sink for execution and node-context rows
pub mod audit;

// DAG executor
pub mod engine;

// Re-export main types
pub use engine::{ExecutionOutcome, WorkflowEngine};
pub use runner::{BuiltinComponentRunner, ComponentRunner};
