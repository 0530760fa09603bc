//! Workflow Management Layer
//!
//! Type definitions for workflows (nodes, connections, conditions, the legacy single-action
//! shape) and the petgraph view the engine walks.

// Core workflow type definitions
pub mod types;

// Validated DAG built from a workflow definition
pub mod graph;

pub use graph::WorkflowGraph;
pub use types::{
    Condition, ConditionGroup, Connection, ConnectionCondition, FieldType, Logic, Node, NodeKind,
    TriggerKind, Workflow,
};
