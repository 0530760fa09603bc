//! Core workflow type definitions
//!
//! Workflows are stored as JSON documents and turned into petgraph DAGs for execution.
//! Field names accept both snake_case and the camelCase spelling produced by editors.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Component key of a trigger node fired by the cron scheduler.
pub const SCHEDULE_TRIGGER: &str = "schedule-trigger";
/// Component key of a trigger node fired by an inbound webhook call.
pub const WEBHOOK_TRIGGER: &str = "webhook-trigger";
/// Component key of a trigger node only started by hand (and by converted legacy workflows).
pub const MANUAL_TRIGGER: &str = "manual-trigger";

/// A complete workflow definition
///
/// Workflows saved before the graph editor existed carry a single `action_key` +
/// `action_props` pair and no nodes; see [`Workflow::into_graph_form`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// User the workflow runs as when the stimulus carries no user
    #[serde(default, alias = "ownerId", alias = "user_id")]
    pub owner_id: Option<String>,
    /// Inactive workflows keep their definition but start no timers
    #[serde(default = "default_active", alias = "isActive")]
    pub is_active: bool,
    /// Graph nodes, exactly one of which is the trigger
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Directed edges between nodes
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Workflow-level variables, addressable as `variables.<name>`
    #[serde(default)]
    pub variables: Map<String, Value>,
    /// Legacy single-action shape
    #[serde(default, alias = "actionKey", skip_serializing_if = "Option::is_none")]
    pub action_key: Option<String>,
    #[serde(default, alias = "actionProps", skip_serializing_if = "Option::is_none")]
    pub action_props: Option<Value>,
    #[serde(default, alias = "triggerConfig", skip_serializing_if = "Option::is_none")]
    pub trigger_config: Option<Value>,
}

fn default_active() -> bool {
    true
}

/// A single node in the workflow DAG
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within its workflow only
    #[serde(alias = "nodeId")]
    pub node_id: String,
    #[serde(alias = "nodeType")]
    pub node_type: NodeKind,
    /// External operation invoked by action nodes; trigger kind for trigger nodes
    #[serde(default, alias = "componentKey")]
    pub component_key: Option<String>,
    /// Free-form configuration, may contain `{{source.path}}` placeholders
    #[serde(default)]
    pub config: Value,
}

/// The closed set of node behaviours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Entry point; passes the trigger payload through
    Trigger,
    /// Evaluates a condition list and exposes `conditionResult`
    Condition,
    /// Runs an external component with the resolved config
    Action,
    /// Collects every result recorded so far
    Merge,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Trigger => "trigger",
            NodeKind::Condition => "condition",
            NodeKind::Action => "action",
            NodeKind::Merge => "merge",
        }
    }
}

/// How a trigger node is started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Schedule,
    Webhook,
    Manual,
}

impl Node {
    /// Trigger kind derived from the component key; `None` for non-trigger nodes.
    pub fn trigger_kind(&self) -> Option<TriggerKind> {
        if self.node_type != NodeKind::Trigger {
            return None;
        }
        Some(match self.component_key.as_deref() {
            Some(SCHEDULE_TRIGGER) => TriggerKind::Schedule,
            Some(WEBHOOK_TRIGGER) => TriggerKind::Webhook,
            _ => TriggerKind::Manual,
        })
    }

    /// Cron expression of a schedule trigger (`cron`, falling back to `schedule`).
    pub fn cron_expression(&self) -> Option<&str> {
        self.config
            .get("cron")
            .or_else(|| self.config.get("schedule"))
            .and_then(Value::as_str)
    }
}

/// Directed edge `from_node_id -> to_node_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(alias = "fromNodeId")]
    pub from_node_id: String,
    #[serde(alias = "toNodeId")]
    pub to_node_id: String,
    #[serde(default, alias = "conditionType")]
    pub condition_type: ConnectionCondition,
    /// Only read for `custom` connections
    #[serde(default, alias = "conditionConfig", skip_serializing_if = "Option::is_none")]
    pub condition_config: Option<ConditionGroup>,
}

/// Gate evaluated on a connection before its target runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionCondition {
    #[default]
    Always,
    True,
    False,
    Custom,
}

/// A list of conditions combined with one logic operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionGroup {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub logic: Logic,
}

impl ConditionGroup {
    /// Parse a condition node's config. The `conditions` key must hold an array.
    pub fn from_node_config(node_id: &str, config: &Value) -> Result<Self, ConfigError> {
        match config.get("conditions") {
            Some(Value::Array(_)) => serde_json::from_value(config.clone())
                .map_err(|_| ConfigError::InvalidConditions(node_id.to_string())),
            _ => Err(ConfigError::InvalidConditions(node_id.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Logic {
    #[default]
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

/// One comparison of a context field against a value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dotted path such as `trigger.body.email` or `nodes.calc.total`
    #[serde(default)]
    pub field: String,
    /// Operator name, e.g. `equals` or `is_email`
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, alias = "fieldType")]
    pub field_type: FieldType,
}

/// Coercion applied to both operands before comparing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    Auto,
    Number,
    Boolean,
    String,
    Array,
}

impl Workflow {
    /// True for records in the pre-graph single-action shape.
    pub fn is_legacy(&self) -> bool {
        self.nodes.is_empty() && self.action_key.is_some()
    }

    /// Synthesize the two-node graph for legacy records; graph workflows are returned as is.
    pub fn into_graph_form(mut self) -> Self {
        if !self.is_legacy() {
            return self;
        }

        let trigger_id = "trigger_1".to_string();
        let action_id = "action_1".to_string();

        self.nodes = vec![
            Node {
                node_id: trigger_id.clone(),
                node_type: NodeKind::Trigger,
                component_key: Some(MANUAL_TRIGGER.to_string()),
                config: self.trigger_config.take().unwrap_or_else(|| Value::Object(Map::new())),
            },
            Node {
                node_id: action_id.clone(),
                node_type: NodeKind::Action,
                component_key: self.action_key.take(),
                config: self.action_props.take().unwrap_or_else(|| Value::Object(Map::new())),
            },
        ];
        self.connections = vec![Connection {
            from_node_id: trigger_id,
            to_node_id: action_id,
            condition_type: ConnectionCondition::Always,
            condition_config: None,
        }];
        self
    }

    /// All trigger nodes; a valid graph has exactly one.
    pub fn trigger_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.node_type == NodeKind::Trigger)
    }

    /// The first trigger node, used by the trigger subsystem to derive the trigger kind.
    pub fn trigger_node(&self) -> Option<&Node> {
        self.trigger_nodes().next()
    }

    /// Replace the trigger node in place or add one, keeping a single trigger per workflow.
    pub fn set_trigger(&mut self, trigger: Node) -> &Node {
        match self.nodes.iter().position(|node| node.node_type == NodeKind::Trigger) {
            Some(position) => {
                let old_id = std::mem::replace(&mut self.nodes[position].node_id, trigger.node_id.clone());
                for connection in &mut self.connections {
                    if connection.from_node_id == old_id {
                        connection.from_node_id = trigger.node_id.clone();
                    }
                }
                self.nodes[position] = trigger;
                &self.nodes[position]
            }
            None => {
                self.nodes.insert(0, trigger);
                &self.nodes[0]
            }
        }
    }
}
