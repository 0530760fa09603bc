//! Petgraph view of a workflow
//!
//! Validates the structural invariants the engine relies on (unique node ids, exactly one
//! trigger, no cycles) and answers "which connections leave this node" during the walk.

use crate::error::ConfigError;
use crate::workflow::types::{Connection, Node, NodeKind, Workflow};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::HashMap;

/// A validated workflow DAG
#[derive(Debug)]
pub struct WorkflowGraph {
    graph: DiGraph<Node, Connection>,
    node_id_to_index: HashMap<String, NodeIndex>,
    trigger: NodeIndex,
}

impl WorkflowGraph {
    /// Build and validate the graph of a workflow already in graph form.
    pub fn build(workflow: &Workflow) -> Result<Self, ConfigError> {
        tracing::debug!(
            workflow_id = %workflow.id,
            nodes = workflow.nodes.len(),
            connections = workflow.connections.len(),
            "Building workflow graph"
        );

        let mut graph = DiGraph::new();
        let mut node_id_to_index = HashMap::new();

        for node in &workflow.nodes {
            if node_id_to_index.contains_key(&node.node_id) {
                return Err(ConfigError::DuplicateNodeId(node.node_id.clone()));
            }
            let index = graph.add_node(node.clone());
            node_id_to_index.insert(node.node_id.clone(), index);
        }

        for connection in &workflow.connections {
            let from = node_id_to_index.get(&connection.from_node_id);
            let to = node_id_to_index.get(&connection.to_node_id);
            match (from, to) {
                (Some(&from), Some(&to)) => {
                    graph.add_edge(from, to, connection.clone());
                }
                _ => tracing::warn!(
                    workflow_id = %workflow.id,
                    from = %connection.from_node_id,
                    to = %connection.to_node_id,
                    "Connection references an unknown node, ignoring it"
                ),
            }
        }

        let triggers: Vec<NodeIndex> = graph
            .node_indices()
            .filter(|&index| graph[index].node_type == NodeKind::Trigger)
            .collect();
        let trigger = match triggers.as_slice() {
            [] => return Err(ConfigError::MissingTrigger(workflow.id.clone())),
            [only] => *only,
            many => {
                return Err(ConfigError::DuplicateTrigger {
                    workflow_id: workflow.id.clone(),
                    count: many.len(),
                })
            }
        };

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(ConfigError::CycleDetected);
        }

        Ok(Self {
            graph,
            node_id_to_index,
            trigger,
        })
    }

    /// The unique entry node.
    pub fn trigger(&self) -> &Node {
        &self.graph[self.trigger]
    }

    /// Outgoing connections of a node with their target, in authoring order.
    pub fn outgoing(&self, node_id: &str) -> Vec<(&Connection, &Node)> {
        let Some(&index) = self.node_id_to_index.get(node_id) else {
            return Vec::new();
        };

        let mut edges: Vec<_> = self.graph.edges_directed(index, Direction::Outgoing).collect();
        edges.sort_by_key(|edge| edge.id());
        edges
            .into_iter()
            .map(|edge| (edge.weight(), &self.graph[edge.target()]))
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow(value: serde_json::Value) -> Workflow {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn fan_out_edges_keep_authoring_order() {
        let wf = workflow(json!({
            "id": "wf", "name": "fan",
            "nodes": [
                { "node_id": "t", "node_type": "trigger" },
                { "node_id": "a", "node_type": "action", "component_key": "echo" },
                { "node_id": "b", "node_type": "action", "component_key": "echo" },
                { "node_id": "c", "node_type": "action", "component_key": "echo" }
            ],
            "connections": [
                { "from_node_id": "t", "to_node_id": "a" },
                { "from_node_id": "t", "to_node_id": "b" },
                { "from_node_id": "t", "to_node_id": "c" }
            ]
        }));

        let graph = WorkflowGraph::build(&wf).unwrap();
        let targets: Vec<&str> = graph
            .outgoing("t")
            .iter()
            .map(|(_, node)| node.node_id.as_str())
            .collect();

        assert_eq!(graph.trigger().node_id, "t");
        assert_eq!(targets, vec!["a", "b", "c"]);
        assert!(graph.outgoing("c").is_empty());
    }

    #[test]
    fn missing_and_duplicate_triggers_are_rejected() {
        let none = workflow(json!({
            "id": "wf-none", "name": "n",
            "nodes": [{ "node_id": "a", "node_type": "action" }]
        }));
        assert!(matches!(
            WorkflowGraph::build(&none),
            Err(ConfigError::MissingTrigger(id)) if id == "wf-none"
        ));

        let two = workflow(json!({
            "id": "wf-two", "name": "n",
            "nodes": [
                { "node_id": "t1", "node_type": "trigger" },
                { "node_id": "t2", "node_type": "trigger" }
            ]
        }));
        assert!(matches!(
            WorkflowGraph::build(&two),
            Err(ConfigError::DuplicateTrigger { count: 2, .. })
        ));
    }

    #[test]
    fn cycles_and_duplicate_ids_are_rejected() {
        let cyclic = workflow(json!({
            "id": "wf", "name": "n",
            "nodes": [
                { "node_id": "t", "node_type": "trigger" },
                { "node_id": "a", "node_type": "action" },
                { "node_id": "b", "node_type": "action" }
            ],
            "connections": [
                { "from_node_id": "t", "to_node_id": "a" },
                { "from_node_id": "a", "to_node_id": "b" },
                { "from_node_id": "b", "to_node_id": "a" }
            ]
        }));
        assert!(matches!(WorkflowGraph::build(&cyclic), Err(ConfigError::CycleDetected)));

        let duplicated = workflow(json!({
            "id": "wf", "name": "n",
            "nodes": [
                { "node_id": "t", "node_type": "trigger" },
                { "node_id": "t", "node_type": "action" }
            ]
        }));
        assert!(matches!(
            WorkflowGraph::build(&duplicated),
            Err(ConfigError::DuplicateNodeId(id)) if id == "t"
        ));
    }

    #[test]
    fn dangling_connections_are_skipped() {
        let wf = workflow(json!({
            "id": "wf", "name": "n",
            "nodes": [{ "node_id": "t", "node_type": "trigger" }],
            "connections": [{ "from_node_id": "t", "to_node_id": "ghost" }]
        }));

        let graph = WorkflowGraph::build(&wf).unwrap();
        assert!(graph.outgoing("t").is_empty());
        assert_eq!(graph.node_count(), 1);
    }
}
