//! Workflow graph implementation using petgraph.
//!
//! Workflows are directed acyclic graphs where:
//! - Nodes are typed steps (trigger, condition, action, agent transform, output)
//! - Edges connect a step to its successor; Condition edges carry `yes`/`no`
//!
//! The graph serializes as a flat list of nodes and `{source, target, label}`
//! edge records so definitions can be authored as structured data.

use crate::edge::{BranchLabel, Edge};
use crate::error::ValidationError;
use crate::expression::{Expression, check_template};
use crate::node::{ActionConfig, Node, NodeConfig, NodeId, NodeKind};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "GraphRecord", into = "GraphRecord")]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
}

impl WorkflowGraph {
    /// Creates a new empty workflow graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index_map: HashMap::new(),
        }
    }

    /// Adds a node to the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a node with the same ID already exists.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId, ValidationError> {
        let node_id = node.id.clone();
        if self.node_index_map.contains_key(&node_id) {
            return Err(ValidationError::DuplicateNode { node_id });
        }
        let index = self.graph.add_node(node);
        self.node_index_map.insert(node_id.clone(), index);
        Ok(node_id)
    }

    /// Adds an edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is not in the graph.
    pub fn add_edge(
        &mut self,
        source_id: &NodeId,
        target_id: &NodeId,
        edge: Edge,
    ) -> Result<(), ValidationError> {
        let source_index = self.index_of(source_id)?;
        let target_index = self.index_of(target_id)?;
        self.graph.add_edge(source_index, target_index, edge);
        Ok(())
    }

    /// Adds an unlabeled edge between two nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if either endpoint is not in the graph.
    pub fn connect(
        &mut self,
        source_id: impl Into<NodeId>,
        target_id: impl Into<NodeId>,
    ) -> Result<(), ValidationError> {
        self.add_edge(&source_id.into(), &target_id.into(), Edge::new())
    }

    fn index_of(&self, node_id: &NodeId) -> Result<NodeIndex, ValidationError> {
        self.node_index_map
            .get(node_id)
            .copied()
            .ok_or_else(|| ValidationError::NodeNotFound {
                node_id: node_id.clone(),
            })
    }

    /// Returns a reference to a node by its ID.
    #[must_use]
    pub fn get_node(&self, node_id: &NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns all trigger nodes.
    pub fn trigger_nodes(&self) -> Vec<&Node> {
        self.nodes()
            .filter(|node| node.kind() == NodeKind::Trigger)
            .collect()
    }

    /// Returns the single trigger node, if there is exactly one.
    #[must_use]
    pub fn trigger_node(&self) -> Option<&Node> {
        match self.trigger_nodes().as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// Returns the successors (downstream nodes) of a given node.
    pub fn successors(&self, node_id: &NodeId) -> Vec<(&Node, &Edge)> {
        let Some(&index) = self.node_index_map.get(node_id) else {
            return Vec::new();
        };

        let mut successors: Vec<_> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .filter_map(|edge| {
                let target = self.graph.node_weight(edge.target())?;
                Some((edge.id(), target, edge.weight()))
            })
            .collect();
        // petgraph yields outgoing edges newest first
        successors.sort_by_key(|(edge_id, _, _)| *edge_id);
        successors
            .into_iter()
            .map(|(_, node, edge)| (node, edge))
            .collect()
    }

    /// Returns the single successor of a non-branching node.
    #[must_use]
    pub fn next_node(&self, node_id: &NodeId) -> Option<&Node> {
        match self.successors(node_id).as_slice() {
            [(next, _)] => Some(*next),
            _ => None,
        }
    }

    /// Returns the target of a Condition node's labeled edge.
    #[must_use]
    pub fn branch_target(&self, node_id: &NodeId, label: BranchLabel) -> Option<&Node> {
        self.successors(node_id)
            .into_iter()
            .find(|(_, edge)| edge.label == Some(label))
            .map(|(node, _)| node)
    }

    /// Returns the first node after the trigger.
    #[must_use]
    pub fn entry_node(&self) -> Option<&Node> {
        let trigger = self.trigger_node()?;
        self.next_node(&trigger.id)
    }

    /// Validates the workflow graph.
    ///
    /// Checks:
    /// - Exactly one trigger node
    /// - Outbound edge cardinality per node kind, and `{yes, no}` labels on
    ///   Condition nodes only
    /// - Condition expressions parse
    /// - No cycles (topological sort)
    /// - Every node is reachable from the trigger
    ///
    /// # Errors
    ///
    /// Returns the first violation found, naming the offending node or edge.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let triggers = self.trigger_nodes();
        let trigger = match triggers.as_slice() {
            [] => return Err(ValidationError::MissingTrigger),
            [only] => *only,
            many => {
                let mut node_ids: Vec<NodeId> = many.iter().map(|n| n.id.clone()).collect();
                node_ids.sort();
                return Err(ValidationError::MultipleTriggers { node_ids });
            }
        };

        for node in self.nodes() {
            self.validate_outbound(node)?;
        }

        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let node_id = self.graph[cycle.node_id()].id.clone();
            return Err(ValidationError::CycleDetected { node_id });
        }

        let trigger_index = self.index_of(&trigger.id)?;
        let mut reached = vec![false; self.graph.node_count()];
        let mut bfs = Bfs::new(&self.graph, trigger_index);
        while let Some(index) = bfs.next(&self.graph) {
            reached[index.index()] = true;
        }
        if let Some(index) = self.graph.node_indices().find(|i| !reached[i.index()]) {
            return Err(ValidationError::UnreachableNode {
                node_id: self.graph[index].id.clone(),
            });
        }

        Ok(())
    }

    fn validate_outbound(&self, node: &Node) -> Result<(), ValidationError> {
        let outbound = self.successors(&node.id);
        let kind = node.kind();

        if kind != NodeKind::Condition {
            if let Some((target, label)) = outbound
                .iter()
                .find_map(|(target, edge)| edge.label.map(|label| (target, label)))
            {
                return Err(ValidationError::UnexpectedLabel {
                    source: node.id.clone(),
                    target: target.id.clone(),
                    label,
                });
            }
        }

        let (expected, allowed) = match kind {
            NodeKind::Trigger => ("exactly 1", outbound.len() == 1),
            NodeKind::Condition => ("exactly 2", outbound.len() == 2),
            NodeKind::Action | NodeKind::AgentTransform => ("at most 1", outbound.len() <= 1),
            NodeKind::Output => ("0", outbound.is_empty()),
        };
        if !allowed {
            return Err(ValidationError::InvalidOutDegree {
                node_id: node.id.clone(),
                kind,
                expected,
                actual: outbound.len(),
            });
        }

        if let NodeConfig::Condition(condition) = &node.config {
            let labels: Vec<Option<BranchLabel>> = outbound.iter().map(|(_, e)| e.label).collect();
            let has_yes = labels.contains(&Some(BranchLabel::Yes));
            let has_no = labels.contains(&Some(BranchLabel::No));
            if !(has_yes && has_no) {
                let found: Vec<String> = labels
                    .iter()
                    .map(|label| label.map_or_else(|| "unlabeled".to_string(), |l| l.to_string()))
                    .collect();
                return Err(ValidationError::InvalidBranchLabels {
                    node_id: node.id.clone(),
                    reason: format!("expected {{yes, no}}, found {{{}}}", found.join(", ")),
                });
            }

            Expression::parse(&condition.expression).map_err(|e| {
                ValidationError::InvalidExpression {
                    node_id: node.id.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let NodeConfig::Action(ActionConfig::Notify {
            recipient, message, ..
        }) = &node.config
        {
            for template in [recipient, message] {
                check_template(template).map_err(|e| ValidationError::InvalidTemplate {
                    node_id: node.id.clone(),
                    reason: e.reason,
                })?;
            }
        }

        Ok(())
    }

    /// Returns the nodes after the trigger in walk order, for graphs
    /// without branches.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk meets a Condition node.
    pub fn linear_path(&self) -> Result<Vec<&Node>, ValidationError> {
        let mut path = Vec::new();
        let mut current = self.entry_node();
        while let Some(node) = current {
            if node.kind() == NodeKind::Condition {
                return Err(ValidationError::NonLinearCase {
                    node_id: node.id.clone(),
                });
            }
            path.push(node);
            current = self.next_node(&node.id);
        }
        Ok(path)
    }
}

impl Default for WorkflowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialized shape of an edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRecord {
    source: NodeId,
    target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<BranchLabel>,
}

/// Serialized shape of a graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphRecord {
    #[serde(default)]
    nodes: Vec<Node>,
    #[serde(default)]
    edges: Vec<EdgeRecord>,
}

impl TryFrom<GraphRecord> for WorkflowGraph {
    type Error = ValidationError;

    fn try_from(record: GraphRecord) -> Result<Self, Self::Error> {
        let mut graph = Self::new();
        for node in record.nodes {
            graph.add_node(node)?;
        }
        for edge in record.edges {
            graph.add_edge(&edge.source, &edge.target, Edge { label: edge.label })?;
        }
        Ok(graph)
    }
}

impl From<WorkflowGraph> for GraphRecord {
    fn from(workflow: WorkflowGraph) -> Self {
        let graph = &workflow.graph;
        let edges = graph
            .edge_references()
            .map(|e| EdgeRecord {
                source: graph[e.source()].id.clone(),
                target: graph[e.target()].id.clone(),
                label: e.weight().label,
            })
            .collect();
        Self {
            nodes: graph.node_weights().cloned().collect(),
            edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TriggerKind;
    use crate::notify::Channel;
    use serde_json::json;

    fn manual_trigger() -> Node {
        Node::trigger("start", "Start", TriggerKind::Manual)
    }

    /// Trigger -> Condition("amount>1000") -> {yes: Action(alert), no: Output(report)}
    fn claims_graph() -> WorkflowGraph {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph
            .add_node(Node::condition("check", "High Cost?", "amount>1000"))
            .unwrap();
        graph
            .add_node(Node::action("alert", "Alert Reviewer", "alert"))
            .unwrap();
        graph.add_node(Node::output("report", "Generate Report")).unwrap();
        graph.connect("start", "check").unwrap();
        graph
            .add_edge(&"check".into(), &"alert".into(), Edge::yes())
            .unwrap();
        graph
            .add_edge(&"check".into(), &"report".into(), Edge::no())
            .unwrap();
        graph
    }

    #[test]
    fn valid_branching_graph() {
        let graph = claims_graph();
        assert!(graph.validate().is_ok());
        assert_eq!(graph.entry_node().unwrap().id, NodeId::new("check"));
        assert_eq!(
            graph
                .branch_target(&"check".into(), BranchLabel::No)
                .unwrap()
                .id,
            NodeId::new("report")
        );
    }

    #[test]
    fn duplicate_node_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        let err = graph.add_node(manual_trigger()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateNode {
                node_id: "start".into()
            }
        );
    }

    #[test]
    fn edge_to_missing_node_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        assert!(matches!(
            graph.connect("start", "ghost"),
            Err(ValidationError::NodeNotFound { .. })
        ));
    }

    #[test]
    fn missing_and_multiple_triggers() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(Node::output("out", "Out")).unwrap();
        assert_eq!(graph.validate(), Err(ValidationError::MissingTrigger));

        graph.add_node(manual_trigger()).unwrap();
        graph
            .add_node(Node::trigger("second", "Second", TriggerKind::Manual))
            .unwrap();
        assert!(matches!(
            graph.validate(),
            Err(ValidationError::MultipleTriggers { node_ids }) if node_ids.len() == 2
        ));
    }

    #[test]
    fn cycle_detected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::action("a", "A", "h")).unwrap();
        graph.add_node(Node::agent("b", "B", "agent")).unwrap();
        graph.connect("start", "a").unwrap();
        graph.connect("a", "b").unwrap();
        graph.connect("b", "a").unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::CycleDetected { .. })
        ));
    }

    #[test]
    fn unreachable_node_named() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::output("out", "Out")).unwrap();
        graph.add_node(Node::output("orphan", "Orphan")).unwrap();
        graph.connect("start", "out").unwrap();

        assert_eq!(
            graph.validate(),
            Err(ValidationError::UnreachableNode {
                node_id: "orphan".into()
            })
        );
    }

    #[test]
    fn condition_needs_yes_and_no() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::condition("check", "Check", "x == 1")).unwrap();
        graph.add_node(Node::output("a", "A")).unwrap();
        graph.add_node(Node::output("b", "B")).unwrap();
        graph.connect("start", "check").unwrap();
        graph.add_edge(&"check".into(), &"a".into(), Edge::yes()).unwrap();
        graph.add_edge(&"check".into(), &"b".into(), Edge::yes()).unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidBranchLabels { node_id, .. }) if node_id.as_str() == "check"
        ));
    }

    #[test]
    fn condition_with_one_edge_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::condition("check", "Check", "x == 1")).unwrap();
        graph.add_node(Node::output("a", "A")).unwrap();
        graph.connect("start", "check").unwrap();
        graph.add_edge(&"check".into(), &"a".into(), Edge::yes()).unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidOutDegree { actual: 1, .. })
        ));
    }

    #[test]
    fn malformed_condition_expression_rejected() {
        let mut graph = claims_graph();
        graph
            .add_node(Node::condition("bad", "Bad", "amount >"))
            .unwrap();
        graph.add_node(Node::output("x", "X")).unwrap();
        graph.add_node(Node::output("y", "Y")).unwrap();
        graph.add_edge(&"bad".into(), &"x".into(), Edge::yes()).unwrap();
        graph.add_edge(&"bad".into(), &"y".into(), Edge::no()).unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidExpression { node_id, .. }) if node_id.as_str() == "bad"
        ));
    }

    #[test]
    fn malformed_notify_template_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph
            .add_node(Node::new(
                "notify",
                "Notify",
                NodeConfig::Action(ActionConfig::Notify {
                    channel: Channel::Email,
                    recipient: "hr@example.com".to_string(),
                    message: "Hire {{ employee_id".to_string(),
                }),
            ))
            .unwrap();
        graph.connect("start", "notify").unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidTemplate { node_id, .. }) if node_id.as_str() == "notify"
        ));
    }

    #[test]
    fn label_outside_condition_rejected() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::output("out", "Out")).unwrap();
        graph
            .add_edge(&"start".into(), &"out".into(), Edge::yes())
            .unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::UnexpectedLabel { .. })
        ));
    }

    #[test]
    fn output_nodes_are_terminal() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::output("out", "Out")).unwrap();
        graph.add_node(Node::action("after", "After", "h")).unwrap();
        graph.connect("start", "out").unwrap();
        graph.connect("out", "after").unwrap();

        assert!(matches!(
            graph.validate(),
            Err(ValidationError::InvalidOutDegree { kind: NodeKind::Output, .. })
        ));
    }

    #[test]
    fn linear_path_walks_in_order() {
        let mut graph = WorkflowGraph::new();
        graph.add_node(manual_trigger()).unwrap();
        graph.add_node(Node::action("classify", "Classify", "h")).unwrap();
        graph.add_node(Node::action("offer", "Offer", "h")).unwrap();
        graph.add_node(Node::output("done", "Done")).unwrap();
        graph.connect("start", "classify").unwrap();
        graph.connect("classify", "offer").unwrap();
        graph.connect("offer", "done").unwrap();

        let ids: Vec<&str> = graph
            .linear_path()
            .unwrap()
            .iter()
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(ids, vec!["classify", "offer", "done"]);

        assert!(matches!(
            claims_graph().linear_path(),
            Err(ValidationError::NonLinearCase { .. })
        ));
    }

    #[test]
    fn graph_serde_roundtrip() {
        let graph = claims_graph();
        let json = serde_json::to_value(&graph).expect("serialize");
        let parsed: WorkflowGraph = serde_json::from_value(json).expect("deserialize");

        assert_eq!(parsed.node_count(), 4);
        assert_eq!(parsed.edge_count(), 3);
        assert!(parsed.validate().is_ok());
        assert!(parsed.get_node(&"alert".into()).is_some());
    }

    #[test]
    fn deserializing_dangling_edge_fails() {
        let result: Result<WorkflowGraph, _> = serde_json::from_value(json!({
            "nodes": [
                {"id": "start", "name": "Start", "kind": "trigger", "config": {"type": "manual"}}
            ],
            "edges": [{"source": "start", "target": "nowhere"}]
        }));
        assert!(result.is_err());
    }
}
