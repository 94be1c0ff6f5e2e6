//! Error types for the workflow crate.
//!
//! - `ValidationError`: malformed graphs, rejected at publish time
//! - `HistoryError`: run history store failures
//! - `ExecutionError`: engine-level failures (never node failures, which
//!   are recorded on the Run instead)

use crate::edge::BranchLabel;
use crate::execution::RunStatus;
use crate::node::{NodeId, NodeKind};
use casewright_core::WorkflowRunId;
use std::fmt;

/// Errors from graph construction and validation.
///
/// Every variant names the offending node or edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// An edge references a node that is not in the graph.
    NodeNotFound { node_id: NodeId },
    /// Two nodes share the same ID.
    DuplicateNode { node_id: NodeId },
    /// The graph has no trigger node.
    MissingTrigger,
    /// The graph has more than one trigger node.
    MultipleTriggers { node_ids: Vec<NodeId> },
    /// The graph contains a cycle through the given node.
    CycleDetected { node_id: NodeId },
    /// A node cannot be reached from the trigger.
    UnreachableNode { node_id: NodeId },
    /// A node has the wrong number of outbound edges for its kind.
    InvalidOutDegree {
        node_id: NodeId,
        kind: NodeKind,
        expected: &'static str,
        actual: usize,
    },
    /// A Condition node's outbound labels are not exactly `{yes, no}`.
    InvalidBranchLabels { node_id: NodeId, reason: String },
    /// A label was placed on an edge that does not leave a Condition node.
    UnexpectedLabel {
        source: NodeId,
        target: NodeId,
        label: BranchLabel,
    },
    /// A Condition node's expression does not parse.
    InvalidExpression { node_id: NodeId, reason: String },
    /// A notification node's recipient or message template does not compile.
    InvalidTemplate { node_id: NodeId, reason: String },
    /// A case-bound workflow contains a branching node.
    NonLinearCase { node_id: NodeId },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeNotFound { node_id } => write!(f, "node not found: {node_id}"),
            Self::DuplicateNode { node_id } => write!(f, "duplicate node id: {node_id}"),
            Self::MissingTrigger => write!(f, "graph has no trigger node"),
            Self::MultipleTriggers { node_ids } => {
                let ids: Vec<_> = node_ids.iter().map(NodeId::as_str).collect();
                write!(f, "graph has multiple trigger nodes: {}", ids.join(", "))
            }
            Self::CycleDetected { node_id } => {
                write!(f, "graph contains a cycle through node {node_id}")
            }
            Self::UnreachableNode { node_id } => {
                write!(f, "node {node_id} is not reachable from the trigger")
            }
            Self::InvalidOutDegree {
                node_id,
                kind,
                expected,
                actual,
            } => write!(
                f,
                "{kind} node {node_id} must have {expected} outbound edge(s), found {actual}"
            ),
            Self::InvalidBranchLabels { node_id, reason } => {
                write!(f, "condition node {node_id} has invalid branch labels: {reason}")
            }
            Self::UnexpectedLabel {
                source,
                target,
                label,
            } => write!(
                f,
                "edge {source} -> {target} carries label '{label}' but does not leave a condition node"
            ),
            Self::InvalidExpression { node_id, reason } => {
                write!(f, "condition node {node_id} has an invalid expression: {reason}")
            }
            Self::InvalidTemplate { node_id, reason } => {
                write!(f, "notification node {node_id} has an invalid template: {reason}")
            }
            Self::NonLinearCase { node_id } => write!(
                f,
                "case workflows must be linear, but node {node_id} branches"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from run history operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// Run not found.
    RunNotFound { run_id: WorkflowRunId },
    /// A run with this ID was already appended.
    DuplicateRun { run_id: WorkflowRunId },
    /// The run is terminal and can no longer be written.
    RunTerminal {
        run_id: WorkflowRunId,
        status: RunStatus,
    },
    /// The backing storage failed.
    StorageFailed { reason: String },
}

impl fmt::Display for HistoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::DuplicateRun { run_id } => write!(f, "run already recorded: {run_id}"),
            Self::RunTerminal { run_id, status } => {
                write!(f, "run {run_id} is already terminal ({status})")
            }
            Self::StorageFailed { reason } => write!(f, "run history storage failed: {reason}"),
        }
    }
}

impl std::error::Error for HistoryError {}

/// Engine-level errors.
///
/// Node failures are not errors at this level; they terminate the Run
/// as Failed and are recorded on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The run history store rejected a write.
    History(HistoryError),
    /// The definition's graph has no node after the trigger.
    MissingEntry,
    /// The walk reached a node ID absent from the graph.
    NodeNotFound { node_id: NodeId },
    /// The run is already terminal.
    RunAlreadyTerminal {
        run_id: WorkflowRunId,
        status: RunStatus,
    },
    /// The task driving a spawned run panicked or was aborted.
    TaskFailed {
        run_id: WorkflowRunId,
        reason: String,
    },
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::History(e) => write!(f, "run history error: {e}"),
            Self::MissingEntry => write!(f, "trigger node has no outbound edge"),
            Self::NodeNotFound { node_id } => write!(f, "node not found during walk: {node_id}"),
            Self::RunAlreadyTerminal { run_id, status } => {
                write!(f, "run {run_id} is already terminal ({status})")
            }
            Self::TaskFailed { run_id, reason } => {
                write!(f, "task driving run {run_id} failed: {reason}")
            }
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<HistoryError> for ExecutionError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::RunTerminal { run_id, status } => {
                Self::RunAlreadyTerminal { run_id, status }
            }
            other => Self::History(other),
        }
    }
}
