//! Run and step outcome records.
//!
//! A Run is created in `Running` when a trigger fires, gains one
//! `StepOutcome` per visited node in traversal order, and becomes
//! immutable once it reaches `Success` or `Failed`.

use crate::node::NodeId;
use crate::trigger::TriggerContext;
use casewright_core::{WorkflowId, WorkflowRunId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reason recorded on Runs terminated by `cancel`.
pub const CANCELLED_REASON: &str = "cancelled";

/// The status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is walking the graph.
    Running,
    /// Run reached a terminal node.
    Success,
    /// A node failed or the run was cancelled.
    Failed,
}

impl RunStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// The outcome of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// The recorded result of one node during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// The node that ran.
    pub node_id: NodeId,
    /// How it finished.
    pub status: StepStatus,
    /// When the node started.
    pub started_at: DateTime<Utc>,
    /// When the node finished.
    pub finished_at: DateTime<Utc>,
    /// Error detail for failed steps, skip reason for skipped ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepOutcome {
    /// A completed step.
    #[must_use]
    pub fn completed(node_id: NodeId, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id,
            status: StepStatus::Completed,
            started_at,
            finished_at: Utc::now(),
            detail: None,
        }
    }

    /// A skipped step.
    #[must_use]
    pub fn skipped(node_id: NodeId, started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            node_id,
            status: StepStatus::Skipped,
            started_at,
            finished_at: Utc::now(),
            detail: Some(reason.into()),
        }
    }

    /// A failed step.
    #[must_use]
    pub fn failed(node_id: NodeId, started_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        Self {
            node_id,
            status: StepStatus::Failed,
            started_at,
            finished_at: Utc::now(),
            detail: Some(error.into()),
        }
    }

    /// Returns the error detail of a failed step.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self.status {
            StepStatus::Failed => self.detail.as_deref(),
            _ => None,
        }
    }
}

/// A record of a single workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run.
    pub id: WorkflowRunId,
    /// The workflow being executed.
    pub workflow_id: WorkflowId,
    /// The definition version frozen for this run.
    pub workflow_version: u32,
    /// What fired the run.
    pub trigger: TriggerContext,
    /// Current status.
    pub status: RunStatus,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Step outcomes in traversal order.
    pub steps: Vec<StepOutcome>,
    /// Failure reason, if failed.
    pub error: Option<String>,
    /// The node the run failed at, if any.
    pub failed_node: Option<NodeId>,
}

impl Run {
    /// Creates a new run in `Running` state.
    #[must_use]
    pub fn start(workflow_id: WorkflowId, workflow_version: u32, trigger: TriggerContext) -> Self {
        Self {
            id: WorkflowRunId::new(),
            workflow_id,
            workflow_version,
            trigger,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            steps: Vec::new(),
            error: None,
            failed_node: None,
        }
    }

    /// Returns true once the run is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns the node of the last recorded step.
    #[must_use]
    pub fn last_node(&self) -> Option<&NodeId> {
        self.steps.last().map(|step| &step.node_id)
    }

    /// Returns the duration of the run; in-flight runs measure up to now.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        end - self.started_at
    }
}

/// How a run terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTermination {
    /// The walk reached a terminal node.
    Success,
    /// The walk stopped at a failing node, or the run was cancelled.
    Failed {
        error: String,
        node_id: Option<NodeId>,
    },
}

impl RunTermination {
    /// The termination written by `cancel`.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::Failed {
            error: CANCELLED_REASON.to_string(),
            node_id: None,
        }
    }

    /// Returns the status this termination produces.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        match self {
            Self::Success => RunStatus::Success,
            Self::Failed { .. } => RunStatus::Failed,
        }
    }

    /// Applies this termination to a run.
    pub fn apply(self, run: &mut Run, at: DateTime<Utc>) {
        run.status = self.status();
        run.finished_at = Some(at);
        if let Self::Failed { error, node_id } = self {
            run.error = Some(error);
            run.failed_node = node_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_terminal() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn cancelled_termination_fails_run() {
        let mut run = Run::start(WorkflowId::new(), 1, TriggerContext::manual("ops"));
        assert_eq!(run.status, RunStatus::Running);

        let at = Utc::now();
        RunTermination::cancelled().apply(&mut run, at);

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error.as_deref(), Some(CANCELLED_REASON));
        assert_eq!(run.finished_at, Some(at));
        assert!(run.failed_node.is_none());
    }

    #[test]
    fn failed_step_exposes_error() {
        let step = StepOutcome::failed(NodeId::new("alert"), Utc::now(), "timeout");
        assert_eq!(step.error(), Some("timeout"));

        let skipped = StepOutcome::skipped(NodeId::new("sync"), Utc::now(), "not needed");
        assert_eq!(skipped.error(), None);
    }

    #[test]
    fn run_serde_roundtrip() {
        let mut run = Run::start(WorkflowId::new(), 2, TriggerContext::manual("ops"));
        run.steps
            .push(StepOutcome::completed(NodeId::new("check"), Utc::now()));

        let json = serde_json::to_string(&run).expect("serialize");
        let parsed: Run = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, run);
    }
}
