//! Workflow edge types.
//!
//! Edges connect a source node to a target node. Only the two edges
//! leaving a Condition node carry a label, `yes` or `no`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The label on a Condition node's outbound edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchLabel {
    /// Followed when the condition holds.
    Yes,
    /// Followed when the condition does not hold.
    No,
}

impl BranchLabel {
    /// Returns the label for a condition result.
    #[must_use]
    pub fn from_outcome(outcome: bool) -> Self {
        if outcome { Self::Yes } else { Self::No }
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => f.write_str("yes"),
            Self::No => f.write_str("no"),
        }
    }
}

/// An edge in a workflow graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Branch label, only meaningful on Condition outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<BranchLabel>,
}

impl Edge {
    /// Creates an unlabeled edge.
    #[must_use]
    pub fn new() -> Self {
        Self { label: None }
    }

    /// Creates a labeled edge for a Condition output.
    #[must_use]
    pub fn labeled(label: BranchLabel) -> Self {
        Self { label: Some(label) }
    }

    /// Creates the `yes` edge of a Condition node.
    #[must_use]
    pub fn yes() -> Self {
        Self::labeled(BranchLabel::Yes)
    }

    /// Creates the `no` edge of a Condition node.
    #[must_use]
    pub fn no() -> Self {
        Self::labeled(BranchLabel::No)
    }
}
