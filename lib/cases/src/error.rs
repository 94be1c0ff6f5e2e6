//! Error types for the cases crate.

use crate::case::StepStatus;
use casewright_core::{CaseId, WorkflowId};
use casewright_workflow::{NodeId, ValidationError};
use std::fmt;

/// Errors from case storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseStoreError {
    /// A live case already exists for this subject and definition.
    CaseConflict {
        subject_id: String,
        workflow_id: WorkflowId,
        existing: CaseId,
    },
    /// Case not found.
    NotFound { id: CaseId },
    /// The backing storage failed.
    StorageFailed { reason: String },
}

impl fmt::Display for CaseStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CaseConflict {
                subject_id,
                workflow_id,
                existing,
            } => write!(
                f,
                "subject '{subject_id}' already has live case {existing} for workflow {workflow_id}"
            ),
            Self::NotFound { id } => write!(f, "case not found: {id}"),
            Self::StorageFailed { reason } => write!(f, "case storage failed: {reason}"),
        }
    }
}

impl std::error::Error for CaseStoreError {}

/// Errors from case transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseError {
    /// The store rejected the operation.
    Store(CaseStoreError),
    /// The case has no Current or Blocked step.
    AlreadyCompleted { id: CaseId },
    /// `advance` was called while the active step awaits manual action.
    StepBlocked {
        id: CaseId,
        node_id: NodeId,
        required_action: String,
    },
    /// `unblock` was called while the active step is not Blocked.
    NotBlocked {
        id: CaseId,
        node_id: NodeId,
        status: StepStatus,
    },
    /// The definition cannot drive a case.
    InvalidDefinition(ValidationError),
}

impl fmt::Display for CaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "case store error: {e}"),
            Self::AlreadyCompleted { id } => write!(f, "case {id} is already completed"),
            Self::StepBlocked {
                id,
                node_id,
                required_action,
            } => write!(
                f,
                "case {id} is blocked at step {node_id}: {required_action}"
            ),
            Self::NotBlocked {
                id,
                node_id,
                status,
            } => write!(f, "case {id} step {node_id} is {status}, not blocked"),
            Self::InvalidDefinition(e) => write!(f, "definition cannot drive a case: {e}"),
        }
    }
}

impl std::error::Error for CaseError {}

impl From<CaseStoreError> for CaseError {
    fn from(e: CaseStoreError) -> Self {
        Self::Store(e)
    }
}

impl From<ValidationError> for CaseError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidDefinition(e)
    }
}
