//! Error type for the automation facade.
//!
//! Every lower-layer error converts into `AutomationError`; facade methods
//! wrap it in a rootcause `Report`.

use casewright_cases::CaseError;
use casewright_core::{CaseId, WorkflowId, WorkflowRunId};
use casewright_scheduler::{RegistryError, ReminderError};
use casewright_workflow::{ExecutionError, HistoryError, ValidationError};
use std::fmt;

/// Errors surfaced by [`Automation`](crate::Automation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutomationError {
    /// The draft failed validation.
    Validation(ValidationError),
    /// Trigger registry rejection.
    Registry(RegistryError),
    /// The engine could not start or finish a Run.
    Execution(ExecutionError),
    /// Run history failure.
    History(HistoryError),
    /// Case transition or storage failure.
    Case(CaseError),
    /// Reminder validation or lookup failure.
    Reminder(ReminderError),
    /// Run not found.
    RunNotFound { run_id: WorkflowRunId },
    /// Case not found.
    CaseNotFound { case_id: CaseId },
    /// A case-bound trigger fired without a usable subject in its payload.
    MissingSubject {
        workflow_id: WorkflowId,
        field: String,
    },
}

impl fmt::Display for AutomationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(e) => write!(f, "invalid workflow: {e}"),
            Self::Registry(e) => write!(f, "{e}"),
            Self::Execution(e) => write!(f, "execution failed: {e}"),
            Self::History(e) => write!(f, "{e}"),
            Self::Case(e) => write!(f, "{e}"),
            Self::Reminder(e) => write!(f, "{e}"),
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::CaseNotFound { case_id } => write!(f, "case not found: {case_id}"),
            Self::MissingSubject { workflow_id, field } => write!(
                f,
                "workflow {workflow_id} starts cases but the trigger payload has no '{field}'"
            ),
        }
    }
}

impl std::error::Error for AutomationError {}

impl From<ValidationError> for AutomationError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<RegistryError> for AutomationError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}

impl From<ExecutionError> for AutomationError {
    fn from(e: ExecutionError) -> Self {
        Self::Execution(e)
    }
}

impl From<HistoryError> for AutomationError {
    fn from(e: HistoryError) -> Self {
        Self::History(e)
    }
}

impl From<CaseError> for AutomationError {
    fn from(e: CaseError) -> Self {
        Self::Case(e)
    }
}

impl From<ReminderError> for AutomationError {
    fn from(e: ReminderError) -> Self {
        Self::Reminder(e)
    }
}
