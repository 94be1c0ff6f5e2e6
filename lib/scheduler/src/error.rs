//! Error types for the scheduler crate.
//!
//! - `ScheduleError`: malformed cron expressions
//! - `RegistryError`: trigger registration and status operations
//! - `ReminderError`: reminder validation and lookup
//! - `ReminderFireError`: one channel's delivery failure during a tick

use casewright_core::{ReminderId, WorkflowId};
use casewright_workflow::{Channel, DispatchError, TriggerKind};
use std::fmt;

use crate::registry::WorkflowStatus;

/// Errors from schedule operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// Invalid cron expression.
    InvalidCronExpression { expression: String, reason: String },
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

/// Errors from trigger registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No definition is registered under this ID.
    NotRegistered { workflow_id: WorkflowId },
    /// A definition with this ID is registered at the same or a newer version.
    StaleVersion {
        workflow_id: WorkflowId,
        registered: u32,
        offered: u32,
    },
    /// The definition has no trigger node.
    MissingTrigger { workflow_id: WorkflowId },
    /// The schedule trigger's cron expression is invalid.
    InvalidSchedule(ScheduleError),
    /// `invoke` was called on a definition whose trigger is not manual.
    NotManual {
        workflow_id: WorkflowId,
        kind: TriggerKind,
    },
    /// The definition is not Active.
    NotActive {
        workflow_id: WorkflowId,
        status: WorkflowStatus,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered { workflow_id } => {
                write!(f, "workflow not registered: {workflow_id}")
            }
            Self::StaleVersion {
                workflow_id,
                registered,
                offered,
            } => write!(
                f,
                "workflow {workflow_id} is registered at version {registered}; version {offered} is not newer"
            ),
            Self::MissingTrigger { workflow_id } => {
                write!(f, "workflow {workflow_id} has no trigger node")
            }
            Self::InvalidSchedule(e) => write!(f, "invalid schedule: {e}"),
            Self::NotManual { workflow_id, kind } => {
                write!(f, "workflow {workflow_id} has a {kind} trigger, not manual")
            }
            Self::NotActive {
                workflow_id,
                status,
            } => write!(f, "workflow {workflow_id} is {status}"),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<ScheduleError> for RegistryError {
    fn from(e: ScheduleError) -> Self {
        Self::InvalidSchedule(e)
    }
}

/// Errors from reminder operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReminderError {
    /// Reminder not found.
    NotFound { id: ReminderId },
    /// A reminder with this ID already exists.
    AlreadyExists { id: ReminderId },
    /// The title is empty.
    EmptyTitle,
    /// No delivery channel is configured.
    NoChannels { id: ReminderId },
    /// The same lead time appears twice.
    DuplicateLeadTime { days: i64 },
    /// A lead time is negative.
    NegativeLeadTime { days: i64 },
}

impl fmt::Display for ReminderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "reminder not found: {id}"),
            Self::AlreadyExists { id } => write!(f, "reminder already exists: {id}"),
            Self::EmptyTitle => write!(f, "reminder title is empty"),
            Self::NoChannels { id } => write!(f, "reminder {id} has no channels"),
            Self::DuplicateLeadTime { days } => write!(f, "lead time {days} appears twice"),
            Self::NegativeLeadTime { days } => write!(f, "lead time {days} is negative"),
        }
    }
}

impl std::error::Error for ReminderError {}

/// Delivery of one reminder offset failed on one channel.
///
/// Other channels are still attempted, and the failed channel is retried
/// on the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderFireError {
    /// The reminder that failed.
    pub reminder_id: ReminderId,
    /// Days before the due date this notification is for.
    pub offset_days: i64,
    /// The channel that failed.
    pub channel: Channel,
    /// What the dispatch reported.
    pub error: DispatchError,
}

impl fmt::Display for ReminderFireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reminder {} ({} day(s) before due) failed on {}: {}",
            self.reminder_id, self.offset_days, self.channel, self.error
        )
    }
}

impl std::error::Error for ReminderFireError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_error_display() {
        let err = ScheduleError::InvalidCronExpression {
            expression: "invalid".to_string(),
            reason: "expected 5 fields".to_string(),
        };
        assert!(err.to_string().contains("invalid"));
        assert!(err.to_string().contains("5 fields"));
    }

    #[test]
    fn stale_version_display() {
        let err = RegistryError::StaleVersion {
            workflow_id: WorkflowId::new(),
            registered: 3,
            offered: 2,
        };
        assert!(err.to_string().contains("version 2 is not newer"));
    }

    #[test]
    fn fire_error_names_channel() {
        let err = ReminderFireError {
            reminder_id: ReminderId::new(),
            offset_days: 7,
            channel: Channel::Chat,
            error: DispatchError::ChannelUnavailable {
                channel: Channel::Chat,
            },
        };
        assert!(err.to_string().contains("7 day(s) before due"));
        assert!(err.to_string().contains("failed on chat"));
    }
}
