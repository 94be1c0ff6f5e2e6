//! Scheduling for casewright.
//!
//! This crate provides:
//!
//! - **Cron schedules**: Five-field cron expressions evaluated in UTC
//! - **Trigger Registry**: Matching events, schedule ticks and manual
//!   invocations to Active workflow definitions, and per-definition status
//! - **Deadline Scheduler**: Lead-time reminders delivered through the
//!   notification dispatch interface

pub mod error;
pub mod registry;
pub mod reminder;
pub mod schedule;

pub use error::{RegistryError, ReminderError, ReminderFireError, ScheduleError};
pub use registry::{Launch, Registration, TriggerRegistry, WorkflowStatus};
pub use reminder::{DeadlineReminder, DeadlineScheduler, ReminderTick, SentReminder};
pub use schedule::CronSchedule;
