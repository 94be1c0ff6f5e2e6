//! Seed data loaded at startup.

use casewright_runtime::Automation;
use casewright_scheduler::DeadlineReminder;
use casewright_workflow::WorkflowDraft;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Workflow drafts and reminders to install into a fresh automation.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    /// Drafts published in order.
    #[serde(default)]
    pub workflows: Vec<WorkflowDraft>,
    /// Reminders scheduled after the drafts.
    #[serde(default)]
    pub reminders: Vec<DeadlineReminder>,
}

/// Errors reading a seed file.
#[derive(Debug)]
pub enum SeedError {
    /// The file could not be read.
    Read { path: PathBuf, reason: String },
    /// The file is not a valid seed document.
    Parse { path: PathBuf, reason: String },
}

impl fmt::Display for SeedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read { path, reason } => {
                write!(f, "cannot read seed file '{}': {reason}", path.display())
            }
            Self::Parse { path, reason } => {
                write!(f, "invalid seed file '{}': {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for SeedError {}

/// What installing a seed accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    /// Drafts published.
    pub workflows: usize,
    /// Reminders scheduled.
    pub reminders: usize,
    /// Entries rejected and skipped.
    pub rejected: usize,
}

impl Seed {
    /// Reads a seed document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or malformed.
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|e| SeedError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| SeedError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Publishes every draft and schedules every reminder.
    ///
    /// Rejected entries are logged and skipped.
    pub async fn install(self, automation: &Automation) -> SeedSummary {
        let mut summary = SeedSummary::default();
        for draft in self.workflows {
            let name = draft.metadata.name.clone();
            match automation.publish(draft).await {
                Ok(published) => {
                    info!(workflow_id = %published.id, name = %name, "seed workflow published");
                    summary.workflows += 1;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "seed workflow rejected");
                    summary.rejected += 1;
                }
            }
        }
        for reminder in self.reminders {
            let title = reminder.title.clone();
            match automation.schedule_reminder(reminder).await {
                Ok(_) => summary.reminders += 1,
                Err(e) => {
                    warn!(title = %title, error = %e, "seed reminder rejected");
                    summary.rejected += 1;
                }
            }
        }
        summary
    }
}
