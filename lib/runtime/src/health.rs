//! Failure-rate policy that moves misbehaving definitions to Error.

use crate::config::AutomationConfig;
use casewright_scheduler::{RegistryError, TriggerRegistry, WorkflowStatus};
use casewright_workflow::execution::CANCELLED_REASON;
use casewright_workflow::{HistoryError, Run, RunHistoryStore, RunStats, RunStatus, TimeWindow};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// When a definition's recent failures warrant the Error status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FailurePolicy {
    /// Failure rate that must be exceeded.
    pub threshold: f64,
    /// Trailing window the rate is computed over.
    pub window: Duration,
    /// Terminal Runs required in the window.
    pub min_runs: usize,
}

impl FailurePolicy {
    #[must_use]
    pub fn from_config(config: &AutomationConfig) -> Self {
        Self {
            threshold: config.failure_rate_threshold,
            window: config.failure_window(),
            min_runs: config.failure_min_runs,
        }
    }

    /// Returns true if `stats` breach the policy.
    #[must_use]
    pub fn is_breached(&self, stats: &RunStats) -> bool {
        stats.terminal() >= self.min_runs
            && stats
                .failure_rate()
                .is_some_and(|rate| rate > self.threshold)
    }
}

/// Applies the [`FailurePolicy`] after failed Runs.
pub struct HealthMonitor {
    policy: FailurePolicy,
    history: Arc<dyn RunHistoryStore>,
    registry: Arc<TriggerRegistry>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        policy: FailurePolicy,
        history: Arc<dyn RunHistoryStore>,
        registry: Arc<TriggerRegistry>,
    ) -> Self {
        Self {
            policy,
            history,
            registry,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &FailurePolicy {
        &self.policy
    }

    /// Evaluates the policy after `run` finished.
    ///
    /// Successful and cancelled Runs are ignored, and a Paused definition
    /// is left Paused. Returns true if the definition was moved to Error.
    ///
    /// # Errors
    ///
    /// Propagates history failures. A definition retired in the meantime is
    /// not an error.
    #[instrument(skip(self, run), fields(run_id = %run.id, workflow_id = %run.workflow_id))]
    pub async fn after_run(&self, run: &Run, now: DateTime<Utc>) -> Result<bool, HistoryError> {
        if run.status != RunStatus::Failed || run.error.as_deref() == Some(CANCELLED_REASON) {
            return Ok(false);
        }

        let window = TimeWindow::trailing(self.policy.window, now);
        let stats = self.history.stats(run.workflow_id, window).await?;
        if !self.policy.is_breached(&stats) {
            debug!(failed = stats.failed, terminal = stats.terminal(), "failure policy not breached");
            return Ok(false);
        }

        let reason = describe(&stats, &self.policy, run);
        match self.registry.mark_error(run.workflow_id, reason.clone()).await {
            Ok(WorkflowStatus::Error | WorkflowStatus::Paused) => Ok(false),
            Ok(_) => {
                warn!(reason = %reason, "workflow moved to error");
                Ok(true)
            }
            Err(RegistryError::NotRegistered { .. }) => Ok(false),
            Err(e) => {
                warn!(error = %e, "could not mark workflow as error");
                Ok(false)
            }
        }
    }
}

fn describe(stats: &RunStats, policy: &FailurePolicy, run: &Run) -> String {
    let rate = stats.failure_rate().unwrap_or_default();
    let node = run
        .failed_node
        .as_ref()
        .map_or_else(|| "unknown node".to_string(), |n| format!("node '{n}'"));
    format!(
        "{} of {} runs failed in the last {}h ({:.0}% > {:.0}%); latest failure at {}: {}",
        stats.failed,
        stats.terminal(),
        policy.window.num_hours(),
        rate * 100.0,
        policy.threshold * 100.0,
        node,
        run.error.as_deref().unwrap_or("no error recorded"),
    )
}
