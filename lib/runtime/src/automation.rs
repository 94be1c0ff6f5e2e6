//! The automation facade.
//!
//! [`Automation`] wires the trigger registry, execution engine, run
//! history, case tracker and deadline scheduler together and exposes the
//! queries and operator writes a presentation layer needs.

use crate::config::AutomationConfig;
use crate::error::AutomationError;
use crate::health::{FailurePolicy, HealthMonitor};
use casewright_cases::{Case, CaseFilter, CaseStore, CaseTracker, InMemoryCaseStore};
use casewright_core::{CaseId, ReminderId, Result, WorkflowId, WorkflowRunId};
use casewright_scheduler::{
    DeadlineReminder, DeadlineScheduler, Launch, Registration, RegistryError, ReminderTick,
    TriggerRegistry, WorkflowStatus,
};
use casewright_workflow::{
    DailyRunCount, ExecutionEngine, ExecutionError, ExecutionMode, HandlerRegistry,
    InMemoryRunHistory, NotificationDispatch, Run, RunHandle, RunHistoryStore, RunStats,
    StaleRunAlarm, TimeWindow, TriggerKind, WorkflowDefinition, WorkflowDraft, WorkflowSummary,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// A Run started by a trigger, executing on its own task.
#[derive(Debug)]
pub struct LaunchedRun {
    /// The Run's id, usable with `get_run` before it finishes.
    pub run_id: WorkflowRunId,
    /// The definition being run.
    pub workflow_id: WorkflowId,
    join: JoinHandle<std::result::Result<Run, ExecutionError>>,
}

impl LaunchedRun {
    /// Waits for the Run to finish and the failure policy to be applied.
    ///
    /// # Errors
    ///
    /// Returns the engine error that aborted the Run.
    pub async fn wait(self) -> Result<Run, AutomationError> {
        let run_id = self.run_id;
        let run = self
            .join
            .await
            .map_err(|e| ExecutionError::TaskFailed {
                run_id,
                reason: e.to_string(),
            })
            .and_then(|result| result)
            .map_err(AutomationError::from)?;
        Ok(run)
    }
}

/// What a trigger firing produced.
#[derive(Debug)]
pub enum Launched {
    /// A Run-mode definition started a Run.
    Run(LaunchedRun),
    /// A Case-mode definition started a Case.
    Case(Case),
}

impl Launched {
    #[must_use]
    pub fn workflow_id(&self) -> WorkflowId {
        match self {
            Self::Run(run) => run.workflow_id,
            Self::Case(case) => case.workflow_id,
        }
    }

    /// Returns the Run, if this launch started one.
    #[must_use]
    pub fn into_run(self) -> Option<LaunchedRun> {
        match self {
            Self::Run(run) => Some(run),
            Self::Case(_) => None,
        }
    }
}

/// The outcome of starting every definition a trigger selected.
///
/// One definition failing to launch does not stop the others.
#[derive(Debug, Default)]
pub struct Launches {
    /// Runs and cases started.
    pub launched: Vec<Launched>,
    /// Definitions that failed to start, one error each.
    pub failures: Vec<AutomationError>,
}

/// Everything one `tick` did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Runs and cases started by schedule triggers.
    pub launches: Launches,
    /// Reminder notifications sent or failed.
    pub reminders: ReminderTick,
    /// Cases whose status changed.
    pub cases_changed: Vec<Case>,
    /// Runs past the stale threshold, if one is configured.
    pub stale_runs: Vec<StaleRunAlarm>,
}

/// One row of the definition listing.
#[derive(Debug, Clone)]
pub struct DefinitionListing {
    /// Identity, name and version of the definition.
    pub summary: WorkflowSummary,
    /// Active, Paused or Error.
    pub status: WorkflowStatus,
    /// Why the definition is Paused or in Error.
    pub status_reason: Option<String>,
    /// What starts the definition.
    pub trigger: TriggerKind,
    /// Next scheduled firing, for Schedule triggers.
    pub next_run: Option<DateTime<Utc>>,
    /// Statistics over the failure-policy window.
    pub stats: RunStats,
}

/// Workflow automation: definitions, runs, cases and reminders.
#[derive(Clone)]
pub struct Automation {
    config: Arc<AutomationConfig>,
    registry: Arc<TriggerRegistry>,
    engine: ExecutionEngine,
    history: Arc<dyn RunHistoryStore>,
    cases: Arc<CaseTracker>,
    reminders: Arc<DeadlineScheduler>,
    health: Arc<HealthMonitor>,
}

impl std::fmt::Debug for Automation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Automation")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Automation {
    /// Creates an automation backed by in-memory stores.
    pub fn new(
        config: AutomationConfig,
        handlers: Arc<dyn HandlerRegistry>,
        dispatch: Arc<dyn NotificationDispatch>,
    ) -> Self {
        Self::with_stores(
            config,
            handlers,
            dispatch,
            Arc::new(InMemoryRunHistory::new()),
            Arc::new(InMemoryCaseStore::new()),
        )
    }

    /// Creates an automation over the given stores.
    pub fn with_stores(
        config: AutomationConfig,
        handlers: Arc<dyn HandlerRegistry>,
        dispatch: Arc<dyn NotificationDispatch>,
        history: Arc<dyn RunHistoryStore>,
        case_store: Arc<dyn CaseStore>,
    ) -> Self {
        let registry = Arc::new(TriggerRegistry::new());
        let engine = ExecutionEngine::new(handlers, Arc::clone(&dispatch), Arc::clone(&history));
        let cases = CaseTracker::new(case_store).with_at_risk_days(config.case_at_risk_days);
        let health = HealthMonitor::new(
            FailurePolicy::from_config(&config),
            Arc::clone(&history),
            Arc::clone(&registry),
        );
        Self {
            config: Arc::new(config),
            registry,
            engine,
            history,
            cases: Arc::new(cases),
            reminders: Arc::new(DeadlineScheduler::new(dispatch)),
            health: Arc::new(health),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    // Definitions

    /// Validates a draft and registers it, replacing an older version.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure, or a registry rejection such as
    /// a stale version or an invalid cron expression.
    #[instrument(skip(self, draft), fields(workflow_id = %draft.id, version = draft.version))]
    pub async fn publish(&self, draft: WorkflowDraft) -> Result<WorkflowSummary, AutomationError> {
        let definition = draft.publish().map_err(AutomationError::from)?;
        let summary = WorkflowSummary::from(&definition);
        self.registry
            .register(definition)
            .await
            .map_err(AutomationError::from)?;
        info!(name = %summary.name, "workflow published");
        Ok(summary)
    }

    /// Removes a definition. In-flight Runs and live Cases are unaffected.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for an unknown definition.
    pub async fn retire(&self, workflow_id: WorkflowId) -> Result<WorkflowDefinition, AutomationError> {
        let registration = self
            .registry
            .deregister(workflow_id)
            .await
            .map_err(AutomationError::from)?;
        Ok(registration.definition)
    }

    /// Lists every registered definition with status and recent statistics.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn list_definitions(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<DefinitionListing>, AutomationError> {
        let window = TimeWindow::trailing(self.config.failure_window(), now);
        let mut listings = Vec::new();
        for registration in self.registry.list().await {
            let stats = self
                .history
                .stats(registration.definition.id(), window)
                .await
                .map_err(AutomationError::from)?;
            listings.push(listing(registration, stats, now));
        }
        Ok(listings)
    }

    /// Returns the registered version of a definition.
    pub async fn get_definition(&self, workflow_id: WorkflowId) -> Option<WorkflowDefinition> {
        self.registry
            .get(workflow_id)
            .await
            .map(|registration| registration.definition)
    }

    /// Pauses a definition. Returns the previous status.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for an unknown definition.
    pub async fn pause_definition(
        &self,
        workflow_id: WorkflowId,
        reason: Option<String>,
    ) -> Result<WorkflowStatus, AutomationError> {
        Ok(self
            .registry
            .pause(workflow_id, reason)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Returns a Paused or Error definition to Active. Returns the
    /// previous status.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` for an unknown definition.
    pub async fn resume_definition(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<WorkflowStatus, AutomationError> {
        Ok(self
            .registry
            .resume(workflow_id)
            .await
            .map_err(AutomationError::from)?)
    }

    // Triggers

    /// Raises an event, launching every Active definition listening for it.
    #[instrument(skip(self, payload))]
    pub async fn fire(&self, event_name: &str, payload: JsonValue) -> Launches {
        let launches = self.registry.fire(event_name, payload).await;
        self.launch_all(launches).await
    }

    /// Launches a Manual definition on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Fails if the definition is unknown, not Active, not manually
    /// triggered, or could not start.
    #[instrument(skip(self, payload), fields(workflow_id = %workflow_id))]
    pub async fn invoke(
        &self,
        workflow_id: WorkflowId,
        actor: &str,
        payload: JsonValue,
    ) -> Result<Launched, AutomationError> {
        let launch = self
            .registry
            .invoke(workflow_id, actor, payload)
            .await
            .map_err(AutomationError::from)?;
        Ok(self.launch(launch).await?)
    }

    /// Advances time: fires due schedules, delivers due reminders,
    /// refreshes case statuses and collects stale-run alarms.
    ///
    /// Repeating a tick for the same minute launches nothing new and
    /// re-sends no delivered reminder.
    ///
    /// # Errors
    ///
    /// Propagates case store and run history failures. Launch and delivery
    /// failures are reported in the returned [`TickReport`].
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, AutomationError> {
        let launches = self.registry.tick(now).await;
        let launches = self.launch_all(launches).await;
        let reminders = self.reminders.tick(now).await;
        let cases_changed = self
            .cases
            .refresh(now)
            .await
            .map_err(AutomationError::from)?;
        let stale_runs = self.stale_runs(now).await?;

        for alarm in &stale_runs {
            warn!(
                run_id = %alarm.run_id,
                workflow_id = %alarm.workflow_id,
                running_minutes = alarm.running_for.num_minutes(),
                last_node = ?alarm.last_node,
                "run is stale"
            );
        }
        debug!(
            launched = launches.launched.len(),
            reminders_sent = reminders.sent.len(),
            cases_changed = cases_changed.len(),
            "tick complete"
        );
        Ok(TickReport {
            launches,
            reminders,
            cases_changed,
            stale_runs,
        })
    }

    // Runs

    /// Returns a Run by ID.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn get_run(&self, run_id: WorkflowRunId) -> Result<Option<Run>, AutomationError> {
        Ok(self
            .history
            .get(run_id)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Returns a definition's Runs started in `window`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn query_runs(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<Run>, AutomationError> {
        Ok(self
            .history
            .query(workflow_id, window)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Computes statistics over a definition's Runs in `window`.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn run_stats(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<RunStats, AutomationError> {
        Ok(self
            .history
            .stats(workflow_id, window)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Counts a definition's Runs per day in `window`.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn runs_per_day(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<DailyRunCount>, AutomationError> {
        Ok(self
            .history
            .runs_per_day(workflow_id, window)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Returns alarms for Runs running past the configured threshold.
    /// Without a configured threshold there are none.
    ///
    /// # Errors
    ///
    /// Propagates run history failures.
    pub async fn stale_runs(&self, now: DateTime<Utc>) -> Result<Vec<StaleRunAlarm>, AutomationError> {
        let Some(threshold) = self.config.stale_run_threshold() else {
            return Ok(Vec::new());
        };
        Ok(self
            .history
            .stale_runs(threshold, now)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Cancels a Running Run.
    ///
    /// # Errors
    ///
    /// Fails if the Run is unknown or already terminal.
    pub async fn cancel_run(&self, run_id: WorkflowRunId) -> Result<Run, AutomationError> {
        Ok(self
            .engine
            .cancel(run_id)
            .await
            .map_err(AutomationError::from)?)
    }

    // Cases

    /// Starts a case for `subject_id` on a registered definition.
    ///
    /// # Errors
    ///
    /// Fails if the definition is unknown or branches, or the subject
    /// already has a live case for it.
    pub async fn start_case(
        &self,
        workflow_id: WorkflowId,
        subject_id: &str,
    ) -> Result<Case, AutomationError> {
        let registration = self
            .registry
            .get(workflow_id)
            .await
            .ok_or(AutomationError::Registry(RegistryError::NotRegistered {
                workflow_id,
            }))?;
        Ok(self
            .cases
            .start(&registration.definition, subject_id)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Completes a case's Current step.
    ///
    /// # Errors
    ///
    /// Fails if the case is unknown, completed or Blocked.
    pub async fn advance_case(&self, case_id: CaseId) -> Result<Case, AutomationError> {
        Ok(self
            .cases
            .advance(case_id)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Clears a case's Blocked step on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Fails if the case is unknown or its active step is not Blocked.
    pub async fn unblock_case(&self, case_id: CaseId, actor: &str) -> Result<Case, AutomationError> {
        Ok(self
            .cases
            .unblock(case_id, actor)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Returns a case by ID.
    ///
    /// # Errors
    ///
    /// Returns `CaseNotFound` for an unknown case.
    pub async fn get_case(&self, case_id: CaseId) -> Result<Case, AutomationError> {
        let case = self
            .cases
            .get(case_id)
            .await
            .map_err(AutomationError::from)?
            .ok_or(AutomationError::CaseNotFound { case_id })?;
        Ok(case)
    }

    /// Lists cases matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates case store failures.
    pub async fn list_cases(&self, filter: &CaseFilter) -> Result<Vec<Case>, AutomationError> {
        Ok(self
            .cases
            .list(filter)
            .await
            .map_err(AutomationError::from)?)
    }

    // Reminders

    /// Schedules a deadline reminder.
    ///
    /// # Errors
    ///
    /// Fails if the reminder is invalid or its ID is taken.
    pub async fn schedule_reminder(
        &self,
        reminder: DeadlineReminder,
    ) -> Result<ReminderId, AutomationError> {
        Ok(self
            .reminders
            .schedule(reminder)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Disables a reminder.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reminder.
    pub async fn cancel_reminder(&self, id: ReminderId) -> Result<DeadlineReminder, AutomationError> {
        Ok(self
            .reminders
            .cancel(id)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Flips a reminder's enabled flag and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown reminder.
    pub async fn toggle_reminder(&self, id: ReminderId) -> Result<bool, AutomationError> {
        Ok(self
            .reminders
            .toggle(id)
            .await
            .map_err(AutomationError::from)?)
    }

    /// Lists reminders ordered by due date.
    pub async fn list_reminders(&self) -> Vec<DeadlineReminder> {
        self.reminders.list().await
    }

    async fn launch_all(&self, launches: Vec<Launch>) -> Launches {
        let mut report = Launches::default();
        for launch in launches {
            let workflow_id = launch.definition.id();
            match self.launch(launch).await {
                Ok(launched) => report.launched.push(launched),
                Err(e) => {
                    warn!(workflow_id = %workflow_id, error = %e, "launch failed");
                    report.failures.push(e);
                }
            }
        }
        report
    }

    async fn launch(&self, launch: Launch) -> std::result::Result<Launched, AutomationError> {
        let subject_field = match launch.definition.mode() {
            ExecutionMode::Case { subject_field } => Some(subject_field.clone()),
            ExecutionMode::Run => None,
        };

        let Some(field) = subject_field else {
            let handle = self
                .engine
                .spawn(launch.definition, launch.context)
                .await?;
            return Ok(Launched::Run(self.watch(handle)));
        };

        let workflow_id = launch.definition.id();
        let subject = subject_of(&launch.context.payload, &field)
            .ok_or(AutomationError::MissingSubject { workflow_id, field })?;
        let case = self.cases.start(&launch.definition, &subject).await?;
        Ok(Launched::Case(case))
    }

    /// Applies the failure policy once the Run finishes, whether or not the
    /// caller waits for it.
    fn watch(&self, handle: RunHandle) -> LaunchedRun {
        let run_id = handle.run_id;
        let workflow_id = handle.workflow_id;
        let health = Arc::clone(&self.health);
        let join = tokio::spawn(async move {
            let run = handle.wait().await?;
            if let Err(e) = health.after_run(&run, Utc::now()).await {
                warn!(run_id = %run.id, error = %e, "failure policy evaluation failed");
            }
            Ok(run)
        });
        LaunchedRun {
            run_id,
            workflow_id,
            join,
        }
    }
}

fn listing(registration: Registration, stats: RunStats, now: DateTime<Utc>) -> DefinitionListing {
    DefinitionListing {
        summary: WorkflowSummary::from(&registration.definition),
        next_run: registration.next_run(now),
        status: registration.status,
        status_reason: registration.status_reason,
        trigger: registration.trigger.kind,
        stats,
    }
}

/// Reads the case subject from a trigger payload. Strings and numbers are
/// accepted.
fn subject_of(payload: &JsonValue, field: &str) -> Option<String> {
    match payload.get(field)? {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
