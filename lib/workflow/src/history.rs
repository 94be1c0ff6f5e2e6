//! Run history store.
//!
//! An append-only log of Runs and their step outcomes. Statistics are
//! computed from the stored Runs on every read, so a Run appended after a
//! `stats` call shows up in the next one.

use crate::error::HistoryError;
use crate::execution::{Run, RunStatus, RunTermination, StepOutcome};
use async_trait::async_trait;
use casewright_core::{WorkflowId, WorkflowRunId};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

/// An inclusive time range over Run start timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// First instant in the window.
    pub start: DateTime<Utc>,
    /// Last instant in the window.
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The window of length `duration` ending at `now`.
    #[must_use]
    pub fn trailing(duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - duration,
            end: now,
        }
    }

    /// Returns true if `at` falls within the window.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Aggregate statistics for one definition over a window.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    /// All Runs started in the window, including in-flight ones.
    pub runs_in_window: usize,
    /// Runs that ended in Success.
    pub succeeded: usize,
    /// Runs that ended in Failed, cancellations included.
    pub failed: usize,
    /// Runs still in flight.
    pub running: usize,
    /// Succeeded / (succeeded + failed); `None` with no terminal Runs.
    pub success_rate: Option<f64>,
    /// Mean duration of terminal Runs.
    pub avg_duration: Option<Duration>,
}

impl RunStats {
    /// Computes statistics over a set of Runs.
    #[must_use]
    pub fn from_runs(runs: &[Run]) -> Self {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut running = 0;
        let mut total_ms: i64 = 0;

        for run in runs {
            match run.status {
                RunStatus::Success => succeeded += 1,
                RunStatus::Failed => failed += 1,
                RunStatus::Running => running += 1,
            }
            if run.is_terminal() {
                total_ms += run.duration().num_milliseconds();
            }
        }

        let terminal = succeeded + failed;
        let (success_rate, avg_duration) = if terminal == 0 {
            (None, None)
        } else {
            (
                Some(succeeded as f64 / terminal as f64),
                Some(Duration::milliseconds(total_ms / terminal as i64)),
            )
        };

        Self {
            runs_in_window: runs.len(),
            succeeded,
            failed,
            running,
            success_rate,
            avg_duration,
        }
    }

    /// Failed / terminal Runs; `None` with no terminal Runs.
    #[must_use]
    pub fn failure_rate(&self) -> Option<f64> {
        self.success_rate.map(|rate| 1.0 - rate)
    }

    /// Number of Runs that reached a terminal status.
    #[must_use]
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Widest window, in days, that `runs_per_day` fills with empty days.
pub const MAX_FILLED_DAYS: i64 = 366;

/// Run counts for one calendar day (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRunCount {
    /// The UTC calendar day.
    pub date: NaiveDate,
    /// Runs started that day, in-flight ones included.
    pub total: usize,
    /// Of those, the ones that ended in Success.
    pub succeeded: usize,
    /// Of those, the ones that ended in Failed.
    pub failed: usize,
}

impl DailyRunCount {
    fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            total: 0,
            succeeded: 0,
            failed: 0,
        }
    }
}

/// A Run that has stayed `Running` past the operator's threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct StaleRunAlarm {
    /// The stale Run.
    pub run_id: WorkflowRunId,
    /// Its definition.
    pub workflow_id: WorkflowId,
    /// When it started.
    pub started_at: DateTime<Utc>,
    /// How long the Run has been running at the time of the check.
    pub running_for: Duration,
    /// The last node that recorded an outcome.
    pub last_node: Option<crate::node::NodeId>,
}

/// Storage for Run records.
///
/// Implementations must make each write atomic per Run, and must reject
/// step and terminal writes to Runs that are already terminal.
#[async_trait]
pub trait RunHistoryStore: Send + Sync {
    /// Appends a new Run.
    async fn append(&self, run: Run) -> Result<(), HistoryError>;

    /// Appends a step outcome to a Running Run.
    async fn record_step(
        &self,
        run_id: WorkflowRunId,
        step: StepOutcome,
    ) -> Result<(), HistoryError>;

    /// Moves a Running Run to its terminal status and returns it.
    async fn finish(
        &self,
        run_id: WorkflowRunId,
        termination: RunTermination,
        at: DateTime<Utc>,
    ) -> Result<Run, HistoryError>;

    /// Looks up a Run.
    async fn get(&self, run_id: WorkflowRunId) -> Result<Option<Run>, HistoryError>;

    /// Returns a definition's Runs started within the window, ordered by
    /// start timestamp.
    async fn query(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<Run>, HistoryError>;

    /// Returns every Run still `Running`, ordered by start timestamp.
    async fn running(&self) -> Result<Vec<Run>, HistoryError>;

    /// Computes statistics over a definition's Runs in the window.
    async fn stats(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<RunStats, HistoryError> {
        let runs = self.query(workflow_id, window).await?;
        Ok(RunStats::from_runs(&runs))
    }

    /// Counts a definition's Runs per UTC day. Windows spanning up to
    /// [`MAX_FILLED_DAYS`] get one entry for every day they touch; wider
    /// ones list only the days that have Runs.
    async fn runs_per_day(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<DailyRunCount>, HistoryError> {
        let runs = self.query(workflow_id, window).await?;

        let mut days = BTreeMap::new();
        let first = window.start.date_naive();
        let last = window.end.date_naive();
        if (last - first).num_days() < MAX_FILLED_DAYS {
            for day in first.iter_days().take_while(|day| *day <= last) {
                days.insert(day, DailyRunCount::empty(day));
            }
        }

        for run in &runs {
            let date = run.started_at.date_naive();
            let count = days
                .entry(date)
                .or_insert_with(|| DailyRunCount::empty(date));
            count.total += 1;
            match run.status {
                RunStatus::Success => count.succeeded += 1,
                RunStatus::Failed => count.failed += 1,
                RunStatus::Running => {}
            }
        }

        Ok(days.into_values().collect())
    }

    /// Returns alarms for Runs running longer than `threshold` at `now`.
    async fn stale_runs(
        &self,
        threshold: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<StaleRunAlarm>, HistoryError> {
        let running = self.running().await?;
        Ok(running
            .into_iter()
            .filter(|run| now - run.started_at > threshold)
            .map(|run| StaleRunAlarm {
                run_id: run.id,
                workflow_id: run.workflow_id,
                started_at: run.started_at,
                running_for: now - run.started_at,
                last_node: run.last_node().cloned(),
            })
            .collect())
    }
}

/// In-memory run history.
#[derive(Debug, Default)]
pub struct InMemoryRunHistory {
    runs: RwLock<HashMap<WorkflowRunId, Run>>,
}

impl InMemoryRunHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn ordered(mut runs: Vec<Run>) -> Vec<Run> {
    runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
    runs
}

#[async_trait]
impl RunHistoryStore for InMemoryRunHistory {
    async fn append(&self, run: Run) -> Result<(), HistoryError> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.id) {
            return Err(HistoryError::DuplicateRun { run_id: run.id });
        }
        runs.insert(run.id, run);
        Ok(())
    }

    async fn record_step(
        &self,
        run_id: WorkflowRunId,
        step: StepOutcome,
    ) -> Result<(), HistoryError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or(HistoryError::RunNotFound { run_id })?;
        if run.is_terminal() {
            return Err(HistoryError::RunTerminal {
                run_id,
                status: run.status,
            });
        }
        run.steps.push(step);
        Ok(())
    }

    async fn finish(
        &self,
        run_id: WorkflowRunId,
        termination: RunTermination,
        at: DateTime<Utc>,
    ) -> Result<Run, HistoryError> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or(HistoryError::RunNotFound { run_id })?;
        if run.is_terminal() {
            return Err(HistoryError::RunTerminal {
                run_id,
                status: run.status,
            });
        }
        termination.apply(run, at);
        Ok(run.clone())
    }

    async fn get(&self, run_id: WorkflowRunId) -> Result<Option<Run>, HistoryError> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn query(
        &self,
        workflow_id: WorkflowId,
        window: TimeWindow,
    ) -> Result<Vec<Run>, HistoryError> {
        let runs = self.runs.read().await;
        Ok(ordered(
            runs.values()
                .filter(|run| run.workflow_id == workflow_id && window.contains(run.started_at))
                .cloned()
                .collect(),
        ))
    }

    async fn running(&self) -> Result<Vec<Run>, HistoryError> {
        let runs = self.runs.read().await;
        Ok(ordered(
            runs.values()
                .filter(|run| run.status == RunStatus::Running)
                .cloned()
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::trigger::TriggerContext;

    fn run_at(workflow_id: WorkflowId, started_at: DateTime<Utc>) -> Run {
        let mut run = Run::start(workflow_id, 1, TriggerContext::manual("ops"));
        run.started_at = started_at;
        run
    }

    async fn finished(
        store: &InMemoryRunHistory,
        workflow_id: WorkflowId,
        started_at: DateTime<Utc>,
        termination: RunTermination,
    ) -> Run {
        let run = run_at(workflow_id, started_at);
        let id = run.id;
        store.append(run).await.unwrap();
        store
            .finish(id, termination, started_at + Duration::seconds(10))
            .await
            .unwrap()
    }

    fn failed_at(node: &str) -> RunTermination {
        RunTermination::Failed {
            error: "boom".to_string(),
            node_id: Some(NodeId::new(node)),
        }
    }

    #[tokio::test]
    async fn success_rate_excludes_running() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let now = Utc::now();

        finished(&store, wf, now - Duration::hours(3), RunTermination::Success).await;
        finished(&store, wf, now - Duration::hours(2), RunTermination::Success).await;
        finished(&store, wf, now - Duration::hours(1), failed_at("alert")).await;
        store.append(run_at(wf, now - Duration::minutes(5))).await.unwrap();

        let stats = store
            .stats(wf, TimeWindow::trailing(Duration::hours(24), now))
            .await
            .unwrap();

        assert_eq!(stats.runs_in_window, 4);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.terminal(), 3);
        let rate = stats.success_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_duration, Some(Duration::seconds(10)));
    }

    #[tokio::test]
    async fn stats_reflect_later_appends() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let now = Utc::now();
        let window = TimeWindow::trailing(Duration::hours(1), now);

        let empty = store.stats(wf, window).await.unwrap();
        assert_eq!(empty.runs_in_window, 0);
        assert!(empty.success_rate.is_none());

        finished(&store, wf, now - Duration::minutes(1), failed_at("x")).await;
        let after = store.stats(wf, window).await.unwrap();
        assert_eq!(after.failed, 1);
        assert_eq!(after.success_rate, Some(0.0));
    }

    #[tokio::test]
    async fn query_orders_by_start_and_filters_window() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let other = WorkflowId::new();
        let now = Utc::now();

        let late = run_at(wf, now - Duration::minutes(1));
        let early = run_at(wf, now - Duration::minutes(30));
        let outside = run_at(wf, now - Duration::days(3));
        let (late_id, early_id) = (late.id, early.id);
        store.append(late).await.unwrap();
        store.append(early).await.unwrap();
        store.append(outside).await.unwrap();
        store.append(run_at(other, now)).await.unwrap();

        let runs = store
            .query(wf, TimeWindow::trailing(Duration::hours(1), now))
            .await
            .unwrap();
        let ids: Vec<_> = runs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![early_id, late_id]);
    }

    #[tokio::test]
    async fn terminal_runs_reject_writes() {
        let store = InMemoryRunHistory::new();
        let run = finished(&store, WorkflowId::new(), Utc::now(), RunTermination::Success).await;

        let err = store
            .record_step(run.id, StepOutcome::completed(NodeId::new("late"), Utc::now()))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HistoryError::RunTerminal {
                run_id: run.id,
                status: RunStatus::Success
            }
        );

        assert!(
            store
                .finish(run.id, RunTermination::cancelled(), Utc::now())
                .await
                .is_err()
        );
        let stored = store.get(run.id).await.unwrap().unwrap();
        assert!(stored.steps.is_empty());
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn duplicate_append_rejected() {
        let store = InMemoryRunHistory::new();
        let run = run_at(WorkflowId::new(), Utc::now());
        store.append(run.clone()).await.unwrap();
        assert!(matches!(
            store.append(run).await,
            Err(HistoryError::DuplicateRun { .. })
        ));
    }

    #[tokio::test]
    async fn runs_per_day_fills_gaps() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let day = |d: u32, h: u32| {
            NaiveDate::from_ymd_opt(2026, 1, d)
                .unwrap()
                .and_hms_opt(h, 0, 0)
                .unwrap()
                .and_utc()
        };

        finished(&store, wf, day(1, 9), RunTermination::Success).await;
        finished(&store, wf, day(1, 15), failed_at("sync")).await;
        finished(&store, wf, day(3, 9), RunTermination::Success).await;

        let counts = store
            .runs_per_day(wf, TimeWindow::new(day(1, 0), day(3, 23)))
            .await
            .unwrap();

        assert_eq!(counts.len(), 3);
        assert_eq!((counts[0].total, counts[0].failed), (2, 1));
        assert_eq!(counts[1].total, 0);
        assert_eq!(counts[2].succeeded, 1);
    }

    #[tokio::test]
    async fn runs_per_day_over_unbounded_window_lists_active_days() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let at = NaiveDate::from_ymd_opt(2026, 1, 5)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc();
        finished(&store, wf, at, RunTermination::Success).await;

        let counts = store
            .runs_per_day(wf, TimeWindow::new(DateTime::<Utc>::MIN_UTC, DateTime::<Utc>::MAX_UTC))
            .await
            .unwrap();

        assert_eq!(counts.len(), 1);
        assert_eq!((counts[0].date, counts[0].total), (at.date_naive(), 1));
    }

    #[tokio::test]
    async fn stale_runs_use_threshold() {
        let store = InMemoryRunHistory::new();
        let wf = WorkflowId::new();
        let now = Utc::now();

        let stuck = run_at(wf, now - Duration::hours(2));
        let stuck_id = stuck.id;
        store.append(stuck).await.unwrap();
        store
            .record_step(stuck_id, StepOutcome::completed(NodeId::new("check"), now))
            .await
            .unwrap();
        store.append(run_at(wf, now - Duration::minutes(5))).await.unwrap();
        finished(&store, wf, now - Duration::hours(5), RunTermination::Success).await;

        let alarms = store.stale_runs(Duration::minutes(30), now).await.unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].run_id, stuck_id);
        assert_eq!(alarms[0].last_node, Some(NodeId::new("check")));
        assert!(alarms[0].running_for >= Duration::hours(2));
    }
}
