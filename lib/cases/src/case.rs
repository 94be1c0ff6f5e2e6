//! Case and step state machine.
//!
//! A case walks a linear workflow one step at a time. At every point
//! before completion exactly one step is Current or Blocked, every step
//! before it is Completed and every step after it is Pending. Steps never
//! go backwards.

use crate::error::CaseError;
use casewright_core::{CaseId, WorkflowId};
use casewright_workflow::{Node, NodeId, WorkflowDefinition};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall case status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    OnTrack,
    AtRisk,
    Completed,
    Overdue,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnTrack => f.write_str("on_track"),
            Self::AtRisk => f.write_str("at_risk"),
            Self::Completed => f.write_str("completed"),
            Self::Overdue => f.write_str("overdue"),
        }
    }
}

/// Progress of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Current,
    Completed,
    /// Current, but waiting on the step's required action.
    Blocked,
}

impl StepStatus {
    /// Current or Blocked.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Current | Self::Blocked)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Current => f.write_str("current"),
            Self::Completed => f.write_str("completed"),
            Self::Blocked => f.write_str("blocked"),
        }
    }
}

/// The progress marker of one node within a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// The workflow node this step tracks.
    pub node_id: NodeId,
    /// Display name copied from the node.
    pub name: String,
    /// Where the step stands.
    pub status: StepStatus,
    /// Start date plus the node's `due_in_days`.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Who is expected to work the step.
    #[serde(default)]
    pub assignee: Option<String>,
    /// What an operator must do to unblock this step.
    #[serde(default)]
    pub required_action: Option<String>,
    /// Completes on its own once it becomes Current.
    #[serde(default)]
    pub automatic: bool,
    /// When the step completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Operator who cleared the required action.
    #[serde(default)]
    pub unblocked_by: Option<String>,
    /// When the required action was cleared.
    #[serde(default)]
    pub unblocked_at: Option<DateTime<Utc>>,
}

impl StepState {
    fn from_node(node: &Node, start: NaiveDate) -> Self {
        let policy = node.step.clone().unwrap_or_default();
        let due_date = policy
            .due_in_days
            .and_then(|days| u64::try_from(days).ok())
            .and_then(|days| start.checked_add_days(Days::new(days)));
        Self {
            node_id: node.id.clone(),
            name: node.name.clone(),
            status: StepStatus::Pending,
            due_date,
            assignee: policy.assignee,
            required_action: policy.required_action,
            automatic: policy.automatic,
            completed_at: None,
            unblocked_by: None,
            unblocked_at: None,
        }
    }
}

/// A long-lived, per-subject instantiation of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Case {
    /// Unique case identifier.
    pub id: CaseId,
    /// The entity this case is about (e.g. an employee ID).
    pub subject_id: String,
    /// The definition this case instantiates.
    pub workflow_id: WorkflowId,
    /// Version of the definition at start; later publishes do not touch it.
    pub workflow_version: u32,
    /// One entry per node after the trigger, in walk order.
    pub steps: Vec<StepState>,
    /// Derived from the active step's due date.
    pub status: CaseStatus,
    /// When the case was started.
    pub started_at: DateTime<Utc>,
    /// Last transition or status change.
    pub updated_at: DateTime<Utc>,
    /// When the last step completed.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Case {
    /// Starts a case at the first step after the trigger.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDefinition` if the definition branches.
    pub fn start(
        definition: &WorkflowDefinition,
        subject_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, CaseError> {
        let start = now.date_naive();
        let steps = definition
            .graph()
            .linear_path()?
            .into_iter()
            .map(|node| StepState::from_node(node, start))
            .collect();

        let mut case = Self {
            id: CaseId::new(),
            subject_id: subject_id.into(),
            workflow_id: definition.id(),
            workflow_version: definition.version(),
            steps,
            status: CaseStatus::OnTrack,
            started_at: now,
            updated_at: now,
            completed_at: None,
        };
        case.activate(0, now);
        Ok(case)
    }

    /// Index of the Current or Blocked step.
    #[must_use]
    pub fn active_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status.is_active())
    }

    /// The Current or Blocked step.
    #[must_use]
    pub fn active_step(&self) -> Option<&StepState> {
        self.active_index().map(|i| &self.steps[i])
    }

    /// Returns true while the case has not completed.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != CaseStatus::Completed
    }

    /// Completed steps over total steps.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let completed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        (completed, self.steps.len())
    }

    /// Completes the Current step and activates the next.
    ///
    /// # Errors
    ///
    /// Fails without changing the case if it is already completed or the
    /// active step is Blocked.
    pub fn advance(&mut self, now: DateTime<Utc>) -> Result<(), CaseError> {
        let index = self
            .active_index()
            .ok_or(CaseError::AlreadyCompleted { id: self.id })?;
        let step = &self.steps[index];
        if step.status == StepStatus::Blocked {
            return Err(CaseError::StepBlocked {
                id: self.id,
                node_id: step.node_id.clone(),
                required_action: step.required_action.clone().unwrap_or_default(),
            });
        }
        self.complete(index, now);
        Ok(())
    }

    /// Clears the Blocked step's required action on behalf of `actor`.
    ///
    /// The step becomes Current; automatic steps then complete right away.
    ///
    /// # Errors
    ///
    /// Fails without changing the case unless the active step is Blocked.
    pub fn unblock(&mut self, actor: &str, now: DateTime<Utc>) -> Result<(), CaseError> {
        let index = self
            .active_index()
            .ok_or(CaseError::AlreadyCompleted { id: self.id })?;
        let step = &mut self.steps[index];
        if step.status != StepStatus::Blocked {
            return Err(CaseError::NotBlocked {
                id: self.id,
                node_id: step.node_id.clone(),
                status: step.status,
            });
        }
        step.status = StepStatus::Current;
        step.unblocked_by = Some(actor.to_string());
        step.unblocked_at = Some(now);
        self.updated_at = now;
        if self.steps[index].automatic {
            self.complete(index, now);
        }
        Ok(())
    }

    /// Re-derives the overall status for `today`.
    ///
    /// Completed cases never change. Otherwise the active step's due date
    /// decides: past it is Overdue, within `at_risk_days` of it is AtRisk,
    /// anything else is OnTrack. Returns true if the status changed.
    pub fn refresh_status(&mut self, today: NaiveDate, at_risk_days: i64) -> bool {
        if self.status == CaseStatus::Completed {
            return false;
        }
        let status = match self.active_step().and_then(|s| s.due_date) {
            Some(due) if today > due => CaseStatus::Overdue,
            Some(due) if (due - today).num_days() <= at_risk_days => CaseStatus::AtRisk,
            _ => CaseStatus::OnTrack,
        };
        let changed = status != self.status;
        self.status = status;
        changed
    }

    fn complete(&mut self, index: usize, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Completed;
        step.completed_at = Some(now);
        self.updated_at = now;
        self.activate(index + 1, now);
    }

    /// Makes step `index` active, or completes the case past the last step.
    fn activate(&mut self, index: usize, now: DateTime<Utc>) {
        let Some(step) = self.steps.get_mut(index) else {
            self.status = CaseStatus::Completed;
            self.completed_at = Some(now);
            return;
        };
        if step.required_action.is_some() {
            step.status = StepStatus::Blocked;
            return;
        }
        step.status = StepStatus::Current;
        if step.automatic {
            self.complete(index, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casewright_workflow::{StepPolicy, TriggerKind, WorkflowDraft};
    use chrono::TimeZone;

    fn step(due: i64) -> StepPolicy {
        StepPolicy {
            due_in_days: Some(due),
            ..Default::default()
        }
    }

    /// Classification (automatic) -> Measurement -> Coverage Offer (blocked)
    /// -> Enrollment -> 1095-C Assignment
    fn onboarding() -> WorkflowDefinition {
        let mut draft = WorkflowDraft::new("New Hire ACA");
        let graph = &mut draft.graph;
        graph
            .add_node(Node::trigger(
                "start",
                "Employee Created",
                TriggerKind::Event {
                    event_name: "employee.created".to_string(),
                },
            ))
            .unwrap();
        graph
            .add_node(Node::action("classify", "Initial Classification", "classify").with_step(
                StepPolicy {
                    automatic: true,
                    ..step(0)
                },
            ))
            .unwrap();
        graph
            .add_node(Node::action("measure", "Measurement Period", "measure").with_step(step(90)))
            .unwrap();
        graph
            .add_node(Node::action("offer", "Coverage Offer", "offer").with_step(StepPolicy {
                required_action: Some("Approve offer letter".to_string()),
                assignee: Some("HR Team".to_string()),
                ..step(100)
            }))
            .unwrap();
        graph
            .add_node(Node::action("enroll", "Enrollment", "enroll").with_step(step(120)))
            .unwrap();
        graph
            .add_node(Node::output("assign", "1095-C Assignment"))
            .unwrap();
        graph.connect("start", "classify").unwrap();
        graph.connect("classify", "measure").unwrap();
        graph.connect("measure", "offer").unwrap();
        graph.connect("offer", "enroll").unwrap();
        graph.connect("enroll", "assign").unwrap();
        draft.publish().unwrap()
    }

    fn jan_15() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap()
    }

    fn statuses(case: &Case) -> Vec<StepStatus> {
        case.steps.iter().map(|s| s.status).collect()
    }

    fn assert_single_active(case: &Case) {
        let active = case.steps.iter().filter(|s| s.status.is_active()).count();
        if case.status == CaseStatus::Completed {
            assert_eq!(active, 0);
        } else {
            assert_eq!(active, 1);
            let index = case.active_index().unwrap();
            assert!(case.steps[..index].iter().all(|s| s.status == StepStatus::Completed));
            assert!(case.steps[index + 1..].iter().all(|s| s.status == StepStatus::Pending));
        }
    }

    #[test]
    fn start_completes_automatic_first_step() {
        let case = Case::start(&onboarding(), "EMP-2841", jan_15()).unwrap();

        use StepStatus::*;
        assert_eq!(statuses(&case), vec![Completed, Current, Pending, Pending, Pending]);
        assert_eq!(case.steps[1].due_date, NaiveDate::from_ymd_opt(2026, 4, 15));
        assert_eq!(case.progress(), (1, 5));
        assert_single_active(&case);
    }

    #[test]
    fn advance_into_required_action_blocks() {
        let mut case = Case::start(&onboarding(), "EMP-2835", jan_15()).unwrap();
        case.advance(jan_15()).unwrap();

        let active = case.active_step().unwrap();
        assert_eq!(active.node_id, NodeId::new("offer"));
        assert_eq!(active.status, StepStatus::Blocked);
        assert_single_active(&case);

        let before = case.clone();
        assert!(matches!(
            case.advance(jan_15()),
            Err(CaseError::StepBlocked { .. })
        ));
        assert_eq!(case, before);
    }

    #[test]
    fn unblock_records_actor_and_continues() {
        let mut case = Case::start(&onboarding(), "EMP-2835", jan_15()).unwrap();
        case.advance(jan_15()).unwrap();
        case.unblock("maria", jan_15()).unwrap();

        let offer = &case.steps[2];
        assert_eq!(offer.status, StepStatus::Current);
        assert_eq!(offer.unblocked_by.as_deref(), Some("maria"));

        assert!(matches!(
            case.unblock("maria", jan_15()),
            Err(CaseError::NotBlocked { .. })
        ));
    }

    #[test]
    fn advance_to_completion_then_fail() {
        let mut case = Case::start(&onboarding(), "EMP-1", jan_15()).unwrap();
        case.advance(jan_15()).unwrap();
        case.unblock("maria", jan_15()).unwrap();
        for _ in 0..3 {
            case.advance(jan_15()).unwrap();
            assert_single_active(&case);
        }
        assert_eq!(case.status, CaseStatus::Completed);
        assert!(case.completed_at.is_some());

        let before = case.clone();
        assert!(matches!(
            case.advance(jan_15()),
            Err(CaseError::AlreadyCompleted { .. })
        ));
        assert_eq!(case, before);
        assert!(!case.refresh_status(NaiveDate::from_ymd_opt(2027, 1, 1).unwrap(), 3));
    }

    #[test]
    fn status_follows_active_due_date() {
        let mut case = Case::start(&onboarding(), "EMP-2", jan_15()).unwrap();
        let day = |m, d| NaiveDate::from_ymd_opt(2026, m, d).unwrap();

        assert!(!case.refresh_status(day(2, 1), 3));
        assert_eq!(case.status, CaseStatus::OnTrack);

        assert!(case.refresh_status(day(4, 13), 3));
        assert_eq!(case.status, CaseStatus::AtRisk);

        assert!(case.refresh_status(day(4, 16), 3));
        assert_eq!(case.status, CaseStatus::Overdue);
    }

    #[test]
    fn automatic_blocked_step_completes_on_unblock() {
        let mut draft = WorkflowDraft::new("Approval");
        draft
            .graph
            .add_node(Node::trigger("start", "Start", TriggerKind::Manual))
            .unwrap();
        draft
            .graph
            .add_node(Node::action("approve", "Approve", "noop").with_step(StepPolicy {
                required_action: Some("Sign off".to_string()),
                automatic: true,
                ..Default::default()
            }))
            .unwrap();
        draft.graph.add_node(Node::output("done", "Done")).unwrap();
        draft.graph.connect("start", "approve").unwrap();
        draft.graph.connect("approve", "done").unwrap();
        let definition = draft.publish().unwrap();

        let mut case = Case::start(&definition, "S-1", jan_15()).unwrap();
        assert_eq!(case.steps[0].status, StepStatus::Blocked);

        case.unblock("lee", jan_15()).unwrap();
        assert_eq!(case.steps[0].status, StepStatus::Completed);
        assert_eq!(case.steps[1].status, StepStatus::Current);
    }

    #[test]
    fn case_serde_roundtrip() {
        let case = Case::start(&onboarding(), "EMP-3", jan_15()).unwrap();
        let json = serde_json::to_string(&case).expect("serialize");
        let parsed: Case = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, case);
    }
}
