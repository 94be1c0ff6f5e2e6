//! Case tracker.
//!
//! Owns case transitions. `advance` and `unblock` on one case are
//! serialized by a per-case lock; different cases proceed independently.

use crate::case::{Case, CaseStatus};
use crate::error::{CaseError, CaseStoreError};
use crate::store::{CaseFilter, CaseStore};
use casewright_core::CaseId;
use casewright_workflow::WorkflowDefinition;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Default proximity window, in days, for the AtRisk status.
pub const DEFAULT_AT_RISK_DAYS: i64 = 3;

/// Drives cases through their steps.
pub struct CaseTracker {
    store: Arc<dyn CaseStore>,
    locks: Mutex<HashMap<CaseId, Arc<Mutex<()>>>>,
    at_risk_days: i64,
}

impl std::fmt::Debug for CaseTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaseTracker")
            .field("at_risk_days", &self.at_risk_days)
            .finish_non_exhaustive()
    }
}

impl CaseTracker {
    #[must_use]
    pub fn new(store: Arc<dyn CaseStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            at_risk_days: DEFAULT_AT_RISK_DAYS,
        }
    }

    /// Sets the AtRisk proximity window.
    #[must_use]
    pub fn with_at_risk_days(mut self, days: i64) -> Self {
        self.at_risk_days = days;
        self
    }

    /// Starts a case for `subject_id`.
    ///
    /// # Errors
    ///
    /// Fails with `CaseConflict` if the subject already has a live case for
    /// this definition, or `InvalidDefinition` if the definition branches.
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id()))]
    pub async fn start(
        &self,
        definition: &WorkflowDefinition,
        subject_id: &str,
    ) -> Result<Case, CaseError> {
        let now = Utc::now();
        let mut case = Case::start(definition, subject_id, now)?;
        case.refresh_status(now.date_naive(), self.at_risk_days);
        self.store.insert(case.clone()).await?;

        info!(
            case_id = %case.id,
            status = %case.status,
            active = ?case.active_step().map(|s| &s.node_id),
            "case started"
        );
        Ok(case)
    }

    /// Completes the Current step and activates the next one.
    ///
    /// # Errors
    ///
    /// Fails without changing the case if it is completed, Blocked or
    /// unknown.
    #[instrument(skip(self))]
    pub async fn advance(&self, id: CaseId) -> Result<Case, CaseError> {
        self.transition(id, |case, now| case.advance(now)).await
    }

    /// Clears the Blocked step on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Fails without changing the case unless its active step is Blocked.
    #[instrument(skip(self))]
    pub async fn unblock(&self, id: CaseId, actor: &str) -> Result<Case, CaseError> {
        self.transition(id, |case, now| case.unblock(actor, now)).await
    }

    /// Returns the case's overall status.
    ///
    /// # Errors
    ///
    /// Fails with `NotFound` for an unknown case.
    pub async fn status(&self, id: CaseId) -> Result<CaseStatus, CaseError> {
        Ok(self.load(id).await?.status)
    }

    /// Returns the case, or `None` if unknown.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get(&self, id: CaseId) -> Result<Option<Case>, CaseError> {
        Ok(self.store.get(id).await?)
    }

    /// Lists cases matching `filter`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn list(&self, filter: &CaseFilter) -> Result<Vec<Case>, CaseError> {
        Ok(self.store.list(filter).await?)
    }

    /// Re-derives the status of every live case for `now` and persists the
    /// ones that changed. Returns the changed cases.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    #[instrument(skip(self))]
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<Vec<Case>, CaseError> {
        let today = now.date_naive();
        let mut changed = Vec::new();
        for live in self.store.live().await? {
            let lock = self.lock_for(live.id).await;
            let _guard = lock.lock().await;

            // Re-read under the lock; a concurrent transition may have won.
            let Some(mut case) = self.store.get(live.id).await? else {
                continue;
            };
            let previous = case.status;
            if case.refresh_status(today, self.at_risk_days) {
                self.store.update(case.clone()).await?;
                match case.status {
                    CaseStatus::Overdue => warn!(
                        case_id = %case.id,
                        subject_id = %case.subject_id,
                        from = %previous,
                        "case overdue"
                    ),
                    _ => info!(
                        case_id = %case.id,
                        from = %previous,
                        to = %case.status,
                        "case status changed"
                    ),
                }
                changed.push(case);
            }
        }
        debug!(changed = changed.len(), "cases refreshed");
        Ok(changed)
    }

    async fn transition<F>(&self, id: CaseId, apply: F) -> Result<Case, CaseError>
    where
        F: FnOnce(&mut Case, DateTime<Utc>) -> Result<(), CaseError>,
    {
        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        let mut case = match self.load(id).await {
            Ok(case) => case,
            Err(e) => {
                self.release(id).await;
                return Err(e);
            }
        };
        let now = Utc::now();
        if let Err(e) = apply(&mut case, now) {
            warn!(case_id = %id, error = %e, "case transition rejected");
            return Err(e);
        }
        case.refresh_status(now.date_naive(), self.at_risk_days);
        self.store.update(case.clone()).await?;
        // Completed cases accept no further transitions.
        if case.status == CaseStatus::Completed {
            self.release(id).await;
        }

        match case.active_step() {
            Some(step) => info!(
                case_id = %id,
                node_id = %step.node_id,
                step_status = %step.status,
                required_action = ?step.required_action,
                "case advanced"
            ),
            None => info!(case_id = %id, "case completed"),
        }
        Ok(case)
    }

    async fn load(&self, id: CaseId) -> Result<Case, CaseError> {
        self.store
            .get(id)
            .await?
            .ok_or(CaseError::Store(CaseStoreError::NotFound { id }))
    }

    async fn lock_for(&self, id: CaseId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id).or_default())
    }

    async fn release(&self, id: CaseId) {
        self.locks.lock().await.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::StepStatus;
    use crate::store::InMemoryCaseStore;
    use casewright_workflow::{Node, NodeId, StepPolicy, TriggerKind, WorkflowDraft};
    use chrono::Duration;

    fn tracker() -> CaseTracker {
        CaseTracker::new(Arc::new(InMemoryCaseStore::new()))
    }

    /// Review (blocked) -> Notify -> Archive
    fn definition() -> WorkflowDefinition {
        let mut draft = WorkflowDraft::new("Leave of Absence");
        let graph = &mut draft.graph;
        graph
            .add_node(Node::trigger("start", "Start", TriggerKind::Manual))
            .unwrap();
        graph
            .add_node(Node::action("review", "Review", "review").with_step(StepPolicy {
                due_in_days: Some(10),
                required_action: Some("Collect medical certification".to_string()),
                ..Default::default()
            }))
            .unwrap();
        graph
            .add_node(Node::action("notify", "Notify Payroll", "notify").with_step(StepPolicy {
                due_in_days: Some(14),
                ..Default::default()
            }))
            .unwrap();
        graph.add_node(Node::output("archive", "Archive")).unwrap();
        graph.connect("start", "review").unwrap();
        graph.connect("review", "notify").unwrap();
        graph.connect("notify", "archive").unwrap();
        draft.publish().unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let tracker = tracker();
        let def = definition();

        let case = tracker.start(&def, "EMP-9").await.unwrap();
        assert_eq!(case.steps[0].status, StepStatus::Blocked);
        assert_eq!(tracker.status(case.id).await.unwrap(), CaseStatus::OnTrack);

        let err = tracker.advance(case.id).await.unwrap_err();
        assert!(err.to_string().contains("Collect medical certification"));

        let case = tracker.unblock(case.id, "dana").await.unwrap();
        assert_eq!(case.steps[0].unblocked_by.as_deref(), Some("dana"));

        tracker.advance(case.id).await.unwrap();
        let case = tracker.advance(case.id).await.unwrap();
        assert_eq!(case.active_step().unwrap().node_id, NodeId::new("archive"));

        let case = tracker.advance(case.id).await.unwrap();
        assert_eq!(case.status, CaseStatus::Completed);
        assert!(matches!(
            tracker.advance(case.id).await,
            Err(CaseError::AlreadyCompleted { .. })
        ));
    }

    #[tokio::test]
    async fn start_rejects_second_live_case() {
        let tracker = tracker();
        let def = definition();
        tracker.start(&def, "EMP-9").await.unwrap();

        let err = tracker.start(&def, "EMP-9").await.unwrap_err();
        assert!(matches!(
            err,
            CaseError::Store(CaseStoreError::CaseConflict { .. })
        ));
    }

    #[tokio::test]
    async fn refresh_marks_at_risk_then_overdue() {
        let tracker = tracker();
        let def = definition();
        let case = tracker.start(&def, "EMP-9").await.unwrap();
        let started = case.started_at;

        assert!(tracker.refresh(started).await.unwrap().is_empty());

        let changed = tracker.refresh(started + Duration::days(8)).await.unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(tracker.status(case.id).await.unwrap(), CaseStatus::AtRisk);

        tracker.refresh(started + Duration::days(11)).await.unwrap();
        assert_eq!(tracker.status(case.id).await.unwrap(), CaseStatus::Overdue);

        // Unchanged status is not written again.
        assert!(tracker
            .refresh(started + Duration::days(12))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_case_is_not_found() {
        let tracker = tracker();
        assert!(matches!(
            tracker.status(CaseId::new()).await,
            Err(CaseError::Store(CaseStoreError::NotFound { .. }))
        ));
        assert!(tracker.get(CaseId::new()).await.unwrap().is_none());
        assert!(tracker.advance(CaseId::new()).await.is_err());
        assert!(tracker.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_advances_serialize() {
        let tracker = Arc::new(tracker());
        let mut draft = WorkflowDraft::new("Chain");
        draft
            .graph
            .add_node(Node::trigger("start", "Start", TriggerKind::Manual))
            .unwrap();
        let mut previous = "start".to_string();
        for i in 0..4 {
            let id = format!("s{i}");
            draft
                .graph
                .add_node(Node::action(id.as_str(), id.as_str(), "noop"))
                .unwrap();
            draft.graph.connect(previous.as_str(), id.as_str()).unwrap();
            previous = id;
        }
        let def = draft.publish().unwrap();
        let case = tracker.start(&def, "S").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let tracker = Arc::clone(&tracker);
            tasks.push(tokio::spawn(async move { tracker.advance(case.id).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let case = tracker.get(case.id).await.unwrap().unwrap();
        assert_eq!(case.status, CaseStatus::Completed);
        assert_eq!(case.progress(), (4, 4));
        assert!(tracker.locks.lock().await.is_empty());
    }
}
