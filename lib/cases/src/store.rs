//! Case storage.

use crate::case::{Case, CaseStatus};
use crate::error::CaseStoreError;
use async_trait::async_trait;
use casewright_core::{CaseId, WorkflowId};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Filter for listing cases. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaseFilter {
    /// Only cases of this definition.
    pub workflow_id: Option<WorkflowId>,
    /// Only cases about this subject.
    pub subject_id: Option<String>,
    /// Only cases in this status.
    pub status: Option<CaseStatus>,
}

impl CaseFilter {
    #[must_use]
    pub fn for_workflow(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id: Some(workflow_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Returns true if `case` passes every set field.
    #[must_use]
    pub fn matches(&self, case: &Case) -> bool {
        self.workflow_id.is_none_or(|id| id == case.workflow_id)
            && self
                .subject_id
                .as_deref()
                .is_none_or(|subject| subject == case.subject_id)
            && self.status.is_none_or(|status| status == case.status)
    }
}

/// Persistent case storage.
///
/// Writes are atomic per case. `insert` enforces at most one live case
/// per (subject, definition) pair.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Stores a new case.
    ///
    /// Fails with `CaseConflict` if a live case exists for the same subject
    /// and definition.
    async fn insert(&self, case: Case) -> Result<(), CaseStoreError>;

    /// Replaces a stored case.
    async fn update(&self, case: Case) -> Result<(), CaseStoreError>;

    async fn get(&self, id: CaseId) -> Result<Option<Case>, CaseStoreError>;

    /// Lists matching cases ordered by start time.
    async fn list(&self, filter: &CaseFilter) -> Result<Vec<Case>, CaseStoreError>;

    /// Lists cases that have not completed.
    async fn live(&self) -> Result<Vec<Case>, CaseStoreError> {
        let cases = self.list(&CaseFilter::default()).await?;
        Ok(cases.into_iter().filter(Case::is_live).collect())
    }
}

/// In-memory case store.
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    cases: RwLock<HashMap<CaseId, Case>>,
}

impl InMemoryCaseStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn insert(&self, case: Case) -> Result<(), CaseStoreError> {
        let mut cases = self.cases.write().await;
        if let Some(existing) = cases.values().find(|c| {
            c.is_live() && c.subject_id == case.subject_id && c.workflow_id == case.workflow_id
        }) {
            return Err(CaseStoreError::CaseConflict {
                subject_id: case.subject_id,
                workflow_id: case.workflow_id,
                existing: existing.id,
            });
        }
        cases.insert(case.id, case);
        Ok(())
    }

    async fn update(&self, case: Case) -> Result<(), CaseStoreError> {
        let mut cases = self.cases.write().await;
        let slot = cases
            .get_mut(&case.id)
            .ok_or(CaseStoreError::NotFound { id: case.id })?;
        *slot = case;
        Ok(())
    }

    async fn get(&self, id: CaseId) -> Result<Option<Case>, CaseStoreError> {
        Ok(self.cases.read().await.get(&id).cloned())
    }

    async fn list(&self, filter: &CaseFilter) -> Result<Vec<Case>, CaseStoreError> {
        let cases = self.cases.read().await;
        let mut matching: Vec<Case> = cases.values().filter(|c| filter.matches(c)).cloned().collect();
        matching.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casewright_workflow::{Node, TriggerKind, WorkflowDefinition, WorkflowDraft};
    use chrono::Utc;

    fn definition() -> WorkflowDefinition {
        let mut draft = WorkflowDraft::new("Termination");
        draft
            .graph
            .add_node(Node::trigger("start", "Start", TriggerKind::Manual))
            .unwrap();
        draft
            .graph
            .add_node(Node::action("cobra", "COBRA Notice", "cobra"))
            .unwrap();
        draft.graph.connect("start", "cobra").unwrap();
        draft.publish().unwrap()
    }

    #[tokio::test]
    async fn second_live_case_conflicts() {
        let store = InMemoryCaseStore::new();
        let def = definition();
        let first = Case::start(&def, "EMP-1", Utc::now()).unwrap();
        let first_id = first.id;
        store.insert(first).await.unwrap();

        let second = Case::start(&def, "EMP-1", Utc::now()).unwrap();
        let err = store.insert(second).await.unwrap_err();
        assert_eq!(
            err,
            CaseStoreError::CaseConflict {
                subject_id: "EMP-1".to_string(),
                workflow_id: def.id(),
                existing: first_id,
            }
        );

        let other_subject = Case::start(&def, "EMP-2", Utc::now()).unwrap();
        store.insert(other_subject).await.unwrap();
    }

    #[tokio::test]
    async fn completed_case_frees_subject() {
        let store = InMemoryCaseStore::new();
        let def = definition();
        let mut case = Case::start(&def, "EMP-1", Utc::now()).unwrap();
        case.advance(Utc::now()).unwrap();
        assert_eq!(case.status, CaseStatus::Completed);
        store.insert(case).await.unwrap();

        let again = Case::start(&def, "EMP-1", Utc::now()).unwrap();
        store.insert(again).await.unwrap();
        assert_eq!(store.live().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let store = InMemoryCaseStore::new();
        let def = definition();
        for subject in ["EMP-1", "EMP-2", "EMP-3"] {
            store
                .insert(Case::start(&def, subject, Utc::now()).unwrap())
                .await
                .unwrap();
        }

        let all = store.list(&CaseFilter::for_workflow(def.id())).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].started_at <= w[1].started_at));

        let one = store
            .list(&CaseFilter::default().with_subject("EMP-2"))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);

        let none = store
            .list(&CaseFilter::default().with_status(CaseStatus::Overdue))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn update_unknown_case_fails() {
        let store = InMemoryCaseStore::new();
        let case = Case::start(&definition(), "EMP-1", Utc::now()).unwrap();
        assert!(matches!(
            store.update(case).await,
            Err(CaseStoreError::NotFound { .. })
        ));
    }
}
