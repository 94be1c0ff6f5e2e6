//! Trigger registry.
//!
//! Maps external occurrences to the published definitions eligible to run:
//! named events (`fire`), schedule ticks (`tick`) and operator invocations
//! (`invoke`). Each match becomes a `Launch` for the execution engine.
//! Only Active definitions ever match; Paused and Error definitions stay
//! registered so they can be resumed.

use crate::error::RegistryError;
use crate::schedule::{CronSchedule, truncate_to_minute};
use casewright_core::WorkflowId;
use casewright_workflow::{Trigger, TriggerContext, TriggerKind, WorkflowDefinition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Per-definition status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Triggers match.
    Active,
    /// Paused by an operator; triggers are retained but never match.
    Paused,
    /// Paused automatically by the failure policy.
    Error,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Paused => f.write_str("paused"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// A registered definition and its trigger state.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The current published version.
    pub definition: WorkflowDefinition,
    /// The denormalized trigger.
    pub trigger: Trigger,
    /// Parsed schedule for schedule triggers.
    pub schedule: Option<CronSchedule>,
    /// Current status.
    pub status: WorkflowStatus,
    /// Why the status last changed, for Error and Paused.
    pub status_reason: Option<String>,
    /// When the status last changed.
    pub status_changed_at: DateTime<Utc>,
    /// The last minute a schedule tick launched this definition.
    pub last_fired_minute: Option<DateTime<Utc>>,
}

impl Registration {
    /// Returns the next scheduled launch after `after`, for schedule triggers.
    #[must_use]
    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.as_ref()?.next_after(after)
    }

    fn set_status(&mut self, status: WorkflowStatus, reason: Option<String>) {
        self.status = status;
        self.status_reason = reason;
        self.status_changed_at = Utc::now();
    }
}

/// A definition selected to run, with the context of what fired it.
#[derive(Debug, Clone)]
pub struct Launch {
    /// The definition to run.
    pub definition: WorkflowDefinition,
    /// What fired it and with which payload.
    pub context: TriggerContext,
}

/// The trigger registry.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    registrations: RwLock<HashMap<WorkflowId, Registration>>,
}

impl TriggerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a published definition, replacing an older version.
    ///
    /// A replaced definition keeps its status and schedule bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition has no trigger, its cron
    /// expression is invalid, or the same or a newer version is registered.
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id(), version = definition.version()))]
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<Trigger, RegistryError> {
        let workflow_id = definition.id();
        let trigger = definition
            .trigger()
            .ok_or(RegistryError::MissingTrigger { workflow_id })?;
        let schedule = match &trigger.kind {
            TriggerKind::Schedule { cron } => Some(CronSchedule::parse(cron)?),
            _ => None,
        };

        let mut registrations = self.registrations.write().await;
        let registration = match registrations.remove(&workflow_id) {
            Some(existing) if existing.definition.version() >= definition.version() => {
                let err = RegistryError::StaleVersion {
                    workflow_id,
                    registered: existing.definition.version(),
                    offered: definition.version(),
                };
                registrations.insert(workflow_id, existing);
                return Err(err);
            }
            Some(existing) => Registration {
                definition,
                trigger: trigger.clone(),
                schedule,
                ..existing
            },
            None => Registration {
                definition,
                trigger: trigger.clone(),
                schedule,
                status: WorkflowStatus::Active,
                status_reason: None,
                status_changed_at: Utc::now(),
                last_fired_minute: None,
            },
        };
        info!(trigger = %trigger.kind, status = %registration.status, "workflow registered");
        registrations.insert(workflow_id, registration);
        Ok(trigger)
    }

    /// Removes a definition entirely (retirement).
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the definition is unknown.
    #[instrument(skip(self), fields(workflow_id = %workflow_id))]
    pub async fn deregister(&self, workflow_id: WorkflowId) -> Result<Registration, RegistryError> {
        let removed = self
            .registrations
            .write()
            .await
            .remove(&workflow_id)
            .ok_or(RegistryError::NotRegistered { workflow_id })?;
        info!("workflow deregistered");
        Ok(removed)
    }

    /// Returns a registration.
    pub async fn get(&self, workflow_id: WorkflowId) -> Option<Registration> {
        self.registrations.read().await.get(&workflow_id).cloned()
    }

    /// Returns all registrations ordered by workflow ID.
    pub async fn list(&self) -> Vec<Registration> {
        let mut registrations: Vec<_> = self.registrations.read().await.values().cloned().collect();
        registrations.sort_by_key(|r| r.definition.id());
        registrations
    }

    /// Selects every Active definition listening for `event_name`.
    #[instrument(skip(self, payload))]
    pub async fn fire(&self, event_name: &str, payload: JsonValue) -> Vec<Launch> {
        let registrations = self.registrations.read().await;
        let mut launches: Vec<Launch> = registrations
            .values()
            .filter(|r| r.status == WorkflowStatus::Active && r.trigger.listens_for(event_name))
            .map(|r| Launch {
                definition: r.definition.clone(),
                context: TriggerContext::event(event_name, payload.clone()),
            })
            .collect();
        launches.sort_by_key(|l| l.definition.id());
        debug!(matched = launches.len(), "event matched");
        launches
    }

    /// Selects every Active schedule definition due in the minute
    /// containing `now`.
    ///
    /// Each definition launches at most once per minute, so repeated ticks
    /// for the same minute are idempotent. Missed minutes are not
    /// backfilled.
    #[instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<Launch> {
        let minute = truncate_to_minute(now);
        let mut registrations = self.registrations.write().await;
        let mut launches = Vec::new();

        for registration in registrations.values_mut() {
            if registration.status != WorkflowStatus::Active {
                continue;
            }
            let Some(schedule) = &registration.schedule else {
                continue;
            };
            if !schedule.matches(minute)
                || registration
                    .last_fired_minute
                    .is_some_and(|last| last >= minute)
            {
                continue;
            }
            registration.last_fired_minute = Some(minute);
            launches.push(Launch {
                definition: registration.definition.clone(),
                context: TriggerContext::schedule(schedule.expression(), minute),
            });
        }

        launches.sort_by_key(|l| l.definition.id());
        if !launches.is_empty() {
            debug!(matched = launches.len(), minute = %minute, "schedule matched");
        }
        launches
    }

    /// Selects a Manual definition on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition is unknown, not Active, or not
    /// manually triggered.
    #[instrument(skip(self, payload), fields(workflow_id = %workflow_id))]
    pub async fn invoke(
        &self,
        workflow_id: WorkflowId,
        actor: &str,
        payload: JsonValue,
    ) -> Result<Launch, RegistryError> {
        let registrations = self.registrations.read().await;
        let registration = registrations
            .get(&workflow_id)
            .ok_or(RegistryError::NotRegistered { workflow_id })?;
        if !registration.trigger.is_manual() {
            return Err(RegistryError::NotManual {
                workflow_id,
                kind: registration.trigger.kind.clone(),
            });
        }
        if registration.status != WorkflowStatus::Active {
            return Err(RegistryError::NotActive {
                workflow_id,
                status: registration.status,
            });
        }
        info!(actor, "manual invocation");
        Ok(Launch {
            definition: registration.definition.clone(),
            context: TriggerContext::manual(actor).with_payload(payload),
        })
    }

    /// Pauses a definition.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the definition is unknown.
    pub async fn pause(
        &self,
        workflow_id: WorkflowId,
        reason: Option<String>,
    ) -> Result<WorkflowStatus, RegistryError> {
        self.transition(workflow_id, WorkflowStatus::Paused, reason)
            .await
    }

    /// Returns a Paused or Error definition to Active.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the definition is unknown.
    pub async fn resume(&self, workflow_id: WorkflowId) -> Result<WorkflowStatus, RegistryError> {
        self.transition(workflow_id, WorkflowStatus::Active, None)
            .await
    }

    /// Moves a definition to Error. A Paused definition stays Paused with
    /// its operator's reason.
    ///
    /// # Errors
    ///
    /// Returns `NotRegistered` if the definition is unknown.
    pub async fn mark_error(
        &self,
        workflow_id: WorkflowId,
        reason: impl Into<String>,
    ) -> Result<WorkflowStatus, RegistryError> {
        self.transition(workflow_id, WorkflowStatus::Error, Some(reason.into()))
            .await
    }

    /// Sets the status and returns the previous one.
    #[instrument(skip(self), fields(workflow_id = %workflow_id, to = %status))]
    async fn transition(
        &self,
        workflow_id: WorkflowId,
        status: WorkflowStatus,
        reason: Option<String>,
    ) -> Result<WorkflowStatus, RegistryError> {
        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(&workflow_id)
            .ok_or(RegistryError::NotRegistered { workflow_id })?;
        let previous = registration.status;
        if status == WorkflowStatus::Error && previous == WorkflowStatus::Paused {
            debug!(reason = ?reason, "paused workflow left paused");
            return Ok(previous);
        }
        if previous != status || registration.status_reason != reason {
            registration.set_status(status, reason.clone());
            match status {
                WorkflowStatus::Error => warn!(from = %previous, reason = ?reason, "workflow status changed"),
                _ => info!(from = %previous, reason = ?reason, "workflow status changed"),
            }
        }
        Ok(previous)
    }
}
