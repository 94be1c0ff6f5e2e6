//! Trigger types for workflow initiation.
//!
//! Triggers are nodes in the workflow graph that serve as entry points.
//! A published definition's trigger node is denormalized into a `Trigger`
//! record so the registry can match occurrences without walking graphs.

use crate::node::{NodeId, TriggerKind};
use casewright_core::{TriggerId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

/// A denormalized trigger record for efficient lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for this trigger.
    pub id: TriggerId,
    /// The workflow this trigger belongs to.
    pub workflow_id: WorkflowId,
    /// The node ID within the workflow graph.
    pub node_id: NodeId,
    /// What the trigger listens for.
    pub kind: TriggerKind,
    /// When this trigger was registered.
    pub created_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a new trigger.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, node_id: NodeId, kind: TriggerKind) -> Self {
        Self {
            id: TriggerId::new(),
            workflow_id,
            node_id,
            kind,
            created_at: Utc::now(),
        }
    }

    /// Returns true if this trigger listens for the named event.
    #[must_use]
    pub fn listens_for(&self, event: &str) -> bool {
        matches!(&self.kind, TriggerKind::Event { event_name } if event_name == event)
    }

    /// Returns true for manual triggers.
    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self.kind, TriggerKind::Manual)
    }
}

/// What fired a run: a description for listings, the payload the graph
/// evaluates against, and who or what caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Human-readable description (e.g., "event 'claim.submitted'").
    pub description: String,
    /// Payload the conditions and handlers see.
    pub payload: JsonValue,
    /// When the trigger fired.
    pub fired_at: DateTime<Utc>,
    /// Operator who invoked a manual trigger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl TriggerContext {
    /// Context for a named event.
    #[must_use]
    pub fn event(event_name: &str, payload: JsonValue) -> Self {
        Self {
            description: format!("event '{event_name}'"),
            payload,
            fired_at: Utc::now(),
            actor: None,
        }
    }

    /// Context for a schedule tick.
    #[must_use]
    pub fn schedule(cron: &str, fired_at: DateTime<Utc>) -> Self {
        Self {
            description: format!("schedule '{cron}'"),
            payload: json!({ "scheduled_at": fired_at.to_rfc3339() }),
            fired_at,
            actor: None,
        }
    }

    /// Context for an operator invocation.
    #[must_use]
    pub fn manual(actor: impl Into<String>) -> Self {
        let actor = actor.into();
        Self {
            description: format!("manual by {actor}"),
            payload: JsonValue::Object(serde_json::Map::new()),
            fired_at: Utc::now(),
            actor: Some(actor),
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    /// The `trigger.*` entry of an expression scope.
    #[must_use]
    pub fn scope_entry(&self) -> JsonValue {
        json!({
            "description": self.description,
            "actor": self.actor,
            "fired_at": self.fired_at.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_trigger_matching() {
        let trigger = Trigger::new(
            WorkflowId::new(),
            NodeId::new("start"),
            TriggerKind::Event {
                event_name: "employee.created".to_string(),
            },
        );
        assert!(trigger.listens_for("employee.created"));
        assert!(!trigger.listens_for("employee.deleted"));
        assert!(!trigger.is_manual());
    }

    #[test]
    fn manual_context_records_actor() {
        let ctx = TriggerContext::manual("alice").with_payload(json!({"amount": 10}));
        assert_eq!(ctx.actor.as_deref(), Some("alice"));
        assert_eq!(ctx.description, "manual by alice");
        assert_eq!(ctx.scope_entry()["actor"], json!("alice"));
    }

    #[test]
    fn trigger_serde_roundtrip() {
        let trigger = Trigger::new(
            WorkflowId::new(),
            NodeId::new("start"),
            TriggerKind::Schedule {
                cron: "0 7 * * *".to_string(),
            },
        );
        let json = serde_json::to_string(&trigger).expect("serialize");
        let parsed: Trigger = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(trigger.id, parsed.id);
        assert_eq!(trigger.kind, parsed.kind);
    }
}
