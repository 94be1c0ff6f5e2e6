//! Workflow node types and configurations.
//!
//! Nodes are the building blocks of workflows. Each node has:
//! - An author-supplied ID, unique within its graph
//! - A display name
//! - A kind-specific configuration (Trigger, Condition, Action, AgentTransform, Output)
//! - An optional step policy consulted when the workflow drives a case

use crate::notify::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use ulid::Ulid;

/// An identifier for a node, unique within one workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a node ID from an author-supplied string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a node ID from a freshly generated ULID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("node_{}", Ulid::new()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The kind of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Entry point that initiates workflow execution.
    Trigger,
    /// Boolean branch with `yes`/`no` outputs.
    Condition,
    /// Side-effecting step backed by an external handler or a notification.
    Action,
    /// Agent-backed transformation step.
    AgentTransform,
    /// Terminal step.
    Output,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Trigger => "trigger",
            Self::Condition => "condition",
            Self::Action => "action",
            Self::AgentTransform => "agent_transform",
            Self::Output => "output",
        };
        f.write_str(name)
    }
}

/// Configuration for trigger nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fires when a named event is raised.
    Event {
        /// The event name to listen for (e.g., "employee.created").
        event_name: String,
    },
    /// Cron-style scheduled trigger.
    Schedule {
        /// Cron expression (e.g., "0 6 1 * *" for 6am on the 1st).
        cron: String,
    },
    /// Operator-initiated trigger.
    Manual,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event { event_name } => write!(f, "event '{event_name}'"),
            Self::Schedule { cron } => write!(f, "schedule '{cron}'"),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Configuration for condition nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Boolean expression evaluated against the run scope.
    pub expression: String,
}

/// Configuration for action nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Invoke a handler supplied by the embedding application.
    Invoke {
        /// Handler name, resolved through the handler registry.
        handler: String,
        /// Handler-specific parameters; not interpreted by the engine.
        #[serde(default)]
        parameters: JsonValue,
    },
    /// Send a notification through the dispatch interface.
    Notify {
        /// Delivery channel.
        channel: Channel,
        /// Recipient (user, team, or address); a template like `message`.
        recipient: String,
        /// minijinja template rendered against the run scope, e.g.
        /// `New hire {{ employee_id }}`.
        message: String,
    },
}

/// Configuration for agent transform nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, resolved through the handler registry.
    pub agent: String,
    /// Agent-specific parameters.
    #[serde(default)]
    pub parameters: JsonValue,
}

/// Configuration for output nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output format label (e.g., "pdf", "report").
    #[serde(default)]
    pub format: Option<String>,
    /// Output-specific parameters.
    #[serde(default)]
    pub parameters: JsonValue,
}

/// Kind-specific node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Trigger node configuration.
    Trigger(TriggerKind),
    /// Condition node configuration.
    Condition(ConditionConfig),
    /// Action node configuration.
    Action(ActionConfig),
    /// Agent transform node configuration.
    AgentTransform(AgentConfig),
    /// Output node configuration.
    Output(OutputConfig),
}

impl NodeConfig {
    /// Returns the kind of node this configuration belongs to.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Trigger(_) => NodeKind::Trigger,
            Self::Condition(_) => NodeKind::Condition,
            Self::Action(_) => NodeKind::Action,
            Self::AgentTransform(_) => NodeKind::AgentTransform,
            Self::Output(_) => NodeKind::Output,
        }
    }
}

/// Per-step settings consulted when a workflow drives a case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPolicy {
    /// Days after the case starts by which this step is due.
    #[serde(default)]
    pub due_in_days: Option<i64>,
    /// Who is responsible for the step.
    #[serde(default)]
    pub assignee: Option<String>,
    /// Manual action that must happen before the step can proceed.
    #[serde(default)]
    pub required_action: Option<String>,
    /// Whether the step completes on its own once it becomes current.
    #[serde(default)]
    pub automatic: bool,
}

/// A node in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within the graph.
    pub id: NodeId,
    /// Display name.
    pub name: String,
    /// Kind-specific configuration.
    #[serde(flatten)]
    pub config: NodeConfig,
    /// Case step settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepPolicy>,
}

impl Node {
    /// Creates a node with the given ID, name and configuration.
    #[must_use]
    pub fn new(id: impl Into<NodeId>, name: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            step: None,
        }
    }

    /// Creates a trigger node.
    #[must_use]
    pub fn trigger(id: impl Into<NodeId>, name: impl Into<String>, kind: TriggerKind) -> Self {
        Self::new(id, name, NodeConfig::Trigger(kind))
    }

    /// Creates a condition node.
    #[must_use]
    pub fn condition(
        id: impl Into<NodeId>,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self::new(
            id,
            name,
            NodeConfig::Condition(ConditionConfig {
                expression: expression.into(),
            }),
        )
    }

    /// Creates an action node invoking the named handler.
    #[must_use]
    pub fn action(id: impl Into<NodeId>, name: impl Into<String>, handler: impl Into<String>) -> Self {
        Self::new(
            id,
            name,
            NodeConfig::Action(ActionConfig::Invoke {
                handler: handler.into(),
                parameters: JsonValue::Null,
            }),
        )
    }

    /// Creates an agent transform node.
    #[must_use]
    pub fn agent(id: impl Into<NodeId>, name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::new(
            id,
            name,
            NodeConfig::AgentTransform(AgentConfig {
                agent: agent.into(),
                parameters: JsonValue::Null,
            }),
        )
    }

    /// Creates an output node.
    #[must_use]
    pub fn output(id: impl Into<NodeId>, name: impl Into<String>) -> Self {
        Self::new(id, name, NodeConfig::Output(OutputConfig::default()))
    }

    /// Attaches a case step policy.
    #[must_use]
    pub fn with_step(mut self, step: StepPolicy) -> Self {
        self.step = Some(step);
        self
    }

    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    /// Returns the trigger configuration if this is a trigger node.
    #[must_use]
    pub fn trigger_kind(&self) -> Option<&TriggerKind> {
        match &self.config {
            NodeConfig::Trigger(kind) => Some(kind),
            _ => None,
        }
    }
}
