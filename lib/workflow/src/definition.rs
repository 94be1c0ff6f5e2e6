//! Workflow definition types.
//!
//! A workflow is authored as a mutable `WorkflowDraft`. Publishing validates
//! the graph and freezes it into an immutable, versioned
//! `WorkflowDefinition`; editing a published definition means revising it
//! into a new draft with the next version.

use crate::error::ValidationError;
use crate::graph::WorkflowGraph;
use crate::node::{Node, TriggerKind};
use crate::trigger::Trigger;
use casewright_core::WorkflowId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    #[serde(default)]
    pub description: Option<String>,
    /// Tags for organization/filtering.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tags: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// What a trigger firing produces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Each firing walks the graph as a Run.
    #[default]
    Run,
    /// Each firing starts a Case for the subject named by `payload[subject_field]`.
    Case {
        /// Payload field holding the subject id.
        subject_field: String,
    },
}

fn default_version() -> u32 {
    1
}

/// A workflow under construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDraft {
    /// Identifier, stable across versions.
    #[serde(default)]
    pub id: WorkflowId,
    /// Version this draft publishes as.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Workflow metadata.
    pub metadata: WorkflowMetadata,
    /// The workflow graph (nodes and edges).
    pub graph: WorkflowGraph,
    /// Run or case execution.
    #[serde(default)]
    pub mode: ExecutionMode,
}

impl WorkflowDraft {
    /// Creates a new draft with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(WorkflowId::new(), name)
    }

    /// Creates a draft with a specific ID.
    #[must_use]
    pub fn with_id(id: WorkflowId, name: impl Into<String>) -> Self {
        Self {
            id,
            version: default_version(),
            metadata: WorkflowMetadata::new(name),
            graph: WorkflowGraph::new(),
            mode: ExecutionMode::Run,
        }
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Validates the draft and freezes it into a definition.
    ///
    /// # Errors
    ///
    /// Returns the first graph violation, or `NonLinearCase` when a
    /// case-bound workflow branches.
    pub fn publish(self) -> Result<WorkflowDefinition, ValidationError> {
        self.graph.validate()?;
        if matches!(self.mode, ExecutionMode::Case { .. }) {
            self.graph.linear_path()?;
        }

        Ok(WorkflowDefinition {
            id: self.id,
            version: self.version,
            metadata: self.metadata,
            graph: Arc::new(self.graph),
            mode: self.mode,
            published_at: Utc::now(),
        })
    }
}

/// A published, immutable workflow definition.
///
/// Runs hold an `Arc` to the graph they started with, so publishing a new
/// version never changes what an in-flight Run walks.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDefinition {
    id: WorkflowId,
    version: u32,
    metadata: WorkflowMetadata,
    graph: Arc<WorkflowGraph>,
    mode: ExecutionMode,
    published_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    #[must_use]
    pub fn id(&self) -> WorkflowId {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    #[must_use]
    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    #[must_use]
    pub fn mode(&self) -> &ExecutionMode {
        &self.mode
    }

    #[must_use]
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Returns the trigger node. Publication guarantees there is one.
    #[must_use]
    pub fn trigger_node(&self) -> Option<&Node> {
        self.graph.trigger_node()
    }

    /// Returns the trigger configuration.
    #[must_use]
    pub fn trigger_kind(&self) -> Option<&TriggerKind> {
        self.trigger_node().and_then(Node::trigger_kind)
    }

    /// Builds the denormalized trigger record for the registry.
    #[must_use]
    pub fn trigger(&self) -> Option<Trigger> {
        let node = self.trigger_node()?;
        let kind = node.trigger_kind()?.clone();
        Some(Trigger::new(self.id, node.id.clone(), kind))
    }

    /// Returns a draft for the next version, preserving the ID.
    #[must_use]
    pub fn revise(&self) -> WorkflowDraft {
        WorkflowDraft {
            id: self.id,
            version: self.version + 1,
            metadata: self.metadata.clone(),
            graph: (*self.graph).clone(),
            mode: self.mode.clone(),
        }
    }
}

/// Summary information about a workflow (for listings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    /// Workflow ID.
    pub id: WorkflowId,
    /// Published version.
    pub version: u32,
    /// Workflow name.
    pub name: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Number of nodes in the graph.
    pub node_count: usize,
    /// When this version was published.
    pub published_at: DateTime<Utc>,
}

impl From<&WorkflowDefinition> for WorkflowSummary {
    fn from(definition: &WorkflowDefinition) -> Self {
        Self {
            id: definition.id,
            version: definition.version,
            name: definition.metadata.name.clone(),
            description: definition.metadata.description.clone(),
            tags: definition.metadata.tags.clone(),
            node_count: definition.graph.node_count(),
            published_at: definition.published_at,
        }
    }
}
