//! Workflow model and execution for casewright.
//!
//! This crate provides:
//!
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and edges,
//!   validated before a draft is published as an immutable definition
//! - **Expressions**: The boolean language Condition nodes branch on
//! - **Execution**: The engine that walks a definition from its trigger and
//!   records a Run, one step outcome per visited node
//! - **Run History**: Append-only storage of Runs and statistics over them
//! - **Collaborators**: Handler registry and notification dispatch interfaces
//!   supplied by the embedding application

pub mod definition;
pub mod edge;
pub mod engine;
pub mod error;
pub mod execution;
pub mod expression;
pub mod graph;
pub mod handler;
pub mod history;
pub mod node;
pub mod notify;
pub mod trigger;

pub use definition::{ExecutionMode, WorkflowDefinition, WorkflowDraft, WorkflowMetadata, WorkflowSummary};
pub use edge::{BranchLabel, Edge};
pub use engine::{ExecutionEngine, RunHandle};
pub use error::{ExecutionError, HistoryError, ValidationError};
pub use execution::{Run, RunStatus, RunTermination, StepOutcome, StepStatus};
pub use expression::{Expression, ExpressionError, TemplateError};
pub use graph::WorkflowGraph;
pub use handler::{Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult, StaticHandlerRegistry};
pub use history::{DailyRunCount, InMemoryRunHistory, RunHistoryStore, RunStats, StaleRunAlarm, TimeWindow};
pub use node::{Node, NodeConfig, NodeId, NodeKind, StepPolicy, TriggerKind};
pub use notify::{Channel, DispatchError, NotificationDispatch};
pub use trigger::{Trigger, TriggerContext};
