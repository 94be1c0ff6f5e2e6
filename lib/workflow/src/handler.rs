//! Handler registry for Action, AgentTransform and Output nodes.
//!
//! The engine never knows what a handler does. The embedding application
//! supplies a `HandlerRegistry` that resolves a node's kind and
//! configuration to a `Handler`, and the engine awaits it.

use crate::node::{ActionConfig, Node, NodeConfig, NodeKind};
use async_trait::async_trait;
use casewright_core::{WorkflowId, WorkflowRunId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

static NO_PARAMETERS: JsonValue = JsonValue::Null;

/// Everything a handler sees when invoked.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// The run invoking the handler.
    pub run_id: WorkflowRunId,
    /// The workflow the run belongs to.
    pub workflow_id: WorkflowId,
    /// The node being executed.
    pub node: Node,
    /// Trigger payload merged with prior step outputs.
    pub scope: JsonValue,
    /// Fired when the run is cancelled. Handlers that support cancellation
    /// should select on it.
    pub cancellation: CancellationToken,
}

impl HandlerContext {
    /// Returns the node's configured parameters.
    #[must_use]
    pub fn parameters(&self) -> &JsonValue {
        match &self.node.config {
            NodeConfig::Action(ActionConfig::Invoke { parameters, .. }) => parameters,
            NodeConfig::AgentTransform(config) => &config.parameters,
            NodeConfig::Output(config) => &config.parameters,
            _ => &NO_PARAMETERS,
        }
    }
}

/// A successful handler result.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerResult {
    /// The step ran and produced output for later steps.
    Completed(JsonValue),
    /// The handler decided the step does not apply.
    Skipped { reason: String },
}

/// Errors from handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerError {
    /// Input validation failed.
    InvalidInput { message: String },
    /// Execution failed.
    ExecutionFailed { message: String },
    /// External service error.
    ExternalServiceError { service: String, message: String },
    /// The handler observed the run's cancellation signal.
    Cancelled,
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput { message } => write!(f, "invalid input: {message}"),
            Self::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            Self::ExternalServiceError { service, message } => {
                write!(f, "external service error ({service}): {message}")
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// External logic behind a node.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Runs the step.
    async fn invoke(&self, ctx: HandlerContext) -> Result<HandlerResult, HandlerError>;
}

/// Resolves nodes to handlers.
pub trait HandlerRegistry: Send + Sync {
    /// Returns the handler for a node, or `None` if nothing is registered.
    fn resolve(&self, kind: NodeKind, config: &NodeConfig) -> Option<Arc<dyn Handler>>;
}

/// A registry keyed by the handler name of `invoke` actions, the agent name
/// of agent transforms, and the format of outputs.
#[derive(Default, Clone)]
pub struct StaticHandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
    agents: HashMap<String, Arc<dyn Handler>>,
    outputs: HashMap<String, Arc<dyn Handler>>,
}

impl StaticHandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `invoke` actions naming `name`.
    #[must_use]
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Registers a handler for agent transforms naming `agent`.
    #[must_use]
    pub fn with_agent(mut self, agent: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.agents.insert(agent.into(), handler);
        self
    }

    /// Registers a handler for outputs with the given format.
    #[must_use]
    pub fn with_output(mut self, format: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.outputs.insert(format.into(), handler);
        self
    }
}

impl HandlerRegistry for StaticHandlerRegistry {
    fn resolve(&self, kind: NodeKind, config: &NodeConfig) -> Option<Arc<dyn Handler>> {
        match (kind, config) {
            (NodeKind::Action, NodeConfig::Action(ActionConfig::Invoke { handler, .. })) => {
                self.handlers.get(handler).cloned()
            }
            (NodeKind::AgentTransform, NodeConfig::AgentTransform(agent)) => {
                self.agents.get(&agent.agent).cloned()
            }
            (NodeKind::Output, NodeConfig::Output(output)) => output
                .format
                .as_ref()
                .and_then(|format| self.outputs.get(format).cloned()),
            _ => None,
        }
    }
}

impl std::fmt::Debug for StaticHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticHandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("agents", &self.agents.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A handler that completes with the node's configured parameters.
#[cfg(test)]
pub(crate) struct EchoHandler;

#[cfg(test)]
#[async_trait]
impl Handler for EchoHandler {
    async fn invoke(&self, ctx: HandlerContext) -> Result<HandlerResult, HandlerError> {
        Ok(HandlerResult::Completed(ctx.parameters().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context_for(node: Node) -> HandlerContext {
        HandlerContext {
            run_id: WorkflowRunId::new(),
            workflow_id: WorkflowId::new(),
            node,
            scope: json!({}),
            cancellation: CancellationToken::new(),
        }
    }

    #[test]
    fn static_registry_resolves_by_name() {
        let registry = StaticHandlerRegistry::new()
            .with_handler("alert", Arc::new(EchoHandler))
            .with_agent("claims", Arc::new(EchoHandler));

        let alert = Node::action("a", "Alert", "alert");
        assert!(registry.resolve(alert.kind(), &alert.config).is_some());

        let missing = Node::action("b", "Sync", "hris_sync");
        assert!(registry.resolve(missing.kind(), &missing.config).is_none());

        let agent = Node::agent("c", "Analyze", "claims");
        assert!(registry.resolve(agent.kind(), &agent.config).is_some());

        let output = Node::output("d", "Report");
        assert!(registry.resolve(output.kind(), &output.config).is_none());
    }

    #[tokio::test]
    async fn echo_handler_returns_parameters() {
        let node = Node::new(
            "sync",
            "Sync",
            NodeConfig::Action(ActionConfig::Invoke {
                handler: "echo".to_string(),
                parameters: json!({"system": "hris"}),
            }),
        );

        let result = EchoHandler.invoke(context_for(node)).await.unwrap();
        assert_eq!(result, HandlerResult::Completed(json!({"system": "hris"})));
    }

    #[test]
    fn handler_error_display() {
        let err = HandlerError::ExternalServiceError {
            service: "hris".to_string(),
            message: "503".to_string(),
        };
        assert_eq!(err.to_string(), "external service error (hris): 503");
    }
}
