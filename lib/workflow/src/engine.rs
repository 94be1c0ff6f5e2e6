//! Execution engine.
//!
//! Walks a published definition from its trigger's target, one node at a
//! time, recording each outcome in the run history as it finishes:
//!
//! - Condition: evaluate the expression, record Completed, follow `yes`/`no`
//! - Action / AgentTransform: invoke the resolved handler (or send the
//!   notification); on error record Failed and end the Run as Failed
//! - Output: record Completed and end the Run as Success
//!
//! A node with no successor ends the Run as Success. Runs are independent:
//! each one is its own walk, and a failing Run never touches another.

use crate::definition::WorkflowDefinition;
use crate::edge::BranchLabel;
use crate::error::{ExecutionError, HistoryError};
use crate::execution::{Run, RunTermination, StepOutcome};
use crate::expression::{Expression, render_template};
use crate::graph::WorkflowGraph;
use crate::handler::{HandlerContext, HandlerRegistry, HandlerResult};
use crate::history::RunHistoryStore;
use crate::node::{ActionConfig, Node, NodeConfig, NodeId};
use crate::notify::NotificationDispatch;
use crate::trigger::TriggerContext;
use casewright_core::{WorkflowId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// The expression scope of one Run.
///
/// Starts as the trigger payload's fields plus `trigger`, and gains each
/// step's output under `steps.<node_id>`; object outputs are also merged
/// into the top level so later conditions can name their fields directly.
#[derive(Debug, Clone)]
struct Scope {
    fields: Map<String, JsonValue>,
}

impl Scope {
    const STEPS: &'static str = "steps";
    const TRIGGER: &'static str = "trigger";

    fn new(context: &TriggerContext) -> Self {
        let mut fields = match &context.payload {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        fields.insert(Self::TRIGGER.to_string(), context.scope_entry());
        fields.insert(Self::STEPS.to_string(), JsonValue::Object(Map::new()));
        Self { fields }
    }

    fn record(&mut self, node_id: &NodeId, output: JsonValue) {
        if let JsonValue::Object(map) = &output {
            for (key, value) in map {
                if key != Self::STEPS && key != Self::TRIGGER {
                    self.fields.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(JsonValue::Object(steps)) = self.fields.get_mut(Self::STEPS) {
            steps.insert(node_id.to_string(), output);
        }
    }

    fn to_value(&self) -> JsonValue {
        JsonValue::Object(self.fields.clone())
    }
}

/// What the walk does after a node.
enum Flow<'g> {
    Next(&'g Node),
    Finish(RunTermination),
}

/// A Run started on a tokio task.
#[derive(Debug)]
pub struct RunHandle {
    /// The Run's ID, already visible in the history.
    pub run_id: WorkflowRunId,
    /// The definition it executes.
    pub workflow_id: WorkflowId,
    join: JoinHandle<Result<Run, ExecutionError>>,
}

impl RunHandle {
    /// Waits for the Run to reach a terminal status.
    ///
    /// # Errors
    ///
    /// Returns the engine error that aborted the walk, or `TaskFailed` if
    /// the task panicked.
    pub async fn wait(self) -> Result<Run, ExecutionError> {
        let run_id = self.run_id;
        self.join
            .await
            .map_err(|e| ExecutionError::TaskFailed {
                run_id,
                reason: e.to_string(),
            })?
    }
}

/// The execution engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    handlers: Arc<dyn HandlerRegistry>,
    dispatch: Arc<dyn NotificationDispatch>,
    history: Arc<dyn RunHistoryStore>,
    cancellations: Arc<Mutex<HashMap<WorkflowRunId, CancellationToken>>>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine").finish_non_exhaustive()
    }
}

impl ExecutionEngine {
    /// Creates an engine over the given collaborators.
    pub fn new(
        handlers: Arc<dyn HandlerRegistry>,
        dispatch: Arc<dyn NotificationDispatch>,
        history: Arc<dyn RunHistoryStore>,
    ) -> Self {
        Self {
            handlers,
            dispatch,
            history,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The run history this engine writes to.
    #[must_use]
    pub fn history(&self) -> &Arc<dyn RunHistoryStore> {
        &self.history
    }

    /// Executes a Run inline and returns it once terminal.
    ///
    /// # Errors
    ///
    /// Returns an error only when the run history rejects a write.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        context: TriggerContext,
    ) -> Result<Run, ExecutionError> {
        let (run_id, token) = self.begin(definition, &context).await?;
        let result = self.walk(definition, run_id, context, token).await;
        self.cancellations.lock().await.remove(&run_id);
        result
    }

    /// Starts a Run on a tokio task and returns as soon as the Run is
    /// recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the Run could not be appended to the history.
    pub async fn spawn(
        &self,
        definition: WorkflowDefinition,
        context: TriggerContext,
    ) -> Result<RunHandle, ExecutionError> {
        let (run_id, token) = self.begin(&definition, &context).await?;
        let workflow_id = definition.id();
        let engine = self.clone();
        let join = tokio::spawn(async move {
            let result = engine.walk(&definition, run_id, context, token).await;
            engine.cancellations.lock().await.remove(&run_id);
            result
        });
        Ok(RunHandle {
            run_id,
            workflow_id,
            join,
        })
    }

    /// Cancels a Running Run.
    ///
    /// The terminal write is atomic in the store, so a step finishing
    /// concurrently either lands before it or is discarded. In-flight
    /// handlers see the Run's cancellation token fire.
    ///
    /// # Errors
    ///
    /// Returns `RunAlreadyTerminal` if the Run already finished.
    #[instrument(skip(self), fields(run_id = %run_id))]
    pub async fn cancel(&self, run_id: WorkflowRunId) -> Result<Run, ExecutionError> {
        let run = self
            .history
            .finish(run_id, RunTermination::cancelled(), Utc::now())
            .await?;
        if let Some(token) = self.cancellations.lock().await.remove(&run_id) {
            token.cancel();
        }
        info!(workflow_id = %run.workflow_id, "run cancelled");
        Ok(run)
    }

    async fn begin(
        &self,
        definition: &WorkflowDefinition,
        context: &TriggerContext,
    ) -> Result<(WorkflowRunId, CancellationToken), ExecutionError> {
        let run = Run::start(definition.id(), definition.version(), context.clone());
        let run_id = run.id;
        let token = CancellationToken::new();
        self.cancellations.lock().await.insert(run_id, token.clone());
        if let Err(e) = self.history.append(run).await {
            self.cancellations.lock().await.remove(&run_id);
            return Err(e.into());
        }
        info!(
            run_id = %run_id,
            workflow_id = %definition.id(),
            version = definition.version(),
            trigger = %context.description,
            "run started"
        );
        Ok((run_id, token))
    }

    #[instrument(
        skip(self, definition, context, token),
        fields(run_id = %run_id, workflow_id = %definition.id())
    )]
    async fn walk(
        &self,
        definition: &WorkflowDefinition,
        run_id: WorkflowRunId,
        context: TriggerContext,
        token: CancellationToken,
    ) -> Result<Run, ExecutionError> {
        let graph = definition.graph();
        let mut scope = Scope::new(&context);

        let Some(mut current) = graph.entry_node() else {
            let termination = RunTermination::Failed {
                error: ExecutionError::MissingEntry.to_string(),
                node_id: None,
            };
            return self.finish(run_id, termination).await;
        };

        loop {
            if token.is_cancelled() {
                return self.stored(run_id).await;
            }

            let started_at = Utc::now();
            let (outcome, flow) = self
                .step(graph, definition.id(), run_id, current, &mut scope, &token, started_at)
                .await;

            debug!(node_id = %current.id, status = ?outcome.status, "step finished");
            match self.history.record_step(run_id, outcome).await {
                Ok(()) => {}
                Err(HistoryError::RunTerminal { .. }) => return self.stored(run_id).await,
                Err(e) => return Err(e.into()),
            }

            match flow {
                Flow::Next(next) => current = next,
                Flow::Finish(termination) => return self.finish(run_id, termination).await,
            }
        }
    }

    /// Runs one node and decides where the walk goes next.
    #[allow(clippy::too_many_arguments)]
    async fn step<'g>(
        &self,
        graph: &'g WorkflowGraph,
        workflow_id: WorkflowId,
        run_id: WorkflowRunId,
        node: &'g Node,
        scope: &mut Scope,
        token: &CancellationToken,
        started_at: DateTime<Utc>,
    ) -> (StepOutcome, Flow<'g>) {
        let fail = |error: String| {
            let termination = RunTermination::Failed {
                error: error.clone(),
                node_id: Some(node.id.clone()),
            };
            (
                StepOutcome::failed(node.id.clone(), started_at, error),
                Flow::Finish(termination),
            )
        };

        match &node.config {
            NodeConfig::Trigger(_) => fail(format!("trigger node {} reached mid-walk", node.id)),

            NodeConfig::Condition(condition) => {
                let outcome = Expression::parse(&condition.expression)
                    .and_then(|expression| expression.evaluate(&scope.to_value()));
                match outcome {
                    Ok(result) => {
                        let label = BranchLabel::from_outcome(result);
                        scope.record(&node.id, JsonValue::Bool(result));
                        match graph.branch_target(&node.id, label) {
                            Some(next) => (
                                StepOutcome::completed(node.id.clone(), started_at),
                                Flow::Next(next),
                            ),
                            None => fail(format!("condition {} has no '{label}' edge", node.id)),
                        }
                    }
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            workflow_id = %workflow_id,
                            node_id = %node.id,
                            error = %e,
                            "condition evaluation failed"
                        );
                        fail(format!("condition '{}' failed: {e}", condition.expression))
                    }
                }
            }

            NodeConfig::Action(ActionConfig::Notify {
                channel,
                recipient,
                message,
            }) => {
                let values = scope.to_value();
                let rendered = render_template(recipient, &values)
                    .and_then(|recipient| Ok((recipient, render_template(message, &values)?)));
                let (recipient, message) = match rendered {
                    Ok(rendered) => rendered,
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            workflow_id = %workflow_id,
                            node_id = %node.id,
                            error = %e,
                            "notification template failed"
                        );
                        return fail(e.to_string());
                    }
                };
                match self.dispatch.send(*channel, &recipient, &message).await {
                    Ok(()) => {
                        info!(node_id = %node.id, channel = %channel, recipient = %recipient, "notification sent");
                        scope.record(
                            &node.id,
                            json!({ "channel": channel, "recipient": recipient, "message": message }),
                        );
                        self.advance(graph, node, started_at)
                    }
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            workflow_id = %workflow_id,
                            node_id = %node.id,
                            error = %e,
                            "notification dispatch failed"
                        );
                        fail(e.to_string())
                    }
                }
            }

            NodeConfig::Action(_) | NodeConfig::AgentTransform(_) | NodeConfig::Output(_) => {
                let is_output = matches!(node.config, NodeConfig::Output(_));
                let handler = self.handlers.resolve(node.kind(), &node.config);

                let result = match handler {
                    Some(handler) => {
                        let ctx = HandlerContext {
                            run_id,
                            workflow_id,
                            node: node.clone(),
                            scope: scope.to_value(),
                            cancellation: token.clone(),
                        };
                        handler.invoke(ctx).await
                    }
                    // Outputs without a registered format handler just terminate.
                    None if is_output => Ok(HandlerResult::Completed(JsonValue::Null)),
                    None => {
                        warn!(
                            run_id = %run_id,
                            workflow_id = %workflow_id,
                            node_id = %node.id,
                            kind = %node.kind(),
                            "no handler registered"
                        );
                        return fail(format!("no handler registered for {} node {}", node.kind(), node.id));
                    }
                };

                match result {
                    Ok(HandlerResult::Completed(output)) => {
                        scope.record(&node.id, output);
                        if is_output {
                            (
                                StepOutcome::completed(node.id.clone(), started_at),
                                Flow::Finish(RunTermination::Success),
                            )
                        } else {
                            self.advance(graph, node, started_at)
                        }
                    }
                    Ok(HandlerResult::Skipped { reason }) => {
                        debug!(node_id = %node.id, reason = %reason, "step skipped");
                        let outcome = StepOutcome::skipped(node.id.clone(), started_at, reason);
                        let flow = match graph.next_node(&node.id) {
                            Some(next) if !is_output => Flow::Next(next),
                            _ => Flow::Finish(RunTermination::Success),
                        };
                        (outcome, flow)
                    }
                    Err(e) => {
                        warn!(
                            run_id = %run_id,
                            workflow_id = %workflow_id,
                            node_id = %node.id,
                            error = %e,
                            "handler failed"
                        );
                        fail(e.to_string())
                    }
                }
            }
        }
    }

    /// Completes a non-branching node and moves to its successor, or ends
    /// the Run as Success if it has none.
    fn advance<'g>(
        &self,
        graph: &'g WorkflowGraph,
        node: &'g Node,
        started_at: DateTime<Utc>,
    ) -> (StepOutcome, Flow<'g>) {
        let flow = match graph.next_node(&node.id) {
            Some(next) => Flow::Next(next),
            None => Flow::Finish(RunTermination::Success),
        };
        (StepOutcome::completed(node.id.clone(), started_at), flow)
    }

    async fn finish(
        &self,
        run_id: WorkflowRunId,
        termination: RunTermination,
    ) -> Result<Run, ExecutionError> {
        match self.history.finish(run_id, termination, Utc::now()).await {
            Ok(run) => {
                match &run.error {
                    None => info!(run_id = %run_id, status = %run.status, "run finished"),
                    Some(error) => warn!(
                        run_id = %run_id,
                        status = %run.status,
                        failed_node = ?run.failed_node.as_ref().map(NodeId::as_str),
                        error = %error,
                        "run finished"
                    ),
                }
                Ok(run)
            }
            // cancel won the race for the terminal write
            Err(HistoryError::RunTerminal { .. }) => self.stored(run_id).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn stored(&self, run_id: WorkflowRunId) -> Result<Run, ExecutionError> {
        self.history
            .get(run_id)
            .await?
            .ok_or(ExecutionError::History(HistoryError::RunNotFound { run_id }))
    }
}
