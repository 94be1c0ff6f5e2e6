//! Collaborators the runner supplies to the automation: a notification
//! dispatch that writes to the log, and a `log` handler.

use async_trait::async_trait;
use casewright_workflow::{
    Channel, DispatchError, Handler, HandlerContext, HandlerError, HandlerResult,
    NotificationDispatch,
};
use serde_json::json;
use tracing::info;

/// Delivers notifications by logging them.
#[derive(Debug, Default)]
pub struct LogDispatch;

#[async_trait]
impl NotificationDispatch for LogDispatch {
    async fn send(&self, channel: Channel, recipient: &str, message: &str) -> Result<(), DispatchError> {
        if recipient.trim().is_empty() {
            return Err(DispatchError::InvalidRecipient {
                channel,
                recipient: recipient.to_string(),
            });
        }
        info!(%channel, recipient, message, "notification");
        Ok(())
    }
}

/// Logs the node it runs for along with its parameters.
#[derive(Debug, Default)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn invoke(&self, ctx: HandlerContext) -> Result<HandlerResult, HandlerError> {
        info!(
            run_id = %ctx.run_id,
            workflow_id = %ctx.workflow_id,
            node_id = %ctx.node.id,
            parameters = %ctx.parameters(),
            "log step"
        );
        Ok(HandlerResult::Completed(json!({ "logged": ctx.node.name })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use casewright_core::{WorkflowId, WorkflowRunId};
    use casewright_workflow::Node;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn blank_recipient_is_rejected() {
        let err = LogDispatch.send(Channel::Email, " ", "hi").await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidRecipient { .. }));
        assert!(LogDispatch.send(Channel::Chat, "#hr", "hi").await.is_ok());
    }

    #[tokio::test]
    async fn log_handler_completes_with_node_name() {
        let ctx = HandlerContext {
            run_id: WorkflowRunId::new(),
            workflow_id: WorkflowId::new(),
            node: Node::action("note", "Note hire", "log"),
            scope: json!({}),
            cancellation: CancellationToken::new(),
        };
        let result = LogHandler.invoke(ctx).await.unwrap();
        assert_eq!(result, HandlerResult::Completed(json!({"logged": "Note hire"})));
    }
}
