use crate::condition::render_template;
use async_trait::async_trait;
use wfcore::{ports, Node, NodeContext, NodeError, NodeOutput, NodeType, NotificationConfig};

/// Sends a message to every recipient. Delivery failures are logged and
/// never fail the node.
pub struct NotificationNode {
    config: NotificationConfig,
}

impl NotificationNode {
    pub fn new(config: NotificationConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Node for NotificationNode {
    fn node_type(&self) -> NodeType {
        NodeType::Notification
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let title = render_template(&self.config.title, &ctx.data);
        let content = render_template(&self.config.content, &ctx.data);

        if self.config.recipients.is_empty() {
            ctx.events.warn("Notification has no recipients");
        }

        let results = ctx
            .notifications
            .send_notification(&title, &content, &self.config.recipients, self.config.channel)
            .await;

        let mut delivered = 0i64;
        for (recipient, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        instance_id = %ctx.instance_id,
                        node_id = %ctx.node_id,
                        recipient = %recipient,
                        error = %e,
                        "notification delivery failed"
                    );
                    ctx.events.warn(format!("Delivery to {} failed: {}", recipient, e));
                }
            }
        }

        Ok(NodeOutput::success(Some(ports::OUT))
            .with_data(format!("{}.delivered", ctx.node_id), delivered))
    }
}
