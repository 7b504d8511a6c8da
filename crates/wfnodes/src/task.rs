use crate::condition::render_template;
use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use wfcore::{
    ports, DataMap, Node, NodeContext, NodeError, NodeOutput, NodeType, TaskConfig, TaskMode,
    Value,
};

/// Simulated processing time of a manual task.
pub const MANUAL_DELAY_MS: u64 = 500;
/// Simulated processing time of an automatic task.
pub const AUTO_DELAY_MS: u64 = 100;

/// Unit of work. Manual and automatic tasks differ only in how long the
/// simulated processing takes.
pub struct TaskNode {
    config: TaskConfig,
}

impl TaskNode {
    pub fn new(config: TaskConfig) -> Self {
        Self { config }
    }

    fn delay(&self) -> Duration {
        let default_ms = match self.config.mode {
            TaskMode::Manual => MANUAL_DELAY_MS,
            TaskMode::Auto => AUTO_DELAY_MS,
        };
        Duration::from_millis(self.config.processing_delay_ms.unwrap_or(default_ms))
    }

    fn complete(&self, ctx: &NodeContext) -> Result<DataMap, NodeError> {
        for key in &self.config.required_keys {
            ctx.require(key)?;
        }

        let outputs = self
            .config
            .outputs
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(template) => Value::String(render_template(template, &ctx.data)),
                    other => other.clone(),
                };
                (key.clone(), value)
            })
            .collect();
        Ok(outputs)
    }
}

#[async_trait]
impl Node for TaskNode {
    fn node_type(&self) -> NodeType {
        NodeType::Task
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let delay = self.delay();
        match &self.config.assignee {
            Some(assignee) => ctx.events.info(format!(
                "{:?} task assigned to {}, processing for {}ms",
                self.config.mode,
                assignee,
                delay.as_millis()
            )),
            None => ctx.events.info(format!(
                "{:?} task processing for {}ms",
                self.config.mode,
                delay.as_millis()
            )),
        }

        tokio::select! {
            _ = sleep(delay) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }

        match self.complete(&ctx) {
            Ok(data) => Ok(NodeOutput::success(Some(ports::COMPLETE)).with_all(data)),
            Err(e) => {
                tracing::debug!(node_id = %ctx.node_id, error = %e, "task failed");
                Ok(NodeOutput::failure(Some(ports::FAILED), e.to_string()))
            }
        }
    }
}
