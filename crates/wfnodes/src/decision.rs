use crate::condition;
use async_trait::async_trait;
use wfcore::{ports, DecisionConfig, Node, NodeContext, NodeError, NodeOutput, NodeType};

/// Two-way branch on a boolean expression.
pub struct DecisionNode {
    config: DecisionConfig,
}

impl DecisionNode {
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }
}

/// Data key under which a decision node records its outcome.
pub fn decision_key(node_id: &str) -> String {
    format!("{}.decision", node_id)
}

#[async_trait]
impl Node for DecisionNode {
    fn node_type(&self) -> NodeType {
        NodeType::Decision
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let result = condition::evaluate(&self.config.condition, &ctx.data);
        ctx.events
            .info(format!("Condition '{}' evaluated to {}", self.config.condition, result));

        let port = if result { ports::TRUE } else { ports::FALSE };
        Ok(NodeOutput::success(Some(port)).with_data(decision_key(&ctx.node_id), result))
    }
}
