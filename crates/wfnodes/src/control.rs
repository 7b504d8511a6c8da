use async_trait::async_trait;
use wfcore::{ports, Node, NodeContext, NodeError, NodeOutput, NodeType};

/// Entry point of every workflow; passes data through unchanged.
pub struct StartNode;

#[async_trait]
impl Node for StartNode {
    fn node_type(&self) -> NodeType {
        NodeType::Start
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::success(Some(ports::OUT)))
    }
}

/// Terminal node. It has no output port, so the owning instance completes.
pub struct EndNode;

#[async_trait]
impl Node for EndNode {
    fn node_type(&self) -> NodeType {
        NodeType::End
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.events.info("Reached end of workflow");
        Ok(NodeOutput::success(None))
    }
}
