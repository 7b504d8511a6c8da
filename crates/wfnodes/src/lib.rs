//! Standard node library
//!
//! One executor per node type. [`instantiate`] picks the executor for a
//! [`NodeSpec`](wfcore::NodeSpec) with an exhaustive match, so adding a node type is a compile
//! error until it has an executor.

mod approval;
pub mod condition;
mod control;
mod decision;
mod notification;
mod task;

pub use approval::{is_approved, ApprovalNode};
pub use control::{EndNode, StartNode};
pub use decision::{decision_key, DecisionNode};
pub use notification::NotificationNode;
pub use task::{TaskNode, AUTO_DELAY_MS, MANUAL_DELAY_MS};

use wfcore::{Node, NodeKind, NodeSpec, NodeType};

/// Build the executor for a node.
pub fn instantiate(spec: &NodeSpec) -> Box<dyn Node> {
    match &spec.kind {
        NodeKind::Start(_) => Box::new(StartNode),
        NodeKind::End(_) => Box::new(EndNode),
        NodeKind::Task(config) => Box::new(TaskNode::new(config.clone())),
        NodeKind::Decision(config) => Box::new(DecisionNode::new(config.clone())),
        NodeKind::Approval(config) => Box::new(ApprovalNode::new(config.clone())),
        NodeKind::Notification(config) => Box::new(NotificationNode::new(config.clone())),
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub node_type: NodeType,
    pub description: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
}

/// Describe every node type, in palette order.
pub fn catalog() -> Vec<NodeMetadata> {
    NodeType::ALL
        .iter()
        .map(|&node_type| NodeMetadata {
            node_type,
            description: describe(node_type),
            inputs: node_type.input_ports(),
            outputs: node_type.output_ports(),
        })
        .collect()
}

fn describe(node_type: NodeType) -> &'static str {
    match node_type {
        NodeType::Start => "Entry point of the workflow",
        NodeType::End => "Completes the workflow instance",
        NodeType::Task => "Manual or automatic unit of work",
        NodeType::Decision => "Branches on a condition such as {Amount} > 1000",
        NodeType::Approval => "Waits for approvers (require all or any)",
        NodeType::Notification => "Notifies recipients over a channel",
    }
}
