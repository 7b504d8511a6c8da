//! Core abstractions for the workflow engine
//!
//! Definitions and their wire format, the graph model and its structural
//! rules, run records, the node contract and the collaborator interfaces.
//! Nothing in this crate spawns tasks.

mod error;
pub mod events;
pub mod graph;
mod instance;
mod node;
pub mod services;
pub mod validator;
mod value;
mod workflow;

pub use error::{
    ApprovalError, FlowError, NodeError, NotificationError, PersistenceError, WorkflowError,
};
pub use events::*;
pub use graph::WorkflowGraph;
pub use instance::{
    ApprovalStatus, ApprovalTask, InstanceId, InstanceStatus, NodeExecutionRecord,
    NodeExecutionStatus, WorkflowInstance,
};
pub use node::{Node, NodeContext, NodeOutput};
pub use services::{ApprovalService, NotificationMessage, NotificationService, WorkflowRepository};
pub use validator::{is_valid_connection, validate_network, ConnectionRejection};
pub use value::{DataMap, Value};
pub use workflow::{
    ports, ApprovalConfig, ChannelType, Connection, DecisionConfig, EndConfig, NodeId, NodeKind,
    NodeSpec, NodeType, NotificationConfig, Position, StartConfig, TaskConfig, TaskMode,
    WorkflowDefinition, WorkflowId,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
