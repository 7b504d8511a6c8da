use crate::events::EventEmitter;
use crate::services::{ApprovalService, NotificationService};
use crate::{DataMap, InstanceId, NodeError, NodeId, NodeType, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Behaviour shared by every node variant.
#[async_trait]
pub trait Node: Send + Sync {
    fn node_type(&self) -> NodeType;

    /// Run the node against the current instance data.
    ///
    /// `Err` stands for an unexpected failure and fails the owning instance.
    /// Expected failures are reported through [`NodeOutput::failure`].
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError>;
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub instance_id: InstanceId,
    pub node_id: NodeId,

    /// Snapshot of the instance data at node entry.
    pub data: DataMap,

    pub approvals: Arc<dyn ApprovalService>,
    pub notifications: Arc<dyn NotificationService>,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Cancelled on pause, terminate or node timeout.
    pub cancellation: CancellationToken,

    /// Used by approval nodes that do not configure their own wait timeout.
    pub default_approval_timeout: Duration,
}

impl NodeContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&Value, NodeError> {
        self.data
            .get(key)
            .ok_or_else(|| NodeError::MissingInput(key.to_string()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Outcome of one node execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeOutput {
    pub success: bool,
    /// Port whose outbound edge selects the next node; `None` ends the path.
    pub output_port: Option<String>,
    /// Entries merged into the instance data.
    pub data: DataMap,
    pub error_message: Option<String>,
}

impl NodeOutput {
    pub fn success(port: Option<&str>) -> Self {
        Self {
            success: true,
            output_port: port.map(str::to_string),
            data: DataMap::new(),
            error_message: None,
        }
    }

    pub fn failure(port: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output_port: port.map(str::to_string),
            data: DataMap::new(),
            error_message: Some(message.into()),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_all(mut self, data: DataMap) -> Self {
        self.data.extend(data);
        self
    }
}
