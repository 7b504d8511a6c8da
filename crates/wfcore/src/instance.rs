use crate::{DataMap, NodeId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type InstanceId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Failed,
    Terminated,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Terminated
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Mutable run record of one definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowInstance {
    pub id: InstanceId,
    pub definition_id: WorkflowId,
    pub status: InstanceStatus,
    pub current_node_id: NodeId,
    pub data: DataMap,
    pub started_by: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl WorkflowInstance {
    pub fn new(
        definition_id: WorkflowId,
        start_node_id: impl Into<NodeId>,
        data: DataMap,
        started_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            definition_id,
            status: InstanceStatus::Draft,
            current_node_id: start_node_id.into(),
            data,
            started_by: started_by.into(),
            start_time: Utc::now(),
            end_time: None,
            error_message: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = InstanceStatus::Completed;
        self.end_time = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = InstanceStatus::Failed;
        self.error_message = Some(message.into());
        self.end_time = Some(Utc::now());
    }

    pub fn terminate(&mut self) {
        self.status = InstanceStatus::Terminated;
        self.end_time = Some(Utc::now());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeExecutionStatus {
    InProgress,
    Completed,
    Failed,
    Timeout,
    /// Abandoned because the instance was paused or terminated mid-node.
    Cancelled,
}

/// Append-only history entry for one node step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeExecutionRecord {
    pub id: Uuid,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub status: NodeExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub output_port: Option<String>,
    pub input_data: DataMap,
    pub output_data: Option<DataMap>,
    pub error_message: Option<String>,
}

impl NodeExecutionRecord {
    pub fn begin(instance_id: InstanceId, node_id: impl Into<NodeId>, input_data: DataMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            node_id: node_id.into(),
            status: NodeExecutionStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            output_port: None,
            input_data,
            output_data: None,
            error_message: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.status != NodeExecutionStatus::InProgress
    }

    /// Close the record. Finalized records are never reopened.
    pub fn finish(
        &mut self,
        status: NodeExecutionStatus,
        output_port: Option<String>,
        output_data: Option<DataMap>,
        error_message: Option<String>,
    ) {
        debug_assert!(!self.is_finalized(), "record {} finalized twice", self.id);
        self.status = status;
        self.end_time = Some(Utc::now());
        self.output_port = output_port;
        self.output_data = output_data;
        self.error_message = error_message;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalTask {
    pub id: String,
    pub instance_id: InstanceId,
    pub node_id: NodeId,
    pub approver_id: String,
    pub title: Option<String>,
    pub status: ApprovalStatus,
    pub created_time: DateTime<Utc>,
    pub approved_time: Option<DateTime<Utc>>,
    pub comment: Option<String>,
}

impl ApprovalTask {
    pub fn new(
        instance_id: InstanceId,
        node_id: impl Into<NodeId>,
        approver_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            instance_id,
            node_id: node_id.into(),
            approver_id: approver_id.into(),
            title: None,
            status: ApprovalStatus::Pending,
            created_time: Utc::now(),
            approved_time: None,
            comment: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status != ApprovalStatus::Pending
    }
}
