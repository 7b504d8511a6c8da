//! Interfaces of the engine's external collaborators.

use crate::{
    ApprovalError, ApprovalTask, ChannelType, InstanceId, NodeExecutionRecord, NotificationError,
    PersistenceError, WorkflowDefinition, WorkflowId, WorkflowInstance,
};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;

/// Durable storage for definitions, instances and step history.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_definition(&self, id: WorkflowId) -> Result<WorkflowDefinition, PersistenceError>;

    async fn save_definition(&self, definition: &WorkflowDefinition) -> Result<(), PersistenceError>;

    async fn get_instance(&self, id: InstanceId) -> Result<WorkflowInstance, PersistenceError>;

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError>;

    async fn update_instance(&self, instance: &WorkflowInstance) -> Result<(), PersistenceError>;

    async fn save_node_execution_record(
        &self,
        record: &NodeExecutionRecord,
    ) -> Result<(), PersistenceError>;

    async fn update_node_execution_record(
        &self,
        record: &NodeExecutionRecord,
    ) -> Result<(), PersistenceError>;

    /// History of one instance in creation order.
    async fn get_node_execution_records(
        &self,
        instance_id: InstanceId,
    ) -> Result<Vec<NodeExecutionRecord>, PersistenceError>;

    /// Instances whose status is Running.
    async fn get_active_instances(&self) -> Result<Vec<WorkflowInstance>, PersistenceError>;
}

/// External human approval.
#[async_trait]
pub trait ApprovalService: Send + Sync {
    async fn submit_approval_tasks(&self, tasks: Vec<ApprovalTask>) -> Result<(), ApprovalError>;

    /// Wait until every task is resolved or `timeout` elapses. Tasks still
    /// pending at the deadline come back with status `Timeout`.
    async fn wait_for_approval_results(
        &self,
        task_ids: &[String],
        timeout: Duration,
    ) -> Result<Vec<ApprovalTask>, ApprovalError>;

    async fn approve_task(
        &self,
        task_id: &str,
        approver_id: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<ApprovalTask, ApprovalError>;

    async fn get_pending_approvals(&self, user_id: &str) -> Vec<ApprovalTask>;

    /// Every task requested by one node of one instance, answered or not.
    async fn get_node_tasks(&self, instance_id: InstanceId, node_id: &str) -> Vec<ApprovalTask>;

    /// Close the instance's still-pending tasks with status `Timeout` and
    /// return them. Nobody will act on their answers any more.
    async fn expire_instance_tasks(&self, instance_id: InstanceId) -> Vec<ApprovalTask>;
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationMessage {
    pub title: String,
    pub content: String,
    pub channel: ChannelType,
}

/// Outbound notification channel.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Deliver to a single recipient.
    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &str,
    ) -> Result<(), NotificationError>;

    /// Fan out to every recipient; one failed delivery does not affect the others.
    async fn send_notification(
        &self,
        title: &str,
        content: &str,
        recipients: &[String],
        channel: ChannelType,
    ) -> Vec<(String, Result<(), NotificationError>)> {
        let message = NotificationMessage {
            title: title.to_string(),
            content: content.to_string(),
            channel,
        };
        let sends = recipients.iter().map(|recipient| {
            let message = &message;
            async move { (recipient.clone(), self.deliver(message, recipient).await) }
        });
        join_all(sends).await
    }
}
