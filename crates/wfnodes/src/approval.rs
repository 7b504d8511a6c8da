use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use wfcore::{
    ports, ApprovalConfig, ApprovalStatus, ApprovalTask, Node, NodeContext, NodeError, NodeOutput,
    NodeType, Value,
};

/// Requests a decision from every configured approver and waits for it.
pub struct ApprovalNode {
    config: ApprovalConfig,
}

impl ApprovalNode {
    pub fn new(config: ApprovalConfig) -> Self {
        Self { config }
    }

    /// Task ids for this step. Tasks left over from an interrupted run of
    /// the same node are reused whether or not they were already answered,
    /// so an approval given before a pause still counts. Only approvers
    /// without such a task get a new one.
    async fn request_tasks(&self, ctx: &NodeContext) -> Result<Vec<String>, NodeError> {
        let previous = ctx.approvals.get_node_tasks(ctx.instance_id, &ctx.node_id).await;
        let mut task_ids = Vec::with_capacity(self.config.approvers.len());
        let mut new_tasks = Vec::new();

        for approver in &self.config.approvers {
            let existing = previous
                .iter()
                .filter(|t| &t.approver_id == approver && t.status != ApprovalStatus::Timeout)
                .max_by_key(|t| t.created_time);

            match existing {
                Some(task) => task_ids.push(task.id.clone()),
                None => {
                    let mut task = ApprovalTask::new(ctx.instance_id, ctx.node_id.clone(), approver);
                    task.title = self.config.title.clone();
                    task_ids.push(task.id.clone());
                    new_tasks.push(task);
                }
            }
        }

        if !new_tasks.is_empty() {
            ctx.approvals.submit_approval_tasks(new_tasks).await?;
        }
        Ok(task_ids)
    }
}

/// Combine individual results according to the node's policy.
pub fn is_approved(require_all: bool, results: &[ApprovalTask]) -> bool {
    let approved = |t: &ApprovalTask| t.status == ApprovalStatus::Approved;
    if require_all {
        !results.is_empty() && results.iter().all(approved)
    } else {
        results.iter().any(approved)
    }
}

#[async_trait]
impl Node for ApprovalNode {
    fn node_type(&self) -> NodeType {
        NodeType::Approval
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        if self.config.approvers.is_empty() {
            return Err(NodeError::Configuration(
                "approval node has no approvers".to_string(),
            ));
        }

        let task_ids = self.request_tasks(&ctx).await?;
        let timeout = self
            .config
            .wait_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(ctx.default_approval_timeout);

        ctx.events.info(format!(
            "Waiting up to {}ms for {} approver(s)",
            timeout.as_millis(),
            task_ids.len()
        ));

        let results = tokio::select! {
            results = ctx.approvals.wait_for_approval_results(&task_ids, timeout) => results?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let approved = is_approved(self.config.require_all, &results);
        let comments: HashMap<String, Value> = results
            .iter()
            .map(|t| {
                let comment = t.comment.clone().map(Value::String).unwrap_or_default();
                (t.approver_id.clone(), comment)
            })
            .collect();

        let port = if approved { ports::APPROVE } else { ports::REJECT };
        Ok(NodeOutput::success(Some(port))
            .with_data(format!("{}.approved", ctx.node_id), approved)
            .with_data(format!("{}.comments", ctx.node_id), Value::Object(comments)))
    }
}
