use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use wfcore::{
    ports, ApprovalConfig, ApprovalError, ApprovalService, ApprovalStatus, ApprovalTask,
    ChannelType, DataMap, DecisionConfig, EventBus, Node, NodeContext, NodeError,
    NotificationConfig, NotificationError, NotificationMessage, NotificationService, TaskConfig,
    TaskMode, Value,
};
use wfnodes::{ApprovalNode, DecisionNode, EndNode, NotificationNode, StartNode, TaskNode};

/// Resolves every pending task according to a fixed per-approver outcome.
/// Approvers without an outcome time out. Answered tasks keep their answer.
#[derive(Default)]
struct ScriptedApprovals {
    outcomes: HashMap<String, ApprovalStatus>,
    tasks: Mutex<Vec<ApprovalTask>>,
    submitted: Mutex<Vec<String>>,
}

impl ScriptedApprovals {
    fn new(outcomes: &[(&str, ApprovalStatus)]) -> Self {
        Self {
            outcomes: outcomes
                .iter()
                .map(|(approver, status)| (approver.to_string(), *status))
                .collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ApprovalService for ScriptedApprovals {
    async fn submit_approval_tasks(&self, tasks: Vec<ApprovalTask>) -> Result<(), ApprovalError> {
        let mut submitted = self.submitted.lock().unwrap();
        submitted.extend(tasks.iter().map(|t| t.approver_id.clone()));
        self.tasks.lock().unwrap().extend(tasks);
        Ok(())
    }

    async fn wait_for_approval_results(
        &self,
        task_ids: &[String],
        _timeout: Duration,
    ) -> Result<Vec<ApprovalTask>, ApprovalError> {
        let mut tasks = self.tasks.lock().unwrap();
        task_ids
            .iter()
            .map(|id| {
                let task = tasks
                    .iter_mut()
                    .find(|t| &t.id == id)
                    .ok_or_else(|| ApprovalError::TaskNotFound(id.clone()))?;
                if task.is_resolved() {
                    return Ok(task.clone());
                }
                task.status = self
                    .outcomes
                    .get(&task.approver_id)
                    .copied()
                    .unwrap_or(ApprovalStatus::Timeout);
                if task.status == ApprovalStatus::Approved {
                    task.comment = Some(format!("ok from {}", task.approver_id));
                }
                Ok(task.clone())
            })
            .collect()
    }

    async fn approve_task(
        &self,
        task_id: &str,
        _approver_id: &str,
        _approved: bool,
        _comment: Option<String>,
    ) -> Result<ApprovalTask, ApprovalError> {
        Err(ApprovalError::TaskNotFound(task_id.to_string()))
    }

    async fn get_pending_approvals(&self, user_id: &str) -> Vec<ApprovalTask> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.approver_id == user_id && t.status == ApprovalStatus::Pending)
            .cloned()
            .collect()
    }

    async fn get_node_tasks(&self, instance_id: Uuid, node_id: &str) -> Vec<ApprovalTask> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.instance_id == instance_id && t.node_id == node_id)
            .cloned()
            .collect()
    }

    async fn expire_instance_tasks(&self, instance_id: Uuid) -> Vec<ApprovalTask> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks
            .iter_mut()
            .filter(|t| t.instance_id == instance_id && !t.is_resolved())
            .map(|t| {
                t.status = ApprovalStatus::Timeout;
                t.clone()
            })
            .collect()
    }
}

/// Records deliveries; recipients starting with "bad" fail.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, NotificationMessage)>>,
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn deliver(
        &self,
        message: &NotificationMessage,
        recipient: &str,
    ) -> Result<(), NotificationError> {
        if recipient.starts_with("bad") {
            return Err(NotificationError::Delivery {
                recipient: recipient.to_string(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.to_string(), message.clone()));
        Ok(())
    }
}

// Helper function to create a test context
fn create_test_context(
    node_id: &str,
    data: DataMap,
    approvals: Arc<dyn ApprovalService>,
    notifications: Arc<dyn NotificationService>,
) -> NodeContext {
    let event_bus = EventBus::new(100);
    let instance_id = Uuid::new_v4();

    NodeContext {
        instance_id,
        node_id: node_id.to_string(),
        data,
        approvals,
        notifications,
        events: event_bus.create_emitter(instance_id, node_id.to_string()),
        cancellation: CancellationToken::new(),
        default_approval_timeout: Duration::from_secs(1),
    }
}

fn simple_context(node_id: &str, data: DataMap) -> NodeContext {
    create_test_context(
        node_id,
        data,
        Arc::new(ScriptedApprovals::default()),
        Arc::new(RecordingNotifier::default()),
    )
}

fn data(pairs: &[(&str, Value)]) -> DataMap {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn quick_task(config: TaskConfig) -> TaskNode {
    TaskNode::new(TaskConfig {
        processing_delay_ms: Some(1),
        ..config
    })
}

#[tokio::test]
async fn test_start_and_end() {
    let output = StartNode
        .execute(simple_context("start", DataMap::new()))
        .await
        .unwrap();
    assert!(output.success);
    assert_eq!(output.output_port.as_deref(), Some(ports::OUT));

    let output = EndNode
        .execute(simple_context("end", DataMap::new()))
        .await
        .unwrap();
    assert!(output.success);
    assert_eq!(output.output_port, None, "End has no output port");
}

#[tokio::test]
async fn test_task_completes_with_rendered_outputs() {
    let node = quick_task(TaskConfig {
        mode: TaskMode::Auto,
        outputs: HashMap::from([
            ("Summary".to_string(), Value::from("Order {OrderId} for {Amount}")),
            ("Checked".to_string(), Value::Bool(true)),
        ]),
        ..Default::default()
    });
    let ctx = simple_context(
        "review",
        data(&[("OrderId", Value::from("A-7")), ("Amount", Value::from(500i64))]),
    );

    let output = node.execute(ctx).await.unwrap();

    assert!(output.success);
    assert_eq!(output.output_port.as_deref(), Some(ports::COMPLETE));
    assert_eq!(
        output.data.get("Summary"),
        Some(&Value::from("Order A-7 for 500"))
    );
    assert_eq!(output.data.get("Checked"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_task_missing_required_key_takes_failed_port() {
    let node = quick_task(TaskConfig {
        required_keys: vec!["Amount".to_string()],
        ..Default::default()
    });

    let output = node
        .execute(simple_context("review", DataMap::new()))
        .await
        .unwrap();

    assert!(!output.success);
    assert_eq!(output.output_port.as_deref(), Some(ports::FAILED));
    assert!(output.error_message.unwrap().contains("Amount"));
}

#[tokio::test]
async fn test_task_stops_when_cancelled() {
    let node = TaskNode::new(TaskConfig {
        processing_delay_ms: Some(60_000),
        ..Default::default()
    });
    let ctx = simple_context("slow", DataMap::new());
    let token = ctx.cancellation.clone();

    let handle = tokio::spawn(async move { node.execute(ctx).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("task should observe cancellation")
        .unwrap();
    assert_eq!(result, Err(NodeError::Cancelled));
}

#[tokio::test]
async fn test_decision_routes_on_condition() {
    let node = DecisionNode::new(DecisionConfig {
        condition: "{Amount} > 1000".to_string(),
    });

    let high = node
        .execute(simple_context("check", data(&[("Amount", Value::from(1500i64))])))
        .await
        .unwrap();
    assert_eq!(high.output_port.as_deref(), Some(ports::TRUE));
    assert_eq!(high.data.get("check.decision"), Some(&Value::Bool(true)));

    let low = node
        .execute(simple_context("check", data(&[("Amount", Value::from(500i64))])))
        .await
        .unwrap();
    assert_eq!(low.output_port.as_deref(), Some(ports::FALSE));
    assert_eq!(low.data.get("check.decision"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn test_decision_with_malformed_placeholder_is_false() {
    let node = DecisionNode::new(DecisionConfig {
        condition: "{Amount > 1000".to_string(),
    });
    let output = node
        .execute(simple_context("check", data(&[("Amount", Value::from(1500i64))])))
        .await
        .unwrap();
    assert_eq!(output.output_port.as_deref(), Some(ports::FALSE));
}

fn approval_config(approvers: &[&str], require_all: bool) -> ApprovalConfig {
    ApprovalConfig {
        approvers: approvers.iter().map(|a| a.to_string()).collect(),
        require_all,
        title: Some("Sign off".to_string()),
        wait_timeout_ms: Some(50),
    }
}

#[tokio::test]
async fn test_approval_require_all_with_one_rejection() {
    let approvals = Arc::new(ScriptedApprovals::new(&[
        ("alice", ApprovalStatus::Approved),
        ("bob", ApprovalStatus::Rejected),
    ]));
    let node = ApprovalNode::new(approval_config(&["alice", "bob"], true));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    let output = node.execute(ctx).await.unwrap();

    assert!(output.success);
    assert_eq!(output.output_port.as_deref(), Some(ports::REJECT));
    assert_eq!(output.data.get("signoff.approved"), Some(&Value::Bool(false)));

    let comments = match output.data.get("signoff.comments") {
        Some(Value::Object(map)) => map.clone(),
        other => panic!("expected comment map, got {:?}", other),
    };
    assert_eq!(comments.get("alice"), Some(&Value::from("ok from alice")));
    assert_eq!(comments.get("bob"), Some(&Value::Null));

    let tasks = approvals.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().all(|t| t.title.as_deref() == Some("Sign off")));
}

#[tokio::test]
async fn test_approval_require_any_with_one_approval() {
    let approvals = Arc::new(ScriptedApprovals::new(&[
        ("alice", ApprovalStatus::Rejected),
        ("bob", ApprovalStatus::Approved),
    ]));
    let node = ApprovalNode::new(approval_config(&["alice", "bob"], false));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals,
        Arc::new(RecordingNotifier::default()),
    );

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.output_port.as_deref(), Some(ports::APPROVE));
    assert_eq!(output.data.get("signoff.approved"), Some(&Value::Bool(true)));
}

#[tokio::test]
async fn test_approval_timeout_rejects() {
    let approvals = Arc::new(ScriptedApprovals::new(&[("alice", ApprovalStatus::Approved)]));
    let node = ApprovalNode::new(approval_config(&["alice", "carol"], true));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals,
        Arc::new(RecordingNotifier::default()),
    );

    let output = node.execute(ctx).await.unwrap();
    assert_eq!(output.output_port.as_deref(), Some(ports::REJECT));
}

#[tokio::test]
async fn test_approval_without_approvers_is_a_configuration_error() {
    let node = ApprovalNode::new(approval_config(&[], true));
    let result = node.execute(simple_context("signoff", DataMap::new())).await;
    assert!(matches!(result, Err(NodeError::Configuration(_))));
}

#[tokio::test]
async fn test_approval_reuses_pending_tasks_for_same_step() {
    let approvals = Arc::new(ScriptedApprovals::new(&[
        ("alice", ApprovalStatus::Approved),
        ("bob", ApprovalStatus::Approved),
    ]));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    // Left over from an interrupted run of the same node.
    let leftover = ApprovalTask::new(ctx.instance_id, "signoff", "alice");
    let leftover_id = leftover.id.clone();
    approvals.tasks.lock().unwrap().push(leftover);

    let node = ApprovalNode::new(approval_config(&["alice", "bob"], true));
    let output = node.execute(ctx).await.unwrap();

    assert_eq!(output.output_port.as_deref(), Some(ports::APPROVE));
    assert_eq!(*approvals.submitted.lock().unwrap(), vec!["bob".to_string()]);

    let tasks = approvals.tasks.lock().unwrap();
    assert_eq!(tasks.len(), 2);
    assert!(tasks.iter().any(|t| t.id == leftover_id));
}

#[tokio::test]
async fn test_approval_keeps_answers_given_before_interruption() {
    // Asked again, alice would now reject.
    let approvals = Arc::new(ScriptedApprovals::new(&[
        ("alice", ApprovalStatus::Rejected),
        ("bob", ApprovalStatus::Approved),
    ]));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    let mut answered = ApprovalTask::new(ctx.instance_id, "signoff", "alice");
    answered.status = ApprovalStatus::Approved;
    answered.comment = Some("looks fine".to_string());
    approvals.tasks.lock().unwrap().push(answered);

    let node = ApprovalNode::new(approval_config(&["alice", "bob"], true));
    let output = node.execute(ctx).await.unwrap();

    assert_eq!(output.output_port.as_deref(), Some(ports::APPROVE));
    assert_eq!(*approvals.submitted.lock().unwrap(), vec!["bob".to_string()]);
    match output.data.get("signoff.comments") {
        Some(Value::Object(comments)) => {
            assert_eq!(comments.get("alice"), Some(&Value::from("looks fine")));
        }
        other => panic!("unexpected comments {:?}", other),
    }
}

#[tokio::test]
async fn test_approval_asks_again_after_a_timed_out_task() {
    let approvals = Arc::new(ScriptedApprovals::new(&[("alice", ApprovalStatus::Approved)]));
    let ctx = create_test_context(
        "signoff",
        DataMap::new(),
        approvals.clone(),
        Arc::new(RecordingNotifier::default()),
    );

    let mut expired = ApprovalTask::new(ctx.instance_id, "signoff", "alice");
    expired.status = ApprovalStatus::Timeout;
    approvals.tasks.lock().unwrap().push(expired);

    let node = ApprovalNode::new(approval_config(&["alice"], true));
    let output = node.execute(ctx).await.unwrap();

    assert_eq!(output.output_port.as_deref(), Some(ports::APPROVE));
    assert_eq!(*approvals.submitted.lock().unwrap(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_notification_failures_do_not_fail_the_node() {
    let notifier = Arc::new(RecordingNotifier::default());
    let node = NotificationNode::new(NotificationConfig {
        title: "Order {OrderId}".to_string(),
        content: "Amount: {Amount}".to_string(),
        recipients: vec!["ops@example.com".to_string(), "bad@example.com".to_string()],
        channel: ChannelType::Email,
    });
    let ctx = create_test_context(
        "notify",
        data(&[("OrderId", Value::from("A-7")), ("Amount", Value::from(1500i64))]),
        Arc::new(ScriptedApprovals::default()),
        notifier.clone(),
    );

    let output = node.execute(ctx).await.unwrap();

    assert!(output.success);
    assert_eq!(output.output_port.as_deref(), Some(ports::OUT));
    assert_eq!(output.data.get("notify.delivered"), Some(&Value::from(1i64)));

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ops@example.com");
    assert_eq!(sent[0].1.title, "Order A-7");
    assert_eq!(sent[0].1.content, "Amount: 1500");
    assert_eq!(sent[0].1.channel, ChannelType::Email);
}

#[tokio::test]
async fn test_instantiate_matches_node_type() {
    let spec = wfcore::NodeSpec::new(
        "Check",
        wfcore::NodeKind::Decision(DecisionConfig {
            condition: "true".to_string(),
        }),
    );
    let node = wfnodes::instantiate(&spec);
    assert_eq!(node.node_type(), wfcore::NodeType::Decision);

    let catalog = wfnodes::catalog();
    assert_eq!(catalog.len(), wfcore::NodeType::ALL.len());
}
