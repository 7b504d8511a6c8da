use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Collaborator error: {0}")]
    Collaborator(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid workflow: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Cannot {action} instance in status {status}")]
    InvalidTransition { action: &'static str, status: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistenceError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Storage backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApprovalError {
    #[error("Approval task not found: {0}")]
    TaskNotFound(String),

    #[error("User {approver} is not the approver of task {task_id}")]
    NotAssignee { task_id: String, approver: String },

    #[error("Approval task {0} is already resolved")]
    AlreadyResolved(String),
}

impl From<ApprovalError> for NodeError {
    fn from(e: ApprovalError) -> Self {
        NodeError::Collaborator(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NotificationError {
    #[error("Delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },

    #[error("Channel {0} is not supported")]
    UnsupportedChannel(String),
}
