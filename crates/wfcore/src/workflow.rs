use crate::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type NodeId = String;

/// Well-known port names.
pub mod ports {
    pub const IN: &str = "In";
    pub const OUT: &str = "Out";
    pub const COMPLETE: &str = "Complete";
    /// Recorded on a failed Task's execution record; not connectable.
    pub const FAILED: &str = "Failed";
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const APPROVE: &str = "Approve";
    pub const REJECT: &str = "Reject";
}

/// Complete workflow definition, as produced by the designer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    pub start_node_id: NodeId,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            connections: Vec::new(),
            start_node_id: NodeId::new(),
        }
    }

    /// Append a node. The first Start node added becomes the start node.
    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.node_id.clone();
        if self.start_node_id.is_empty() && node.node_type() == NodeType::Start {
            self.start_node_id = id.clone();
        }
        self.nodes.push(node);
        id
    }

    /// Append a connection without validating it.
    pub fn connect(
        &mut self,
        source_node: impl Into<NodeId>,
        source_port: impl Into<String>,
        target_node: impl Into<NodeId>,
        target_port: impl Into<String>,
    ) -> String {
        let connection = Connection::new(source_node, source_port, target_node, target_port);
        let id = connection.id.clone();
        self.connections.push(connection);
        id
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.node_id == id)
    }

    /// Decode the designer's JSON wire format.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A node placed in a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeSpec {
    pub node_id: NodeId,
    #[serde(default)]
    pub node_name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub position: Position,
    /// Per-node execution limit in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_multiple_inputs: Option<bool>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            node_id: Uuid::new_v4().to_string(),
            node_name: name.into(),
            kind,
            position: Position::default(),
            timeout_ms: None,
            allow_multiple_inputs: None,
        }
    }

    pub fn start(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::Start(StartConfig::default()))
    }

    pub fn end(name: impl Into<String>) -> Self {
        Self::new(name, NodeKind::End(EndConfig::default()))
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.node_id = id.into();
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Position { x, y };
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_multiple_inputs(mut self, allow: bool) -> Self {
        self.allow_multiple_inputs = Some(allow);
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    pub fn display_name(&self) -> &str {
        if self.node_name.is_empty() {
            &self.node_id
        } else {
            &self.node_name
        }
    }

    pub fn input_ports(&self) -> &'static [&'static str] {
        self.node_type().input_ports()
    }

    pub fn output_ports(&self) -> &'static [&'static str] {
        self.node_type().output_ports()
    }

    pub fn accepts_multiple_inputs(&self) -> bool {
        self.allow_multiple_inputs
            .unwrap_or_else(|| self.node_type().multi_input_by_default())
    }
}

/// Type-specific node configuration; `NodeType` on the wire selects the variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "NodeType")]
pub enum NodeKind {
    Start(StartConfig),
    End(EndConfig),
    Task(TaskConfig),
    Decision(DecisionConfig),
    Approval(ApprovalConfig),
    Notification(NotificationConfig),
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Start(_) => NodeType::Start,
            NodeKind::End(_) => NodeType::End,
            NodeKind::Task(_) => NodeType::Task,
            NodeKind::Decision(_) => NodeType::Decision,
            NodeKind::Approval(_) => NodeType::Approval,
            NodeKind::Notification(_) => NodeType::Notification,
        }
    }
}

/// Node type discriminant, used for the structural view of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Start,
    End,
    Task,
    Decision,
    Approval,
    Notification,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Start,
        NodeType::End,
        NodeType::Task,
        NodeType::Decision,
        NodeType::Approval,
        NodeType::Notification,
    ];

    pub fn input_ports(self) -> &'static [&'static str] {
        match self {
            NodeType::Start => &[],
            _ => &[ports::IN],
        }
    }

    /// Ports an edge may leave from. A failing node ends the instance, so
    /// Task's `Failed` port is not listed.
    pub fn output_ports(self) -> &'static [&'static str] {
        match self {
            NodeType::Start | NodeType::Notification => &[ports::OUT],
            NodeType::End => &[],
            NodeType::Task => &[ports::COMPLETE],
            NodeType::Decision => &[ports::TRUE, ports::FALSE],
            NodeType::Approval => &[ports::APPROVE, ports::REJECT],
        }
    }

    /// End nodes are where branches merge.
    pub fn multi_input_by_default(self) -> bool {
        matches!(self, NodeType::End)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StartConfig {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EndConfig {}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskMode {
    #[default]
    Manual,
    Auto,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct TaskConfig {
    #[serde(default)]
    pub mode: TaskMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Assignments merged into instance data on completion.
    /// String values may contain `{key}` placeholders.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: HashMap<String, Value>,
    /// Data keys that must be present for the task to succeed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct DecisionConfig {
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ApprovalConfig {
    pub approvers: Vec<String>,
    #[serde(default = "default_require_all")]
    pub require_all: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_timeout_ms: Option<u64>,
}

fn default_require_all() -> bool {
    true
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            approvers: Vec::new(),
            require_all: true,
            title: None,
            wait_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelType {
    Email,
    Sms,
    #[default]
    InApp,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationConfig {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub channel: ChannelType,
}

/// Directed edge from one node's output port to another node's input port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Connection {
    pub id: String,
    pub source_node_id: NodeId,
    pub source_port_name: String,
    pub target_node_id: NodeId,
    pub target_port_name: String,
}

impl Connection {
    pub fn new(
        source_node: impl Into<NodeId>,
        source_port: impl Into<String>,
        target_node: impl Into<NodeId>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_node_id: source_node.into(),
            source_port_name: source_port.into(),
            target_node_id: target_node.into(),
            target_port_name: target_port.into(),
        }
    }

    /// Same endpoints and ports, ignoring the id.
    pub fn same_edge(&self, other: &Connection) -> bool {
        self.source_node_id == other.source_node_id
            && self.source_port_name == other.source_port_name
            && self.target_node_id == other.target_node_id
            && self.target_port_name == other.target_port_name
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Position {
    pub x: f32,
    pub y: f32,
}
