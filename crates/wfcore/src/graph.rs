//! In-memory graph model for a single workflow definition.

use crate::validator::{self, ConnectionRejection};
use crate::{Connection, NodeId, NodeSpec, WorkflowDefinition, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Node/edge collection with id lookup, wrapping a definition.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    definition: WorkflowDefinition,
    index: HashMap<NodeId, usize>,
}

impl WorkflowGraph {
    pub fn from_definition(definition: WorkflowDefinition) -> Self {
        let mut graph = Self {
            definition,
            index: HashMap::new(),
        };
        graph.reindex();
        graph
    }

    pub fn into_definition(self) -> WorkflowDefinition {
        self.definition
    }

    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    pub fn start_node_id(&self) -> &str {
        &self.definition.start_node_id
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.definition.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.definition.connections
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.index.get(id).map(|&i| &self.definition.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.definition
            .connections
            .iter()
            .filter(move |c| c.source_node_id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.definition
            .connections
            .iter()
            .filter(move |c| c.target_node_id == id)
    }

    /// Edge leaving `node_id` through `port`, if any.
    pub fn next_connection(&self, node_id: &str, port: &str) -> Option<&Connection> {
        self.definition
            .connections
            .iter()
            .find(|c| c.source_node_id == node_id && c.source_port_name == port)
    }

    /// Add a node; ids must be unique.
    pub fn add_node(&mut self, node: NodeSpec) -> Result<(), WorkflowError> {
        if self.contains(&node.node_id) {
            return Err(WorkflowError::Validation(vec![format!(
                "Duplicate node id: {}",
                node.node_id
            )]));
        }
        self.definition.add_node(node);
        self.reindex();
        Ok(())
    }

    /// Remove a node together with every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Option<NodeSpec> {
        let pos = *self.index.get(id)?;
        let removed = self.definition.nodes.remove(pos);
        self.definition
            .connections
            .retain(|c| c.source_node_id != id && c.target_node_id != id);
        if self.definition.start_node_id == id {
            self.definition.start_node_id.clear();
        }
        self.reindex();
        Some(removed)
    }

    /// Add a connection after checking it with the connection rules.
    pub fn connect(&mut self, connection: Connection) -> Result<(), ConnectionRejection> {
        validator::is_valid_connection(self, &connection)?;
        self.definition.connections.push(connection);
        Ok(())
    }

    pub fn disconnect(&mut self, connection_id: &str) -> Option<Connection> {
        let pos = self
            .definition
            .connections
            .iter()
            .position(|c| c.id == connection_id)?;
        Some(self.definition.connections.remove(pos))
    }

    /// Directed graph view; node weights are ids, dangling edges are skipped.
    pub fn to_digraph(&self) -> (DiGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for node in &self.definition.nodes {
            indices
                .entry(node.node_id.clone())
                .or_insert_with(|| graph.add_node(node.node_id.clone()));
        }
        for conn in &self.definition.connections {
            if let (Some(&from), Some(&to)) = (
                indices.get(&conn.source_node_id),
                indices.get(&conn.target_node_id),
            ) {
                graph.add_edge(from, to, ());
            }
        }
        (graph, indices)
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, node) in self.definition.nodes.iter().enumerate() {
            self.index.entry(node.node_id.clone()).or_insert(i);
        }
    }
}

impl From<WorkflowDefinition> for WorkflowGraph {
    fn from(definition: WorkflowDefinition) -> Self {
        Self::from_definition(definition)
    }
}
