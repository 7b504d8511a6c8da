//! Structural rules for workflow graphs.
//!
//! [`is_valid_connection`] is asked by the designer before an edge is drawn;
//! [`validate_network`] checks a whole definition before an instance starts.

use crate::graph::WorkflowGraph;
use crate::{Connection, NodeType};
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Why a proposed connection is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionRejection {
    #[error("A node cannot be connected to itself")]
    SelfConnection,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node {node} has no port named {port}")]
    UnknownPort { node: String, port: String },

    #[error("Start node {0} cannot have incoming connections")]
    IntoStart(String),

    #[error("End node {0} cannot have outgoing connections")]
    OutOfEnd(String),

    #[error("Connection would create a cycle")]
    Cycle,

    #[error("Connection already exists")]
    Duplicate,

    #[error("Input {port} of node {node} is already connected")]
    InputOccupied { node: String, port: String },
}

/// Decide whether `candidate` may be added to `graph`.
pub fn is_valid_connection(
    graph: &WorkflowGraph,
    candidate: &Connection,
) -> Result<(), ConnectionRejection> {
    let source_id = &candidate.source_node_id;
    let target_id = &candidate.target_node_id;

    if source_id == target_id {
        return Err(ConnectionRejection::SelfConnection);
    }
    let source = graph
        .node(source_id)
        .ok_or_else(|| ConnectionRejection::UnknownNode(source_id.clone()))?;
    let target = graph
        .node(target_id)
        .ok_or_else(|| ConnectionRejection::UnknownNode(target_id.clone()))?;

    if target.node_type() == NodeType::Start {
        return Err(ConnectionRejection::IntoStart(target_id.clone()));
    }
    if source.node_type() == NodeType::End {
        return Err(ConnectionRejection::OutOfEnd(source_id.clone()));
    }
    if !source.output_ports().contains(&candidate.source_port_name.as_str()) {
        return Err(ConnectionRejection::UnknownPort {
            node: source_id.clone(),
            port: candidate.source_port_name.clone(),
        });
    }
    if !target.input_ports().contains(&candidate.target_port_name.as_str()) {
        return Err(ConnectionRejection::UnknownPort {
            node: target_id.clone(),
            port: candidate.target_port_name.clone(),
        });
    }

    // The new edge closes a cycle iff the target can already reach the source.
    let (digraph, indices) = graph.to_digraph();
    if has_path_connecting(&digraph, indices[target_id], indices[source_id], None) {
        return Err(ConnectionRejection::Cycle);
    }

    if graph.connections().iter().any(|c| c.same_edge(candidate)) {
        return Err(ConnectionRejection::Duplicate);
    }

    if !target.accepts_multiple_inputs()
        && graph
            .incoming(target_id)
            .any(|c| c.target_port_name == candidate.target_port_name)
    {
        return Err(ConnectionRejection::InputOccupied {
            node: target_id.clone(),
            port: candidate.target_port_name.clone(),
        });
    }

    Ok(())
}

/// Check the whole graph, collecting every problem found.
pub fn validate_network(graph: &WorkflowGraph) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();
    let nodes = graph.nodes();

    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node.node_id.as_str()) {
            errors.push(format!("Duplicate node id: {}", node.node_id));
        }
    }

    let starts = nodes.iter().filter(|n| n.node_type() == NodeType::Start).count();
    if starts != 1 {
        errors.push(format!(
            "Workflow must have exactly one Start node, found {}",
            starts
        ));
    }
    if !nodes.iter().any(|n| n.node_type() == NodeType::End) {
        errors.push("Workflow must have at least one End node".to_string());
    }

    match graph.node(graph.start_node_id()) {
        Some(node) if node.node_type() == NodeType::Start => {}
        Some(node) => errors.push(format!(
            "Start node id {} refers to a {} node",
            node.node_id,
            node.node_type()
        )),
        None => errors.push(format!(
            "Start node id '{}' does not match any node",
            graph.start_node_id()
        )),
    }

    for conn in graph.connections() {
        check_connection_endpoints(graph, conn, &mut errors);
    }

    let mut inbound: HashMap<&str, usize> = HashMap::new();
    let mut outbound: HashMap<&str, usize> = HashMap::new();
    for conn in graph.connections() {
        *inbound.entry(conn.target_node_id.as_str()).or_default() += 1;
        *outbound.entry(conn.source_node_id.as_str()).or_default() += 1;
    }
    for node in nodes {
        let name = node.display_name();
        let id = node.node_id.as_str();
        if node.node_type() != NodeType::Start && !inbound.contains_key(id) {
            errors.push(format!("Node '{}' has no incoming connection", name));
        }
        if node.node_type() != NodeType::End && !outbound.contains_key(id) {
            errors.push(format!("Node '{}' has no outgoing connection", name));
        }
    }

    if let Some(node_id) = find_cycle(graph) {
        errors.push(format!("Workflow contains a cycle through node {}", node_id));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_connection_endpoints(graph: &WorkflowGraph, conn: &Connection, errors: &mut Vec<String>) {
    if conn.source_node_id == conn.target_node_id {
        errors.push(format!("Connection {} connects a node to itself", conn.id));
    }
    match graph.node(&conn.source_node_id) {
        None => errors.push(format!(
            "Connection {} starts at unknown node {}",
            conn.id, conn.source_node_id
        )),
        Some(source) if source.node_type() == NodeType::End => errors.push(format!(
            "Connection {} leaves End node {}",
            conn.id, conn.source_node_id
        )),
        Some(source) if !source.output_ports().contains(&conn.source_port_name.as_str()) => {
            errors.push(format!(
                "Connection {} uses unknown output port {} on node {}",
                conn.id, conn.source_port_name, conn.source_node_id
            ))
        }
        Some(_) => {}
    }
    match graph.node(&conn.target_node_id) {
        None => errors.push(format!(
            "Connection {} ends at unknown node {}",
            conn.id, conn.target_node_id
        )),
        Some(target) if target.node_type() == NodeType::Start => errors.push(format!(
            "Connection {} enters Start node {}",
            conn.id, conn.target_node_id
        )),
        Some(target) if !target.input_ports().contains(&conn.target_port_name.as_str()) => {
            errors.push(format!(
                "Connection {} uses unknown input port {} on node {}",
                conn.id, conn.target_port_name, conn.target_node_id
            ))
        }
        Some(_) => {}
    }
}

/// Depth-first search with a recursion stack; returns the node at which a
/// back edge was found.
fn find_cycle(graph: &WorkflowGraph) -> Option<String> {
    let (digraph, _) = graph.to_digraph();
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();

    for root in digraph.node_indices() {
        if visited.contains(&root) {
            continue;
        }
        if let Some(hit) = visit(&digraph, root, &mut visited, &mut on_stack) {
            return Some(digraph[hit].clone());
        }
    }
    None
}

fn visit(
    digraph: &DiGraph<String, ()>,
    node: NodeIndex,
    visited: &mut HashSet<NodeIndex>,
    on_stack: &mut HashSet<NodeIndex>,
) -> Option<NodeIndex> {
    visited.insert(node);
    on_stack.insert(node);

    for next in digraph.neighbors(node) {
        if on_stack.contains(&next) {
            return Some(next);
        }
        if !visited.contains(&next) {
            if let Some(hit) = visit(digraph, next, visited, on_stack) {
                return Some(hit);
            }
        }
    }

    on_stack.remove(&node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ports, NodeKind, NodeSpec, TaskConfig, WorkflowDefinition};

    fn task(id: &str) -> NodeSpec {
        NodeSpec::new(id, NodeKind::Task(TaskConfig::default())).with_id(id)
    }

    /// Start -> a -> b -> c -> End
    fn chain() -> WorkflowGraph {
        let mut def = WorkflowDefinition::new("chain");
        def.add_node(NodeSpec::start("Start").with_id("s"));
        for id in ["a", "b", "c"] {
            def.add_node(task(id));
        }
        def.add_node(NodeSpec::end("End").with_id("e"));
        def.connect("s", ports::OUT, "a", ports::IN);
        def.connect("a", ports::COMPLETE, "b", ports::IN);
        def.connect("b", ports::COMPLETE, "c", ports::IN);
        def.connect("c", ports::COMPLETE, "e", ports::IN);
        WorkflowGraph::from_definition(def)
    }

    fn has_error(result: Result<(), Vec<String>>, needle: &str) -> bool {
        match result {
            Ok(()) => false,
            Err(errors) => errors.iter().any(|e| e.contains(needle)),
        }
    }

    #[test]
    fn valid_chain_passes() {
        assert_eq!(validate_network(&chain()), Ok(()));
    }

    #[test]
    fn closing_edge_back_to_first_task_is_a_cycle() {
        let graph = chain();
        let back = Connection::new("c", ports::COMPLETE, "a", ports::IN);
        assert_eq!(is_valid_connection(&graph, &back), Err(ConnectionRejection::Cycle));
    }

    #[test]
    fn start_and_end_ports_are_one_way() {
        let graph = chain();
        let into_start = Connection::new("a", ports::COMPLETE, "s", ports::IN);
        assert_eq!(
            is_valid_connection(&graph, &into_start),
            Err(ConnectionRejection::IntoStart("s".into()))
        );
        let out_of_end = Connection::new("e", ports::OUT, "b", ports::IN);
        assert_eq!(
            is_valid_connection(&graph, &out_of_end),
            Err(ConnectionRejection::OutOfEnd("e".into()))
        );
    }

    #[test]
    fn self_duplicate_and_occupied_inputs_are_rejected() {
        let graph = chain();
        assert_eq!(
            is_valid_connection(&graph, &Connection::new("a", ports::COMPLETE, "a", ports::IN)),
            Err(ConnectionRejection::SelfConnection)
        );
        assert_eq!(
            is_valid_connection(&graph, &Connection::new("a", ports::COMPLETE, "b", ports::IN)),
            Err(ConnectionRejection::Duplicate)
        );
        assert!(matches!(
            is_valid_connection(&graph, &Connection::new("a", ports::COMPLETE, "c", ports::IN)),
            Err(ConnectionRejection::InputOccupied { .. })
        ));
        // End nodes merge branches.
        assert_eq!(
            is_valid_connection(&graph, &Connection::new("a", ports::COMPLETE, "e", ports::IN)),
            Ok(())
        );
    }

    #[test]
    fn multi_input_flag_allows_second_inbound_edge() {
        let mut def = chain().into_definition();
        def.nodes.iter_mut().find(|n| n.node_id == "c").unwrap().allow_multiple_inputs = Some(true);
        let graph = WorkflowGraph::from_definition(def);
        assert_eq!(
            is_valid_connection(&graph, &Connection::new("a", ports::COMPLETE, "c", ports::IN)),
            Ok(())
        );
    }

    #[test]
    fn unknown_port_is_rejected() {
        let graph = chain();
        assert!(matches!(
            is_valid_connection(&graph, &Connection::new("a", "Maybe", "e", ports::IN)),
            Err(ConnectionRejection::UnknownPort { .. })
        ));
    }

    #[test]
    fn failed_port_cannot_be_wired() {
        let graph = chain();
        assert_eq!(
            is_valid_connection(&graph, &Connection::new("a", ports::FAILED, "e", ports::IN)),
            Err(ConnectionRejection::UnknownPort {
                node: "a".into(),
                port: ports::FAILED.into()
            })
        );

        let mut def = chain().into_definition();
        def.connect("a", ports::FAILED, "e", ports::IN);
        assert!(has_error(
            validate_network(&WorkflowGraph::from_definition(def)),
            "unknown output port Failed on node a"
        ));
    }

    #[test]
    fn start_count_must_be_one() {
        let mut def = chain().into_definition();
        def.add_node(NodeSpec::start("Another").with_id("s2"));
        def.connect("s2", ports::OUT, "e", ports::IN);
        assert!(has_error(
            validate_network(&WorkflowGraph::from_definition(def)),
            "exactly one Start node, found 2"
        ));

        let mut def = chain().into_definition();
        def.nodes.retain(|n| n.node_id != "s");
        def.connections.retain(|c| c.source_node_id != "s");
        assert!(has_error(
            validate_network(&WorkflowGraph::from_definition(def)),
            "found 0"
        ));
    }

    #[test]
    fn dangling_nodes_are_reported() {
        let mut def = chain().into_definition();
        def.add_node(task("orphan"));
        let errors = validate_network(&WorkflowGraph::from_definition(def)).unwrap_err();
        assert!(errors.iter().any(|e| e == "Node 'orphan' has no incoming connection"));
        assert!(errors.iter().any(|e| e == "Node 'orphan' has no outgoing connection"));
    }

    #[test]
    fn missing_end_is_reported() {
        let mut def = chain().into_definition();
        def.nodes.retain(|n| n.node_id != "e");
        def.connections.retain(|c| c.target_node_id != "e");
        assert!(has_error(
            validate_network(&WorkflowGraph::from_definition(def)),
            "at least one End node"
        ));
    }

    #[test]
    fn whole_graph_cycle_is_reported() {
        let mut def = chain().into_definition();
        def.connect("c", ports::COMPLETE, "a", ports::IN);
        let graph = WorkflowGraph::from_definition(def);
        let (digraph, _) = graph.to_digraph();
        assert!(petgraph::algo::is_cyclic_directed(&digraph));
        assert!(has_error(validate_network(&graph), "cycle"));
    }

    #[test]
    fn acyclic_diamond_is_not_a_cycle() {
        let mut def = WorkflowDefinition::new("diamond");
        def.add_node(NodeSpec::start("Start").with_id("s"));
        def.add_node(
            NodeSpec::new("d", NodeKind::Decision(crate::DecisionConfig { condition: "true".into() }))
                .with_id("d"),
        );
        def.add_node(task("x"));
        def.add_node(task("y"));
        def.add_node(NodeSpec::end("End").with_id("e"));
        def.connect("s", ports::OUT, "d", ports::IN);
        def.connect("d", ports::TRUE, "x", ports::IN);
        def.connect("d", ports::FALSE, "y", ports::IN);
        def.connect("x", ports::COMPLETE, "e", ports::IN);
        def.connect("y", ports::COMPLETE, "e", ports::IN);
        assert_eq!(validate_network(&WorkflowGraph::from_definition(def)), Ok(()));
    }

    #[test]
    fn start_node_id_must_name_the_start_node() {
        let mut def = chain().into_definition();
        def.start_node_id = "a".into();
        assert!(has_error(
            validate_network(&WorkflowGraph::from_definition(def)),
            "refers to a Task node"
        ));
    }
}
