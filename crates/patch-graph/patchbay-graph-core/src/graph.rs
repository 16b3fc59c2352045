//! In-memory graph store that owns nodes and connections and applies [`GraphMutation`]s.

use crate::config::EngineConfig;
use crate::mutation::GraphMutation;
use crate::port_id::{check_composite_port_id, PortIdError};
use crate::sync::synchronize_ports;
use crate::types::{
    Connection, ConnectionId, ConnectionSet, GraphNode, NodeId, NodeMap, PortDirection, PortId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node '{0}'")]
    UnknownNode(NodeId),
    #[error("unknown port '{port_id}' on node '{node_id}'")]
    UnknownPort { node_id: NodeId, port_id: PortId },
    #[error("unknown connection '{0}'")]
    UnknownConnection(ConnectionId),
    #[error("node '{0}' already exists")]
    DuplicateNode(NodeId),
    #[error("connection '{0}' already exists")]
    DuplicateConnection(ConnectionId),
    #[error("invalid port id {port_id:?}: {source}")]
    InvalidPortId {
        port_id: String,
        #[source]
        source: PortIdError,
    },
    #[error("port '{port_id}' on node '{node_id}' is not an {expected:?} port")]
    DirectionMismatch {
        node_id: NodeId,
        port_id: PortId,
        expected: PortDirection,
    },
    #[error("graph json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializable form of a [`PatchGraph`]. Connection order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchSnapshot {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Owner of the node and connection maps. Every write validates before it mutates, so a failed
/// call leaves the store untouched.
#[derive(Debug, Clone, Default)]
pub struct PatchGraph {
    nodes: NodeMap,
    connections: ConnectionSet,
}

fn check_endpoint_id(port_id: &str) -> Result<(), GraphError> {
    check_composite_port_id(port_id).map_err(|source| {
        log::warn!("rejecting connection endpoint {port_id:?}: {source}");
        GraphError::InvalidPortId {
            port_id: port_id.to_string(),
            source,
        }
    })
}

impl PatchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, validating every node and connection.
    pub fn from_snapshot(snapshot: PatchSnapshot) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in snapshot.nodes {
            graph.insert_node(node)?;
        }
        for connection in snapshot.connections {
            graph.add_connection(connection)?;
        }
        Ok(graph)
    }

    pub fn from_json_str(json: &str) -> Result<Self, GraphError> {
        let snapshot: PatchSnapshot = serde_json::from_str(json)?;
        Self::from_snapshot(snapshot)
    }

    /// Snapshot with nodes sorted by id so output is stable.
    pub fn to_snapshot(&self) -> PatchSnapshot {
        let mut nodes: Vec<GraphNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        PatchSnapshot {
            nodes,
            connections: self.connections.values().cloned().collect(),
        }
    }

    pub fn nodes(&self) -> &NodeMap {
        &self.nodes
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.get(id)
    }

    pub fn connection(&self, id: &str) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub fn insert_node(&mut self, node: GraphNode) -> Result<(), GraphError> {
        if self.nodes.contains_key(&node.id) {
            return Err(GraphError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Add a wire after checking its endpoints exist, its port ids pass the id grammar, and any
    /// declared endpoint port faces the right way.
    pub fn add_connection(&mut self, connection: Connection) -> Result<(), GraphError> {
        if self.connections.contains_key(&connection.id) {
            return Err(GraphError::DuplicateConnection(connection.id));
        }
        check_endpoint_id(&connection.source_port_id)?;
        check_endpoint_id(&connection.target_port_id)?;
        self.check_endpoint(
            &connection.source_node_id,
            &connection.source_port_id,
            PortDirection::Output,
        )?;
        self.check_endpoint(
            &connection.target_node_id,
            &connection.target_port_id,
            PortDirection::Input,
        )?;
        self.connections.insert(connection.id.clone(), connection);
        Ok(())
    }

    fn check_endpoint(
        &self,
        node_id: &str,
        port_id: &str,
        expected: PortDirection,
    ) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| GraphError::UnknownNode(node_id.to_string()))?;
        match node.port(port_id) {
            Some(port) if port.direction != expected => Err(GraphError::DirectionMismatch {
                node_id: node_id.to_string(),
                port_id: port_id.to_string(),
                expected,
            }),
            _ => Ok(()),
        }
    }

    /// Remove a wire, returning it. Order of the remaining wires is preserved.
    pub fn remove_connection(&mut self, id: &str) -> Result<Connection, GraphError> {
        self.connections
            .shift_remove(id)
            .ok_or_else(|| GraphError::UnknownConnection(id.to_string()))
    }

    pub fn apply(&mut self, mutation: GraphMutation) -> Result<(), GraphError> {
        match mutation {
            GraphMutation::ReplaceNode { node } => {
                let slot = self
                    .nodes
                    .get_mut(&node.id)
                    .ok_or_else(|| GraphError::UnknownNode(node.id.clone()))?;
                *slot = node;
            }
            GraphMutation::InsertChild {
                parent_id,
                mut node,
                special,
            } => {
                if self.nodes.contains_key(&node.id) {
                    return Err(GraphError::DuplicateNode(node.id));
                }
                let parent = self
                    .nodes
                    .get_mut(&parent_id)
                    .ok_or_else(|| GraphError::UnknownNode(parent_id.clone()))?;
                parent.child_ids.push(node.id.clone());
                if special {
                    parent.special_nodes.push(node.id.clone());
                }
                node.parent_id = Some(parent_id);
                self.nodes.insert(node.id.clone(), node);
            }
            GraphMutation::RemoveConnection { connection_id } => {
                self.remove_connection(&connection_id)?;
            }
            GraphMutation::AddConnection { connection } => {
                self.add_connection(connection)?;
            }
        }
        Ok(())
    }

    /// Children of `parent_id` in `child_ids` order. Missing ids are skipped.
    pub fn children_of(&self, parent_id: &str) -> Vec<&GraphNode> {
        self.nodes
            .get(parent_id)
            .map(|parent| {
                parent
                    .child_ids
                    .iter()
                    .filter_map(|id| self.nodes.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recompute the ports `parent_id` mirrors from its special children and store them when they
    /// changed. Returns the applied mutation. Nodes without special children keep their own ports.
    pub fn resync_ports(
        &mut self,
        parent_id: &str,
        only_connected: bool,
        config: &EngineConfig,
    ) -> Option<GraphMutation> {
        let parent = self.nodes.get(parent_id)?;
        if parent.special_nodes.is_empty() {
            log::trace!("node '{parent_id}' mirrors no children");
            return None;
        }
        let children = parent.special_nodes.iter().filter_map(|id| self.nodes.get(id));
        let ports = synchronize_ports(
            parent,
            children,
            Some(&self.connections),
            only_connected,
            config,
        );
        if ports == parent.ports {
            log::trace!("ports of '{parent_id}' already in sync");
            return None;
        }

        let mut updated = parent.clone();
        updated.ports = ports;
        log::debug!("resynced {} ports on '{parent_id}'", updated.ports.len());
        let mutation = GraphMutation::ReplaceNode { node: updated.clone() };
        self.nodes.insert(updated.id.clone(), updated);
        Some(mutation)
    }
}
