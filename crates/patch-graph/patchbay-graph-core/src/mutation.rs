//! Descriptions of graph changes produced by the engine.
//!
//! Engine components never mutate the graph themselves; they return one of these values and the
//! owner of the graph applies it (see [`crate::graph::PatchGraph::apply`]).

use crate::types::{Connection, ConnectionId, GraphNode, NodeData, NodeId, PortId};
use serde::{Deserialize, Serialize};

/// Label-map edits that accompany a port list change on a panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelUpdates {
    /// `portLabels` upserts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<(PortId, String)>,
    /// `portHideExternalLabel` upserts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hide_external_label: Vec<(PortId, bool)>,
    /// Ports whose entries are dropped from both maps. Applied before the upserts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<PortId>,
}

impl LabelUpdates {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.hide_external_label.is_empty() && self.removed.is_empty()
    }

    pub fn apply_to(&self, data: &mut NodeData) {
        for id in &self.removed {
            data.forget_port(id);
        }
        for (id, label) in &self.labels {
            data.port_labels.insert(id.clone(), label.clone());
        }
        for (id, hide) in &self.hide_external_label {
            data.port_hide_external_label.insert(id.clone(), *hide);
        }
    }
}

/// A single change to apply to the graph store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GraphMutation {
    /// Replace the stored node with the same id.
    ReplaceNode { node: GraphNode },
    /// Insert a new node under `parent_id`, optionally registering it as special.
    InsertChild {
        parent_id: NodeId,
        node: GraphNode,
        special: bool,
    },
    RemoveConnection { connection_id: ConnectionId },
    /// Store a wire. Used to re-point a wire whose target row was replaced.
    AddConnection { connection: Connection },
}

impl GraphMutation {
    /// Id of the node the mutation writes, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphMutation::ReplaceNode { node } => Some(&node.id),
            GraphMutation::InsertChild { node, .. } => Some(&node.id),
            GraphMutation::RemoveConnection { .. } | GraphMutation::AddConnection { .. } => None,
        }
    }
}
