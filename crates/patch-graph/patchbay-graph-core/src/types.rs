//! Patch-graph data model shared by every engine component.
//!
//! The editor owns these values; the engine only reads snapshots of them and hands back
//! replacement nodes (see [`crate::mutation`]). Field names serialize in camelCase so snapshots
//! can be exchanged with the browser editor unchanged.

use hashbrown::HashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type NodeId = String;
pub type PortId = String;
pub type ConnectionId = String;

/// Every node in the graph keyed by id.
pub type NodeMap = HashMap<NodeId, GraphNode>;

/// Connections keyed by id, iterated in the order they were added.
pub type ConnectionSet = IndexMap<ConnectionId, Connection>;

/// Behavioural tag of a [`GraphNode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeKind {
    /// Single-port child that surfaces as one input on its parent.
    RelayInput,
    /// Single-port child that surfaces as one output on its parent.
    RelayOutput,
    /// Multi-row child whose input rows surface as outputs on its parent.
    OutputPanel,
    /// Multi-row child whose output rows surface as inputs on its parent.
    InputPanel,
    /// Keyboard-like controller whose panels track how much wiring it carries.
    Keyboard,
    /// Any leaf or processing node the engine has no special behaviour for.
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::RelayInput => "relay-input",
            NodeKind::RelayOutput => "relay-output",
            NodeKind::OutputPanel => "output-panel",
            NodeKind::InputPanel => "input-panel",
            NodeKind::Keyboard => "keyboard",
            NodeKind::Other(tag) => tag,
        }
    }

    /// The panel flavour of this kind, if it is a panel at all.
    pub fn panel_kind(&self) -> Option<PanelKind> {
        match self {
            NodeKind::OutputPanel => Some(PanelKind::Output),
            NodeKind::InputPanel => Some(PanelKind::Input),
            _ => None,
        }
    }
}

impl From<String> for NodeKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "relay-input" => NodeKind::RelayInput,
            "relay-output" => NodeKind::RelayOutput,
            "output-panel" => NodeKind::OutputPanel,
            "input-panel" => NodeKind::InputPanel,
            "keyboard" => NodeKind::Keyboard,
            _ => NodeKind::Other(tag),
        }
    }
}

impl From<&str> for NodeKind {
    fn from(tag: &str) -> Self {
        NodeKind::from(tag.to_string())
    }
}

impl From<NodeKind> for String {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a multi-row panel a caller is working with.
///
/// Panel rows run against the parent's perspective: an output panel manages input-direction
/// ports (wires arrive from inside the sub-graph) and exposes them as outputs on the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelKind {
    Input,
    Output,
}

impl PanelKind {
    /// Direction of the ports that form this panel's rows.
    pub fn row_direction(self) -> PortDirection {
        match self {
            PanelKind::Output => PortDirection::Input,
            PanelKind::Input => PortDirection::Output,
        }
    }

    pub fn node_kind(self) -> NodeKind {
        match self {
            PanelKind::Output => NodeKind::OutputPanel,
            PanelKind::Input => NodeKind::InputPanel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn flipped(self) -> Self {
        match self {
            PortDirection::Input => PortDirection::Output,
            PortDirection::Output => PortDirection::Input,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Audio,
    #[default]
    Control,
    Midi,
    Gate,
    Any,
}

/// Placement hint in percent of the node's box. Only placement helpers interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortPosition {
    pub x: f32,
    pub y: f32,
}

impl PortPosition {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    pub id: PortId,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub signal: SignalType,
    pub direction: PortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PortPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_external_label: Option<bool>,
    /// Present only on bundle ports.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_info: Option<BundleInfo>,
}

impl PortDefinition {
    pub fn new(
        id: impl Into<PortId>,
        name: impl Into<String>,
        signal: SignalType,
        direction: PortDirection,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            signal,
            direction,
            position: None,
            hide_external_label: None,
            bundle_info: None,
        }
    }

    pub fn with_position(mut self, position: PortPosition) -> Self {
        self.position = Some(position);
        self
    }

    pub fn is_bundle(&self) -> bool {
        self.bundle_info.is_some()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Typed payload carried by every node.
///
/// Only the documented keys are interpreted by the engine. Anything else the editor stores on a
/// node lands in `extra` and survives a round trip untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    /// Human display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Name a relay child contributes to its parent's port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
    /// Per-row labels of a panel node.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub port_labels: HashMap<PortId, String>,
    /// Per-row flags hiding the mirrored label on the parent.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub port_hide_external_label: HashMap<PortId, bool>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub show_empty_inputs: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub show_empty_outputs: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl NodeData {
    /// Drop every label entry that belongs to `port_id`.
    pub fn forget_port(&mut self, port_id: &str) {
        self.port_labels.remove(port_id);
        self.port_hide_external_label.remove(port_id);
    }

    /// Whether the owning parent wants unconnected rows of `direction` surfaced anyway.
    pub fn shows_empty(&self, direction: PortDirection) -> bool {
        match direction {
            PortDirection::Input => self.show_empty_inputs,
            PortDirection::Output => self.show_empty_outputs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default)]
    pub ports: Vec<PortDefinition>,
    #[serde(default)]
    pub child_ids: Vec<NodeId>,
    /// Children mirrored onto `ports`. Always a subset of `child_ids`.
    #[serde(default)]
    pub special_nodes: Vec<NodeId>,
    #[serde(default)]
    pub data: NodeData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
}

impl GraphNode {
    pub fn new(id: impl Into<NodeId>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ports: Vec::new(),
            child_ids: Vec::new(),
            special_nodes: Vec::new(),
            data: NodeData::default(),
            parent_id: None,
        }
    }

    /// Display label, falling back to the node id.
    pub fn display_name(&self) -> &str {
        match self.data.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.id,
        }
    }

    pub fn port(&self, port_id: &str) -> Option<&PortDefinition> {
        self.ports.iter().find(|p| p.id == port_id)
    }

    pub fn ports_in(&self, direction: PortDirection) -> impl Iterator<Item = &PortDefinition> {
        self.ports.iter().filter(move |p| p.direction == direction)
    }

    pub fn is_special(&self, child_id: &str) -> bool {
        self.special_nodes.iter().any(|id| id == child_id)
    }
}

/// A wire between two ports. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub source_node_id: NodeId,
    pub source_port_id: PortId,
    pub target_node_id: NodeId,
    pub target_port_id: PortId,
    #[serde(rename = "type", default)]
    pub signal: SignalType,
}

impl Connection {
    pub fn new(
        id: impl Into<ConnectionId>,
        source: (&str, &str),
        target: (&str, &str),
        signal: SignalType,
    ) -> Self {
        Self {
            id: id.into(),
            source_node_id: source.0.to_string(),
            source_port_id: source.1.to_string(),
            target_node_id: target.0.to_string(),
            target_port_id: target.1.to_string(),
            signal,
        }
    }

    pub fn starts_at(&self, node_id: &str, port_id: &str) -> bool {
        self.source_node_id == node_id && self.source_port_id == port_id
    }

    pub fn ends_at(&self, node_id: &str, port_id: &str) -> bool {
        self.target_node_id == node_id && self.target_port_id == port_id
    }

    pub fn touches_node(&self, node_id: &str) -> bool {
        self.source_node_id == node_id || self.target_node_id == node_id
    }
}

/// Whether `port` (owned by `node_id`) carries at least one wire in the role its direction allows.
pub fn port_is_connected(
    connections: &ConnectionSet,
    node_id: &str,
    port: &PortDefinition,
) -> bool {
    connections.values().any(|c| match port.direction {
        PortDirection::Input => c.ends_at(node_id, &port.id),
        PortDirection::Output => c.starts_at(node_id, &port.id),
    })
}

/// One internal signal carried by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleChannel {
    pub id: String,
    pub label: String,
    pub source_port_id: PortId,
    pub source_node_id: NodeId,
}

/// Description of the signals multiplexed through one panel row. Always derived from the live
/// connection set; it has no identity beyond the port it annotates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    /// The composite source port id (`panelId:portId`).
    pub bundle_id: String,
    pub bundle_label: String,
    pub size: usize,
    pub source_node_name: String,
    pub source_node_type: String,
    pub channels: Vec<BundleChannel>,
    #[serde(default)]
    pub expanded: bool,
}
