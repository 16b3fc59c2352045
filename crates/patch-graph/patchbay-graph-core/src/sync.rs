//! Derives a parent's externally visible ports from its special children.
//!
//! Four child archetypes contribute ports:
//!
//! - relay-input: one parent input named after the child's `portName`.
//! - relay-output: one parent output, likewise.
//! - output-panel: every input row becomes a parent output with id `panelId:rowId`.
//! - input-panel: every output row becomes a parent input with id `panelId:rowId`.
//!
//! The result is a pure function of its inputs. Ordering follows `special_nodes`, then each
//! panel's own row order, so an unchanged graph always yields the same list.

use crate::config::EngineConfig;
use crate::port_id::{check_port_id, CompositePortId};
use crate::types::{
    port_is_connected, ConnectionSet, GraphNode, NodeKind, NodeMap, PortDefinition, PortDirection,
};
use hashbrown::{HashMap, HashSet};

/// Resolve the special children of `parent` in `special_nodes` order, skipping missing ids.
pub fn special_children<'a>(parent: &GraphNode, nodes: &'a NodeMap) -> Vec<&'a GraphNode> {
    parent
        .special_nodes
        .iter()
        .filter_map(|id| nodes.get(id))
        .collect()
}

/// First special child of `parent` with the given kind.
pub fn special_child_of_kind<'a>(
    parent: &GraphNode,
    nodes: &'a NodeMap,
    kind: &NodeKind,
) -> Option<&'a GraphNode> {
    special_children(parent, nodes)
        .into_iter()
        .find(|child| &child.kind == kind)
}

/// Compute the port list `parent` should expose.
///
/// `children` may contain any nodes; only those listed in `parent.special_nodes` contribute.
/// With `only_connected` set and a connection set supplied, relays without wiring and panel rows
/// without internal wires are left out, unless the parent opted into showing empty slots for
/// that direction.
pub fn synchronize_ports<'a>(
    parent: &GraphNode,
    children: impl IntoIterator<Item = &'a GraphNode>,
    connections: Option<&ConnectionSet>,
    only_connected: bool,
    config: &EngineConfig,
) -> Vec<PortDefinition> {
    let by_id: HashMap<&str, &GraphNode> = children
        .into_iter()
        .map(|child| (child.id.as_str(), child))
        .collect();
    let filter = if only_connected { connections } else { None };

    let mut seen: HashSet<&str> = HashSet::new();
    let mut ports = Vec::new();
    for special_id in &parent.special_nodes {
        if !seen.insert(special_id.as_str()) {
            continue;
        }
        let Some(child) = by_id.get(special_id.as_str()).copied() else {
            continue;
        };
        match &child.kind {
            NodeKind::RelayInput => {
                if let Some(port) = relay_port(child, PortDirection::Input, filter, config) {
                    ports.push(port);
                }
            }
            NodeKind::RelayOutput => {
                if let Some(port) = relay_port(child, PortDirection::Output, filter, config) {
                    ports.push(port);
                }
            }
            NodeKind::OutputPanel => {
                panel_ports(parent, child, PortDirection::Output, filter, config, &mut ports)
            }
            NodeKind::InputPanel => {
                panel_ports(parent, child, PortDirection::Input, filter, config, &mut ports)
            }
            _ => {}
        }
    }
    ports
}

/// Port contributed by a relay child. `direction` is the direction on the parent.
fn relay_port(
    child: &GraphNode,
    direction: PortDirection,
    filter: Option<&ConnectionSet>,
    config: &EngineConfig,
) -> Option<PortDefinition> {
    if let Err(err) = check_port_id(&child.id) {
        log::warn!("relay node '{}' cannot surface as a port: {err}", child.id);
        return None;
    }
    if let Some(connections) = filter {
        let wired = connections.values().any(|c| match direction {
            PortDirection::Input => c.source_node_id == child.id,
            PortDirection::Output => c.target_node_id == child.id,
        });
        if !wired {
            return None;
        }
    }

    // The relay's own port faces the sub-graph, so it points the other way.
    let signal = child
        .ports_in(direction.flipped())
        .next()
        .map(|p| p.signal)
        .unwrap_or_default();
    let default_name = match direction {
        PortDirection::Input => &config.default_input_name,
        PortDirection::Output => &config.default_output_name,
    };
    let name = child
        .data
        .port_name
        .clone()
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| default_name.clone());

    Some(PortDefinition::new(child.id.clone(), name, signal, direction))
}

/// Ports contributed by a panel child. `direction` is the direction on the parent.
fn panel_ports(
    parent: &GraphNode,
    panel: &GraphNode,
    direction: PortDirection,
    filter: Option<&ConnectionSet>,
    config: &EngineConfig,
    out: &mut Vec<PortDefinition>,
) {
    let default_name = match direction {
        PortDirection::Input => &config.default_input_name,
        PortDirection::Output => &config.default_output_name,
    };
    let show_empty = parent.data.shows_empty(direction);

    for inner in panel.ports_in(direction.flipped()) {
        if let Some(connections) = filter {
            if !show_empty && !port_is_connected(connections, &panel.id, inner) {
                continue;
            }
        }
        let composite = match CompositePortId::new(panel.id.as_str(), inner.id.as_str()) {
            Ok(id) => id,
            Err(err) => {
                log::warn!(
                    "skipping row '{}' of panel '{}': {err}",
                    inner.id,
                    panel.id
                );
                continue;
            }
        };

        let name = panel
            .data
            .port_labels
            .get(&inner.id)
            .filter(|label| !label.is_empty())
            .or(Some(&inner.name).filter(|n| !n.is_empty()))
            .unwrap_or(default_name)
            .clone();

        out.push(PortDefinition {
            id: composite.to_string(),
            name,
            signal: inner.signal,
            direction,
            position: inner.position,
            hide_external_label: panel.data.port_hide_external_label.get(&inner.id).copied(),
            bundle_info: inner.bundle_info.clone(),
        });
    }
}
