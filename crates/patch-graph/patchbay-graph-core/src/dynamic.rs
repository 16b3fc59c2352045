//! Growth and shrinkage of auto-growing controllers' panels.
//!
//! Only node kinds listed in [`EngineConfig::auto_grow_kinds`] are affected. A panel grows by
//! one numbered row when every row carries a wire, and sheds its highest-numbered free row when
//! more than one row is free and it holds more rows than its floor. The panel's standing
//! placeholder counts toward neither figure, so freeing one wire right after a growth never
//! removes a row. The floor is a hysteresis band that keeps a panel from collapsing and
//! regrowing on every edit.

use crate::config::EngineConfig;
use crate::empty_slot::empty_rows;
use crate::ids::IdAllocator;
use crate::mutation::GraphMutation;
use crate::port_id::is_valid_port_id;
use crate::sync::special_child_of_kind;
use crate::types::{
    port_is_connected, ConnectionSet, GraphNode, NodeId, NodeKind, NodeMap, PanelKind,
    PortDefinition,
};

const PANEL_ORDER: [PanelKind; 2] = [PanelKind::Output, PanelKind::Input];

/// Outcome of [`check_addition`].
#[derive(Debug, Clone, PartialEq)]
pub enum PortGrowth {
    /// Replacement for a panel that gained one row.
    Panel(GraphNode),
    /// New relay-output child for a controller without panels.
    RelaySibling { parent_id: NodeId, node: GraphNode },
}

impl PortGrowth {
    pub fn into_mutation(self) -> GraphMutation {
        match self {
            PortGrowth::Panel(node) => GraphMutation::ReplaceNode { node },
            PortGrowth::RelaySibling { parent_id, node } => GraphMutation::InsertChild {
                parent_id,
                node,
                special: true,
            },
        }
    }
}

/// Split an id into its prefix and trailing `-{n}` slot number.
pub fn parse_slot(id: &str) -> (&str, Option<u64>) {
    if let Some((prefix, tail)) = id.rsplit_once('-') {
        if let Ok(slot) = tail.parse::<u64>() {
            return (prefix, Some(slot));
        }
    }
    (id, None)
}

/// Grow a panel of `parent_id`, or add a relay-output sibling on legacy controllers.
pub fn check_addition(
    parent_id: &str,
    nodes: &NodeMap,
    connections: &ConnectionSet,
    ids: &mut dyn IdAllocator,
    config: &EngineConfig,
) -> Option<PortGrowth> {
    let parent = nodes.get(parent_id)?;
    if !config.auto_grows(&parent.kind) {
        return None;
    }

    let mut has_panel = false;
    for panel_kind in PANEL_ORDER {
        if let Some(panel) = special_child_of_kind(parent, nodes, &panel_kind.node_kind()) {
            has_panel = true;
            if let Some(grown) = grow_panel(panel, connections, panel_kind, config) {
                return Some(PortGrowth::Panel(grown));
            }
        }
    }
    if has_panel {
        return None;
    }
    grow_relays(parent, nodes, connections, ids, config)
}

fn grow_panel(
    panel: &GraphNode,
    connections: &ConnectionSet,
    panel_kind: PanelKind,
    config: &EngineConfig,
) -> Option<GraphNode> {
    let direction = panel_kind.row_direction();
    let rows: Vec<&PortDefinition> = panel.ports_in(direction).collect();
    let saturated = rows
        .iter()
        .all(|port| port_is_connected(connections, &panel.id, port));
    if !saturated {
        return None;
    }

    let next_slot = panel
        .ports
        .iter()
        .filter_map(|p| parse_slot(&p.id).1)
        .max()
        .unwrap_or(0)
        + 1;
    let id = format!("{}-{next_slot}", config.grown_port_prefix);
    if !is_valid_port_id(&id) || panel.port(&id).is_some() {
        log::warn!("cannot grow panel '{}' with row {id:?}", panel.id);
        return None;
    }

    let signal = rows.first().map(|p| p.signal).unwrap_or_default();
    let port = PortDefinition::new(id.clone(), "", signal, direction)
        .with_position(config.row_position(direction, rows.len(), rows.len() + 1));

    let mut updated = panel.clone();
    updated.ports.push(port);
    log::debug!("panel '{}' grew row '{id}'", panel.id);
    Some(updated)
}

fn grow_relays(
    parent: &GraphNode,
    nodes: &NodeMap,
    connections: &ConnectionSet,
    ids: &mut dyn IdAllocator,
    config: &EngineConfig,
) -> Option<PortGrowth> {
    let relays: Vec<&GraphNode> = parent
        .child_ids
        .iter()
        .filter_map(|id| nodes.get(id))
        .filter(|child| child.kind == NodeKind::RelayOutput)
        .collect();
    let template = relays.first()?;
    let saturated = relays
        .iter()
        .all(|relay| connections.values().any(|c| c.target_node_id == relay.id));
    if !saturated {
        return None;
    }

    let id = ids.next(&config.relay_node_prefix);
    if !is_valid_port_id(&id) || nodes.contains_key(&id) {
        log::warn!("allocator produced unusable relay id {id:?}");
        return None;
    }

    let mut node = GraphNode::new(id.clone(), NodeKind::RelayOutput);
    node.parent_id = Some(parent.id.clone());
    node.ports = template
        .ports
        .iter()
        .map(|p| PortDefinition {
            bundle_info: None,
            ..p.clone()
        })
        .collect();
    node.data.port_name = Some(format!(
        "{} {}",
        config.default_output_name,
        relays.len() + 1
    ));
    log::debug!("controller '{}' gained relay '{id}'", parent.id);
    Some(PortGrowth::RelaySibling {
        parent_id: parent.id.clone(),
        node,
    })
}

/// Shed one free row from a panel of `parent_id`, never going to or below the floor.
pub fn check_removal(
    parent_id: &str,
    nodes: &NodeMap,
    connections: &ConnectionSet,
    config: &EngineConfig,
) -> Option<GraphNode> {
    let parent = nodes.get(parent_id)?;
    if !config.auto_grows(&parent.kind) {
        return None;
    }
    PANEL_ORDER.into_iter().find_map(|panel_kind| {
        special_child_of_kind(parent, nodes, &panel_kind.node_kind())
            .and_then(|panel| shrink_panel(panel, connections, panel_kind, config))
    })
}

fn shrink_panel(
    panel: &GraphNode,
    connections: &ConnectionSet,
    panel_kind: PanelKind,
    config: &EngineConfig,
) -> Option<GraphNode> {
    let direction = panel_kind.row_direction();
    // The standing placeholder is the next growth slot, not surplus.
    let standing = empty_rows(panel, connections, panel_kind, config)
        .first()
        .map(|port| port.id.clone());
    let rows: Vec<&PortDefinition> = panel
        .ports_in(direction)
        .filter(|port| Some(&port.id) != standing.as_ref())
        .collect();
    let free: Vec<(usize, &PortDefinition)> = rows
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, port)| !port_is_connected(connections, &panel.id, port))
        .collect();
    if free.len() <= 1 || rows.len() <= config.floor(panel_kind) {
        return None;
    }

    let (_, victim) = free
        .into_iter()
        .max_by_key(|(index, port)| (parse_slot(&port.id).1, *index))?;
    let victim_id = victim.id.clone();

    let mut updated = panel.clone();
    updated.ports.retain(|p| p.id != victim_id);
    updated.data.forget_port(&victim_id);
    log::debug!("panel '{}' shed row '{victim_id}'", panel.id);
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::types::{Connection, PortDirection, SignalType};

    fn keyboard_with(panel: GraphNode) -> NodeMap {
        let mut keyboard = GraphNode::new("keyboard", NodeKind::Keyboard);
        keyboard.child_ids.push(panel.id.clone());
        keyboard.special_nodes.push(panel.id.clone());
        let mut nodes = NodeMap::new();
        nodes.insert(keyboard.id.clone(), keyboard);
        nodes.insert(panel.id.clone(), panel);
        nodes
    }

    fn output_panel(rows: usize) -> GraphNode {
        let mut panel = GraphNode::new("panel-1", NodeKind::OutputPanel);
        panel.parent_id = Some("keyboard".into());
        for i in 1..=rows {
            panel.ports.push(PortDefinition::new(
                format!("port-{i}"),
                format!("Row {i}"),
                SignalType::Gate,
                PortDirection::Input,
            ));
            panel
                .data
                .port_labels
                .insert(format!("port-{i}"), format!("Row {i}"));
        }
        panel
    }

    fn wired(rows: &[usize]) -> ConnectionSet {
        rows.iter()
            .map(|i| {
                let id = format!("w{i}");
                let row = format!("port-{i}");
                let key = format!("key-{i}");
                let wire = Connection::new(
                    id.as_str(),
                    (key.as_str(), "key-out"),
                    ("panel-1", row.as_str()),
                    SignalType::Gate,
                );
                (id, wire)
            })
            .collect()
    }

    #[test]
    fn test_parse_slot_numbers() {
        assert_eq!(parse_slot("port-12"), ("port", Some(12)));
        assert_eq!(parse_slot("empty-3"), ("empty", Some(3)));
        assert_eq!(parse_slot("port"), ("port", None));
        assert_eq!(parse_slot("bundle-ab12"), ("bundle-ab12", None));
    }

    #[test]
    fn test_grow_a_saturated_panel_by_one() {
        let nodes = keyboard_with(output_panel(4));
        let connections = wired(&[1, 2, 3, 4]);
        let mut ids = SequentialIds::new();
        let config = EngineConfig::default();

        let growth = check_addition("keyboard", &nodes, &connections, &mut ids, &config)
            .expect("saturated panel grows");
        let PortGrowth::Panel(panel) = growth else {
            panic!("expected panel growth");
        };
        assert_eq!(panel.ports.len(), 5);
        let added = panel.ports.last().expect("new row");
        assert_eq!(added.id, "port-5");
        assert!(added.name.is_empty());
        assert_eq!(added.direction, PortDirection::Input);
        assert_eq!(added.position.map(|p| p.y), Some(config.distributed_offset(4, 5)));
    }

    #[test]
    fn test_grow_an_empty_panel() {
        let nodes = keyboard_with(output_panel(0));
        let growth = check_addition(
            "keyboard",
            &nodes,
            &ConnectionSet::new(),
            &mut SequentialIds::new(),
            &EngineConfig::default(),
        );
        match growth {
            Some(PortGrowth::Panel(panel)) => assert_eq!(panel.ports[0].id, "port-1"),
            other => panic!("expected panel growth, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_while_a_row_is_free() {
        let nodes = keyboard_with(output_panel(4));
        let connections = wired(&[1, 2, 3]);
        let growth = check_addition(
            "keyboard",
            &nodes,
            &connections,
            &mut SequentialIds::new(),
            &EngineConfig::default(),
        );
        assert!(growth.is_none());
    }

    #[test]
    fn test_leave_other_kinds_alone() {
        let mut nodes = keyboard_with(output_panel(1));
        if let Some(keyboard) = nodes.get_mut("keyboard") {
            keyboard.kind = NodeKind::Other("drum-machine".into());
        }
        let connections = wired(&[1]);
        let config = EngineConfig::default();
        let mut ids = SequentialIds::new();
        assert!(check_addition("keyboard", &nodes, &connections, &mut ids, &config).is_none());
        assert!(check_removal("keyboard", &nodes, &connections, &config).is_none());
        assert!(check_removal("missing", &nodes, &connections, &config).is_none());
    }

    #[test]
    fn test_grow_input_panels_symmetrically() {
        let mut panel = GraphNode::new("panel-in", NodeKind::InputPanel);
        panel.ports.push(PortDefinition::new(
            "port-1",
            "",
            SignalType::Control,
            PortDirection::Output,
        ));
        let nodes = keyboard_with(panel);
        let mut connections = ConnectionSet::new();
        connections.insert(
            "w1".into(),
            Connection::new("w1", ("panel-in", "port-1"), ("osc", "freq"), SignalType::Control),
        );

        let growth = check_addition(
            "keyboard",
            &nodes,
            &connections,
            &mut SequentialIds::new(),
            &EngineConfig::default(),
        );
        let Some(PortGrowth::Panel(panel)) = growth else {
            panic!("expected panel growth");
        };
        let added = panel.ports.last().expect("new row");
        assert_eq!(added.id, "port-2");
        assert_eq!(added.direction, PortDirection::Output);
    }

    #[test]
    fn test_add_relay_siblings_on_legacy_controllers() {
        let mut keyboard = GraphNode::new("keyboard", NodeKind::Keyboard);
        let mut nodes = NodeMap::new();
        let mut connections = ConnectionSet::new();
        for i in 1..=2 {
            let id = format!("relay-{i}");
            let mut relay = GraphNode::new(id.as_str(), NodeKind::RelayOutput);
            relay.ports.push(PortDefinition::new(
                "in",
                "",
                SignalType::Gate,
                PortDirection::Input,
            ));
            keyboard.child_ids.push(id.clone());
            keyboard.special_nodes.push(id.clone());
            nodes.insert(id.clone(), relay);
            let wire_id = format!("w{i}");
            connections.insert(
                wire_id.clone(),
                Connection::new(
                    wire_id.as_str(),
                    ("key-1", "key-out"),
                    (id.as_str(), "in"),
                    SignalType::Gate,
                ),
            );
        }
        nodes.insert("keyboard".into(), keyboard);
        let config = EngineConfig::default();

        let mut ids = SequentialIds::new();
        let growth = check_addition("keyboard", &nodes, &connections, &mut ids, &config)
            .expect("saturated relays grow");
        let mutation = growth.clone().into_mutation();
        let PortGrowth::RelaySibling { parent_id, node } = growth else {
            panic!("expected a relay sibling");
        };
        assert_eq!(parent_id, "keyboard");
        assert_eq!(node.id, "relay-output-1");
        assert_eq!(node.kind, NodeKind::RelayOutput);
        assert_eq!(node.parent_id.as_deref(), Some("keyboard"));
        assert_eq!(node.data.port_name.as_deref(), Some("Output 3"));
        assert_eq!(node.ports.len(), 1);
        assert!(matches!(mutation, GraphMutation::InsertChild { special: true, .. }));

        connections.shift_remove("w2");
        assert!(
            check_addition("keyboard", &nodes, &connections, &mut SequentialIds::new(), &config)
                .is_none()
        );
    }

    #[test]
    fn test_respect_the_floor() {
        let nodes = keyboard_with(output_panel(4));
        let removal = check_removal(
            "keyboard",
            &nodes,
            &ConnectionSet::new(),
            &EngineConfig::default(),
        );
        assert!(removal.is_none());
    }

    #[test]
    fn test_shed_the_highest_numbered_free_row() {
        let nodes = keyboard_with(output_panel(6));
        let connections = wired(&[1, 2]);
        let panel = check_removal("keyboard", &nodes, &connections, &EngineConfig::default())
            .expect("surplus rows shrink");
        let ids: Vec<&str> = panel.ports.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["port-1", "port-2", "port-3", "port-4", "port-5"]);
        assert!(panel.data.port_labels.get("port-6").is_none());
        assert!(panel.data.port_labels.get("port-5").is_some());
    }

    #[test]
    fn test_never_shed_a_wired_row() {
        let nodes = keyboard_with(output_panel(5));
        let connections = wired(&[5]);
        let panel = check_removal("keyboard", &nodes, &connections, &EngineConfig::default())
            .expect("surplus rows shrink");
        assert!(panel.port("port-5").is_some());
        assert!(panel.port("port-4").is_none());
    }

    #[test]
    fn test_not_oscillate_around_the_floor() {
        let mut nodes = keyboard_with(output_panel(4));
        let config = EngineConfig::default();
        let all = wired(&[1, 2, 3, 4]);
        let growth = check_addition("keyboard", &nodes, &all, &mut SequentialIds::new(), &config)
            .expect("saturated panel grows");
        let PortGrowth::Panel(grown) = growth else {
            panic!("expected panel growth");
        };
        assert_eq!(grown.ports.len(), 5);
        nodes.insert(grown.id.clone(), grown);

        let freed = wired(&[1, 2, 3]);
        assert!(check_removal("keyboard", &nodes, &freed, &config).is_none());
        let freed_twice = wired(&[1, 2]);
        assert!(check_removal("keyboard", &nodes, &freed_twice, &config).is_none());
    }

    #[test]
    fn test_use_the_input_panel_floor() {
        let mut panel = GraphNode::new("panel-in", NodeKind::InputPanel);
        for (id, name) in [("port-1", "Gate"), ("port-2", "Velocity"), ("empty-1", "")] {
            panel.ports.push(PortDefinition::new(
                id,
                name,
                SignalType::Control,
                PortDirection::Output,
            ));
        }
        let nodes = keyboard_with(panel);
        let config = EngineConfig::default();
        let shrunk = check_removal("keyboard", &nodes, &ConnectionSet::new(), &config)
            .expect("input panel above its floor shrinks");
        let ids: Vec<&str> = shrunk.ports.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["port-1", "empty-1"]);

        let nodes = keyboard_with(shrunk);
        assert!(check_removal("keyboard", &nodes, &ConnectionSet::new(), &config).is_none());
    }
}
