//! Bundle detection and expansion.
//!
//! A bundle is one output-panel row fed by several internal wires. [`detect_bundle`] describes
//! the signals behind such a row, and [`expand_target`] turns that description into a
//! bundle-aware row on the receiving node's input panel.

use crate::config::EngineConfig;
use crate::empty_slot::empty_rows;
use crate::ids::IdAllocator;
use crate::mutation::LabelUpdates;
use crate::port_id::{check_composite_port_id, is_valid_port_id, CompositePortId};
use crate::sync::special_child_of_kind;
use crate::types::{
    BundleChannel, BundleInfo, ConnectionSet, GraphNode, NodeId, NodeKind, NodeMap, PanelKind,
    PortDefinition, PortId, SignalType,
};

const CONTROL_PREFIXES: &[(&str, &str)] = &[
    ("key", "Key"),
    ("pad", "Pad"),
    ("knob", "Knob"),
    ("fader", "Fader"),
];
const CONTROL_FRAGMENTS: &[(&str, &str)] = &[("pitch", "Pitch"), ("mod", "Mod"), ("row", "Row")];
const GENERIC_CONTROL: &str = "Ch";

/// Best guess at the kind of control behind an internal port id. Display only.
pub fn guess_control_type(port_id: &str) -> &'static str {
    let lower = port_id.to_ascii_lowercase();
    CONTROL_PREFIXES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .or_else(|| {
            CONTROL_FRAGMENTS
                .iter()
                .find(|(fragment, _)| lower.contains(fragment))
        })
        .map(|(_, label)| *label)
        .unwrap_or(GENERIC_CONTROL)
}

/// Describe the signals multiplexed through `source_port_id` on `source_node_id`.
///
/// Returns `None` unless the port id passes the composite grammar, names an output-panel that
/// is a special child of the source node, and that panel row has at least one internal wire.
pub fn detect_bundle(
    source_node_id: &str,
    source_port_id: &str,
    nodes: &NodeMap,
    connections: &ConnectionSet,
    config: &EngineConfig,
) -> Option<BundleInfo> {
    if let Err(err) = check_composite_port_id(source_port_id) {
        log::warn!("rejecting bundle probe on {source_port_id:?}: {err}");
        return None;
    }
    let Ok(composite) = CompositePortId::parse(source_port_id) else {
        log::trace!("port '{source_port_id}' is not a panel row");
        return None;
    };

    let source = nodes.get(source_node_id)?;
    let panel = nodes.get(&composite.panel_id)?;
    if panel.kind != NodeKind::OutputPanel {
        return None;
    }
    if !source.is_special(&panel.id) {
        log::warn!(
            "panel '{}' is not a special child of '{source_node_id}'",
            panel.id
        );
        return None;
    }

    let source_name = source.display_name();
    let channels: Vec<BundleChannel> = connections
        .values()
        .filter(|c| c.ends_at(&panel.id, &composite.port_id))
        .enumerate()
        .map(|(index, wire)| {
            let mut control = guess_control_type(&wire.source_port_id);
            if control == GENERIC_CONTROL {
                control = guess_control_type(&wire.source_node_id);
            }
            BundleChannel {
                id: format!("{}-ch{}", composite.port_id, index + 1),
                label: format!("{source_name} {control} {}", index + 1),
                source_port_id: wire.source_port_id.clone(),
                source_node_id: wire.source_node_id.clone(),
            }
        })
        .collect();
    if channels.is_empty() {
        return None;
    }

    let row_label = panel
        .data
        .port_labels
        .get(&composite.port_id)
        .filter(|label| !label.is_empty())
        .unwrap_or(&config.default_bundle_label);

    Some(BundleInfo {
        bundle_id: composite.to_string(),
        bundle_label: format!("{source_name} {row_label}"),
        size: channels.len(),
        source_node_name: source_name.to_string(),
        source_node_type: source.kind.to_string(),
        channels,
        expanded: false,
    })
}

/// Row to add to a receiving input panel, plus the label edits that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleExpansion {
    pub panel_id: NodeId,
    pub new_port: PortDefinition,
    /// The panel's complete port list after the change.
    pub ports: Vec<PortDefinition>,
    /// Placeholder row the bundle row took the place of.
    pub replaced_port_id: Option<PortId>,
    pub label_updates: LabelUpdates,
}

impl BundleExpansion {
    /// Produce the updated panel node.
    pub fn apply_to(&self, panel: &GraphNode) -> GraphNode {
        let mut updated = panel.clone();
        updated.ports = self.ports.clone();
        self.label_updates.apply_to(&mut updated.data);
        updated
    }
}

/// Describe the bundle row `target_node_id`'s input panel should gain for `bundle`.
///
/// The row replaces the panel's placeholder when exactly one unwired placeholder exists.
/// Returns `None` when the target has no input panel (the caller falls back to a plain wire) or
/// when the bundle id or the allocated port id fail validation. Run the empty-slot invariant on
/// the panel afterwards.
pub fn expand_target(
    target_node_id: &str,
    bundle: &BundleInfo,
    nodes: &NodeMap,
    connections: &ConnectionSet,
    ids: &mut dyn IdAllocator,
    config: &EngineConfig,
) -> Option<BundleExpansion> {
    if let Err(err) = check_composite_port_id(&bundle.bundle_id) {
        log::warn!("refusing to expand bundle {:?}: {err}", bundle.bundle_id);
        return None;
    }
    let target = nodes.get(target_node_id)?;
    let panel = special_child_of_kind(target, nodes, &NodeKind::InputPanel)?;

    let id = ids.next(&config.bundle_port_prefix);
    if !is_valid_port_id(&id) || panel.port(&id).is_some() {
        log::warn!("allocator produced unusable bundle port id {id:?}");
        return None;
    }

    let direction = PanelKind::Input.row_direction();
    let free: Vec<&str> = empty_rows(panel, connections, PanelKind::Input, config)
        .into_iter()
        .map(|port| port.id.as_str())
        .collect();
    let placeholders: Vec<usize> = panel
        .ports
        .iter()
        .enumerate()
        .filter(|(_, p)| p.direction == direction && free.contains(&p.id.as_str()))
        .map(|(index, _)| index)
        .collect();
    let occupied = panel.ports_in(direction).count() - placeholders.len();
    let replaced = match placeholders.as_slice() {
        [only] => Some(*only),
        _ => None,
    };

    let signal = replaced
        .map(|index| panel.ports[index].signal)
        .unwrap_or(SignalType::Control);
    let mut new_port = PortDefinition::new(
        id.clone(),
        format!("{} ({})", bundle.bundle_label, bundle.channels.len()),
        signal,
        direction,
    )
    .with_position(config.row_position(direction, occupied, occupied + 1));
    new_port.bundle_info = Some(BundleInfo {
        expanded: false,
        ..bundle.clone()
    });

    let mut ports = panel.ports.clone();
    let mut label_updates = LabelUpdates {
        labels: vec![(id.clone(), bundle.bundle_label.clone())],
        hide_external_label: vec![(id.clone(), false)],
        removed: Vec::new(),
    };
    let replaced_port_id = match replaced {
        Some(index) => {
            let old = std::mem::replace(&mut ports[index], new_port.clone());
            label_updates.removed.push(old.id.clone());
            Some(old.id)
        }
        None => {
            ports.push(new_port.clone());
            None
        }
    };

    log::debug!(
        "bundle '{}' expands onto panel '{}' as '{id}'",
        bundle.bundle_id,
        panel.id
    );
    Some(BundleExpansion {
        panel_id: panel.id.clone(),
        new_port,
        ports,
        replaced_port_id,
        label_updates,
    })
}

fn set_expanded(
    ports: &[PortDefinition],
    port_id: &str,
    expanded: impl Fn(bool) -> bool,
) -> Option<Vec<PortDefinition>> {
    let index = ports
        .iter()
        .position(|p| p.id == port_id && p.bundle_info.is_some())?;
    let mut updated = ports.to_vec();
    if let Some(info) = updated[index].bundle_info.as_mut() {
        info.expanded = expanded(info.expanded);
    }
    Some(updated)
}

/// Flip the `expanded` flag of the bundle port `port_id`. `None` if no such bundle port exists.
pub fn toggle_bundle_expanded(
    ports: &[PortDefinition],
    port_id: &str,
) -> Option<Vec<PortDefinition>> {
    set_expanded(ports, port_id, |current| !current)
}

/// Clear the `expanded` flag of the bundle port `port_id`. Channel data is kept.
pub fn collapse_bundle(ports: &[PortDefinition], port_id: &str) -> Option<Vec<PortDefinition>> {
    set_expanded(ports, port_id, |_| false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use crate::types::{Connection, PortDirection};

    fn keyboard_graph(feeds: usize) -> (NodeMap, ConnectionSet) {
        let mut keyboard = GraphNode::new("keyboard", NodeKind::Keyboard);
        keyboard.data.label = Some("Piano Keys".into());
        keyboard.child_ids.push("panel-1".into());
        keyboard.special_nodes.push("panel-1".into());

        let mut panel = GraphNode::new("panel-1", NodeKind::OutputPanel);
        panel.parent_id = Some("keyboard".into());
        panel.ports.push(PortDefinition::new(
            "port-1",
            "",
            SignalType::Gate,
            PortDirection::Input,
        ));
        panel.data.port_labels.insert("port-1".into(), "Row 1".into());

        let mut nodes = NodeMap::new();
        let mut connections = ConnectionSet::new();
        for i in 1..=feeds {
            let key_id = format!("key-{i}");
            let mut key = GraphNode::new(key_id.as_str(), NodeKind::Other("key".into()));
            key.parent_id = Some("keyboard".into());
            key.ports.push(PortDefinition::new(
                "key-out",
                "",
                SignalType::Gate,
                PortDirection::Output,
            ));
            keyboard.child_ids.push(key_id.clone());
            nodes.insert(key_id.clone(), key);

            let wire_id = format!("w{i}");
            let wire = Connection::new(
                wire_id.as_str(),
                (key_id.as_str(), "key-out"),
                ("panel-1", "port-1"),
                SignalType::Gate,
            );
            connections.insert(wire_id, wire);
        }
        nodes.insert("keyboard".into(), keyboard);
        nodes.insert("panel-1".into(), panel);
        (nodes, connections)
    }

    fn receiver(nodes: &mut NodeMap, rows: &[(&str, &str)]) {
        let mut synth = GraphNode::new("synth", NodeKind::Other("poly-synth".into()));
        synth.child_ids.push("panel-in".into());
        synth.special_nodes.push("panel-in".into());
        let mut panel = GraphNode::new("panel-in", NodeKind::InputPanel);
        panel.parent_id = Some("synth".into());
        for (id, name) in rows {
            panel.ports.push(PortDefinition::new(
                *id,
                *name,
                SignalType::Gate,
                PortDirection::Output,
            ));
        }
        nodes.insert("synth".into(), synth);
        nodes.insert("panel-in".into(), panel);
    }

    #[test]
    fn test_describe_a_simple_bundle() {
        let (nodes, connections) = keyboard_graph(3);
        let info = detect_bundle(
            "keyboard",
            "panel-1:port-1",
            &nodes,
            &connections,
            &EngineConfig::default(),
        )
        .expect("bundle detected");

        assert_eq!(info.bundle_id, "panel-1:port-1");
        assert_eq!(info.bundle_label, "Piano Keys Row 1");
        assert_eq!(info.size, 3);
        assert_eq!(info.source_node_name, "Piano Keys");
        assert_eq!(info.source_node_type, "keyboard");
        assert!(!info.expanded);
        let labels: Vec<&str> = info.channels.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["Piano Keys Key 1", "Piano Keys Key 2", "Piano Keys Key 3"]
        );
        let sources: Vec<&str> = info
            .channels
            .iter()
            .map(|c| c.source_node_id.as_str())
            .collect();
        assert_eq!(sources, vec!["key-1", "key-2", "key-3"]);
    }

    #[test]
    fn test_count_every_internal_wire() {
        for k in 1..=6 {
            let (nodes, connections) = keyboard_graph(k);
            let info = detect_bundle(
                "keyboard",
                "panel-1:port-1",
                &nodes,
                &connections,
                &EngineConfig::default(),
            )
            .expect("bundle detected");
            assert_eq!(info.size, k);
            assert_eq!(info.channels.len(), k);
            let mut distinct: Vec<(&str, &str)> = info
                .channels
                .iter()
                .map(|c| (c.source_node_id.as_str(), c.source_port_id.as_str()))
                .collect();
            distinct.sort();
            distinct.dedup();
            assert_eq!(distinct.len(), k);
        }
    }

    #[test]
    fn test_reject_manipulated_port_ids() {
        let (nodes, connections) = keyboard_graph(2);
        let config = EngineConfig::default();
        for probe in ["../../../etc/passwd", "panel:<script>", "panel-1:port-1:x", ""] {
            assert!(
                detect_bundle("x", probe, &nodes, &connections, &config).is_none(),
                "{probe:?} should be rejected"
            );
            assert!(detect_bundle("keyboard", probe, &nodes, &connections, &config).is_none());
        }
    }

    #[test]
    fn test_ignore_rows_that_are_not_bundles() {
        let (mut nodes, connections) = keyboard_graph(2);
        let config = EngineConfig::default();
        // plain id
        assert!(detect_bundle("keyboard", "port-1", &nodes, &connections, &config).is_none());
        // unwired row
        assert!(
            detect_bundle("keyboard", "panel-1:port-9", &nodes, &connections, &config).is_none()
        );
        // unknown panel
        assert!(detect_bundle("keyboard", "ghost:port-1", &nodes, &connections, &config).is_none());
        // source that does not own the panel
        receiver(&mut nodes, &[]);
        assert!(detect_bundle("synth", "panel-1:port-1", &nodes, &connections, &config).is_none());
        // input panels never carry bundles outward
        assert!(detect_bundle("synth", "panel-in:port-1", &nodes, &connections, &config).is_none());
    }

    #[test]
    fn test_guess_control_types() {
        assert_eq!(guess_control_type("key-out"), "Key");
        assert_eq!(guess_control_type("Pad_3"), "Pad");
        assert_eq!(guess_control_type("knob-a"), "Knob");
        assert_eq!(guess_control_type("fader2"), "Fader");
        assert_eq!(guess_control_type("out-pitch"), "Pitch");
        assert_eq!(guess_control_type("cc-mod"), "Mod");
        assert_eq!(guess_control_type("grid-row-2"), "Row");
        assert_eq!(guess_control_type("out"), "Ch");
    }

    #[test]
    fn test_replace_the_single_placeholder() {
        let (mut nodes, connections) = keyboard_graph(3);
        receiver(&mut nodes, &[("port-1", "Velocity"), ("empty-1", "")]);
        let config = EngineConfig::default();
        let info = detect_bundle("keyboard", "panel-1:port-1", &nodes, &connections, &config)
            .expect("bundle detected");

        let mut ids = SequentialIds::new();
        let expansion =
            expand_target("synth", &info, &nodes, &connections, &mut ids, &config)
                .expect("target accepts bundles");
        assert_eq!(expansion.panel_id, "panel-in");
        assert_eq!(expansion.replaced_port_id.as_deref(), Some("empty-1"));
        let ids_now: Vec<&str> = expansion.ports.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids_now, vec!["port-1", "bundle-1"]);

        let bundle_port = &expansion.ports[1];
        assert_eq!(bundle_port.name, "Piano Keys Row 1 (3)");
        assert_eq!(bundle_port.direction, PortDirection::Output);
        let attached = bundle_port.bundle_info.as_ref().expect("bundle info");
        assert_eq!(attached.size, 3);
        assert!(!attached.expanded);
        let y = bundle_port.position.map(|p| p.y).expect("placement");
        assert!((y - 200.0 / 3.0).abs() < 1e-3, "unexpected offset {y}");

        assert_eq!(expansion.label_updates.removed, vec!["empty-1".to_string()]);
        let panel = nodes.get("panel-in").expect("panel");
        let updated = expansion.apply_to(panel);
        assert_eq!(
            updated.data.port_labels.get("bundle-1").map(String::as_str),
            Some("Piano Keys Row 1")
        );
        assert_eq!(updated.data.port_hide_external_label.get("bundle-1"), Some(&false));
    }

    #[test]
    fn test_append_when_no_single_placeholder_exists() {
        let (mut nodes, connections) = keyboard_graph(2);
        receiver(&mut nodes, &[("port-1", "A"), ("empty-1", ""), ("empty-2", "")]);
        let config = EngineConfig::default();
        let info = detect_bundle("keyboard", "panel-1:port-1", &nodes, &connections, &config)
            .expect("bundle detected");

        let expansion = expand_target(
            "synth",
            &info,
            &nodes,
            &connections,
            &mut SequentialIds::new(),
            &config,
        )
            .expect("target accepts bundles");
        assert!(expansion.replaced_port_id.is_none());
        assert_eq!(expansion.ports.len(), 4);
        assert_eq!(expansion.ports[3].id, "bundle-1");
        assert!(expansion.label_updates.removed.is_empty());
    }

    #[test]
    fn test_skip_placeholders_that_already_carry_a_wire() {
        let (mut nodes, mut connections) = keyboard_graph(1);
        receiver(&mut nodes, &[("empty-1", ""), ("empty-3", "")]);
        connections.insert(
            "inner".into(),
            Connection::new("inner", ("panel-in", "empty-1"), ("osc", "gate"), SignalType::Gate),
        );
        let config = EngineConfig::default();
        let info = detect_bundle("keyboard", "panel-1:port-1", &nodes, &connections, &config)
            .expect("bundle detected");

        let expansion = expand_target(
            "synth",
            &info,
            &nodes,
            &connections,
            &mut SequentialIds::new(),
            &config,
        )
        .expect("target accepts bundles");
        assert_eq!(expansion.replaced_port_id.as_deref(), Some("empty-3"));
        let ids_now: Vec<&str> = expansion.ports.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids_now, vec!["empty-1", "bundle-1"]);
    }

    #[test]
    fn test_decline_targets_without_an_input_panel() {
        let (nodes, connections) = keyboard_graph(2);
        let config = EngineConfig::default();
        let info = detect_bundle("keyboard", "panel-1:port-1", &nodes, &connections, &config)
            .expect("bundle detected");
        let mut ids = SequentialIds::new();
        assert!(expand_target("key-1", &info, &nodes, &connections, &mut ids, &config).is_none());
        assert!(expand_target("missing", &info, &nodes, &connections, &mut ids, &config).is_none());

        let forged = BundleInfo {
            bundle_id: "a:b:c".into(),
            ..info
        };
        let (mut nodes, connections) = keyboard_graph(1);
        receiver(&mut nodes, &[]);
        assert!(expand_target("synth", &forged, &nodes, &connections, &mut ids, &config).is_none());
    }

    #[test]
    fn test_toggle_and_collapse_without_losing_channels() {
        let (mut nodes, connections) = keyboard_graph(2);
        receiver(&mut nodes, &[("empty-1", "")]);
        let config = EngineConfig::default();
        let info = detect_bundle("keyboard", "panel-1:port-1", &nodes, &connections, &config)
            .expect("bundle detected");
        let expansion = expand_target(
            "synth",
            &info,
            &nodes,
            &connections,
            &mut SequentialIds::new(),
            &config,
        )
            .expect("target accepts bundles");

        let opened = toggle_bundle_expanded(&expansion.ports, "bundle-1").expect("bundle port");
        assert!(opened[0].bundle_info.as_ref().map(|b| b.expanded).unwrap_or(false));
        let closed = collapse_bundle(&opened, "bundle-1").expect("bundle port");
        let info = closed[0].bundle_info.as_ref().expect("bundle info kept");
        assert!(!info.expanded);
        assert_eq!(info.channels.len(), 2);
        let toggled_back = toggle_bundle_expanded(&opened, "bundle-1").expect("bundle port");
        assert_eq!(toggled_back, closed);

        assert!(toggle_bundle_expanded(&expansion.ports, "empty-1").is_none());
        assert!(collapse_bundle(&expansion.ports, "nope").is_none());
    }
}
