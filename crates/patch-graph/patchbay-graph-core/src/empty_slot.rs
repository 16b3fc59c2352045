//! Keeps exactly one unconnected placeholder row at the tail of a panel.
//!
//! Must run after every connection add or remove touching the panel. It is the only place that
//! repairs a panel holding zero or several placeholders.

use crate::config::EngineConfig;
use crate::ids::IdAllocator;
use crate::port_id::is_valid_port_id;
use crate::types::{port_is_connected, ConnectionSet, GraphNode, PanelKind, PortDefinition};
use std::borrow::Cow;

/// Whether `port` looks like a placeholder: unnamed, or carrying the reserved id prefix.
pub fn is_placeholder_port(port: &PortDefinition, config: &EngineConfig) -> bool {
    port.name.is_empty() || config.is_placeholder_id(&port.id)
}

/// Ids of the unconnected placeholder rows of `panel`, in row order.
pub fn empty_rows<'a>(
    panel: &'a GraphNode,
    connections: &ConnectionSet,
    panel_kind: PanelKind,
    config: &EngineConfig,
) -> Vec<&'a PortDefinition> {
    panel
        .ports_in(panel_kind.row_direction())
        .filter(|port| {
            is_placeholder_port(port, config) && !port_is_connected(connections, &panel.id, port)
        })
        .collect()
}

/// Restore the single-placeholder invariant on `panel`.
///
/// Returns the panel unchanged (borrowed) when it already holds exactly one placeholder row.
/// A freshly allocated id that fails the id grammar or collides with an existing row leaves the
/// panel untouched.
pub fn ensure_empty_slot<'a>(
    panel: &'a GraphNode,
    connections: &ConnectionSet,
    panel_kind: PanelKind,
    ids: &mut dyn IdAllocator,
    config: &EngineConfig,
) -> Cow<'a, GraphNode> {
    let direction = panel_kind.row_direction();
    let empty: Vec<String> = empty_rows(panel, connections, panel_kind, config)
        .into_iter()
        .map(|port| port.id.clone())
        .collect();

    match empty.len() {
        1 => Cow::Borrowed(panel),
        0 => {
            let id = ids.next(&config.empty_port_prefix);
            if !is_valid_port_id(&id) || panel.port(&id).is_some() {
                log::warn!(
                    "allocator produced unusable placeholder id {id:?} for panel '{}'",
                    panel.id
                );
                return Cow::Borrowed(panel);
            }

            let rows = panel.ports_in(direction).count();
            let signal = panel
                .ports_in(direction)
                .next()
                .map(|p| p.signal)
                .unwrap_or_default();
            let mut port = PortDefinition::new(id.clone(), "", signal, direction)
                .with_position(config.row_position(direction, rows, rows + 1));
            port.hide_external_label = Some(true);

            let mut updated = panel.clone();
            updated.ports.push(port);
            updated.data.port_hide_external_label.insert(id.clone(), true);
            log::debug!("panel '{}' gained placeholder row '{id}'", panel.id);
            Cow::Owned(updated)
        }
        _ => {
            let stale = &empty[1..];
            let mut updated = panel.clone();
            updated.ports.retain(|p| !stale.contains(&p.id));
            for id in stale {
                updated.data.forget_port(id);
            }
            log::debug!(
                "panel '{}' dropped {} surplus placeholder rows",
                panel.id,
                stale.len()
            );
            Cow::Owned(updated)
        }
    }
}
