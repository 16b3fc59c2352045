//! Connection pipeline tying the port components together.
//!
//! After a wire is added or removed the stages run in a fixed order, each on the output of the
//! previous one:
//!
//! 1. empty-slot repair on every panel the wire touches,
//! 2. growth (after an add) or shrinkage (after a remove) of auto-growing parents, followed by
//!    another empty-slot pass,
//! 3. bundle detection and expansion onto the receiving node (adds only), followed by an
//!    empty-slot pass on the receiving panel,
//! 4. port resync of every parent whose children changed.
//!
//! Every applied change is returned so the caller can mirror it into its own state.

use crate::bundle::{
    collapse_bundle, detect_bundle, expand_target, toggle_bundle_expanded, BundleExpansion,
};
use crate::config::EngineConfig;
use crate::dynamic::{check_addition, check_removal};
use crate::empty_slot::ensure_empty_slot;
use crate::graph::{GraphError, PatchGraph};
use crate::ids::{IdAllocator, UuidAllocator};
use crate::mutation::GraphMutation;
use crate::port_id::{check_port_id, CompositePortId};
use crate::sync::{special_child_of_kind, special_children};
use crate::types::{Connection, GraphNode, NodeId, NodeKind, PanelKind, PortDefinition};
use std::borrow::Cow;

pub struct PortEngine {
    config: EngineConfig,
    ids: Box<dyn IdAllocator>,
    /// Hide unwired relays and panel rows on parents.
    only_connected: bool,
}

impl Default for PortEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl PortEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_allocator(config, Box::new(UuidAllocator))
    }

    pub fn with_allocator(config: EngineConfig, ids: Box<dyn IdAllocator>) -> Self {
        Self {
            config,
            ids,
            only_connected: false,
        }
    }

    pub fn only_connected(mut self, only_connected: bool) -> Self {
        self.only_connected = only_connected;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Store `connection` and run the add pipeline for it.
    pub fn connect(
        &mut self,
        graph: &mut PatchGraph,
        connection: Connection,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let id = connection.id.clone();
        graph.add_connection(connection)?;
        self.on_connection_added(graph, &id)
    }

    /// Remove a wire and run the remove pipeline. The removal itself leads the returned list.
    pub fn disconnect(
        &mut self,
        graph: &mut PatchGraph,
        connection_id: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let removed = graph.remove_connection(connection_id)?;
        let mut applied = vec![GraphMutation::RemoveConnection {
            connection_id: removed.id.clone(),
        }];
        applied.extend(self.on_connection_removed(graph, &removed)?);
        Ok(applied)
    }

    /// Run the add pipeline for a wire that is already stored.
    pub fn on_connection_added(
        &mut self,
        graph: &mut PatchGraph,
        connection_id: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let connection = graph
            .connection(connection_id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownConnection(connection_id.to_string()))?;
        let mut applied = Vec::new();

        for (panel_id, kind) in touched_panels(graph, &connection) {
            self.restore_empty_slot(graph, &panel_id, kind, &mut applied)?;
        }

        for parent_id in endpoint_parents(graph, &connection) {
            let growth = check_addition(
                &parent_id,
                graph.nodes(),
                graph.connections(),
                self.ids.as_mut(),
                &self.config,
            );
            match growth {
                Some(growth) => {
                    commit(graph, growth.into_mutation(), &mut applied)?;
                    self.restore_parent_panels(graph, &parent_id, &mut applied)?;
                }
                None => log::trace!("no growth on '{parent_id}'"),
            }
        }

        let expansion = self.expand_bundle(graph, &connection, &mut applied)?;

        self.resync_affected(graph, &connection, &mut applied)?;

        if let Some(expansion) = expansion {
            retarget_wire(graph, &connection, &expansion, &mut applied)?;
        }
        Ok(applied)
    }

    /// Run the remove pipeline for a wire that has already left the store.
    pub fn on_connection_removed(
        &mut self,
        graph: &mut PatchGraph,
        removed: &Connection,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let mut applied = Vec::new();

        for (panel_id, kind) in touched_panels(graph, removed) {
            self.restore_empty_slot(graph, &panel_id, kind, &mut applied)?;
        }

        for parent_id in endpoint_parents(graph, removed) {
            match check_removal(&parent_id, graph.nodes(), graph.connections(), &self.config) {
                Some(panel) => {
                    commit(graph, GraphMutation::ReplaceNode { node: panel }, &mut applied)?;
                    self.restore_parent_panels(graph, &parent_id, &mut applied)?;
                }
                None => log::trace!("no shrink on '{parent_id}'"),
            }
        }

        self.resync_affected(graph, removed, &mut applied)?;
        Ok(applied)
    }

    /// Recompute the ports `parent_id` mirrors from its special children.
    pub fn resync(
        &self,
        graph: &mut PatchGraph,
        parent_id: &str,
    ) -> Result<Option<GraphMutation>, GraphError> {
        if graph.node(parent_id).is_none() {
            return Err(GraphError::UnknownNode(parent_id.to_string()));
        }
        Ok(graph.resync_ports(parent_id, self.only_connected, &self.config))
    }

    /// Set the name a relay child contributes to its parent and resync the parent.
    pub fn rename_special_child(
        &mut self,
        graph: &mut PatchGraph,
        child_id: &str,
        name: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let mut child = graph
            .node(child_id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNode(child_id.to_string()))?;
        child.data.port_name = Some(name.to_string());
        self.write_child(graph, child)
    }

    /// Label one panel row and resync the panel's parent.
    pub fn set_port_label(
        &mut self,
        graph: &mut PatchGraph,
        panel_id: &str,
        port_id: &str,
        label: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        check_port_id(port_id).map_err(|source| {
            log::warn!("refusing label for port {port_id:?}: {source}");
            GraphError::InvalidPortId {
                port_id: port_id.to_string(),
                source,
            }
        })?;
        let mut panel = graph
            .node(panel_id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNode(panel_id.to_string()))?;
        if panel.port(port_id).is_none() {
            return Err(GraphError::UnknownPort {
                node_id: panel_id.to_string(),
                port_id: port_id.to_string(),
            });
        }
        panel
            .data
            .port_labels
            .insert(port_id.to_string(), label.to_string());
        self.write_child(graph, panel)
    }

    /// Flip the expanded flag of bundle row `port_id` on `panel_id`.
    pub fn toggle_bundle(
        &mut self,
        graph: &mut PatchGraph,
        panel_id: &str,
        port_id: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        self.update_bundle_rows(graph, panel_id, port_id, toggle_bundle_expanded)
    }

    /// Hide the per-channel detail of bundle row `port_id` on `panel_id`.
    pub fn collapse_bundle(
        &mut self,
        graph: &mut PatchGraph,
        panel_id: &str,
        port_id: &str,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        self.update_bundle_rows(graph, panel_id, port_id, collapse_bundle)
    }

    fn update_bundle_rows(
        &mut self,
        graph: &mut PatchGraph,
        panel_id: &str,
        port_id: &str,
        update: fn(&[PortDefinition], &str) -> Option<Vec<PortDefinition>>,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let mut panel = graph
            .node(panel_id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownNode(panel_id.to_string()))?;
        panel.ports = update(&panel.ports, port_id).ok_or_else(|| GraphError::UnknownPort {
            node_id: panel_id.to_string(),
            port_id: port_id.to_string(),
        })?;
        self.write_child(graph, panel)
    }

    fn write_child(
        &mut self,
        graph: &mut PatchGraph,
        child: GraphNode,
    ) -> Result<Vec<GraphMutation>, GraphError> {
        let parent_id = child.parent_id.clone();
        let mut applied = Vec::new();
        commit(graph, GraphMutation::ReplaceNode { node: child }, &mut applied)?;
        if let Some(parent_id) = parent_id {
            applied.extend(self.resync(graph, &parent_id)?);
        }
        Ok(applied)
    }

    fn restore_empty_slot(
        &mut self,
        graph: &mut PatchGraph,
        panel_id: &str,
        kind: PanelKind,
        applied: &mut Vec<GraphMutation>,
    ) -> Result<(), GraphError> {
        let Some(panel) = graph.node(panel_id) else {
            return Ok(());
        };
        let repaired = match ensure_empty_slot(
            panel,
            graph.connections(),
            kind,
            self.ids.as_mut(),
            &self.config,
        ) {
            Cow::Owned(node) => node,
            Cow::Borrowed(_) => {
                log::trace!("panel '{panel_id}' already holds one placeholder");
                return Ok(());
            }
        };
        commit(graph, GraphMutation::ReplaceNode { node: repaired }, applied)
    }

    fn restore_parent_panels(
        &mut self,
        graph: &mut PatchGraph,
        parent_id: &str,
        applied: &mut Vec<GraphMutation>,
    ) -> Result<(), GraphError> {
        let panels: Vec<(NodeId, PanelKind)> = match graph.node(parent_id) {
            Some(parent) => special_children(parent, graph.nodes())
                .into_iter()
                .filter_map(|child| child.kind.panel_kind().map(|kind| (child.id.clone(), kind)))
                .collect(),
            None => Vec::new(),
        };
        for (panel_id, kind) in panels {
            self.restore_empty_slot(graph, &panel_id, kind, applied)?;
        }
        Ok(())
    }

    fn expand_bundle(
        &mut self,
        graph: &mut PatchGraph,
        connection: &Connection,
        applied: &mut Vec<GraphMutation>,
    ) -> Result<Option<BundleExpansion>, GraphError> {
        let Some(bundle) = detect_bundle(
            &connection.source_node_id,
            &connection.source_port_id,
            graph.nodes(),
            graph.connections(),
            &self.config,
        ) else {
            return Ok(None);
        };

        let already_expanded = graph
            .node(&connection.target_node_id)
            .and_then(|target| special_child_of_kind(target, graph.nodes(), &NodeKind::InputPanel))
            .is_some_and(|panel| {
                panel.ports.iter().any(|p| {
                    p.bundle_info
                        .as_ref()
                        .is_some_and(|info| info.bundle_id == bundle.bundle_id)
                })
            });
        if already_expanded {
            log::trace!(
                "'{}' already receives bundle '{}'",
                connection.target_node_id,
                bundle.bundle_id
            );
            return Ok(None);
        }

        let Some(expansion) = expand_target(
            &connection.target_node_id,
            &bundle,
            graph.nodes(),
            graph.connections(),
            self.ids.as_mut(),
            &self.config,
        ) else {
            log::trace!(
                "'{}' cannot receive bundles; keeping a plain wire",
                connection.target_node_id
            );
            return Ok(None);
        };

        let panel = graph
            .node(&expansion.panel_id)
            .ok_or_else(|| GraphError::UnknownNode(expansion.panel_id.clone()))?;
        let updated = expansion.apply_to(panel);
        commit(graph, GraphMutation::ReplaceNode { node: updated }, applied)?;
        self.restore_empty_slot(graph, &expansion.panel_id, PanelKind::Input, applied)?;
        Ok(Some(expansion))
    }

    fn resync_affected(
        &self,
        graph: &mut PatchGraph,
        connection: &Connection,
        applied: &mut Vec<GraphMutation>,
    ) -> Result<(), GraphError> {
        let mut parents = endpoint_parents(graph, connection);
        for mutation in applied.iter() {
            let parent = mutation
                .node_id()
                .and_then(|id| graph.node(id))
                .and_then(|node| node.parent_id.clone());
            if let Some(parent) = parent {
                if !parents.contains(&parent) {
                    parents.push(parent);
                }
            }
        }
        for parent_id in parents {
            if let Some(mutation) = self.resync(graph, &parent_id)? {
                applied.push(mutation);
            }
        }
        Ok(())
    }
}

fn commit(
    graph: &mut PatchGraph,
    mutation: GraphMutation,
    applied: &mut Vec<GraphMutation>,
) -> Result<(), GraphError> {
    log::debug!("applying {mutation:?}");
    graph.apply(mutation.clone())?;
    applied.push(mutation);
    Ok(())
}

/// Panels at either end of `connection`, each listed once.
fn touched_panels(graph: &PatchGraph, connection: &Connection) -> Vec<(NodeId, PanelKind)> {
    let mut panels: Vec<(NodeId, PanelKind)> = Vec::new();
    for node_id in [&connection.source_node_id, &connection.target_node_id] {
        let Some(kind) = graph.node(node_id).and_then(|n| n.kind.panel_kind()) else {
            continue;
        };
        if !panels.iter().any(|(id, _)| id == node_id) {
            panels.push((node_id.clone(), kind));
        }
    }
    panels
}

/// Parents of the nodes at either end of `connection`, each listed once.
fn endpoint_parents(graph: &PatchGraph, connection: &Connection) -> Vec<NodeId> {
    let mut parents: Vec<NodeId> = Vec::new();
    for node_id in [&connection.source_node_id, &connection.target_node_id] {
        if let Some(parent) = graph.node(node_id).and_then(|n| n.parent_id.clone()) {
            if !parents.contains(&parent) {
                parents.push(parent);
            }
        }
    }
    parents
}

/// Re-point a wire that targeted the placeholder a bundle row replaced.
fn retarget_wire(
    graph: &mut PatchGraph,
    connection: &Connection,
    expansion: &BundleExpansion,
    applied: &mut Vec<GraphMutation>,
) -> Result<(), GraphError> {
    let Some(replaced) = expansion.replaced_port_id.as_deref() else {
        return Ok(());
    };
    let Ok(old_target) = CompositePortId::new(expansion.panel_id.as_str(), replaced) else {
        return Ok(());
    };
    if connection.target_port_id != old_target.to_string() {
        return Ok(());
    }
    let Ok(new_target) =
        CompositePortId::new(expansion.panel_id.as_str(), expansion.new_port.id.as_str())
    else {
        return Ok(());
    };

    let mut rewired = connection.clone();
    rewired.target_port_id = new_target.to_string();
    commit(
        graph,
        GraphMutation::RemoveConnection {
            connection_id: connection.id.clone(),
        },
        applied,
    )?;
    commit(graph, GraphMutation::AddConnection { connection: rewired }, applied)
}
