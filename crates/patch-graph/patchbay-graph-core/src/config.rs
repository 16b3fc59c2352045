//! Tunables for the port engine.

use crate::port_id::is_valid_port_id;
use crate::types::{NodeKind, PanelKind, PortDirection, PortPosition};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config json parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {reason}")]
    InvalidValue { reason: String },
}

/// Engine configuration. Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output panels never shrink to this many rows or fewer.
    pub output_panel_floor: usize,
    /// Input panels never shrink to this many rows or fewer.
    pub input_panel_floor: usize,
    /// Node kinds whose panels grow and shrink with their wiring.
    pub auto_grow_kinds: Vec<NodeKind>,
    /// Reserved prefix marking placeholder ports (`{prefix}-…`).
    pub empty_port_prefix: String,
    /// Prefix for ports created by bundle expansion.
    pub bundle_port_prefix: String,
    /// Prefix for numbered rows added by panel growth (`{prefix}-{n}`).
    pub grown_port_prefix: String,
    /// Prefix for relay-output siblings created on legacy controllers.
    pub relay_node_prefix: String,
    /// Lower bound of the vertical placement band, in percent.
    pub placement_min: f32,
    /// Upper bound of the vertical placement band, in percent.
    pub placement_max: f32,
    pub default_bundle_label: String,
    pub default_input_name: String,
    pub default_output_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            output_panel_floor: 4,
            input_panel_floor: 1,
            auto_grow_kinds: vec![NodeKind::Keyboard],
            empty_port_prefix: "empty".to_string(),
            bundle_port_prefix: "bundle".to_string(),
            grown_port_prefix: "port".to_string(),
            relay_node_prefix: "relay-output".to_string(),
            placement_min: 10.0,
            placement_max: 90.0,
            default_bundle_label: "Bundle".to_string(),
            default_input_name: "Input".to_string(),
            default_output_name: "Output".to_string(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let band = 0.0..=100.0;
        if !band.contains(&self.placement_min) || !band.contains(&self.placement_max) {
            return Err(ConfigError::InvalidValue {
                reason: format!(
                    "placement band [{}, {}] must lie within 0..=100",
                    self.placement_min, self.placement_max
                ),
            });
        }
        if self.placement_min > self.placement_max {
            return Err(ConfigError::InvalidValue {
                reason: "placement_min must not exceed placement_max".to_string(),
            });
        }
        for (field, prefix) in [
            ("empty_port_prefix", &self.empty_port_prefix),
            ("bundle_port_prefix", &self.bundle_port_prefix),
            ("grown_port_prefix", &self.grown_port_prefix),
            ("relay_node_prefix", &self.relay_node_prefix),
        ] {
            if !is_valid_port_id(prefix) {
                return Err(ConfigError::InvalidValue {
                    reason: format!("{field} {prefix:?} is not a valid port id"),
                });
            }
        }
        Ok(())
    }

    /// Shrink floor for a panel flavour.
    pub fn floor(&self, panel: PanelKind) -> usize {
        match panel {
            PanelKind::Output => self.output_panel_floor,
            PanelKind::Input => self.input_panel_floor,
        }
    }

    pub fn auto_grows(&self, kind: &NodeKind) -> bool {
        self.auto_grow_kinds.iter().any(|k| k == kind)
    }

    /// Whether `port_id` carries the reserved placeholder prefix.
    pub fn is_placeholder_id(&self, port_id: &str) -> bool {
        port_id
            .strip_prefix(self.empty_port_prefix.as_str())
            .is_some_and(|rest| rest.starts_with('-'))
    }

    /// Vertical offset of row `index` when `count` rows share the panel, clamped to the band.
    pub fn distributed_offset(&self, index: usize, count: usize) -> f32 {
        let slots = count.max(1) as f32 + 1.0;
        let raw = (index as f32 + 1.0) / slots * 100.0;
        raw.clamp(self.placement_min, self.placement_max)
    }

    /// Placement for row `index` of `count` rows facing `direction`. Inputs hug the left edge,
    /// outputs the right.
    pub fn row_position(
        &self,
        direction: PortDirection,
        index: usize,
        count: usize,
    ) -> PortPosition {
        let x = match direction {
            PortDirection::Input => 0.0,
            PortDirection::Output => 100.0,
        };
        PortPosition::new(x, self.distributed_offset(index, count))
    }
}
