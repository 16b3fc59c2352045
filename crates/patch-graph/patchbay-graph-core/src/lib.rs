pub mod bundle;
pub mod config;
pub mod dynamic;
pub mod empty_slot;
pub mod engine;
pub mod graph;
pub mod ids;
pub mod mutation;
pub mod port_id;
pub mod sync;
pub mod types;

pub use bundle::{
    collapse_bundle, detect_bundle, expand_target, guess_control_type, toggle_bundle_expanded,
    BundleExpansion,
};
pub use config::{ConfigError, EngineConfig};
pub use dynamic::{check_addition, check_removal, PortGrowth};
pub use empty_slot::{empty_rows, ensure_empty_slot, is_placeholder_port};
pub use engine::PortEngine;
pub use graph::{GraphError, PatchGraph, PatchSnapshot};
pub use ids::{IdAllocator, SequentialIds, UuidAllocator};
pub use mutation::{GraphMutation, LabelUpdates};
pub use port_id::{
    check_composite_port_id, check_port_id, is_valid_composite_port_id, is_valid_port_id,
    sanitize_port_id, CompositePortId, PortIdError,
};
pub use sync::{special_child_of_kind, special_children, synchronize_ports};
pub use types::*;
