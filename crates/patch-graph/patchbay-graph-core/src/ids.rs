//! Fresh identifier allocation for placeholder, bundle and relay ports.

use hashbrown::HashMap;
use uuid::Uuid;

/// Supplies collision-resistant identifiers. Implementations must return ids of the form
/// `{prefix}-{suffix}` where the suffix only uses letters, digits, `-` or `_`.
pub trait IdAllocator {
    fn next(&mut self, prefix: &str) -> String;
}

/// Random v4 identifiers, used by the editor at runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidAllocator;

impl IdAllocator for UuidAllocator {
    fn next(&mut self, prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::new_v4().simple())
    }
}

/// Per-prefix counters starting at 1. Deterministic, for tests and fixtures.
#[derive(Debug, Default, Clone)]
pub struct SequentialIds {
    counters: HashMap<String, u64>,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue numbering `prefix` after `value`.
    pub fn starting_after(mut self, prefix: &str, value: u64) -> Self {
        self.counters.insert(prefix.to_string(), value);
        self
    }
}

impl IdAllocator for SequentialIds {
    fn next(&mut self, prefix: &str) -> String {
        let counter = self.counters.entry(prefix.to_string()).or_insert(0);
        *counter += 1;
        format!("{prefix}-{counter}")
    }
}
