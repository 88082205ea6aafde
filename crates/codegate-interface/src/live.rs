//! Atomically swappable interface for descriptor refreshes.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{GeneratedInterface, InterfaceGenerator, ToolDescriptor};

/// The interface for the current descriptor set.
///
/// Readers take a lock-free snapshot with [`current()`](Self::current);
/// [`update()`](Self::update) regenerates from a new descriptor set and
/// swaps it in. Snapshots taken earlier keep seeing the old interface.
#[derive(Clone)]
pub struct LiveInterface {
    generator: InterfaceGenerator,
    inner: Arc<ArcSwap<GeneratedInterface>>,
}

impl LiveInterface {
    /// Generate the initial interface for `tools`.
    pub fn new(generator: InterfaceGenerator, tools: &[ToolDescriptor]) -> Self {
        let initial = generator.generate(tools);
        Self {
            generator,
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Snapshot of the current interface.
    pub fn current(&self) -> Arc<GeneratedInterface> {
        self.inner.load_full()
    }

    /// Rebuild from a new descriptor set. Returns whether the text changed.
    pub fn update(&self, tools: &[ToolDescriptor]) -> bool {
        let next = self.generator.generate(tools);
        let changed = self.inner.load().text != next.text;
        if changed {
            tracing::info!(tools = next.index.len(), "tool interface rebuilt");
        }
        self.inner.store(Arc::new(next));
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn update_swaps_and_old_snapshot_survives() {
        let live = LiveInterface::new(InterfaceGenerator::default(), &[]);
        let old = live.current();

        let changed = live.update(&[ToolDescriptor::new("ping", json!({}))]);
        assert!(changed);
        assert!(old.index.is_empty());
        assert!(live.current().index.contains("ping"));
    }

    #[test]
    fn identical_descriptors_report_no_change() {
        let tools = vec![ToolDescriptor::new("ping", json!({}))];
        let live = LiveInterface::new(InterfaceGenerator::default(), &tools);
        assert!(!live.update(&tools));
    }

    #[test]
    fn clones_share_state() {
        let live = LiveInterface::new(InterfaceGenerator::default(), &[]);
        let cloned = live.clone();
        live.update(&[ToolDescriptor::new("ping", json!({}))]);
        assert_eq!(cloned.current().index.len(), 1);
    }
}
