//! Keeps labeled elements and overlays 1:1 while the tree mutates

use tracing::{debug, info, warn};

use crate::config::MarkerConfig;
use crate::constants::dom::OVERLAY_ATTR;
use crate::dom::{Document, MutationRecord, NodeId};
use crate::renderer::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Stopped,
    Observing,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub rendered: usize,
    pub skipped: usize,
    pub forgotten: usize,
}

impl std::ops::AddAssign for ScanStats {
    fn add_assign(&mut self, other: Self) {
        self.rendered += other.rendered;
        self.skipped += other.skipped;
        self.forgotten += other.forgotten;
    }
}

/// First non-empty label attribute of an element, in priority order
pub fn label_of(doc: &Document, id: NodeId, attributes: &[String]) -> Option<String> {
    let el = doc.get(id)?;
    attributes
        .iter()
        .filter_map(|attr| el.attribute(attr))
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug)]
pub struct Reconciler {
    state: ReconcilerState,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            state: ReconcilerState::Stopped,
        }
    }

    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    pub fn is_observing(&self) -> bool {
        self.state == ReconcilerState::Observing
    }

    pub fn start(&mut self, doc: &mut Document) {
        if self.is_observing() {
            return;
        }
        doc.set_observed(true);
        self.state = ReconcilerState::Observing;
        info!("Reconciler observing document");
    }

    pub fn stop(&mut self, doc: &mut Document) {
        if !self.is_observing() {
            return;
        }
        doc.set_observed(false);
        self.state = ReconcilerState::Stopped;
        info!("Reconciler stopped");
    }

    /// Render every labeled element under `root` (whole document if `None`)
    pub fn scan(
        &self,
        doc: &mut Document,
        root: Option<NodeId>,
        renderer: &mut Renderer,
        config: &MarkerConfig,
    ) -> ScanStats {
        let root = root.unwrap_or_else(|| doc.root());
        let mut stats = ScanStats::default();
        for id in doc.descendants(root) {
            if doc.attribute(id, OVERLAY_ATTR).is_some() {
                continue;
            }
            let Some(label) = label_of(doc, id, &config.label_attributes) else {
                continue;
            };
            match renderer.render(doc, id, &label, config) {
                Ok(true) => stats.rendered += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(label = %label, error = %e, "Skipping element, overlay not rendered");
                    stats.skipped += 1;
                }
            }
        }
        stats
    }

    /// Drain and process one batch of structural changes to completion
    pub fn process_pending(
        &mut self,
        doc: &mut Document,
        renderer: &mut Renderer,
        config: &MarkerConfig,
    ) -> ScanStats {
        let mut stats = ScanStats::default();
        if !self.is_observing() {
            return stats;
        }
        let batch = doc.take_mutations();
        if batch.is_empty() {
            return stats;
        }
        for record in &batch {
            match *record {
                MutationRecord::ChildAdded { child, .. } => {
                    if doc.attribute(child, OVERLAY_ATTR).is_some() || !doc.is_connected(child) {
                        continue;
                    }
                    stats += self.scan(doc, Some(child), renderer, config);
                }
                MutationRecord::ChildRemoved { child, .. } => {
                    if doc.is_connected(child) {
                        continue;
                    }
                    for id in doc.descendants(child) {
                        if renderer.contains(id) {
                            if let Err(e) = renderer.forget(doc, id) {
                                warn!(host = %id, error = %e, "Failed to release overlay of removed element");
                            }
                            stats.forgotten += 1;
                        }
                    }
                }
            }
        }
        debug!(
            records = batch.len(),
            rendered = stats.rendered,
            forgotten = stats.forgotten,
            "Processed mutation batch"
        );
        stats
    }
}
