//! Overlay placement
//!
//! Elements that can show children get the overlay as an absolutely
//! positioned child. Void elements get a detached `position: fixed` overlay
//! under `body` that follows the host's client rectangle.

mod glyph;
mod membership;

pub use glyph::{Glyph, GlyphPart, RgbaBitmap, hex_color};
pub use membership::MembershipSet;

use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::{MarkerConfig, MarkerPosition};
use crate::constants::dom::{OVERLAY_ATTR, VOID_TAGS};
use crate::dom::{Document, NodeId, Rect};
use crate::encoder::{Encoder, VisualCode};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Child of its host, disappears with it
    Attached,
    /// Independent node kept in sync with the host rectangle
    Detached,
}

#[derive(Debug, Clone)]
pub struct Overlay {
    pub host: NodeId,
    pub node: NodeId,
    pub label: String,
    pub code: VisualCode,
    pub placement: Placement,
}

/// Outcome of a liveness sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Attached overlays whose host left the tree
    pub pruned: usize,
    /// Detached overlays destroyed because their host is gone
    pub released: usize,
}

#[derive(Debug, Default)]
pub struct Renderer {
    encoder: Encoder,
    membership: MembershipSet,
    overlays: HashMap<NodeId, Overlay>,
}

pub fn is_void(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

fn px(value: f64) -> String {
    format!("{value}px")
}

/// Top-left corner of a `width`x`height` glyph anchored inside `rect`
fn anchor_origin(rect: Rect, position: MarkerPosition, width: f64, height: f64) -> (f64, f64) {
    match position {
        MarkerPosition::Center => (
            rect.x + (rect.width - width) / 2.0,
            rect.y + (rect.height - height) / 2.0,
        ),
        MarkerPosition::TopLeft => (rect.left(), rect.top()),
        MarkerPosition::TopRight => (rect.right() - width, rect.top()),
        MarkerPosition::BottomLeft => (rect.left(), rect.bottom() - height),
        MarkerPosition::BottomRight => (rect.right() - width, rect.bottom() - height),
    }
}

impl Renderer {
    pub fn new(encoder: Encoder) -> Self {
        Self {
            encoder,
            membership: MembershipSet::default(),
            overlays: HashMap::new(),
        }
    }

    pub fn contains(&self, host: NodeId) -> bool {
        self.membership.contains(host)
    }

    pub fn overlay(&self, host: NodeId) -> Option<&Overlay> {
        self.overlays.get(&host)
    }

    pub fn overlays(&self) -> impl Iterator<Item = &Overlay> {
        self.overlays.values()
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Give `host` its overlay. Returns `Ok(false)` when it already has one.
    pub fn render(
        &mut self,
        doc: &mut Document,
        host: NodeId,
        label: &str,
        config: &MarkerConfig,
    ) -> Result<bool> {
        if self.membership.contains(host) {
            return Ok(false);
        }

        let code = self.encoder.encode(label)?;

        // Re-inserted hosts still carry the overlay child they had before.
        // Its glyph is only reusable when it encodes the same label.
        if let Some(existing) = self.attached_overlay_child(doc, host) {
            if doc.attribute(existing, OVERLAY_ATTR) == Some(label) {
                debug!(host = %host, label = %label, "Adopting existing overlay");
                self.track(host, existing, label, code, Placement::Attached);
                return Ok(true);
            }
            debug!(host = %host, label = %label, "Replacing overlay of a relabeled host");
            doc.destroy(existing)?;
        }

        let glyph = Glyph::new(code);
        let node = self.build_overlay(doc, &glyph, label, config)?;

        let tag = doc.get(host).map(|el| el.tag.clone()).unwrap_or_default();
        let placement = if is_void(&tag) {
            doc.set_style(node, "position", "fixed")?;
            doc.append_child(doc.body(), node)?;
            self.place_detached(doc, host, node, &glyph, config.position)?;
            Placement::Detached
        } else {
            let position = doc.style(host, "position");
            if position.is_none() || position == Some("static") {
                doc.set_style(host, "position", "relative")?;
            }
            doc.set_style(node, "position", "absolute")?;
            for (property, value) in Self::attached_anchor(config.position) {
                doc.set_style(node, property, value)?;
            }
            if let Some(rect) = doc.get(host).map(|el| el.rect) {
                let (x, y) = anchor_origin(rect, config.position, glyph.width() as f64, glyph.height() as f64);
                doc.set_rect(node, Rect::new(x, y, glyph.width() as f64, glyph.height() as f64))?;
            }
            doc.append_child(host, node)?;
            Placement::Attached
        };

        debug!(host = %host, label = %label, code = %code, placement = ?placement, "Rendered overlay");
        self.track(host, node, label, code, placement);
        Ok(true)
    }

    fn track(&mut self, host: NodeId, node: NodeId, label: &str, code: VisualCode, placement: Placement) {
        self.membership.insert(host);
        self.overlays.insert(
            host,
            Overlay {
                host,
                node,
                label: label.to_string(),
                code,
                placement,
            },
        );
    }

    fn attached_overlay_child(&self, doc: &Document, host: NodeId) -> Option<NodeId> {
        doc.get(host)?
            .children()
            .iter()
            .copied()
            .find(|child| doc.attribute(*child, OVERLAY_ATTR).is_some())
    }

    fn attached_anchor(position: MarkerPosition) -> Vec<(&'static str, &'static str)> {
        match position {
            MarkerPosition::Center => vec![
                ("top", "50%"),
                ("left", "50%"),
                ("transform", "translate(-50%, -50%)"),
            ],
            MarkerPosition::TopLeft => vec![("top", "0"), ("left", "0")],
            MarkerPosition::TopRight => vec![("top", "0"), ("right", "0")],
            MarkerPosition::BottomLeft => vec![("bottom", "0"), ("left", "0")],
            MarkerPosition::BottomRight => vec![("bottom", "0"), ("right", "0")],
        }
    }

    /// Overlay container with the anchor checker and the bordered code grid
    fn build_overlay(
        &self,
        doc: &mut Document,
        glyph: &Glyph,
        label: &str,
        config: &MarkerConfig,
    ) -> Result<NodeId> {
        let node = doc.create_element("div");
        doc.set_attribute(node, OVERLAY_ATTR, label)?;
        doc.set_attribute(node, "aria-hidden", "true")?;
        doc.set_style(node, "pointer-events", "none")?;
        doc.set_style(node, "user-select", "none")?;
        doc.set_style(node, "z-index", &config.z_index.to_string())?;
        doc.set_style(node, "opacity", &config.opacity.to_string())?;
        doc.set_style(node, "width", &px(glyph.width() as f64))?;
        doc.set_style(node, "height", &px(glyph.height() as f64))?;

        for part in glyph.anchor_parts() {
            let cell = Self::part_node(doc, &part, part.x, part.y)?;
            doc.append_child(node, cell)?;
        }

        let border = glyph.border_part();
        let ring = doc.create_element("div");
        let ring_width = crate::constants::glyph::BORDER;
        doc.set_style(ring, "position", "absolute")?;
        doc.set_style(ring, "left", &px(border.x as f64))?;
        doc.set_style(ring, "top", &px(border.y as f64))?;
        doc.set_style(ring, "box-sizing", "border-box")?;
        doc.set_style(ring, "width", &px(border.width as f64))?;
        doc.set_style(ring, "height", &px(border.height as f64))?;
        doc.set_style(ring, "border", &format!("{} solid {}", px(ring_width as f64), hex_color(border.color)))?;
        doc.append_child(node, ring)?;

        // cells are positioned inside the ring's padding box
        for part in glyph.cell_parts() {
            let cell = Self::part_node(doc, &part, part.x - border.x - ring_width, part.y - border.y - ring_width)?;
            doc.append_child(ring, cell)?;
        }
        Ok(node)
    }

    fn part_node(doc: &mut Document, part: &GlyphPart, x: u32, y: u32) -> Result<NodeId> {
        let cell = doc.create_element("div");
        doc.set_style(cell, "position", "absolute")?;
        doc.set_style(cell, "left", &px(x as f64))?;
        doc.set_style(cell, "top", &px(y as f64))?;
        doc.set_style(cell, "width", &px(part.width as f64))?;
        doc.set_style(cell, "height", &px(part.height as f64))?;
        doc.set_style(cell, "background", &hex_color(part.color))?;
        Ok(cell)
    }

    fn place_detached(
        &self,
        doc: &mut Document,
        host: NodeId,
        node: NodeId,
        glyph: &Glyph,
        position: MarkerPosition,
    ) -> Result<()> {
        let Some(client) = doc.bounding_client_rect(host) else {
            return Ok(());
        };
        let (width, height) = (glyph.width() as f64, glyph.height() as f64);
        let (left, top) = anchor_origin(client, position, width, height);
        doc.set_style(node, "left", &px(left))?;
        doc.set_style(node, "top", &px(top))?;
        let viewport = *doc.viewport();
        doc.set_rect(
            node,
            Rect::new(left + viewport.scroll_x, top + viewport.scroll_y, width, height),
        )?;
        Ok(())
    }

    /// Recompute every detached overlay from its host's client rectangle.
    /// Runs on each scroll/resize notification.
    pub fn reposition_detached(&self, doc: &mut Document, config: &MarkerConfig) -> Result<usize> {
        let mut moved = 0;
        for overlay in self.overlays.values() {
            if overlay.placement != Placement::Detached || !doc.exists(overlay.node) {
                continue;
            }
            let glyph = Glyph::new(overlay.code);
            self.place_detached(doc, overlay.host, overlay.node, &glyph, config.position)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Set the opacity of every overlay (`show` / `hide`)
    pub fn set_opacity(&self, doc: &mut Document, opacity: f32) -> Result<()> {
        let value = opacity.clamp(0.0, 1.0).to_string();
        for overlay in self.overlays.values() {
            if doc.exists(overlay.node) {
                doc.set_style(overlay.node, "opacity", &value)?;
            }
        }
        Ok(())
    }

    /// Drop tracking for a host at a known removal point. Attached overlays
    /// leave with the host; detached ones are destroyed here.
    pub fn forget(&mut self, doc: &mut Document, host: NodeId) -> Result<()> {
        self.membership.remove(host);
        if let Some(overlay) = self.overlays.remove(&host)
            && overlay.placement == Placement::Detached
            && doc.exists(overlay.node)
        {
            doc.destroy(overlay.node)?;
        }
        Ok(())
    }

    /// Liveness check of every tracked overlay
    pub fn sweep(&mut self, doc: &mut Document) -> Result<SweepStats> {
        let mut stats = SweepStats::default();
        let stale: Vec<Overlay> = self
            .overlays
            .values()
            .filter(|o| !doc.is_connected(o.host) || !doc.exists(o.node))
            .cloned()
            .collect();
        for overlay in stale {
            match overlay.placement {
                Placement::Attached => stats.pruned += 1,
                Placement::Detached => stats.released += 1,
            }
            self.forget(doc, overlay.host)?;
        }
        if stats != SweepStats::default() {
            info!(pruned = stats.pruned, released = stats.released, "Swept orphaned overlays");
        }
        Ok(stats)
    }

    /// Remove every overlay from the tree and forget all hosts
    pub fn clear(&mut self, doc: &mut Document) -> Result<usize> {
        let count = self.overlays.len();
        for (_, overlay) in self.overlays.drain() {
            if doc.exists(overlay.node) {
                doc.destroy(overlay.node)?;
            }
        }
        self.membership.clear();
        debug!(count = count, "Cleared overlays");
        Ok(count)
    }
}
