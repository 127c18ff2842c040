//! Host tree model
//!
//! An arena of elements with generational handles, a scrollable viewport,
//! form state, a dispatched-event log and structural-change batches that are
//! only collected while an observer is connected.

mod element;
mod fixture;

pub use element::{DispatchedEvent, Element, EventKind, MutationRecord, NodeId, Rect, Viewport};
pub use fixture::{Fixture, FixtureNode};

use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tracing::trace;

use crate::constants::dom::EVENT_LOG_CAP;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
    #[error("node {0} no longer exists")]
    StaleNode(NodeId),

    #[error("hierarchy request error: {0}")]
    HierarchyRequest(String),
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    element: Option<Element>,
}

#[derive(Debug)]
pub struct Document {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeId,
    head: NodeId,
    body: NodeId,
    viewport: Viewport,
    location: String,
    style_blocks: BTreeMap<String, String>,
    observed: bool,
    mutations: Vec<MutationRecord>,
    events: VecDeque<DispatchedEvent>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty `html > (head, body)` document
    pub fn new() -> Self {
        let mut doc = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            head: NodeId { index: 0, generation: 0 },
            body: NodeId { index: 0, generation: 0 },
            viewport: Viewport::default(),
            location: "about:blank".to_string(),
            style_blocks: BTreeMap::new(),
            observed: false,
            mutations: Vec::new(),
            events: VecDeque::new(),
        };
        doc.root = doc.create_element("html");
        doc.head = doc.create_element("head");
        doc.body = doc.create_element("body");
        doc.link(doc.root, doc.head);
        doc.link(doc.root, doc.body);
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn head(&self) -> NodeId {
        self.head
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        let element = Element::new(tag);
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.element = Some(element);
            NodeId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, element: Some(element) });
            NodeId { index, generation: 0 }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Element> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.element.as_ref())
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.element.as_mut())
    }

    fn element(&self, id: NodeId) -> Result<&Element, DomError> {
        self.get(id).ok_or(DomError::StaleNode(id))
    }

    fn element_mut(&mut self, id: NodeId) -> Result<&mut Element, DomError> {
        self.get_mut(id).ok_or(DomError::StaleNode(id))
    }

    /// Whether the handle still refers to a live element (attached or not)
    pub fn exists(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    /// Whether the element is reachable from the document root
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.get(node).and_then(|el| el.parent);
        }
        false
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.get(n).and_then(|el| el.parent);
        }
        false
    }

    /// Raw link used while building the skeleton, no records
    fn link(&mut self, parent: NodeId, child: NodeId) {
        if let Some(el) = self.get_mut(child) {
            el.parent = Some(parent);
        }
        if let Some(el) = self.get_mut(parent) {
            el.children.push(child);
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.element(parent)?;
        self.element(child)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest(format!(
                "cannot append {child} into its own subtree at {parent}"
            )));
        }
        if self.element(child)?.parent.is_some() {
            self.remove(child)?;
        }
        self.link(parent, child);
        self.record(MutationRecord::ChildAdded { parent, child });
        Ok(())
    }

    /// Detach an element (and its subtree) from its parent; it stays alive
    pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
        if id == self.root {
            return Err(DomError::HierarchyRequest("cannot remove the document root".to_string()));
        }
        let Some(parent) = self.element(id)?.parent else {
            return Ok(());
        };
        if let Some(el) = self.get_mut(parent) {
            el.children.retain(|c| *c != id);
        }
        self.element_mut(id)?.parent = None;
        self.record(MutationRecord::ChildRemoved { parent, child: id });
        Ok(())
    }

    /// Detach and free an element and its whole subtree
    pub fn destroy(&mut self, id: NodeId) -> Result<(), DomError> {
        self.remove(id)?;
        for node in self.descendants(id) {
            let slot = &mut self.slots[node.index as usize];
            slot.element = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(node.index);
        }
        Ok(())
    }

    /// Pre-order walk of `root` and everything below it
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(node) = stack.pop() {
            let Some(el) = self.get(node) else { continue };
            out.push(node);
            stack.extend(el.children.iter().rev().copied());
        }
        out
    }

    /// Elements under `root` (inclusive) matching `pred`, in document order
    pub fn query(&self, root: NodeId, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.get(*id).is_some_and(&pred))
            .collect()
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.get(id).and_then(|el| el.attribute(name))
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
        self.element_mut(id)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
        self.element_mut(id)?.attributes.remove(name);
        Ok(())
    }

    pub fn style(&self, id: NodeId, property: &str) -> Option<&str> {
        self.get(id)
            .and_then(|el| el.style.get(property))
            .map(String::as_str)
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: &str) -> Result<(), DomError> {
        self.element_mut(id)?
            .style
            .insert(property.to_string(), value.to_string());
        Ok(())
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DomError> {
        self.element_mut(id)?.text = text.to_string();
        Ok(())
    }

    /// Concatenated text of the element and its descendants
    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|node| self.get(node))
            .map(|el| el.text.as_str())
            .collect()
    }

    pub fn set_rect(&mut self, id: NodeId, rect: Rect) -> Result<(), DomError> {
        self.element_mut(id)?.rect = rect;
        Ok(())
    }

    /// Layout box relative to the viewport
    pub fn bounding_client_rect(&self, id: NodeId) -> Option<Rect> {
        self.get(id)
            .map(|el| el.rect.translate(-self.viewport.scroll_x, -self.viewport.scroll_y))
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn resize_viewport(&mut self, width: f64, height: f64) {
        self.viewport.width = width.max(0.0);
        self.viewport.height = height.max(0.0);
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.viewport.scroll_x = x.max(0.0);
        self.viewport.scroll_y = y.max(0.0);
        trace!(x = self.viewport.scroll_x, y = self.viewport.scroll_y, "scrolled");
    }

    /// Instant scroll that puts the element's center at the viewport center
    pub fn scroll_into_view_centered(&mut self, id: NodeId) -> Result<(), DomError> {
        let rect = self.element(id)?.rect;
        let x = rect.x + rect.width / 2.0 - self.viewport.width / 2.0;
        let y = rect.y + rect.height / 2.0 - self.viewport.height / 2.0;
        self.scroll_to(x, y);
        Ok(())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn set_location(&mut self, location: &str) {
        self.location = location.to_string();
    }

    /// Insert a keyed presentation-rule block; returns false if the key exists
    pub fn inject_style(&mut self, key: &str, css: &str) -> bool {
        if self.style_blocks.contains_key(key) {
            return false;
        }
        self.style_blocks.insert(key.to_string(), css.to_string());
        true
    }

    pub fn style_block(&self, key: &str) -> Option<&str> {
        self.style_blocks.get(key).map(String::as_str)
    }

    pub fn style_block_count(&self) -> usize {
        self.style_blocks.len()
    }

    /// Connect or disconnect the structural-change observer.
    /// Disconnecting discards any undelivered records.
    pub fn set_observed(&mut self, observed: bool) {
        self.observed = observed;
        if !observed {
            self.mutations.clear();
        }
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    fn record(&mut self, record: MutationRecord) {
        if self.observed {
            self.mutations.push(record);
        }
    }

    pub fn has_pending_mutations(&self) -> bool {
        !self.mutations.is_empty()
    }

    /// Hand the current batch of structural changes to the observer
    pub fn take_mutations(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.mutations)
    }

    pub fn dispatch(&mut self, target: NodeId, kind: EventKind) -> Result<(), DomError> {
        self.element(target)?;
        if self.events.len() == EVENT_LOG_CAP {
            self.events.pop_front();
        }
        self.events.push_back(DispatchedEvent { target, kind });
        Ok(())
    }

    /// Most recent dispatched events, oldest first
    pub fn events(&self) -> &VecDeque<DispatchedEvent> {
        &self.events
    }

    /// Drain the event log
    pub fn take_events(&mut self) -> Vec<DispatchedEvent> {
        self.events.drain(..).collect()
    }

    /// Activate an element the way a pointer click would, including the
    /// default action of native checkboxes and radios
    pub fn click(&mut self, id: NodeId) -> Result<(), DomError> {
        self.dispatch(id, EventKind::Click)?;
        let el = self.element(id)?;
        match el.input_type().as_deref() {
            Some("checkbox") => {
                let el = self.element_mut(id)?;
                el.checked = !el.checked;
                self.dispatch(id, EventKind::Input)?;
                self.dispatch(id, EventKind::Change)?;
            }
            Some("radio") if !el.checked => {
                let name = el.attribute("name").map(str::to_string);
                if let Some(name) = name {
                    let peers = self.query(self.root, |other| {
                        other.input_type().as_deref() == Some("radio")
                            && other.attribute("name") == Some(name.as_str())
                    });
                    for peer in peers {
                        if let Some(peer) = self.get_mut(peer) {
                            peer.checked = false;
                        }
                    }
                }
                self.element_mut(id)?.checked = true;
                self.dispatch(id, EventKind::Input)?;
                self.dispatch(id, EventKind::Change)?;
            }
            _ => {
                if el.attribute("role") == Some("checkbox") || el.attribute("role") == Some("switch")
                {
                    let next = if el.attribute("aria-checked") == Some("true") { "false" } else { "true" };
                    self.set_attribute(id, "aria-checked", next)?;
                }
            }
        }
        Ok(())
    }

    pub fn is_checked(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(|el| {
            if el.tag == "input" {
                el.checked
            } else {
                el.attribute("aria-checked") == Some("true")
            }
        })
    }

    /// Option elements of a select, in document order
    pub fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .skip(1)
            .filter(|id| self.get(*id).is_some_and(|el| el.tag == "option"))
            .collect()
    }

    /// Submitted value of an option: its `value` attribute or its text
    pub fn option_value(&self, option: NodeId) -> String {
        match self.attribute(option, "value") {
            Some(value) => value.to_string(),
            None => self.text_content(option).trim().to_string(),
        }
    }

    /// Current value of a form control; selects report their selected option
    pub fn value(&self, id: NodeId) -> Option<String> {
        let el = self.get(id)?;
        if el.tag == "select" {
            let options = self.options(id);
            let chosen = options
                .iter()
                .find(|opt| self.get(**opt).is_some_and(|o| o.selected))
                .or(options.first());
            return Some(chosen.map(|opt| self.option_value(*opt)).unwrap_or_default());
        }
        Some(el.value.clone())
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) -> Result<(), DomError> {
        self.element_mut(id)?.value = value.to_string();
        Ok(())
    }

    /// Make `option` the single selected option of `select`
    pub fn select_option(&mut self, select: NodeId, option: NodeId) -> Result<(), DomError> {
        let options = self.options(select);
        if !options.contains(&option) {
            return Err(DomError::HierarchyRequest(format!(
                "{option} is not an option of {select}"
            )));
        }
        for opt in options {
            self.element_mut(opt)?.selected = opt == option;
        }
        let value = self.option_value(option);
        self.element_mut(select)?.value = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_button() -> (Document, NodeId) {
        let mut doc = Document::new();
        let button = doc.create_element("button");
        doc.append_child(doc.body(), button).unwrap();
        (doc, button)
    }

    #[test]
    fn test_destroyed_handle_does_not_alias_new_element() {
        let (mut doc, button) = doc_with_button();
        doc.destroy(button).unwrap();
        let replacement = doc.create_element("div");

        assert_eq!(replacement.index, button.index);
        assert!(doc.get(button).is_none());
        assert!(doc.get(replacement).is_some());
    }

    #[test]
    fn test_removed_element_stays_alive_but_disconnected() {
        let (mut doc, button) = doc_with_button();
        doc.remove(button).unwrap();
        assert!(doc.exists(button));
        assert!(!doc.is_connected(button));
    }

    #[test]
    fn test_append_into_own_subtree_is_rejected() {
        let mut doc = Document::new();
        let outer = doc.create_element("div");
        let inner = doc.create_element("div");
        doc.append_child(doc.body(), outer).unwrap();
        doc.append_child(outer, inner).unwrap();
        assert!(matches!(doc.append_child(inner, outer), Err(DomError::HierarchyRequest(_))));
    }

    #[test]
    fn test_mutations_recorded_only_while_observed() {
        let mut doc = Document::new();
        let a = doc.create_element("div");
        doc.append_child(doc.body(), a).unwrap();
        assert!(!doc.has_pending_mutations());

        doc.set_observed(true);
        let b = doc.create_element("div");
        doc.append_child(a, b).unwrap();
        doc.remove(b).unwrap();
        assert_eq!(
            doc.take_mutations(),
            vec![
                MutationRecord::ChildAdded { parent: a, child: b },
                MutationRecord::ChildRemoved { parent: a, child: b },
            ]
        );
        assert!(doc.take_mutations().is_empty());
    }

    #[test]
    fn test_text_content_includes_descendants() {
        let (mut doc, button) = doc_with_button();
        let span = doc.create_element("span");
        doc.append_child(button, span).unwrap();
        doc.set_text(button, "  Save ").unwrap();
        doc.set_text(span, "draft  ").unwrap();
        assert_eq!(doc.text_content(button), "  Save draft  ");
    }

    #[test]
    fn test_checkbox_click_toggles_and_fires_change() {
        let mut doc = Document::new();
        let input = doc.create_element("input");
        doc.set_attribute(input, "type", "checkbox").unwrap();
        doc.append_child(doc.body(), input).unwrap();

        doc.click(input).unwrap();
        assert!(doc.is_checked(input));
        assert!(doc.events().contains(&DispatchedEvent { target: input, kind: EventKind::Change }));
    }

    #[test]
    fn test_radio_click_unchecks_group_peers() {
        let mut doc = Document::new();
        let a = doc.create_element("input");
        let b = doc.create_element("input");
        for radio in [a, b] {
            doc.set_attribute(radio, "type", "radio").unwrap();
            doc.set_attribute(radio, "name", "size").unwrap();
            doc.append_child(doc.body(), radio).unwrap();
        }
        doc.click(a).unwrap();
        doc.click(b).unwrap();
        assert!(!doc.is_checked(a));
        assert!(doc.is_checked(b));
    }

    #[test]
    fn test_scroll_into_view_centers_element() {
        let (mut doc, button) = doc_with_button();
        doc.resize_viewport(800.0, 600.0);
        doc.set_rect(button, Rect::new(1000.0, 2000.0, 100.0, 50.0)).unwrap();
        doc.scroll_into_view_centered(button).unwrap();

        let rect = doc.bounding_client_rect(button).unwrap();
        assert_eq!(rect.x + rect.width / 2.0, 400.0);
        assert_eq!(rect.y + rect.height / 2.0, 300.0);
    }

    #[test]
    fn test_scroll_is_clamped_at_origin() {
        let (mut doc, button) = doc_with_button();
        doc.set_rect(button, Rect::new(10.0, 10.0, 20.0, 20.0)).unwrap();
        doc.scroll_into_view_centered(button).unwrap();
        assert_eq!(doc.viewport().scroll_x, 0.0);
        assert_eq!(doc.viewport().scroll_y, 0.0);
    }

    #[test]
    fn test_select_value_defaults_to_first_option() {
        let mut doc = Document::new();
        let select = doc.create_element("select");
        doc.append_child(doc.body(), select).unwrap();
        for (value, text) in [("a", "Option A"), ("b", "Option B")] {
            let opt = doc.create_element("option");
            doc.set_attribute(opt, "value", value).unwrap();
            doc.set_text(opt, text).unwrap();
            doc.append_child(select, opt).unwrap();
        }
        assert_eq!(doc.value(select).as_deref(), Some("a"));

        let second = doc.options(select)[1];
        doc.select_option(select, second).unwrap();
        assert_eq!(doc.value(select).as_deref(), Some("b"));
    }

    #[test]
    fn test_event_log_is_bounded_and_drainable() {
        let (mut doc, button) = doc_with_button();
        for _ in 0..EVENT_LOG_CAP + 10 {
            doc.dispatch(button, EventKind::Input).unwrap();
        }
        doc.dispatch(button, EventKind::Click).unwrap();

        assert_eq!(doc.events().len(), EVENT_LOG_CAP);
        assert_eq!(doc.events().back().map(|e| e.kind), Some(EventKind::Click));

        let drained = doc.take_events();
        assert_eq!(drained.len(), EVENT_LOG_CAP);
        assert!(doc.events().is_empty());
    }

    #[test]
    fn test_inject_style_is_keyed() {
        let mut doc = Document::new();
        assert!(doc.inject_style("k", "a {}"));
        assert!(!doc.inject_style("k", "b {}"));
        assert_eq!(doc.style_block("k"), Some("a {}"));
        assert_eq!(doc.style_block_count(), 1);
    }
}
