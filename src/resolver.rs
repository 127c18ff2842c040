//! Stable label assignment for unlabeled interactive elements

use std::collections::HashSet;
use tracing::{debug, info};
use url::Url;

use crate::constants::dom::OVERLAY_ATTR;
use crate::constants::labels::{INTERACTIVE_ROLES, MAX_LABEL_LEN, MAX_TEXT_SOURCE_LEN};
use crate::dom::{Document, Element, NodeId};
use crate::error::Result;
use crate::reconciler::label_of;

/// Base used to resolve link destinations when the page location is unusable
const FALLBACK_BASE: &str = "http://localhost/";

/// Candidate selectors, each a named predicate over one element
const SELECTORS: &[(&str, fn(&Element) -> bool)] = &[
    ("button", |el| el.tag == "button"),
    ("select", |el| el.tag == "select"),
    ("textarea", |el| el.tag == "textarea"),
    ("input:not([type=hidden])", |el| {
        el.tag == "input" && el.input_type().as_deref() != Some("hidden")
    }),
    ("a[href]", |el| el.tag == "a" && el.attribute("href").is_some_and(is_real_destination)),
    ("[onclick]", |el| el.has_attribute("onclick")),
    ("[role]", |el| {
        el.attribute("role")
            .is_some_and(|role| INTERACTIVE_ROLES.contains(&role))
    }),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub node: NodeId,
    pub label: String,
}

fn is_real_destination(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && href != "#" && !href.to_ascii_lowercase().starts_with("javascript:")
}

fn is_form_like(tag: &str) -> bool {
    matches!(tag, "input" | "select" | "textarea")
}

/// Lowercase, collapse non-alphanumeric runs to `-`, trim dashes, bound length.
/// Returns `None` when nothing usable is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    out.truncate(MAX_LABEL_LEN);
    let trimmed = out.trim_end_matches('-');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn is_candidate(el: &Element) -> bool {
    SELECTORS.iter().any(|(_, matches)| matches(el))
}

fn inside_overlay(doc: &Document, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(node) = current.and_then(|n| doc.get(n)) {
        if node.has_attribute(OVERLAY_ATTR) {
            return true;
        }
        current = node.parent();
    }
    false
}

/// Ordered raw label sources for one element
fn label_sources(doc: &Document, id: NodeId) -> Vec<String> {
    let Some(el) = doc.get(id) else {
        return Vec::new();
    };
    let attrs = |names: &[&str]| -> Vec<String> {
        names
            .iter()
            .filter_map(|name| el.attribute(name))
            .map(str::to_string)
            .collect()
    };

    if is_form_like(&el.tag) {
        return attrs(&["id", "name", "aria-label", "placeholder"]);
    }

    let mut sources = attrs(&["aria-label"]);
    let text: String = doc
        .text_content(id)
        .trim()
        .chars()
        .take(MAX_TEXT_SOURCE_LEN)
        .collect();
    sources.push(text);
    if el.tag == "a"
        && let Some(href) = el.attribute("href")
        && let Some(path) = link_path(doc.location(), href)
    {
        sources.push(path);
    }
    sources
}

fn link_path(location: &str, href: &str) -> Option<String> {
    let base = Url::parse(location)
        .ok()
        .filter(|url| !url.cannot_be_a_base())
        .or_else(|| Url::parse(FALLBACK_BASE).ok())?;
    base.join(href).ok().map(|url| url.path().to_string())
}

/// Labels already present in the document under any label attribute
fn existing_labels(doc: &Document, label_attributes: &[String]) -> HashSet<String> {
    doc.descendants(doc.root())
        .into_iter()
        .filter_map(|id| doc.get(id))
        .flat_map(|el| {
            label_attributes
                .iter()
                .filter_map(|attr| el.attribute(attr))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

fn choose_label(tag: &str, sources: &[String], used: &HashSet<String>) -> String {
    for value in sources.iter().filter_map(|raw| sanitize(raw)) {
        if !used.contains(&value) {
            return value;
        }
        if let Some(prefixed) = sanitize(&format!("{tag}-{value}"))
            && !used.contains(&prefixed)
        {
            return prefixed;
        }
    }
    (1..)
        .map(|n| format!("{tag}-{n}"))
        .find(|label| !used.contains(label))
        .unwrap_or_else(|| tag.to_string())
}

/// Label every unlabeled interactive element under the document root.
///
/// Labels are written to the first entry of `label_attributes`. Running it
/// twice without a tree change in between assigns nothing the second time.
pub fn discover(doc: &mut Document, label_attributes: &[String]) -> Result<Vec<Assignment>> {
    let Some(target_attr) = label_attributes.first() else {
        return Ok(Vec::new());
    };

    let mut used = existing_labels(doc, label_attributes);
    let candidates: Vec<NodeId> = doc
        .descendants(doc.root())
        .into_iter()
        .filter(|&id| doc.get(id).is_some_and(is_candidate))
        .filter(|&id| label_of(doc, id, label_attributes).is_none())
        .filter(|&id| !inside_overlay(doc, id))
        .collect();

    let mut assigned = Vec::with_capacity(candidates.len());
    for id in candidates {
        let Some(tag) = doc.get(id).map(|el| el.tag.clone()) else {
            continue;
        };
        let sources = label_sources(doc, id);
        let label = choose_label(&tag, &sources, &used);
        doc.set_attribute(id, target_attr, &label)?;
        debug!(node = %id, label = %label, "Assigned label");
        used.insert(label.clone());
        assigned.push(Assignment { node: id, label });
    }

    if !assigned.is_empty() {
        info!(count = assigned.len(), "Discovery assigned labels");
    }
    Ok(assigned)
}
