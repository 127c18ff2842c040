//! Execution of agent commands against the document

use tracing::{debug, warn};

use crate::channel::{Command, CommandResult, Outcome, PendingSelect, SearchResult};
use crate::config::MarkerConfig;
use crate::constants::dom::{OVERLAY_ATTR, VALUE_TAGS};
use crate::constants::glyph::HEIGHT;
use crate::constants::labels::OPTION_ROLES;
use crate::dom::{Document, Element, EventKind, NodeId};
use crate::error::MarkerError;
use crate::reconciler::label_of;
use crate::renderer::Renderer;

/// What the event loop does after a command ran
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Send this result now
    Reply(CommandResult),

    /// Nothing to send
    Silent,

    /// Resolve later, once the select delay has elapsed
    Deferred(PendingSelect),
}

/// First element, in document order, whose effective label is `label`.
/// Uses the same attribute priority as the overlay it carries.
pub fn find_by_label(doc: &Document, label: &str, attributes: &[String]) -> Option<NodeId> {
    doc.descendants(doc.root())
        .into_iter()
        .find(|&id| label_of(doc, id, attributes).as_deref() == Some(label))
}

pub fn execute(
    doc: &mut Document,
    renderer: &Renderer,
    config: &MarkerConfig,
    command: &Command,
) -> Execution {
    let attrs = &config.label_attributes;
    match command {
        Command::Show | Command::Hide => {
            let opacity = if *command == Command::Show { 1.0 } else { 0.0 };
            if let Err(e) = renderer.set_opacity(doc, opacity) {
                warn!(error = %e, "Failed to update overlay opacity");
            }
            Execution::Silent
        }
        Command::Search(id) => Execution::Reply(search(doc, id, attrs).into()),
        Command::ScrollTo(id) => {
            scroll_to(doc, renderer, config, id);
            Execution::Silent
        }
        Command::ReadText(id) => Execution::Reply(read_text(doc, id, attrs).into()),
        Command::ReadValue(id) => Execution::Reply(read_value(doc, id, attrs).into()),
        Command::Select { id, value } => select(doc, id, value, attrs),
        Command::Check(id) => Execution::Reply(set_checked(doc, id, true, attrs).into()),
        Command::Uncheck(id) => Execution::Reply(set_checked(doc, id, false, attrs).into()),
    }
}

/// Locate an element and report whether it is fully on screen.
///
/// The bottom edge needs room for one glyph height below it, since attached
/// overlays may hang into that band.
pub fn search(doc: &Document, id: &str, attributes: &[String]) -> SearchResult {
    let Some(rect) = find_by_label(doc, id, attributes).and_then(|node| doc.bounding_client_rect(node))
    else {
        return SearchResult::miss(id);
    };
    let viewport = doc.viewport();
    let margin = f64::from(HEIGHT);

    let vertical = if rect.top() < 0.0 {
        Some("up")
    } else if rect.bottom() + margin > viewport.height {
        Some("down")
    } else {
        None
    };
    let horizontal = if rect.left() < 0.0 {
        Some("left")
    } else if rect.right() > viewport.width {
        Some("right")
    } else {
        None
    };

    let visible = vertical.is_none() && horizontal.is_none();
    let direction = (!visible).then(|| {
        [vertical, horizontal]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("-")
    });
    SearchResult::hit(id, visible, direction)
}

fn scroll_to(doc: &mut Document, renderer: &Renderer, config: &MarkerConfig, id: &str) {
    let Some(node) = find_by_label(doc, id, &config.label_attributes) else {
        debug!(id = %id, "scrollto target not found");
        return;
    };
    if let Err(e) = doc.scroll_into_view_centered(node) {
        warn!(id = %id, error = %e, "Failed to scroll element into view");
        return;
    }
    if let Err(e) = renderer.reposition_detached(doc, config) {
        warn!(error = %e, "Failed to reposition detached overlays after scroll");
    }
}

fn read_text(doc: &Document, id: &str, attributes: &[String]) -> Outcome {
    match find_by_label(doc, id, attributes) {
        Some(node) => Outcome::value(doc.text_content(node).trim().to_string()),
        None => Outcome::failed(MarkerError::NotFound(id.to_string())),
    }
}

fn is_value_capable(el: &Element) -> bool {
    VALUE_TAGS.contains(&el.tag.as_str())
}

fn read_value(doc: &Document, id: &str, attributes: &[String]) -> Outcome {
    let Some(node) = find_by_label(doc, id, attributes) else {
        return Outcome::failed(MarkerError::NotFound(id.to_string()));
    };
    let target = doc
        .query(node, is_value_capable)
        .into_iter()
        .next()
        .unwrap_or(node);
    Outcome::value(doc.value(target).unwrap_or_default())
}

fn select(doc: &mut Document, id: &str, value: &str, attributes: &[String]) -> Execution {
    let Some(node) = find_by_label(doc, id, attributes) else {
        return Execution::Reply(Outcome::failed(MarkerError::NotFound(id.to_string())).into());
    };

    if doc.get(node).is_some_and(|el| el.tag == "select") {
        return Execution::Reply(select_native(doc, node, value).into());
    }

    // composite control: open it, the option list shows up later
    if let Err(e) = doc.click(node) {
        return Execution::Reply(Outcome::failed(e).into());
    }
    debug!(id = %id, value = %value, "Custom select opened, resolution deferred");
    Execution::Deferred(PendingSelect {
        id: id.to_string(),
        value: value.to_string(),
    })
}

fn select_native(doc: &mut Document, select: NodeId, value: &str) -> Outcome {
    let option = doc.options(select).into_iter().find(|&opt| {
        doc.option_value(opt) == value || doc.text_content(opt).trim() == value
    });
    let Some(option) = option else {
        return Outcome::failed(MarkerError::OptionUnavailable(value.to_string()));
    };
    let result = doc
        .select_option(select, option)
        .and_then(|_| doc.dispatch(select, EventKind::Input))
        .and_then(|_| doc.dispatch(select, EventKind::Change));
    match result {
        Ok(()) => Outcome::ok(),
        Err(e) => Outcome::failed(e),
    }
}

fn is_option_like(el: &Element) -> bool {
    matches!(el.tag.as_str(), "option" | "li")
        || el
            .attribute("role")
            .is_some_and(|role| OPTION_ROLES.contains(&role))
}

/// Finish a custom select: find an option-like node anywhere whose text
/// matches and activate it. Exact text wins over a case-insensitive match.
pub fn resolve_select(doc: &mut Document, pending: &PendingSelect) -> Outcome {
    let wanted = pending.value.trim();
    let candidates: Vec<(NodeId, String)> = doc
        .query(doc.root(), is_option_like)
        .into_iter()
        .filter(|&id| doc.attribute(id, OVERLAY_ATTR).is_none())
        .map(|id| (id, doc.text_content(id).trim().to_string()))
        .collect();

    let chosen = candidates
        .iter()
        .find(|(_, text)| text == wanted)
        .or_else(|| candidates.iter().find(|(_, text)| text.eq_ignore_ascii_case(wanted)));

    match chosen {
        Some(&(option, _)) => match doc.click(option) {
            Ok(()) => Outcome::ok(),
            Err(e) => Outcome::failed(e),
        },
        None => {
            debug!(id = %pending.id, value = %pending.value, "No option-like node matched");
            Outcome::failed(MarkerError::OptionUnavailable(pending.value.clone()))
        }
    }
}

fn set_checked(doc: &mut Document, id: &str, checked: bool, attributes: &[String]) -> Outcome {
    let Some(node) = find_by_label(doc, id, attributes) else {
        return Outcome::failed(MarkerError::NotFound(id.to_string()));
    };
    let target = doc
        .query(node, Element::is_checkbox_like)
        .into_iter()
        .next()
        .unwrap_or(node);
    if doc.is_checked(target) == checked {
        return Outcome::ok();
    }
    match doc.click(target) {
        Ok(()) => Outcome::ok(),
        Err(e) => Outcome::failed(e),
    }
}
