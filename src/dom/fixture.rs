//! JSON document fixtures used by the CLI and tests

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use super::{Document, DomError, NodeId, Rect, Viewport};

/// Serialized page: location, viewport and the children of `body`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub body: Vec<FixtureNode>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureNode {
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub style: BTreeMap<String, String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub children: Vec<FixtureNode>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read fixture {}", path.display()))?;
        serde_json::from_str(&contents)
            .context(format!("Failed to parse fixture {}", path.display()))
    }
}

impl Document {
    pub fn from_fixture(fixture: &Fixture) -> Result<Self, DomError> {
        let mut doc = Document::new();
        if let Some(location) = &fixture.location {
            doc.set_location(location);
        }
        if let Some(viewport) = fixture.viewport {
            doc.resize_viewport(viewport.width, viewport.height);
            doc.scroll_to(viewport.scroll_x, viewport.scroll_y);
        }
        let body = doc.body();
        for node in &fixture.body {
            doc.build(body, node)?;
        }
        Ok(doc)
    }

    fn build(&mut self, parent: NodeId, node: &FixtureNode) -> Result<NodeId, DomError> {
        let id = self.create_element(&node.tag);
        if let Some(el) = self.get_mut(id) {
            el.attributes = node.attributes.clone();
            el.style = node.style.clone();
            el.text = node.text.clone();
            el.rect = node.rect.unwrap_or_default();
            el.value = node
                .value
                .clone()
                .or_else(|| node.attributes.get("value").cloned())
                .unwrap_or_default();
            el.checked = node.checked || node.attributes.contains_key("checked");
            el.selected = node.selected || node.attributes.contains_key("selected");
        }
        self.append_child(parent, id)?;
        for child in &node.children {
            self.build(id, child)?;
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_builds_nested_tree() {
        let json = r#"{
            "location": "http://localhost:3000/app?port=6060",
            "viewport": { "width": 800, "height": 600 },
            "body": [
                { "tag": "form", "children": [
                    { "tag": "input", "attributes": { "type": "checkbox", "checked": "" } },
                    { "tag": "button", "text": "Go", "rect": { "x": 1, "y": 2, "width": 3, "height": 4 } }
                ]}
            ]
        }"#;
        let fixture: Fixture = serde_json::from_str(json).unwrap();
        let doc = Document::from_fixture(&fixture).unwrap();

        assert_eq!(doc.location(), "http://localhost:3000/app?port=6060");
        assert_eq!(doc.viewport().width, 800.0);

        let checkbox = doc.query(doc.body(), |el| el.tag == "input")[0];
        assert!(doc.is_checked(checkbox));

        let button = doc.query(doc.body(), |el| el.tag == "button")[0];
        assert!(doc.is_connected(button));
        assert_eq!(doc.get(button).unwrap().rect, Rect::new(1.0, 2.0, 3.0, 4.0));
    }
}
