//! Wire types for the agent command protocol
//!
//! Commands arrive as one text line each (`verb[:arg[:arg]]`, verb
//! case-insensitive). Results leave as one JSON object per line.

use serde::Serialize;
use std::fmt;

/// Commands sent by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Make all overlays visible
    Show,

    /// Make all overlays invisible
    Hide,

    /// Locate an element and report visibility
    Search(String),

    /// Scroll an element into centered view
    ScrollTo(String),

    /// Read trimmed text content
    ReadText(String),

    /// Read the value of an input-capable element
    ReadValue(String),

    /// Pick an option of a native or custom select
    Select { id: String, value: String },

    Check(String),

    Uncheck(String),
}

impl Command {
    /// Parse one command line, `None` for unrecognized verbs or missing arguments
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(':') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };
        let arg = |rest: Option<&str>| rest.filter(|s| !s.is_empty()).map(str::to_string);

        match verb.to_ascii_lowercase().as_str() {
            "show" => Some(Self::Show),
            "hide" => Some(Self::Hide),
            "search" => arg(rest).map(Self::Search),
            "scrollto" => arg(rest).map(Self::ScrollTo),
            "check" => arg(rest).map(Self::Check),
            "uncheck" => arg(rest).map(Self::Uncheck),
            "read" => {
                let (kind, id) = rest?.split_once(':')?;
                let id = arg(Some(id))?;
                match kind.to_ascii_lowercase().as_str() {
                    "text" => Some(Self::ReadText(id)),
                    "value" => Some(Self::ReadValue(id)),
                    _ => None,
                }
            }
            "select" => {
                let (id, value) = rest?.split_once(':')?;
                Some(Self::Select {
                    id: arg(Some(id))?,
                    value: value.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Lowercase verb, for logging
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Hide => "hide",
            Self::Search(_) => "search",
            Self::ScrollTo(_) => "scrollto",
            Self::ReadText(_) => "read:text",
            Self::ReadValue(_) => "read:value",
            Self::Select { .. } => "select",
            Self::Check(_) => "check",
            Self::Uncheck(_) => "uncheck",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Show | Self::Hide => f.write_str(self.verb()),
            Self::Search(id)
            | Self::ScrollTo(id)
            | Self::ReadText(id)
            | Self::ReadValue(id)
            | Self::Check(id)
            | Self::Uncheck(id) => write!(f, "{}:{id}", self.verb()),
            Self::Select { id, value } => write!(f, "select:{id}:{value}"),
        }
    }
}

/// Custom-select resolution waiting for the control to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSelect {
    pub id: String,
    pub value: String,
}

/// Present only when the element was found
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// `up`/`down`, optionally joined with `left`/`right`; null when visible
    pub direction: Option<String>,
    pub offset_x: i32,
    pub offset_y: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub found: bool,
    pub visible: bool,
    pub id: String,
    #[serde(flatten)]
    pub hit: Option<SearchHit>,
}

impl SearchResult {
    pub fn miss(id: &str) -> Self {
        Self {
            found: false,
            visible: false,
            id: id.to_string(),
            hit: None,
        }
    }

    pub fn hit(id: &str, visible: bool, direction: Option<String>) -> Self {
        Self {
            found: true,
            visible,
            id: id.to_string(),
            hit: Some(SearchHit {
                direction,
                offset_x: 0,
                offset_y: 0,
            }),
        }
    }
}

/// Success/failure payload of read, select and check commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            value: None,
            error: None,
        }
    }

    pub fn value(value: String) -> Self {
        Self {
            success: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.to_string()),
        }
    }
}

/// Anything sent back to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    Search(SearchResult),
    Outcome(Outcome),
}

impl CommandResult {
    /// One JSON line, without the trailing newline
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<SearchResult> for CommandResult {
    fn from(result: SearchResult) -> Self {
        Self::Search(result)
    }
}

impl From<Outcome> for CommandResult {
    fn from(outcome: Outcome) -> Self {
        Self::Outcome(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_verbs_case_insensitive() {
        assert_eq!(Command::parse("SHOW"), Some(Command::Show));
        assert_eq!(Command::parse("hide\r"), Some(Command::Hide));
        assert_eq!(
            Command::parse("Search:submit-btn"),
            Some(Command::Search("submit-btn".into()))
        );
        assert_eq!(
            Command::parse("scrollTo:footer"),
            Some(Command::ScrollTo("footer".into()))
        );
        assert_eq!(
            Command::parse("read:TEXT:title"),
            Some(Command::ReadText("title".into()))
        );
        assert_eq!(
            Command::parse("read:value:email"),
            Some(Command::ReadValue("email".into()))
        );
        assert_eq!(Command::parse("uncheck:terms"), Some(Command::Uncheck("terms".into())));
    }

    #[test]
    fn test_select_value_keeps_colons() {
        assert_eq!(
            Command::parse("select:time:10:30"),
            Some(Command::Select {
                id: "time".into(),
                value: "10:30".into()
            })
        );
    }

    #[test]
    fn test_unrecognized_or_incomplete_lines_are_ignored() {
        for line in ["", "dance", "search", "search:", "read:text", "read:html:x", "select:x", "check"] {
            assert_eq!(Command::parse(line), None, "line {line:?}");
        }
    }

    #[test]
    fn test_display_matches_wire_form() {
        let cmd = Command::parse("read:value:email").unwrap();
        assert_eq!(cmd.to_string(), "read:value:email");
    }

    #[test]
    fn test_search_miss_shape() {
        let value = serde_json::to_value(CommandResult::from(SearchResult::miss("ghost"))).unwrap();
        assert_eq!(value, json!({"found": false, "visible": false, "id": "ghost"}));
    }

    #[test]
    fn test_search_hit_shape() {
        let visible = serde_json::to_value(CommandResult::from(SearchResult::hit("a", true, None))).unwrap();
        assert_eq!(
            visible,
            json!({"found": true, "visible": true, "id": "a", "direction": null, "offsetX": 0, "offsetY": 0})
        );

        let hidden =
            serde_json::to_value(CommandResult::from(SearchResult::hit("a", false, Some("up-left".into())))).unwrap();
        assert_eq!(hidden["direction"], json!("up-left"));
    }

    #[test]
    fn test_outcome_shapes() {
        assert_eq!(
            CommandResult::from(Outcome::value("hi".into())).to_line().unwrap(),
            r#"{"success":true,"value":"hi"}"#
        );
        assert_eq!(
            CommandResult::from(Outcome::failed("Element not found: x")).to_line().unwrap(),
            r#"{"success":false,"error":"Element not found: x"}"#
        );
        assert_eq!(CommandResult::from(Outcome::ok()).to_line().unwrap(), r#"{"success":true}"#);
    }
}
