//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the engine, providing a single source of truth for constant values.

/// Marker glyph geometry (pixels, scale 1)
pub mod glyph {
    /// Side of one anchor cell (the anchor is a 2x2 checker of these)
    pub const ANCHOR_CELL: u32 = 4;

    /// Width of the border ring around the code grid
    pub const BORDER: u32 = 2;

    /// Side of one code cell (the grid is 3x3 of these)
    pub const CELL: u32 = 4;

    /// Number of code cells in the grid
    pub const CELL_COUNT: usize = 9;

    /// Side of the bordered code block
    pub const CODE_BLOCK: u32 = BORDER * 2 + CELL * 3;

    /// Total glyph width: anchor column followed by the code block
    pub const WIDTH: u32 = ANCHOR_CELL * 2 + CODE_BLOCK;

    /// Total glyph height
    pub const HEIGHT: u32 = CODE_BLOCK;

    /// Largest pixel scale accepted for raster export
    pub const MAX_SCALE: u32 = 64;
}

/// Fixed 8-color palette indexed by 3-bit codes
pub mod palette {
    /// RGB triples, index = code
    pub const RGB: [[u8; 3]; 8] = [
        [0x00, 0x00, 0x00], // black
        [0xFF, 0xFF, 0xFF], // white
        [0xFF, 0x00, 0x00], // red
        [0x00, 0xFF, 0x00], // green
        [0x00, 0x00, 0xFF], // blue
        [0xFF, 0xFF, 0x00], // yellow
        [0xFF, 0x00, 0xFF], // magenta
        [0x00, 0xFF, 0xFF], // cyan
    ];

    /// Anchor checker colors (dark, light)
    pub const ANCHOR_DARK: usize = 0;
    pub const ANCHOR_LIGHT: usize = 1;
}

/// Attribute and style keys written into the host tree
pub mod dom {
    /// Marks overlay containers (value = label)
    pub const OVERLAY_ATTR: &str = "data-glyphmark";

    /// Key of the shared presentation-rule block
    pub const STYLE_KEY: &str = "glyphmark-overlay-styles";

    /// Presentation rules that stop modal-like containers clipping overlays
    pub const OVERLAY_STYLES: &str = "dialog, [role=\"dialog\"], [aria-modal=\"true\"], .modal, .modal-content, .popover { overflow: visible !important; }";

    /// Elements that cannot show children; these get detached overlays
    pub const VOID_TAGS: &[&str] = &[
        "input", "img", "textarea", "select", "br", "hr", "area", "embed", "iframe", "video",
        "audio", "canvas", "source", "track", "wbr", "col", "meta", "link", "base",
    ];

    /// Tags whose value is readable/settable
    pub const VALUE_TAGS: &[&str] = &["input", "textarea", "select"];

    /// Dispatched events kept before the oldest are dropped
    pub const EVENT_LOG_CAP: usize = 1024;
}

/// Identity resolver limits
pub mod labels {
    /// Maximum length of a sanitized label
    pub const MAX_LABEL_LEN: usize = 40;

    /// Maximum number of visible-text characters considered as a label source
    pub const MAX_TEXT_SOURCE_LEN: usize = 30;

    /// Roles treated as interactive
    pub const INTERACTIVE_ROLES: &[&str] = &[
        "button", "link", "checkbox", "radio", "switch", "tab", "menuitem", "option", "combobox",
        "textbox",
    ];

    /// Roles / tags considered option-like when resolving custom selects
    pub const OPTION_ROLES: &[&str] = &["option", "menuitem", "menuitemradio", "treeitem"];
}

/// Configuration defaults
pub mod config {
    /// Directory name under the platform config dir
    pub const APP_DIR: &str = "glyphmark";

    /// Config file name
    pub const FILENAME: &str = "config.toml";

    pub const DEFAULT_PORT: u16 = 5050;
    pub const DEFAULT_Z_INDEX: i32 = 9999;
    pub const DEFAULT_OPACITY: f32 = 1.0;
    pub const DEFAULT_SELECT_DELAY_MS: u64 = 300;
    pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;
    pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5000;

    /// Label attributes, highest priority first
    pub const DEFAULT_LABEL_ATTRIBUTES: &[&str] = &["data-id", "data-testid", "data-cy"];

    /// Page-level query parameter carrying a port override
    pub const PORT_QUERY_PARAM: &str = "port";
}

/// Validation bounds for config values
pub mod validation {
    pub const MIN_SELECT_DELAY_MS: u64 = 10;
    pub const MAX_SELECT_DELAY_MS: u64 = 10_000;
    pub const MIN_RECONNECT_INTERVAL_MS: u64 = 100;
    pub const MIN_SWEEP_INTERVAL_MS: u64 = 100;
}

/// Command channel constants
pub mod channel {
    /// Loopback host the agent listens on
    pub const HOST: &str = "127.0.0.1";

    /// Longest accepted command line (bytes)
    pub const MAX_LINE_LEN: usize = 64 * 1024;
}
