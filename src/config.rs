use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::constants::config::*;

/// Where a marker sits relative to its host element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkerPosition {
    #[default]
    Center,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl FromStr for MarkerPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "center" => Ok(Self::Center),
            "top-left" => Ok(Self::TopLeft),
            "top-right" => Ok(Self::TopRight),
            "bottom-left" => Ok(Self::BottomLeft),
            "bottom-right" => Ok(Self::BottomRight),
            other => Err(format!("unknown marker position '{other}'")),
        }
    }
}

impl fmt::Display for MarkerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Center => "center",
            Self::TopLeft => "top-left",
            Self::TopRight => "top-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomRight => "bottom-right",
        };
        f.write_str(name)
    }
}

/// Immutable configuration snapshot.
/// Every reconfiguration builds a new one instead of mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub position: MarkerPosition,

    #[serde(default = "default_z_index")]
    pub z_index: i32,

    /// 0.0 (invisible) to 1.0 (opaque)
    #[serde(default = "default_opacity")]
    pub opacity: f32,

    /// Loopback port of the automation agent
    #[serde(default = "default_port")]
    pub port: u16,

    /// Label attributes, highest priority first
    #[serde(default = "default_label_attributes")]
    pub label_attributes: Vec<String>,

    /// Wait between activating a custom dropdown and looking for its option
    #[serde(default = "default_select_delay_ms")]
    pub select_delay_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    /// Period of the detached-overlay liveness sweep
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_z_index() -> i32 {
    DEFAULT_Z_INDEX
}

fn default_opacity() -> f32 {
    DEFAULT_OPACITY
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_label_attributes() -> Vec<String> {
    DEFAULT_LABEL_ATTRIBUTES.iter().map(|s| s.to_string()).collect()
}

fn default_select_delay_ms() -> u64 {
    DEFAULT_SELECT_DELAY_MS
}

fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

fn default_sweep_interval_ms() -> u64 {
    DEFAULT_SWEEP_INTERVAL_MS
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            position: MarkerPosition::default(),
            z_index: default_z_index(),
            opacity: default_opacity(),
            port: default_port(),
            label_attributes: default_label_attributes(),
            select_delay_ms: default_select_delay_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

/// Partial configuration merged over a snapshot by `init` and `configure`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub position: Option<MarkerPosition>,
    pub z_index: Option<i32>,
    pub opacity: Option<f32>,
    pub port: Option<u16>,
    pub label_attributes: Option<Vec<String>>,
    pub select_delay_ms: Option<u64>,
    pub reconnect_interval_ms: Option<u64>,
    pub sweep_interval_ms: Option<u64>,
}

impl ConfigPatch {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Apply a page-level port override taken from the document location.
    ///
    /// A port override also pins opacity to the default when this patch did
    /// not set one, which discards any opacity coming from the file or env.
    pub fn with_page_port(mut self, location: &str) -> Self {
        if let Some(port) = page_port(location) {
            info!(port = port, "Using port from page query parameter");
            self.port = Some(port);
            if self.opacity.is_none() {
                self.opacity = Some(DEFAULT_OPACITY);
            }
        }
        self
    }
}

/// `port` query parameter of a page URL, if present and valid
pub fn page_port(location: &str) -> Option<u16> {
    let url = url::Url::parse(location).ok()?;
    let (_, raw) = url.query_pairs().find(|(key, _)| key == PORT_QUERY_PARAM)?;
    raw.trim()
        .parse::<u16>()
        .inspect_err(|e| warn!(value = %raw, error = %e, "Ignoring invalid port query parameter"))
        .ok()
        .filter(|port| *port != 0)
}

impl MarkerConfig {
    pub fn config_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path.push(FILENAME);
        path
    }

    /// Load from the default config path; a missing file means defaults.
    /// Environment overrides are applied and values are clamped.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<MarkerConfig>(&contents)
                .inspect_err(|e| error!(path = %path.display(), error = %e, "Failed to parse config file"))
                .context(format!("Failed to parse config file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No config file, using defaults");
                MarkerConfig::default()
            }
            Err(e) => {
                return Err(e).context(format!("Failed to read config file {}", path.display()));
            }
        };
        config.apply_env_overrides(|var| std::env::var(var).ok());
        config.validate_and_clamp();
        Ok(config)
    }

    fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<T>
    where
        <T as FromStr>::Err: fmt::Display,
    {
        let raw = lookup(var)?;
        raw.trim()
            .parse::<T>()
            .inspect_err(|e| error!(var = %var, value = %raw, error = %e, "failed to parse env var"))
            .ok()
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = Self::parse_var::<bool>(&lookup, "GLYPHMARK_ENABLED") {
            self.enabled = enabled;
        }
        if let Some(position) = Self::parse_var::<MarkerPosition>(&lookup, "GLYPHMARK_POSITION") {
            self.position = position;
        }
        if let Some(z_index) = Self::parse_var::<i32>(&lookup, "GLYPHMARK_Z_INDEX") {
            self.z_index = z_index;
        }
        if let Some(opacity) = Self::parse_var::<f32>(&lookup, "GLYPHMARK_OPACITY") {
            self.opacity = opacity;
        }
        if let Some(port) = Self::parse_var::<u16>(&lookup, "GLYPHMARK_PORT") {
            self.port = port;
        }
    }

    /// Clamp values to safe ranges, logging every correction
    pub fn validate_and_clamp(&mut self) {
        use crate::constants::validation::*;

        if !self.opacity.is_finite() {
            warn!(opacity = self.opacity, "opacity is not a number, using default");
            self.opacity = DEFAULT_OPACITY;
        } else if !(0.0..=1.0).contains(&self.opacity) {
            warn!(opacity = self.opacity, "opacity outside [0, 1], clamping");
            self.opacity = self.opacity.clamp(0.0, 1.0);
        }

        if self.port == 0 {
            warn!(using = DEFAULT_PORT, "port 0 is not connectable, using default");
            self.port = DEFAULT_PORT;
        }

        self.label_attributes.retain(|attr| !attr.trim().is_empty());
        if self.label_attributes.is_empty() {
            warn!("label_attributes is empty, using defaults");
            self.label_attributes = default_label_attributes();
        }

        if self.select_delay_ms < MIN_SELECT_DELAY_MS {
            warn!(select_delay_ms = self.select_delay_ms, min = MIN_SELECT_DELAY_MS, "select_delay_ms below minimum, clamping");
            self.select_delay_ms = MIN_SELECT_DELAY_MS;
        } else if self.select_delay_ms > MAX_SELECT_DELAY_MS {
            warn!(select_delay_ms = self.select_delay_ms, max = MAX_SELECT_DELAY_MS, "select_delay_ms exceeds maximum, clamping");
            self.select_delay_ms = MAX_SELECT_DELAY_MS;
        }

        if self.reconnect_interval_ms < MIN_RECONNECT_INTERVAL_MS {
            warn!(reconnect_interval_ms = self.reconnect_interval_ms, min = MIN_RECONNECT_INTERVAL_MS, "reconnect_interval_ms below minimum, clamping");
            self.reconnect_interval_ms = MIN_RECONNECT_INTERVAL_MS;
        }

        if self.sweep_interval_ms < MIN_SWEEP_INTERVAL_MS {
            warn!(sweep_interval_ms = self.sweep_interval_ms, min = MIN_SWEEP_INTERVAL_MS, "sweep_interval_ms below minimum, clamping");
            self.sweep_interval_ms = MIN_SWEEP_INTERVAL_MS;
        }
    }

    /// New validated snapshot with `patch` applied
    pub fn merged(&self, patch: &ConfigPatch) -> Self {
        let mut next = self.clone();
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(position) = patch.position {
            next.position = position;
        }
        if let Some(z_index) = patch.z_index {
            next.z_index = z_index;
        }
        if let Some(opacity) = patch.opacity {
            next.opacity = opacity;
        }
        if let Some(port) = patch.port {
            next.port = port;
        }
        if let Some(attrs) = &patch.label_attributes {
            next.label_attributes = attrs.clone();
        }
        if let Some(delay) = patch.select_delay_ms {
            next.select_delay_ms = delay;
        }
        if let Some(interval) = patch.reconnect_interval_ms {
            next.reconnect_interval_ms = interval;
        }
        if let Some(interval) = patch.sweep_interval_ms {
            next.sweep_interval_ms = interval;
        }
        next.validate_and_clamp();
        next
    }

    pub fn select_delay(&self) -> Duration {
        Duration::from_millis(self.select_delay_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = MarkerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.position, MarkerPosition::Center);
        assert_eq!(config.z_index, 9999);
        assert_eq!(config.opacity, 1.0);
        assert_eq!(config.port, 5050);
        assert_eq!(config.label_attributes, vec!["data-id", "data-testid", "data-cy"]);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: MarkerConfig = toml::from_str("position = \"bottom-right\"\nport = 7000\n").unwrap();
        assert_eq!(config.position, MarkerPosition::BottomRight);
        assert_eq!(config.port, 7000);
        assert_eq!(config.z_index, 9999);
        assert!(config.enabled);
    }

    #[test]
    fn test_env_overrides_and_bad_values_ignored() {
        let env = HashMap::from([
            ("GLYPHMARK_PORT", "6001"),
            ("GLYPHMARK_POSITION", "top-left"),
            ("GLYPHMARK_Z_INDEX", "not-a-number"),
            ("GLYPHMARK_ENABLED", "false"),
        ]);
        let mut config = MarkerConfig::default();
        config.apply_env_overrides(|var| env.get(var).map(|v| v.to_string()));

        assert_eq!(config.port, 6001);
        assert_eq!(config.position, MarkerPosition::TopLeft);
        assert_eq!(config.z_index, 9999);
        assert!(!config.enabled);
    }

    #[test]
    fn test_validate_and_clamp() {
        let mut config = MarkerConfig {
            opacity: 3.5,
            port: 0,
            label_attributes: vec!["  ".to_string()],
            select_delay_ms: 0,
            reconnect_interval_ms: 1,
            sweep_interval_ms: 1,
            ..MarkerConfig::default()
        };
        config.validate_and_clamp();

        assert_eq!(config.opacity, 1.0);
        assert_eq!(config.port, 5050);
        assert_eq!(config.label_attributes, default_label_attributes());
        assert_eq!(config.select_delay_ms, 10);
        assert_eq!(config.reconnect_interval_ms, 100);
        assert_eq!(config.sweep_interval_ms, 100);
    }

    #[test]
    fn test_merged_replaces_only_patched_fields() {
        let base = MarkerConfig {
            opacity: 0.4,
            ..MarkerConfig::default()
        };
        let patch = ConfigPatch {
            enabled: Some(false),
            z_index: Some(5),
            ..ConfigPatch::default()
        };
        let next = base.merged(&patch);

        assert!(!next.enabled);
        assert_eq!(next.z_index, 5);
        assert_eq!(next.opacity, 0.4);
        assert!(base.enabled);
    }

    #[test]
    fn test_page_port_forces_default_opacity() {
        let base = MarkerConfig {
            opacity: 0.3,
            ..MarkerConfig::default()
        };
        let patch = ConfigPatch::default().with_page_port("http://localhost:3000/?port=6060&x=1");
        let next = base.merged(&patch);

        assert_eq!(next.port, 6060);
        assert_eq!(next.opacity, 1.0);
    }

    #[test]
    fn test_page_port_keeps_explicit_opacity() {
        let patch = ConfigPatch {
            opacity: Some(0.5),
            ..ConfigPatch::default()
        }
        .with_page_port("http://localhost/?port=6060");
        assert_eq!(patch.opacity, Some(0.5));
        assert_eq!(patch.port, Some(6060));
    }

    #[test]
    fn test_page_port_absent_or_invalid() {
        assert_eq!(page_port("http://localhost/"), None);
        assert_eq!(page_port("http://localhost/?port=abc"), None);
        assert_eq!(page_port("about:blank"), None);
        assert_eq!(ConfigPatch::default().with_page_port("http://localhost/"), ConfigPatch::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "opacity = 0.75\nz_index = 42\n").unwrap();

        let config = MarkerConfig::load_from(&path).unwrap();
        assert_eq!(config.opacity, 0.75);
        assert_eq!(config.z_index, 42);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MarkerConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, MarkerConfig::default().port);
    }

    #[test]
    fn test_load_from_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "opacity = \"lots\"").unwrap();
        assert!(MarkerConfig::load_from(&path).is_err());
    }
}
