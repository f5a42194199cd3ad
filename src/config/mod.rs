//! Clock preferences loading.
//!
//! The embedding emulator keeps user preferences in a YAML file; the clock
//! consumes two of them. The expected structure is:
//!
//! ```yaml
//! clock:
//!   sync_play: true
//!   period_warn_limit: 50000
//! ```
//!
//! Every field is optional and falls back to its default, so partial files
//! (or a file without a `clock` section at all) are accepted gracefully.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Default ceiling on the compiled schedule period, in base ticks, past which
/// a warning is logged.
pub const DEFAULT_PERIOD_WARN_LIMIT: u32 = 20_000;

// ── Private YAML deserialization types ────────────────────────────────────────

/// Top-level wrapper that maps directly onto the preferences file layout.
#[derive(Debug, Deserialize)]
struct PrefsFile {
    clock: Option<ClockPrefs>,
}

// ── Public data structures ────────────────────────────────────────────────────

/// Preferences consumed by the clock.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockPrefs {
    /// Cross-chip cascading stop: when any CPU participant stops, every other
    /// CPU participant (and its peripherals) stops with it.
    pub sync_play: bool,

    /// Warn when the compiled schedule period exceeds this many base ticks —
    /// a sign that the registered frequencies are too disparate to schedule
    /// efficiently.
    pub period_warn_limit: u32,
}

impl Default for ClockPrefs {
    fn default() -> Self {
        Self {
            sync_play: false,
            period_warn_limit: DEFAULT_PERIOD_WARN_LIMIT,
        }
    }
}

impl ClockPrefs {
    /// Parse `path` and return the clock preferences it contains.
    ///
    /// A file without a `clock` section yields the defaults, with a warning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or if the YAML is
    /// structurally invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        info!("Loading clock preferences from: {}", path.display());

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open preferences file: {}", path.display()))?;

        let file: PrefsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML file: {}", path.display()))?;

        let prefs = match file.clock {
            Some(prefs) => prefs,
            None => {
                warn!("No clock section in preferences file, using defaults");
                ClockPrefs::default()
            }
        };

        info!(
            sync_play = prefs.sync_play,
            period_warn_limit = prefs.period_warn_limit,
            "Clock preferences loaded"
        );

        Ok(prefs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let prefs = ClockPrefs::default();
        assert!(!prefs.sync_play);
        assert_eq!(prefs.period_warn_limit, 20_000);
    }

    #[test]
    fn load_full_file() {
        let yaml = r#"
clock:
  sync_play: true
  period_warn_limit: 50000
"#;
        let f = yaml_tempfile(yaml);
        let prefs = ClockPrefs::load_from_file(f.path()).unwrap();
        assert!(prefs.sync_play);
        assert_eq!(prefs.period_warn_limit, 50_000);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let yaml = r#"
clock:
  sync_play: true
"#;
        let f = yaml_tempfile(yaml);
        let prefs = ClockPrefs::load_from_file(f.path()).unwrap();
        assert!(prefs.sync_play);
        assert_eq!(prefs.period_warn_limit, DEFAULT_PERIOD_WARN_LIMIT);
    }

    #[test]
    fn missing_clock_section_falls_back_to_defaults() {
        let f = yaml_tempfile("clock:\n");
        let prefs = ClockPrefs::load_from_file(f.path()).unwrap();
        assert!(!prefs.sync_play);
        assert_eq!(prefs.period_warn_limit, DEFAULT_PERIOD_WARN_LIMIT);
    }

    #[test]
    fn missing_file_returns_error() {
        let result = ClockPrefs::load_from_file(Path::new("/nonexistent/prefs.yaml"));
        assert!(result.is_err());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("this is: not: valid: yaml: content:::");
        assert!(ClockPrefs::load_from_file(f.path()).is_err());
    }
}
