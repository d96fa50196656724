//! Configuration loading, resolution, and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{MirrorError, MirrorResult, Viewport};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PAGEMIRROR_CONFIG";

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pagemirror.json";

/// Selectors clicked during content activation to surface hidden panels.
pub const DEFAULT_CLICK_SELECTORS: &[&str] = &[
    "[role=\"tab\"]",
    ".accordion-button",
    ".accordion-header",
    "[data-toggle]",
    "[data-bs-toggle]",
    ".tab",
    ".toggle",
    "button[aria-controls]",
    "[aria-expanded=\"false\"]",
];

/// Settings for one export/audit/cleanup run.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides. Call [`MirrorConfig::validated`] (or [`MirrorConfig::load`])
/// before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Capture order: passes run in this sequence.
    pub viewports: Vec<Viewport>,
    pub navigation_timeout_ms: u64,
    /// Quiet window with zero in-flight requests that counts as idle.
    pub idle_window_ms: u64,
    /// Hard ceiling for a single network-idle wait.
    pub idle_ceiling_ms: u64,
    pub idle_poll_ms: u64,
    /// Timeout applied to each expand, scroll, and click step.
    pub step_timeout_ms: u64,
    pub scroll_step_cap: u32,
    pub scroll_pause_ms: u64,
    pub click_selectors: Vec<String>,
    pub max_clicks_per_selector: u32,
    pub inter_pass_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    pub download_concurrency: usize,
    /// Images at or below this size are inlined as data URIs.
    pub inline_threshold_bytes: u64,
    /// Rounds of CSS/JS re-scanning after the first download batch.
    pub max_discovery_depth: u32,
    pub entry_document: String,
    pub large_unused_image_bytes: u64,
    pub waste_ratio_threshold: f64,
    pub largest_unused_limit: usize,
    /// Glob patterns (relative to the mirror root) never classified unused.
    pub keep_patterns: Vec<String>,
    pub screenshot_dir: Option<PathBuf>,
    pub user_agent: String,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            viewports: vec![
                Viewport::new("desktop", 1920, 1080),
                Viewport::new("tablet", 768, 1024),
                Viewport::new("mobile", 375, 667),
            ],
            navigation_timeout_ms: 30_000,
            idle_window_ms: 500,
            idle_ceiling_ms: 10_000,
            idle_poll_ms: 50,
            step_timeout_ms: 2_000,
            scroll_step_cap: 20,
            scroll_pause_ms: 250,
            click_selectors: DEFAULT_CLICK_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_clicks_per_selector: 5,
            inter_pass_delay_ms: 1_000,
            fetch_timeout_ms: 15_000,
            download_concurrency: 8,
            inline_threshold_bytes: 5 * 1024,
            max_discovery_depth: 3,
            entry_document: "index.html".to_string(),
            large_unused_image_bytes: 100 * 1024,
            waste_ratio_threshold: 0.30,
            largest_unused_limit: 20,
            keep_patterns: Vec::new(),
            screenshot_dir: None,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                         AppleWebKit/537.36 (KHTML, like Gecko) \
                         Chrome/131.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl MirrorConfig {
    /// Load the config from the first source that exists, then validate it.
    ///
    /// Order: explicit path, `PAGEMIRROR_CONFIG`, `./pagemirror.json`,
    /// `<config dir>/pagemirror/config.json`, built-in defaults. An explicit
    /// path that does not exist is an error; the implicit ones are skipped.
    pub fn load(explicit: Option<&Path>) -> MirrorResult<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match resolve_config_path() {
            Some(path) => {
                tracing::debug!("loading config from {}", path.display());
                Self::from_file(&path)
            }
            None => Self::default().validated(),
        }
    }

    /// Parse and validate a JSON config file.
    pub fn from_file(path: &Path) -> MirrorResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MirrorError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: MirrorConfig = serde_json::from_str(&text)?;
        config.validated()
    }

    /// Check cross-field constraints, returning the config unchanged if sound.
    pub fn validated(self) -> MirrorResult<Self> {
        if self.viewports.is_empty() {
            return Err(MirrorError::InvalidConfig(
                "at least one viewport is required".into(),
            ));
        }
        let mut labels = HashSet::new();
        for vp in &self.viewports {
            if vp.width == 0 || vp.height == 0 {
                return Err(MirrorError::InvalidConfig(format!(
                    "viewport {} has a zero dimension",
                    vp.label
                )));
            }
            if !labels.insert(vp.label.as_str()) {
                return Err(MirrorError::InvalidConfig(format!(
                    "duplicate viewport label {}",
                    vp.label
                )));
            }
        }
        let timeouts = [
            ("navigation_timeout_ms", self.navigation_timeout_ms),
            ("idle_window_ms", self.idle_window_ms),
            ("idle_ceiling_ms", self.idle_ceiling_ms),
            ("idle_poll_ms", self.idle_poll_ms),
            ("step_timeout_ms", self.step_timeout_ms),
            ("fetch_timeout_ms", self.fetch_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, v)| *v == 0) {
            return Err(MirrorError::InvalidConfig(format!("{name} must be > 0")));
        }
        if self.download_concurrency == 0 {
            return Err(MirrorError::InvalidConfig(
                "download_concurrency must be >= 1".into(),
            ));
        }
        if !(self.waste_ratio_threshold > 0.0 && self.waste_ratio_threshold <= 1.0) {
            return Err(MirrorError::InvalidConfig(
                "waste_ratio_threshold must be in (0, 1]".into(),
            ));
        }
        let entry = self.entry_document.trim();
        if entry.is_empty()
            || entry.contains("..")
            || entry.starts_with(['/', '\\'])
            || std::path::Path::new(entry).is_absolute()
        {
            return Err(MirrorError::InvalidConfig(
                "entry_document must be a plain relative file name".into(),
            ));
        }
        Ok(self)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn inter_pass_delay(&self) -> Duration {
        Duration::from_millis(self.inter_pass_delay_ms)
    }
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    dirs::config_dir()
        .map(|dir| dir.join("pagemirror").join("config.json"))
        .filter(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MirrorConfig::default().validated().unwrap();
        assert_eq!(config.viewports.len(), 3);
        assert_eq!(config.inline_threshold_bytes, 5120);
        assert_eq!(config.idle_window_ms, 500);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"inline_threshold_bytes": 2048, "keep_patterns": ["assets/js/**"]}"#,
        )
        .unwrap();

        let config = MirrorConfig::from_file(&path).unwrap();
        assert_eq!(config.inline_threshold_bytes, 2048);
        assert_eq!(config.keep_patterns, vec!["assets/js/**".to_string()]);
        assert_eq!(config.download_concurrency, 8);
    }

    #[test]
    fn test_rejects_duplicate_viewports() {
        let config = MirrorConfig {
            viewports: vec![Viewport::new("a", 10, 10), Viewport::new("a", 20, 20)],
            ..MirrorConfig::default()
        };
        assert!(matches!(
            config.validated(),
            Err(MirrorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_concurrency_and_bad_ratio() {
        let config = MirrorConfig {
            download_concurrency: 0,
            ..MirrorConfig::default()
        };
        assert!(config.validated().is_err());

        let config = MirrorConfig {
            waste_ratio_threshold: 1.5,
            ..MirrorConfig::default()
        };
        assert!(config.validated().is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = MirrorConfig::load(Some(Path::new("/nonexistent/pagemirror.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_entry_document_must_stay_inside_mirror() {
        for bad in ["/etc/passwd", "\\share\\x.html", "../index.html", " "] {
            let config = MirrorConfig {
                entry_document: bad.into(),
                ..MirrorConfig::default()
            };
            assert!(config.validated().is_err(), "{bad:?} accepted");
        }
        let config = MirrorConfig {
            entry_document: "pages/home.html".into(),
            ..MirrorConfig::default()
        };
        assert!(config.validated().is_ok());
    }
}
