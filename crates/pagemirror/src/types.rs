//! Core data types shared by discovery, capture, resolution, and audit.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inferred kind of a page resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Css,
    Js,
    Image,
    Font,
    Media,
    Other,
}

impl AssetType {
    /// Directory under `assets/` that holds files of this type.
    pub fn dir_name(self) -> &'static str {
        match self {
            AssetType::Css => "css",
            AssetType::Js => "js",
            AssetType::Image => "images",
            AssetType::Font => "fonts",
            AssetType::Media => "media",
            AssetType::Other => "other",
        }
    }

    /// Classify a lowercase file extension (without the dot).
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "css" => AssetType::Css,
            "js" | "mjs" | "cjs" => AssetType::Js,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" | "bmp" => {
                AssetType::Image
            }
            "woff" | "woff2" | "ttf" | "otf" | "eot" => AssetType::Font,
            "mp4" | "webm" | "ogg" | "ogv" | "mp3" | "wav" | "m4a" | "mov" | "vtt" => {
                AssetType::Media
            }
            _ => AssetType::Other,
        }
    }

    /// Classify from a `Content-Type` header value, if it is specific enough.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/css" => Some(AssetType::Css),
            "application/javascript" | "text/javascript" | "application/x-javascript" => {
                Some(AssetType::Js)
            }
            m if m.starts_with("image/") => Some(AssetType::Image),
            m if m.starts_with("font/") || m.contains("font-woff") => Some(AssetType::Font),
            m if m.starts_with("video/") || m.starts_with("audio/") => Some(AssetType::Media),
            _ => None,
        }
    }

    /// Whether downloaded bodies of this type are scanned for further references.
    pub fn is_scannable(self) -> bool {
        matches!(self, AssetType::Css | AssetType::Js)
    }
}

/// Discovery mechanism that found an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Html,
    CssImport,
    CssUrl,
    JsImport,
    JsString,
    Srcset,
    Preload,
    Network,
}

/// One reference found by a discovery mechanism, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute URL in its original form (query retained for fetching).
    pub url: String,
    pub asset_type: AssetType,
    pub provenance: Provenance,
}

impl Candidate {
    pub fn new(url: impl Into<String>, asset_type: AssetType, provenance: Provenance) -> Self {
        Self {
            url: url.into(),
            asset_type,
            provenance,
        }
    }
}

/// A deduplicated resource keyed by its normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Identity: scheme + host + path, without query or fragment.
    pub url: String,
    /// First-seen original form, used for fetching.
    pub fetch_url: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub provenance: BTreeSet<Provenance>,
    pub local_path: Option<String>,
    pub inlined_payload: Option<String>,
    pub size_bytes: u64,
    pub essential: bool,
}

/// Where a reference points after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum Resolved {
    /// Path relative to the mirror root.
    Local(String),
    /// A `data:` URI holding the asset bytes.
    Inline(String),
    /// The original absolute URL, kept because the fetch failed.
    Remote(String),
}

impl Resolved {
    pub fn target(&self) -> &str {
        match self {
            Resolved::Local(s) | Resolved::Inline(s) | Resolved::Remote(s) => s,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Resolved::Remote(_))
    }
}

/// A named width x height rendering configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Result of one content-activation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    /// The scripting context was replaced by a navigation mid-step.
    SkippedNavigation,
    TimedOut,
    Failed(String),
}

/// Outcome of a named activation step within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
}

/// Everything one rendering pass observed for a single viewport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturePassResult {
    pub viewport: Viewport,
    pub markup: String,
    pub resource_timing: Vec<String>,
    pub network_requests: Vec<String>,
    pub console_errors: Vec<String>,
    /// Set when the pass could not navigate at all.
    pub navigation_error: Option<String>,
    pub steps: Vec<StepRecord>,
}

impl CapturePassResult {
    pub fn navigated(&self) -> bool {
        self.navigation_error.is_none()
    }

    /// Resource-timing and raw network URLs, in observation order.
    pub fn observed_urls(&self) -> impl Iterator<Item = &str> {
        self.resource_timing
            .iter()
            .chain(self.network_requests.iter())
            .map(String::as_str)
    }
}

/// One file found by walking the mirror directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInventoryEntry {
    /// Path relative to the mirror root, `/`-separated.
    pub path: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// Lowercase extension without the dot; empty when absent.
    pub extension: String,
}

/// Count and byte total for one file extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionAggregate {
    pub count: usize,
    pub total_bytes: u64,
}

/// How urgent a recommendation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// A threshold-rule finding derived from the usage metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: String,
    pub priority: Priority,
    pub message: String,
}

/// Essential vs. unused classification of a mirror and its derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    /// Inventory paths proven used.
    pub essential: BTreeSet<String>,
    /// Inventory paths not proven used, largest first.
    pub unused: Vec<FileInventoryEntry>,
    pub total_files: usize,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub unused_bytes: u64,
    /// `unused_bytes / total_bytes`, 0 for an empty inventory.
    pub waste_ratio: f64,
    pub unused_by_extension: BTreeMap<String, ExtensionAggregate>,
    pub viewport_asset_counts: BTreeMap<String, usize>,
    /// Referenced paths that are not present on disk.
    pub missing_references: Vec<String>,
    pub recommendations: Vec<Recommendation>,
}

/// Why an asset was left as a remote reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchFailureKind {
    Network,
    OriginPolicy,
    /// Downloaded, but the local file could not be written.
    Storage,
}

impl std::fmt::Display for FetchFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailureKind::Network => f.write_str("network"),
            FetchFailureKind::OriginPolicy => f.write_str("origin-policy"),
            FetchFailureKind::Storage => f.write_str("storage"),
        }
    }
}

/// Errors that can occur while mirroring, auditing, or pruning.
#[derive(thiserror::Error, Debug)]
pub enum MirrorError {
    #[error("navigation failed for viewport {viewport}: {reason}")]
    NavigationFailed { viewport: String, reason: String },

    #[error("interaction step {step} interrupted by navigation")]
    InteractionInterrupted { step: String },

    #[error("fetch of {url} failed ({kind}): {reason}")]
    AssetFetchFailed {
        url: String,
        kind: FetchFailureKind,
        reason: String,
    },

    #[error("entry document missing: {0}")]
    EntryDocumentMissing(PathBuf),

    #[error("cannot walk {path}: {reason}")]
    DirectoryWalk { path: PathBuf, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("report from {audit_date} predates mirror export at {exported_at}")]
    StaleReport {
        audit_date: DateTime<Utc>,
        exported_at: DateTime<Utc>,
    },

    #[error("report has no runtime evidence; re-run the audit with a browser or force the cleanup")]
    MissingRuntimeEvidence,

    #[error("path escapes the mirror root: {0}")]
    UnsafePath(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("renderer error: {0}")]
    Renderer(String),

    #[error("static server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type MirrorResult<T> = Result<T, MirrorError>;
