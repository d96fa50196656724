//! The manifest file written at the root of every mirror.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::PassSummary;
use crate::resolve::RemoteAsset;
use crate::types::{MirrorResult, Viewport};

/// File name of the manifest inside the mirror root.
pub const MANIFEST_FILE: &str = "pagemirror-manifest.json";

/// What an export produced and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorManifest {
    pub source_url: String,
    pub exported_at: DateTime<Utc>,
    pub entry_document: String,
    pub viewports: Vec<Viewport>,
    /// Per-viewport resource counts, keyed by viewport label.
    pub resource_counts: BTreeMap<String, PassSummary>,
    pub canonical_viewport: Option<String>,
    pub discovered_assets: usize,
    pub downloaded_assets: usize,
    pub inlined_assets: usize,
    /// Assets still referenced by their original URL.
    pub remote_assets: Vec<RemoteAsset>,
    #[serde(default)]
    pub console_errors: Vec<String>,
}

impl MirrorManifest {
    pub fn path_in(mirror_root: &Path) -> std::path::PathBuf {
        mirror_root.join(MANIFEST_FILE)
    }

    pub async fn write(&self, mirror_root: &Path) -> MirrorResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(Self::path_in(mirror_root), json).await?;
        Ok(())
    }

    /// Read the manifest of `mirror_root`, if the mirror has one.
    pub async fn read(mirror_root: &Path) -> MirrorResult<Option<Self>> {
        let path = Self::path_in(mirror_root);
        match tokio::fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FetchFailureKind;

    #[tokio::test]
    async fn test_manifest_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = MirrorManifest {
            source_url: "https://example.com/".into(),
            exported_at: Utc::now(),
            entry_document: "index.html".into(),
            viewports: vec![Viewport::new("desktop", 1920, 1080)],
            resource_counts: BTreeMap::new(),
            canonical_viewport: Some("desktop".into()),
            discovered_assets: 3,
            downloaded_assets: 1,
            inlined_assets: 1,
            remote_assets: vec![RemoteAsset {
                url: "https://cdn.example.net/x.js".into(),
                kind: FetchFailureKind::OriginPolicy,
                reason: "HTTP 403".into(),
            }],
            console_errors: Vec::new(),
        };
        manifest.write(dir.path()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join(MANIFEST_FILE)).unwrap();
        assert!(raw.contains("\"kind\": \"origin-policy\""));
        let back = MirrorManifest::read(dir.path()).await.unwrap().unwrap();
        assert_eq!(back, manifest);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MirrorManifest::read(dir.path()).await.unwrap().is_none());
    }
}
