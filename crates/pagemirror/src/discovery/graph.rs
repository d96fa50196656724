//! Deduplicated asset graph keyed by normalized URL.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{Asset, AssetType, Candidate, Provenance};
use crate::urls;

/// Every asset discovered for one page, at most once per normalized URL.
///
/// Inserting an already-known URL only merges its provenance tags. Assets
/// are never removed.
#[derive(Debug, Clone, Default)]
pub struct AssetGraph {
    assets: BTreeMap<String, Asset>,
}

impl AssetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a candidate, returning `true` if its normalized URL was new.
    pub fn insert(&mut self, candidate: &Candidate) -> bool {
        let Ok(parsed) = Url::parse(&candidate.url) else {
            return false;
        };
        let key = urls::normalize(&parsed);

        if let Some(existing) = self.assets.get_mut(&key) {
            existing.provenance.insert(candidate.provenance);
            if existing.asset_type == AssetType::Other && candidate.asset_type != AssetType::Other
            {
                existing.asset_type = candidate.asset_type;
            }
            return false;
        }

        self.assets.insert(
            key.clone(),
            Asset {
                url: key,
                fetch_url: candidate.url.clone(),
                asset_type: candidate.asset_type,
                provenance: BTreeSet::from([candidate.provenance]),
                local_path: None,
                inlined_payload: None,
                size_bytes: 0,
                essential: false,
            },
        );
        true
    }

    /// Add many candidates, returning how many were new.
    pub fn extend<'a>(&mut self, candidates: impl IntoIterator<Item = &'a Candidate>) -> usize {
        candidates
            .into_iter()
            .filter(|c| self.insert(c))
            .count()
    }

    pub fn get(&self, normalized_url: &str) -> Option<&Asset> {
        self.assets.get(normalized_url)
    }

    /// Look up by any form of the URL (query and fragment ignored).
    pub fn lookup(&self, url: &Url) -> Option<&Asset> {
        self.assets.get(&urls::normalize(url))
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Record that an asset was persisted at `local_path`.
    pub fn set_local(&mut self, normalized_url: &str, local_path: String, size_bytes: u64) {
        if let Some(asset) = self.assets.get_mut(normalized_url) {
            asset.local_path = Some(local_path);
            asset.size_bytes = size_bytes;
        }
    }

    /// Forget a local path whose file could not be written.
    pub fn clear_local(&mut self, normalized_url: &str) {
        if let Some(asset) = self.assets.get_mut(normalized_url) {
            asset.local_path = None;
        }
    }

    /// Record that an asset was embedded as a data URI.
    pub fn set_inline(&mut self, normalized_url: &str, payload: String, size_bytes: u64) {
        if let Some(asset) = self.assets.get_mut(normalized_url) {
            asset.inlined_payload = Some(payload);
            asset.size_bytes = size_bytes;
        }
    }

    /// Mark assets whose normalized URL is in `used` as essential.
    pub fn mark_essential(&mut self, used: &BTreeSet<String>) {
        for (key, asset) in self.assets.iter_mut() {
            asset.essential = used.contains(key);
        }
    }

    /// Serializable view: URL → type, sources, local path.
    pub fn document(&self, runtime_assets: Vec<String>) -> DependencyGraphDocument {
        let assets = self
            .assets
            .iter()
            .map(|(key, asset)| {
                (
                    key.clone(),
                    GraphNode {
                        asset_type: asset.asset_type,
                        sources: asset.provenance.iter().copied().collect(),
                        local_path: asset.local_path.clone(),
                    },
                )
            })
            .collect();
        DependencyGraphDocument {
            assets,
            runtime_assets,
        }
    }
}

/// Candidate for a URL observed only on the network.
pub fn network_candidate(raw: &str) -> Option<Candidate> {
    if urls::is_excluded(raw) {
        return None;
    }
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let asset_type = urls::type_from_url(&url);
    Some(Candidate::new(url.as_str(), asset_type, Provenance::Network))
}

/// One node of the dependency graph file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub sources: Vec<Provenance>,
    pub local_path: Option<String>,
}

/// Contents of `dependency-graph.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyGraphDocument {
    pub assets: BTreeMap<String, GraphNode>,
    pub runtime_assets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse_with_merged_provenance() {
        let mut graph = AssetGraph::new();
        let inserted = graph.extend(&[
            Candidate::new(
                "https://example.com/a.png?Size=Large",
                AssetType::Image,
                Provenance::Html,
            ),
            Candidate::new(
                "https://example.com/a.png?size=large",
                AssetType::Image,
                Provenance::Srcset,
            ),
            Candidate::new(
                "https://EXAMPLE.com/a.png#frag",
                AssetType::Image,
                Provenance::Network,
            ),
        ]);

        assert_eq!(inserted, 1);
        assert_eq!(graph.len(), 1);
        let asset = graph.get("https://example.com/a.png").unwrap();
        assert_eq!(
            asset.provenance,
            BTreeSet::from([Provenance::Html, Provenance::Srcset, Provenance::Network])
        );
        assert_eq!(asset.fetch_url, "https://example.com/a.png?Size=Large");
    }

    #[test]
    fn test_specific_type_replaces_other() {
        let mut graph = AssetGraph::new();
        graph.insert(&network_candidate("https://example.com/font").unwrap());
        graph.insert(&Candidate::new(
            "https://example.com/font",
            AssetType::Font,
            Provenance::Preload,
        ));
        assert_eq!(
            graph.get("https://example.com/font").unwrap().asset_type,
            AssetType::Font
        );
    }

    #[test]
    fn test_document_shape() {
        let mut graph = AssetGraph::new();
        graph.insert(&Candidate::new(
            "https://example.com/s.css",
            AssetType::Css,
            Provenance::Html,
        ));
        graph.set_local("https://example.com/s.css", "assets/css/example.com/s.css".into(), 10);

        let json = serde_json::to_value(graph.document(vec!["d.js".into()])).unwrap();
        assert_eq!(json["assets"]["https://example.com/s.css"]["type"], "css");
        assert_eq!(json["assets"]["https://example.com/s.css"]["sources"][0], "html");
        assert_eq!(json["runtime_assets"][0], "d.js");
    }

    #[test]
    fn test_network_candidate_filters() {
        assert!(network_candidate("data:text/plain,hi").is_none());
        assert!(network_candidate("chrome-extension://abc/x.js").is_none());
        let c = network_candidate("https://example.com/d.js").unwrap();
        assert_eq!(c.asset_type, AssetType::Js);
    }
}
