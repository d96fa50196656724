//! Resolution engine: fetch discovered assets, choose a disposition for
//! each, persist the local asset tree, and build the resolution map the
//! rewriter consumes.
//!
//! Every reference ends up in exactly one of three states: a file under
//! `assets/`, an inline `data:` payload, or its original absolute URL when
//! the download failed. Failures are recorded per asset and never abort the
//! batch.

pub mod rewrite;

pub use rewrite::{rewrite_document, rewrite_stylesheet, RewriteContext};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use base64::Engine;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::MirrorConfig;
use crate::discovery::{self, AssetGraph};
use crate::fetch::{FetchError, FetchedAsset, Fetcher};
use crate::types::{AssetType, FetchFailureKind, MirrorResult, Resolved};
use crate::urls;

/// Normalized URL → where references to it now point.
pub type ResolutionMap = BTreeMap<String, Resolved>;

/// Parameters for [`resolve_assets`].
#[derive(Debug, Clone, Copy)]
pub struct ResolveSettings {
    /// Images at or below this many bytes are inlined.
    pub inline_threshold_bytes: u64,
    pub concurrency: usize,
    /// Rounds of re-scanning downloaded CSS/JS for further references.
    pub max_depth: u32,
}

impl From<&MirrorConfig> for ResolveSettings {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            inline_threshold_bytes: config.inline_threshold_bytes,
            concurrency: config.download_concurrency,
            max_depth: config.max_discovery_depth,
        }
    }
}

/// An asset left as a remote reference, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAsset {
    pub url: String,
    pub kind: FetchFailureKind,
    pub reason: String,
}

/// Everything the resolution pass produced.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub graph: AssetGraph,
    pub map: ResolutionMap,
    pub downloaded: usize,
    pub inlined: usize,
    pub remote: Vec<RemoteAsset>,
}

/// Whether an asset of `asset_type` and `size` bytes is embedded inline.
///
/// The threshold is inclusive.
pub fn should_inline(asset_type: AssetType, size: u64, threshold: u64) -> bool {
    asset_type == AssetType::Image && size <= threshold
}

/// `data:` URI for an image body.
pub fn data_uri(fetched: &FetchedAsset, url: &Url) -> String {
    let mime = fetched
        .content_type
        .as_deref()
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or_else(|| {
            mime_guess::from_path(url.path())
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
    let encoded = base64::engine::general_purpose::STANDARD.encode(&fetched.bytes);
    format!("data:{mime};base64,{encoded}")
}

/// Local paths handed out so far, as files and the directories they imply.
#[derive(Debug, Default)]
struct ClaimedPaths {
    files: HashSet<String>,
    dirs: HashSet<String>,
}

impl ClaimedPaths {
    /// `path` neither collides with a claimed file or directory nor needs a
    /// claimed file to be a directory.
    fn is_free(&self, path: &str) -> bool {
        !self.files.contains(path)
            && !self.dirs.contains(path)
            && self.file_ancestor(path).is_none()
    }

    fn file_ancestor<'p>(&self, path: &'p str) -> Option<&'p str> {
        path.match_indices('/')
            .map(|(i, _)| &path[..i])
            .find(|dir| self.files.contains(*dir))
    }

    fn insert(&mut self, path: &str) {
        for (i, _) in path.match_indices('/') {
            self.dirs.insert(path[..i].to_string());
        }
        self.files.insert(path.to_string());
    }
}

/// `path` with `-n` before its extension.
fn with_suffix(path: &str, n: u32) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) if !stem.ends_with('/') && !ext.contains('/') => {
            format!("{stem}-{n}.{ext}")
        }
        _ => format!("{path}-{n}"),
    }
}

/// Pick a free local path, suffixing `-2`, `-3`, ... on collision.
///
/// When a claimed file sits where `wanted` needs a directory, the suffix goes
/// on that directory segment instead.
fn claim_path(wanted: String, claimed: &mut ClaimedPaths) -> String {
    let mut candidate = wanted.clone();
    let mut n = 2;
    while !claimed.is_free(&candidate) {
        candidate = match claimed.file_ancestor(&wanted) {
            Some(dir) => format!("{dir}-{n}{}", &wanted[dir.len()..]),
            None => with_suffix(&wanted, n),
        };
        n += 1;
    }
    claimed.insert(&candidate);
    candidate
}

async fn write_asset(full: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = full.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(full, bytes).await
}

/// Download every asset in `graph`, following CSS/JS references up to the
/// configured depth, and persist local files under `out_dir`.
///
/// Stylesheets are written with their own references rewritten relative to
/// their location in the mirror. An asset whose file cannot be written is
/// kept as a remote reference like a failed download.
pub async fn resolve_assets(
    fetcher: &dyn Fetcher,
    mut graph: AssetGraph,
    page_base: &Url,
    out_dir: &Path,
    settings: &ResolveSettings,
) -> MirrorResult<Resolution> {
    let mut attempted: HashSet<String> = HashSet::new();
    let mut bodies: BTreeMap<String, FetchedAsset> = BTreeMap::new();
    let mut failures: BTreeMap<String, FetchError> = BTreeMap::new();

    let mut round = 0;
    while round <= settings.max_depth {
        let pending: Vec<(String, String)> = graph
            .assets()
            .filter(|a| !attempted.contains(&a.url))
            .map(|a| (a.url.clone(), a.fetch_url.clone()))
            .collect();
        if pending.is_empty() {
            break;
        }
        tracing::info!("fetch round {round}: {} assets", pending.len());
        attempted.extend(pending.iter().map(|(key, _)| key.clone()));

        let results: Vec<(String, String, Result<FetchedAsset, FetchError>)> =
            stream::iter(pending)
                .map(|(key, fetch_url)| async move {
                    let result = fetcher.fetch(&fetch_url).await;
                    (key, fetch_url, result)
                })
                .buffer_unordered(settings.concurrency.max(1))
                .collect()
                .await;

        for (key, fetch_url, result) in results {
            match result {
                Ok(fetched) => {
                    let scannable = graph
                        .get(&key)
                        .map(|a| a.asset_type)
                        .filter(|t| t.is_scannable());
                    if let (Some(asset_type), true) = (scannable, round < settings.max_depth) {
                        if let Ok(asset_url) = Url::parse(&fetch_url) {
                            let body = String::from_utf8_lossy(&fetched.bytes);
                            let found = discovery::extract_from_body(
                                asset_type, &body, &asset_url, page_base,
                            );
                            let added = graph.extend(&found);
                            if added > 0 {
                                tracing::debug!("{fetch_url}: {added} new references");
                            }
                        }
                    }
                    bodies.insert(key, fetched);
                }
                Err(e) => {
                    tracing::warn!("{}", e.clone().into_mirror_error(&fetch_url));
                    failures.insert(key, e);
                }
            }
        }
        round += 1;
    }

    let mut map = ResolutionMap::new();
    let mut remote = Vec::new();
    let mut claimed = ClaimedPaths::default();
    let mut inlined = 0;
    let mut locals: Vec<(String, String, AssetType, String)> = Vec::new();

    let assets: Vec<_> = graph
        .assets()
        .map(|a| (a.url.clone(), a.fetch_url.clone(), a.asset_type))
        .collect();

    for (key, fetch_url, asset_type) in assets {
        if let Some(fetched) = bodies.get(&key) {
            let Ok(url) = Url::parse(&fetch_url) else { continue };
            let size = fetched.bytes.len() as u64;
            if should_inline(asset_type, size, settings.inline_threshold_bytes) {
                let payload = data_uri(fetched, &url);
                graph.set_inline(&key, payload.clone(), size);
                map.insert(key, Resolved::Inline(payload));
                inlined += 1;
            } else {
                let path = claim_path(urls::local_path(&url, asset_type), &mut claimed);
                graph.set_local(&key, path.clone(), size);
                map.insert(key.clone(), Resolved::Local(path.clone()));
                locals.push((key, fetch_url, asset_type, path));
            }
        } else if let Some(err) = failures.get(&key) {
            map.insert(key, Resolved::Remote(fetch_url.clone()));
            remote.push(RemoteAsset {
                url: fetch_url,
                kind: err.kind,
                reason: err.reason.clone(),
            });
        }
    }

    // Plain files first, so stylesheets are rewritten against a map that
    // already reflects any file that could not be written.
    locals.sort_by_key(|(_, _, asset_type, _)| *asset_type == AssetType::Css);
    let mut downloaded = 0;
    for (key, fetch_url, asset_type, path) in &locals {
        let Some(fetched) = bodies.get(key) else { continue };
        let full = out_dir.join(path);
        let written = match (asset_type, Url::parse(fetch_url)) {
            (AssetType::Css, Ok(css_url)) => {
                let text = String::from_utf8_lossy(&fetched.bytes);
                let rewritten = rewrite_stylesheet(&text, &css_url, path, &map);
                write_asset(&full, rewritten.as_bytes()).await
            }
            _ => write_asset(&full, &fetched.bytes).await,
        };
        match written {
            Ok(()) => downloaded += 1,
            Err(e) => {
                tracing::warn!("cannot write {}: {e}; keeping {fetch_url} remote", full.display());
                graph.clear_local(key);
                map.insert(key.clone(), Resolved::Remote(fetch_url.clone()));
                remote.push(RemoteAsset {
                    url: fetch_url.clone(),
                    kind: FetchFailureKind::Storage,
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        "resolved {} assets: {} downloaded, {} inlined, {} remote",
        graph.len(),
        downloaded,
        inlined,
        remote.len()
    );

    Ok(Resolution {
        graph,
        map,
        downloaded,
        inlined,
        remote,
    })
}
