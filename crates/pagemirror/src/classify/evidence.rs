//! Usage evidence gathered from a produced mirror.
//!
//! Static evidence re-runs the candidate extractors over the entry document
//! and the local stylesheets and scripts it reaches. Runtime evidence maps
//! the URLs a browser requested from the served mirror back to file paths.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::discovery;
use crate::types::{AssetType, Candidate, CapturePassResult, MirrorError, MirrorResult};
use crate::urls;

/// Origin used to resolve references when the mirror is not being served.
pub const STATIC_ORIGIN: &str = "http://mirror.invalid/";

/// Normalize a path for comparison with the inventory.
///
/// Strips leading `/` and `./`, percent-decodes, collapses `.`/`..`
/// segments, and maps a directory reference to its `index.html`.
pub fn normalize_evidence_path(raw: &str) -> String {
    let raw = raw.split(['?', '#']).next().unwrap_or_default();
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let mut parts: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if decoded.is_empty() || decoded.ends_with('/') {
        parts.push("index.html");
    }
    parts.join("/")
}

/// Mirror path of `url` when it is served from `origin`.
pub fn mirror_path(url: &Url, origin: &Url) -> Option<String> {
    if url.scheme() != origin.scheme()
        || url.host_str() != origin.host_str()
        || url.port_or_known_default() != origin.port_or_known_default()
    {
        return None;
    }
    Some(normalize_evidence_path(url.path()))
}

/// Everything known about which mirror files are used.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    /// Paths referenced by the entry document and local CSS/JS.
    pub static_paths: BTreeSet<String>,
    /// Paths requested by a browser rendering the served mirror.
    pub runtime_paths: BTreeSet<String>,
    /// Paths each viewport pass observed, DOM and network combined.
    pub viewport_paths: BTreeMap<String, BTreeSet<String>>,
    pub console_errors: Vec<String>,
    pub network_requests: usize,
    /// Whether a runtime capture actually contributed.
    pub runtime_collected: bool,
    /// Candidates behind `static_paths` and `runtime_paths`.
    pub candidates: Vec<Candidate>,
}

impl Evidence {
    /// Union of static and runtime paths.
    pub fn referenced(&self) -> BTreeSet<String> {
        self.static_paths
            .union(&self.runtime_paths)
            .cloned()
            .collect()
    }
}

/// Scan the entry document and every local stylesheet or script it
/// transitively references.
///
/// `origin` is the URL the mirror root is (or would be) served at.
pub async fn collect_static(
    root: &Path,
    entry_document: &str,
    origin: &Url,
) -> MirrorResult<(BTreeSet<String>, Vec<Candidate>)> {
    let entry_path = root.join(entry_document);
    let markup = match tokio::fs::read(&entry_path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MirrorError::EntryDocumentMissing(entry_path));
        }
        Err(e) => return Err(e.into()),
    };
    let entry_url = origin
        .join(entry_document)
        .map_err(|e| MirrorError::InvalidUrl(format!("{entry_document}: {e}")))?;

    let mut paths = BTreeSet::new();
    let mut all = Vec::new();
    let mut queue: VecDeque<Candidate> = discovery::extract_html(&markup, &entry_url).into();
    let mut scanned: BTreeSet<String> = BTreeSet::new();

    while let Some(candidate) = queue.pop_front() {
        let Ok(url) = Url::parse(&candidate.url) else {
            continue;
        };
        if let Some(path) = mirror_path(&url, origin) {
            paths.insert(path.clone());

            if let Some(asset_type) = scannable_type(&candidate, &path) {
                if scanned.insert(path.clone()) {
                    match tokio::fs::read(root.join(&path)).await {
                        Ok(bytes) => {
                            let body = String::from_utf8_lossy(&bytes);
                            queue.extend(discovery::extract_from_body(
                                asset_type, &body, &url, &entry_url,
                            ));
                        }
                        Err(e) => tracing::debug!("cannot read {path}: {e}"),
                    }
                }
            }
        }
        all.push(candidate);
    }

    tracing::debug!("static evidence: {} paths", paths.len());
    Ok((paths, all))
}

fn scannable_type(candidate: &Candidate, path: &str) -> Option<AssetType> {
    if candidate.asset_type.is_scannable() {
        return Some(candidate.asset_type);
    }
    Some(AssetType::from_extension(&urls::extension_of(path))).filter(|t| t.is_scannable())
}

/// Fold runtime capture passes of the served mirror into `evidence`.
///
/// `page_url` is the served entry document; `origin` is the server root.
pub fn absorb_passes(
    evidence: &mut Evidence,
    passes: &[CapturePassResult],
    page_url: &Url,
    origin: &Url,
) {
    for pass in passes {
        let label = pass.viewport.label.clone();
        let seen = evidence.viewport_paths.entry(label.clone()).or_default();

        for raw in pass.observed_urls() {
            let Some(candidate) = discovery::network_candidate(raw) else {
                continue;
            };
            if let Some(path) = Url::parse(&candidate.url)
                .ok()
                .and_then(|u| mirror_path(&u, origin))
            {
                evidence.runtime_paths.insert(path.clone());
                seen.insert(path);
            }
            evidence.candidates.push(candidate);
        }

        if pass.navigated() {
            // Script-inserted or lazy elements may never be fetched.
            for c in discovery::extract_html(&pass.markup, page_url) {
                if let Some(path) = Url::parse(&c.url).ok().and_then(|u| mirror_path(&u, origin)) {
                    evidence.runtime_paths.insert(path.clone());
                    seen.insert(path);
                }
                evidence.candidates.push(c);
            }
            evidence.runtime_collected = true;
        }

        evidence.network_requests += pass.network_requests.len();
        evidence.console_errors.extend(
            pass.console_errors
                .iter()
                .map(|e| format!("[{label}] {e}")),
        );
    }
}
