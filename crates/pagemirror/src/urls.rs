//! URL resolution, identity normalization, and local path mapping.

use percent_encoding::percent_decode_str;
use url::Url;

use crate::types::AssetType;

/// Reference prefixes that never name a fetchable resource.
const EXCLUDED_PREFIXES: &[&str] = &[
    "data:",
    "blob:",
    "javascript:",
    "mailto:",
    "tel:",
    "about:",
];

/// Whether a raw reference is skipped by discovery outright.
pub fn is_excluded(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    EXCLUDED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Resolve a raw reference against a base URL.
///
/// Protocol-relative references (`//host/x`) inherit the base scheme. Only
/// http(s) results are returned.
pub fn resolve(base: &Url, raw: &str) -> Option<Url> {
    if is_excluded(raw) {
        return None;
    }
    let joined = base.join(raw.trim()).ok()?;
    matches!(joined.scheme(), "http" | "https").then_some(joined)
}

/// Identity form of a URL: query and fragment stripped.
///
/// Scheme and host are already lowercased and default ports dropped by
/// the parser.
pub fn normalize(url: &Url) -> String {
    let mut identity = url.clone();
    identity.set_query(None);
    identity.set_fragment(None);
    identity.to_string()
}

/// Parse and normalize an absolute URL string.
pub fn normalize_str(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().map(|u| normalize(&u))
}

/// Path under the mirror root where an asset of `asset_type` is stored.
///
/// Layout: `assets/<type dir>/<host>/<url path>`. A path ending in `/`
/// maps to an implicit index file.
pub fn local_path(url: &Url, asset_type: AssetType) -> String {
    let host = match (url.host_str(), url.port()) {
        (Some(h), Some(p)) => format!("{h}_{p}"),
        (Some(h), None) => h.to_string(),
        (None, _) => "unknown-host".to_string(),
    };

    let mut segments: Vec<String> = url
        .path_segments()
        .map(|parts| {
            parts
                .filter(|s| !s.is_empty())
                .map(sanitize_segment)
                .collect()
        })
        .unwrap_or_default();

    if url.path().ends_with('/') || segments.is_empty() {
        segments.push(implicit_index(asset_type).to_string());
    }

    format!(
        "assets/{}/{}/{}",
        asset_type.dir_name(),
        sanitize_segment(&host),
        segments.join("/")
    )
}

fn implicit_index(asset_type: AssetType) -> &'static str {
    match asset_type {
        AssetType::Css => "index.css",
        AssetType::Js => "index.js",
        _ => "index.html",
    }
}

/// Percent-decode a path segment and replace anything outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_segment(segment: &str) -> String {
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    let cleaned: String = decoded
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Relative reference from one mirror file to another.
///
/// Both arguments are `/`-separated paths relative to the mirror root.
pub fn relative_path(from_file: &str, to_file: &str) -> String {
    let from_dir: Vec<&str> = match from_file.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let to: Vec<&str> = to_file.split('/').collect();
    let to_dir = &to[..to.len().saturating_sub(1)];

    let common = from_dir
        .iter()
        .zip(to_dir.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend_from_slice(&to[common..]);
    parts.join("/")
}

/// Lowercase extension of the last path segment, ignoring query and fragment.
pub fn extension_of(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() || !ext.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Guess the asset type of a URL from its path extension.
pub fn type_from_url(url: &Url) -> AssetType {
    AssetType::from_extension(&extension_of(url.path()))
}
