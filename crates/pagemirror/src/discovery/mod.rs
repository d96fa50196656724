//! Static candidate extraction from markup, stylesheets, and scripts.
//!
//! All three scanners are best-effort static evidence. They feed an
//! [`AssetGraph`], which deduplicates by normalized URL and merges the
//! provenance of repeated references.

pub mod css;
pub mod graph;
pub mod html;
pub mod js;

pub use css::{css_references, extract_css, rewrite_css, CssRefKind, CssReference};
pub use graph::{network_candidate, AssetGraph, DependencyGraphDocument, GraphNode};
pub use html::{document_base, extract_html, format_srcset, parse_srcset, SrcsetEntry};
pub use js::extract_js;

use url::Url;

use crate::types::{AssetType, Candidate};

/// Scan a downloaded body according to its type.
///
/// Stylesheets resolve against their own URL. Scripts resolve module
/// specifiers against their own URL and asset strings against `page_base`.
pub fn extract_from_body(
    asset_type: AssetType,
    body: &str,
    asset_url: &Url,
    page_base: &Url,
) -> Vec<Candidate> {
    match asset_type {
        AssetType::Css => extract_css(body, asset_url),
        AssetType::Js => extract_js(body, asset_url, page_base),
        _ => Vec::new(),
    }
}
