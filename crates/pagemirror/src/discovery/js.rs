//! Script reference scanner.
//!
//! Pattern matching over script text, not a parse. It finds static
//! `import`/`export ... from` specifiers, dynamic `import()` calls, and string
//! literals that end in an asset-like extension. Computed or templated paths
//! are invisible to it, and incidental strings can over-match; runtime
//! capture covers what this misses.

use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::types::{AssetType, Candidate, Provenance};
use crate::urls;

/// Scripts larger than this are not scanned (5 MB).
pub const MAX_SCRIPT_SIZE: usize = 5 * 1024 * 1024;

fn static_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?:^|[^\w$.])(?:import|export)\s*(?:[\w*${}\s,]+?\s*from\s*)?["']([^"'\n]+)["']"#,
        )
        .expect("static import regex is valid")
    })
}

fn dynamic_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\bimport\s*\(\s*["'`]([^"'`\n]+)["'`]\s*\)"#)
            .expect("dynamic import regex is valid")
    })
}

fn asset_string_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"["'`]([^"'`\s<>()]+?\.(?:png|jpe?g|gif|webp|avif|svg|ico|woff2?|ttf|otf|eot|css|m?js|mp4|webm|mp3|ogg)(?:\?[^"'`\s]*)?)["'`]"#,
        )
        .expect("asset string regex is valid")
    })
}

/// Whether a module specifier names a package rather than a path.
fn is_bare_specifier(spec: &str) -> bool {
    !(spec.starts_with("./")
        || spec.starts_with("../")
        || spec.starts_with('/')
        || spec.starts_with("http://")
        || spec.starts_with("https://"))
}

/// Extract asset candidates from script text.
///
/// Module specifiers resolve against the script's own URL, as the browser
/// does. Relative asset strings resolve against `page_base`, since scripts
/// usually hand them to the document (image `src`, `fetch`, ...).
pub fn extract_js(js: &str, script_url: &Url, page_base: &Url) -> Vec<Candidate> {
    if js.len() > MAX_SCRIPT_SIZE {
        tracing::debug!("skipping oversized script {script_url}");
        return Vec::new();
    }

    let mut found = Vec::new();
    let mut specifier_spans = Vec::new();

    let specifiers: Vec<_> = static_import_regex()
        .captures_iter(js)
        .chain(dynamic_import_regex().captures_iter(js))
        .filter_map(|caps| caps.get(1))
        .collect();

    for m in specifiers {
        specifier_spans.push(m.range());
        let spec = m.as_str().trim();
        if spec.contains("${") || is_bare_specifier(spec) {
            continue;
        }
        if let Some(url) = urls::resolve(script_url, spec) {
            let asset_type = match urls::type_from_url(&url) {
                AssetType::Other => AssetType::Js,
                t => t,
            };
            found.push(Candidate::new(url.as_str(), asset_type, Provenance::JsImport));
        }
    }

    for caps in asset_string_regex().captures_iter(js) {
        let Some(m) = caps.get(1) else { continue };
        if specifier_spans.iter().any(|span| span.contains(&m.start())) {
            continue;
        }
        let raw = m.as_str();
        if raw.contains("${") || raw.contains('\\') {
            continue;
        }
        let base = if raw.starts_with('/') || raw.contains("://") {
            script_url
        } else {
            page_base
        };
        if let Some(url) = urls::resolve(base, raw) {
            let asset_type = urls::type_from_url(&url);
            found.push(Candidate::new(url.as_str(), asset_type, Provenance::JsString));
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script() -> Url {
        Url::parse("https://example.com/static/js/app.js").unwrap()
    }

    fn page() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    #[test]
    fn test_static_and_dynamic_imports() {
        let js = r#"
            import { a } from "./chunk-a.js";
            import * as b from '../vendor/b.mjs';
            export * from "./re-export.js";
            import "./side-effect.js";
            import React from "react";
            const lazy = () => import('./lazy.js');
        "#;
        let found: Vec<_> = extract_js(js, &script(), &page())
            .into_iter()
            .filter(|c| c.provenance == Provenance::JsImport)
            .map(|c| c.url)
            .collect();
        assert!(found.contains(&"https://example.com/static/js/chunk-a.js".to_string()));
        assert!(found.contains(&"https://example.com/static/vendor/b.mjs".to_string()));
        assert!(found.contains(&"https://example.com/static/js/re-export.js".to_string()));
        assert!(found.contains(&"https://example.com/static/js/side-effect.js".to_string()));
        assert!(found.contains(&"https://example.com/static/js/lazy.js".to_string()));
        assert!(!found.iter().any(|u| u.contains("react")));
    }

    #[test]
    fn test_asset_strings() {
        let js = r#"
            img.src = "images/banner.webp";
            const icon = '/icons/star.svg?v=3';
            const tpl = `img/${name}.png`;
            const notAsset = "hello.world";
        "#;
        let found = extract_js(js, &script(), &page());
        let strings: Vec<_> = found
            .iter()
            .filter(|c| c.provenance == Provenance::JsString)
            .collect();
        assert_eq!(strings.len(), 2);
        assert_eq!(strings[0].url, "https://example.com/images/banner.webp");
        assert_eq!(strings[0].asset_type, AssetType::Image);
        assert_eq!(strings[1].url, "https://example.com/icons/star.svg?v=3");
    }
}
