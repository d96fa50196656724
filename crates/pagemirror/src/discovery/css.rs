//! Stylesheet reference scanner.
//!
//! Regex-based and best-effort: finds `@import` targets and `url(...)`
//! references without parsing the stylesheet.

use std::ops::Range;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

use crate::types::{AssetType, Candidate, Provenance};
use crate::urls;

/// How a stylesheet refers to another resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CssRefKind {
    Import,
    Url,
}

/// One raw reference and the byte range of its URL text in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CssReference {
    pub kind: CssRefKind,
    pub raw: String,
    pub range: Range<usize>,
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"@import\s+(?:url\(\s*)?(?:"([^"]+)"|'([^']+)'|([^"'\s;)]+))\s*\)?"#,
        )
        .expect("import regex is valid")
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"url\(\s*(?:"([^"]*)"|'([^']*)'|([^)"'\s]*))\s*\)"#)
            .expect("css url regex is valid")
    })
}

/// All `@import` and `url(...)` references in source order.
///
/// A `url(...)` inside an `@import` is reported once, as the import.
pub fn css_references(css: &str) -> Vec<CssReference> {
    let mut refs = Vec::new();
    let mut import_spans: Vec<Range<usize>> = Vec::new();

    for caps in import_regex().captures_iter(css) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
        if let Some(m) = caps.get(1).or(caps.get(2)).or(caps.get(3)) {
            refs.push(CssReference {
                kind: CssRefKind::Import,
                raw: m.as_str().to_string(),
                range: m.range(),
            });
        }
        import_spans.push(whole);
    }

    for caps in url_regex().captures_iter(css) {
        let start = caps.get(0).map(|m| m.start()).unwrap_or_default();
        if import_spans.iter().any(|span| span.contains(&start)) {
            continue;
        }
        if let Some(m) = caps.get(1).or(caps.get(2)).or(caps.get(3)) {
            if m.as_str().trim().is_empty() {
                continue;
            }
            refs.push(CssReference {
                kind: CssRefKind::Url,
                raw: m.as_str().to_string(),
                range: m.range(),
            });
        }
    }

    refs.sort_by_key(|r| r.range.start);
    refs
}

/// Extract asset candidates from stylesheet text.
///
/// References resolve against `base`, which is the stylesheet's own URL for
/// downloaded files and the document base for inline `<style>` blocks.
pub fn extract_css(css: &str, base: &Url) -> Vec<Candidate> {
    css_references(css)
        .into_iter()
        .filter_map(|r| {
            let url = urls::resolve(base, &r.raw)?;
            let candidate = match r.kind {
                CssRefKind::Import => {
                    Candidate::new(url.as_str(), AssetType::Css, Provenance::CssImport)
                }
                CssRefKind::Url => {
                    let asset_type = match urls::type_from_url(&url) {
                        t @ (AssetType::Font | AssetType::Image | AssetType::Css) => t,
                        _ => AssetType::Other,
                    };
                    Candidate::new(url.as_str(), asset_type, Provenance::CssUrl)
                }
            };
            Some(candidate)
        })
        .collect()
}

/// Replace each reference for which `map` returns a value.
pub fn rewrite_css<F>(css: &str, mut map: F) -> String
where
    F: FnMut(&CssReference) -> Option<String>,
{
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for r in css_references(css) {
        if let Some(replacement) = map(&r) {
            out.push_str(&css[last..r.range.start]);
            out.push_str(&replacement);
            last = r.range.end;
        }
    }
    out.push_str(&css[last..]);
    out
}
