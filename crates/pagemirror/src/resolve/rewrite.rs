//! Reference rewriting for documents and stylesheets.
//!
//! The document rewriter is a small tag scanner rather than a DOM
//! round-trip, so bytes outside rewritten attribute values are preserved
//! exactly. That keeps a second pass with the same map byte-identical.

use std::collections::HashSet;

use url::Url;

use super::ResolutionMap;
use crate::discovery::{self, css, SrcsetEntry};
use crate::types::Resolved;
use crate::urls;

/// Attributes holding a single URL.
const URL_ATTRS: &[&str] = &["href", "src", "data-src", "poster"];

/// Attributes holding a srcset list.
const SRCSET_ATTRS: &[&str] = &["srcset", "data-srcset"];

/// Elements whose content is raw text, not markup.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title", "xmp"];

/// A reference after rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rewritten {
    value: String,
    /// Points into the mirror (local file or inline payload).
    localized: bool,
}

/// Resolution state for rewriting references inside one file.
pub struct RewriteContext<'a> {
    base: Url,
    map: &'a ResolutionMap,
    from_file: String,
    /// Values that are already rewritten targets and must be left alone.
    targets: HashSet<String>,
}

impl<'a> RewriteContext<'a> {
    /// `from_file` is the rewritten file's path relative to the mirror root.
    pub fn new(base: Url, map: &'a ResolutionMap, from_file: &str) -> Self {
        let targets = map
            .values()
            .filter_map(|r| match r {
                Resolved::Local(p) => Some(urls::relative_path(from_file, p)),
                Resolved::Inline(_) => None,
                Resolved::Remote(u) => Some(u.clone()),
            })
            .collect();
        Self {
            base,
            map,
            from_file: from_file.to_string(),
            targets,
        }
    }

    /// New value for a raw reference, or `None` to leave it untouched.
    fn rewrite_reference(&self, raw: &str) -> Option<Rewritten> {
        let trimmed = raw.trim();
        let without_fragment = trimmed.split_once('#').map_or(trimmed, |(head, _)| head);
        if urls::is_excluded(trimmed) || self.targets.contains(without_fragment) {
            return None;
        }
        let url = urls::resolve(&self.base, trimmed)?;
        let rewritten = match self.map.get(&urls::normalize(&url)) {
            Some(Resolved::Local(path)) => {
                let mut value = urls::relative_path(&self.from_file, path);
                if let Some(fragment) = url.fragment() {
                    value.push('#');
                    value.push_str(fragment);
                }
                Rewritten {
                    value,
                    localized: true,
                }
            }
            Some(Resolved::Inline(payload)) => Rewritten {
                value: payload.clone(),
                localized: true,
            },
            // Remote or unknown: the reference's own absolute form, so it
            // still works once the document no longer lives at its origin.
            Some(Resolved::Remote(_)) | None => Rewritten {
                value: url.to_string(),
                localized: false,
            },
        };
        (rewritten.value != trimmed).then_some(rewritten)
    }

    fn rewrite_srcset(&self, value: &str) -> Option<Rewritten> {
        let mut entries = discovery::parse_srcset(value);
        let mut changed = false;
        let mut localized = false;
        for entry in &mut entries {
            if let Some(r) = self.rewrite_reference(&entry.url) {
                *entry = SrcsetEntry {
                    url: r.value,
                    descriptor: std::mem::take(&mut entry.descriptor),
                };
                changed = true;
                localized |= r.localized;
            }
        }
        changed.then(|| Rewritten {
            value: discovery::format_srcset(&entries),
            localized,
        })
    }

    /// Rewrite `@import` and `url(...)` references in stylesheet text.
    pub fn rewrite_css(&self, text: &str) -> String {
        css::rewrite_css(text, |r| self.rewrite_reference(&r.raw).map(|x| x.value))
    }
}

/// Rewrite every URL-bearing attribute and inline style in a document.
///
/// `<base>` elements are dropped (their href is honored while resolving),
/// and `integrity` is removed from any element whose reference now points
/// into the mirror.
pub fn rewrite_document(
    markup: &str,
    page_url: &Url,
    map: &ResolutionMap,
    doc_path: &str,
) -> String {
    let parsed = scraper::Html::parse_document(markup);
    let base = discovery::document_base(&parsed, page_url);
    let ctx = RewriteContext::new(base, map, doc_path);
    rewrite_html(markup, &ctx)
}

/// Rewrite a downloaded stylesheet stored at `css_path` in the mirror.
pub fn rewrite_stylesheet(
    css_text: &str,
    css_url: &Url,
    css_path: &str,
    map: &ResolutionMap,
) -> String {
    RewriteContext::new(css_url.clone(), map, css_path).rewrite_css(css_text)
}

// ── Tag scanner ─────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Attr {
    name: String,
    /// Start of the whitespace preceding the attribute.
    full_start: usize,
    full_end: usize,
    /// Decoded value and the span of the value including its quotes.
    value: Option<(String, usize, usize)>,
}

#[derive(Debug)]
struct StartTag {
    name: String,
    start: usize,
    end: usize,
    self_closing: bool,
    attrs: Vec<Attr>,
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0c)
}

fn parse_start_tag(markup: &str, start: usize) -> Option<StartTag> {
    let bytes = markup.as_bytes();
    let mut i = start + 1;
    if !bytes.get(i)?.is_ascii_alphabetic() {
        return None;
    }
    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'-' | b':')) {
        i += 1;
    }
    let name = markup[name_start..i].to_ascii_lowercase();
    let mut attrs = Vec::new();

    loop {
        let ws_start = i;
        while i < bytes.len() && is_space(bytes[i]) {
            i += 1;
        }
        match *bytes.get(i)? {
            b'>' => {
                return Some(StartTag {
                    name,
                    start,
                    end: i + 1,
                    self_closing: false,
                    attrs,
                })
            }
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                return Some(StartTag {
                    name,
                    start,
                    end: i + 2,
                    self_closing: true,
                    attrs,
                })
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let attr_start = i;
        while i < bytes.len() && !is_space(bytes[i]) && !matches!(bytes[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        if i == attr_start {
            i += 1;
            continue;
        }
        let attr_name = markup[attr_start..i].to_ascii_lowercase();

        let mut j = i;
        while j < bytes.len() && is_space(bytes[j]) {
            j += 1;
        }
        let mut value = None;
        if bytes.get(j) == Some(&b'=') {
            j += 1;
            while j < bytes.len() && is_space(bytes[j]) {
                j += 1;
            }
            let value_start = j;
            match *bytes.get(j)? {
                q @ (b'"' | b'\'') => {
                    let close = markup[j + 1..].find(q as char)? + j + 1;
                    value = Some((decode_entities(&markup[j + 1..close]), value_start, close + 1));
                    j = close + 1;
                }
                _ => {
                    while j < bytes.len() && !is_space(bytes[j]) && bytes[j] != b'>' {
                        j += 1;
                    }
                    value = Some((decode_entities(&markup[value_start..j]), value_start, j));
                }
            }
            i = j;
        }

        attrs.push(Attr {
            name: attr_name,
            full_start: ws_start,
            full_end: i,
            value,
        });
    }
}

fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn encode_attr(value: &str) -> String {
    format!("\"{}\"", value.replace('&', "&amp;").replace('"', "&quot;"))
}

/// Rewritten text of one start tag, or `None` if the tag is dropped.
fn rewrite_tag(markup: &str, tag: &StartTag, ctx: &RewriteContext<'_>) -> Option<String> {
    if tag.name == "base" {
        return None;
    }

    let mut edits: Vec<(usize, usize, String)> = Vec::new();
    let mut localized = false;

    for attr in &tag.attrs {
        let Some((value, vstart, vend)) = &attr.value else { continue };
        let name = attr.name.as_str();
        let rewritten = if URL_ATTRS.contains(&name) {
            ctx.rewrite_reference(value)
        } else if SRCSET_ATTRS.contains(&name) {
            ctx.rewrite_srcset(value)
        } else if name == "style" {
            let css_text = ctx.rewrite_css(value);
            (css_text != *value).then_some(Rewritten {
                value: css_text,
                localized: false,
            })
        } else {
            None
        };
        if let Some(r) = rewritten {
            localized |= r.localized;
            edits.push((*vstart, *vend, encode_attr(&r.value)));
        }
    }

    if localized {
        for attr in tag.attrs.iter().filter(|a| a.name == "integrity") {
            edits.push((attr.full_start, attr.full_end, String::new()));
        }
    }

    let mut out = String::with_capacity(tag.end - tag.start);
    let mut last = tag.start;
    edits.sort_by_key(|(start, _, _)| *start);
    for (start, end, replacement) in edits {
        out.push_str(&markup[last..start]);
        out.push_str(&replacement);
        last = end;
    }
    out.push_str(&markup[last..tag.end]);
    Some(out)
}

/// Offset of the `</name` closing a raw-text element, matched without
/// regard to case. `name` is lowercase.
fn find_closing_tag(markup: &str, from: usize, name: &str) -> usize {
    let needle = format!("</{name}");
    let needle = needle.as_bytes();
    markup.as_bytes()[from..]
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|pos| from + pos)
        .unwrap_or(markup.len())
}

fn rewrite_html(markup: &str, ctx: &RewriteContext<'_>) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut i = 0;

    while let Some(rel) = markup[i..].find('<') {
        let lt = i + rel;
        out.push_str(&markup[i..lt]);
        let rest = &markup[lt..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|e| lt + e + 3).unwrap_or(markup.len());
            out.push_str(&markup[lt..end]);
            i = end;
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") || rest.starts_with("</") {
            let end = rest.find('>').map(|e| lt + e + 1).unwrap_or(markup.len());
            out.push_str(&markup[lt..end]);
            i = end;
            continue;
        }

        let Some(tag) = parse_start_tag(markup, lt) else {
            out.push('<');
            i = lt + 1;
            continue;
        };

        if let Some(text) = rewrite_tag(markup, &tag, ctx) {
            out.push_str(&text);
        }
        i = tag.end;

        if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
            let close = find_closing_tag(markup, i, &tag.name);
            let content = &markup[i..close];
            if tag.name == "style" {
                out.push_str(&ctx.rewrite_css(content));
            } else {
                out.push_str(content);
            }
            i = close;
        }
    }

    out.push_str(&markup[i..]);
    out
}
