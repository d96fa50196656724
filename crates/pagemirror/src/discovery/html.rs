//! Markup reference extraction.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::css;
use crate::types::{AssetType, Candidate, Provenance};
use crate::urls;

/// One entry of a `srcset` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcsetEntry {
    pub url: String,
    /// Width or density descriptor, possibly empty.
    pub descriptor: String,
}

/// Split a `srcset` value into its candidates.
///
/// URLs run to the next whitespace, so commas inside a URL (as in `data:`
/// URIs) are kept; a comma directly after a URL ends that candidate.
pub fn parse_srcset(value: &str) -> Vec<SrcsetEntry> {
    let mut entries = Vec::new();
    let mut rest = value;
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() {
            break;
        }
        let url_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let raw_url = &rest[..url_end];
        rest = &rest[url_end..];

        let url = raw_url.trim_end_matches(',');
        if url.len() < raw_url.len() {
            entries.push(SrcsetEntry {
                url: url.to_string(),
                descriptor: String::new(),
            });
            continue;
        }

        let desc_end = descriptor_end(rest);
        let descriptor = rest[..desc_end].split_whitespace().collect::<Vec<_>>().join(" ");
        rest = &rest[desc_end..];
        entries.push(SrcsetEntry {
            url: url.to_string(),
            descriptor,
        });
    }
    entries
}

/// Byte offset of the comma ending a descriptor, ignoring commas in parens.
fn descriptor_end(text: &str) -> usize {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => return i,
            _ => {}
        }
    }
    text.len()
}

/// Serialize srcset entries back to attribute form.
pub fn format_srcset(entries: &[SrcsetEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            if e.descriptor.is_empty() {
                e.url.clone()
            } else {
                format!("{} {}", e.url, e.descriptor)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Base URL for a document's references: `<base href>` if present,
/// resolved against the page URL, otherwise the page URL itself.
pub fn document_base(document: &Html, page_url: &Url) -> Url {
    let Ok(sel) = Selector::parse("base[href]") else {
        return page_url.clone();
    };
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href.trim()).ok())
        .unwrap_or_else(|| page_url.clone())
}

/// Type implied by a preload link's `as` attribute.
fn preload_type(as_attr: Option<&str>, url: &Url) -> AssetType {
    match as_attr.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("style") => AssetType::Css,
        Some("script") | Some("worker") => AssetType::Js,
        Some("font") => AssetType::Font,
        Some("image") => AssetType::Image,
        Some("audio") | Some("video") | Some("track") => AssetType::Media,
        _ => urls::type_from_url(url),
    }
}

/// Extract asset candidates from a DOM snapshot.
pub fn extract_html(markup: &str, page_url: &Url) -> Vec<Candidate> {
    let document = Html::parse_document(markup);
    let base = document_base(&document, page_url);
    let mut found = Vec::new();

    let mut push = |raw: &str, asset_type: AssetType, provenance: Provenance| {
        if let Some(url) = urls::resolve(&base, raw) {
            found.push(Candidate::new(url.as_str(), asset_type, provenance));
        }
    };

    if let Ok(sel) = Selector::parse("link[href]") {
        for el in document.select(&sel) {
            let Some(href) = el.value().attr("href") else { continue };
            let rel = el.value().attr("rel").unwrap_or_default().to_ascii_lowercase();
            let rels: Vec<&str> = rel.split_whitespace().collect();

            if rels.contains(&"stylesheet") {
                push(href, AssetType::Css, Provenance::Html);
            } else if rels.contains(&"modulepreload") {
                push(href, AssetType::Js, Provenance::Preload);
            } else if rels.contains(&"preload") || rels.contains(&"prefetch") {
                if let Some(url) = urls::resolve(&base, href) {
                    let asset_type = preload_type(el.value().attr("as"), &url);
                    push(href, asset_type, Provenance::Preload);
                }
            } else if rels
                .iter()
                .any(|r| *r == "icon" || *r == "apple-touch-icon" || *r == "mask-icon")
            {
                push(href, AssetType::Image, Provenance::Html);
            }
        }
    }

    if let Ok(sel) = Selector::parse("script[src]") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push(src, AssetType::Js, Provenance::Html);
            }
        }
    }

    if let Ok(sel) = Selector::parse("img") {
        for el in document.select(&sel) {
            for attr in ["src", "data-src"] {
                if let Some(v) = el.value().attr(attr) {
                    push(v, AssetType::Image, Provenance::Html);
                }
            }
            for attr in ["srcset", "data-srcset"] {
                if let Some(v) = el.value().attr(attr) {
                    for entry in parse_srcset(v) {
                        push(&entry.url, AssetType::Image, Provenance::Srcset);
                    }
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("video, audio") {
        for el in document.select(&sel) {
            if let Some(src) = el.value().attr("src") {
                push(src, AssetType::Media, Provenance::Html);
            }
            if let Some(poster) = el.value().attr("poster") {
                push(poster, AssetType::Image, Provenance::Html);
            }
        }
    }

    if let Ok(sel) = Selector::parse("source") {
        for el in document.select(&sel) {
            let in_picture = el
                .parent()
                .and_then(ElementRef::wrap)
                .is_some_and(|p| p.value().name() == "picture");
            if let Some(src) = el.value().attr("src") {
                let by_ext = AssetType::from_extension(&urls::extension_of(src));
                let asset_type = if in_picture || by_ext == AssetType::Image {
                    AssetType::Image
                } else {
                    AssetType::Media
                };
                push(src, asset_type, Provenance::Html);
            }
            if let Some(v) = el.value().attr("srcset") {
                for entry in parse_srcset(v) {
                    push(&entry.url, AssetType::Image, Provenance::Srcset);
                }
            }
        }
    }

    if let Ok(sel) = Selector::parse("style") {
        for el in document.select(&sel) {
            let text: String = el.text().collect();
            found.extend(css::extract_css(&text, &base));
        }
    }

    if let Ok(sel) = Selector::parse("[style]") {
        for el in document.select(&sel) {
            if let Some(style) = el.value().attr("style") {
                found.extend(css::extract_css(style, &base));
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://example.com/shop/index.html").unwrap()
    }

    fn urls_with(found: &[Candidate], provenance: Provenance) -> Vec<&str> {
        found
            .iter()
            .filter(|c| c.provenance == provenance)
            .map(|c| c.url.as_str())
            .collect()
    }

    #[test]
    fn test_links_and_scripts() {
        let html = r#"<html><head>
            <link rel="stylesheet" href="/css/site.css">
            <link rel="preload" as="font" href="/fonts/inter.woff2" crossorigin>
            <link rel="modulepreload" href="./app.mjs">
            <link rel="icon" href="favicon.ico">
            <link rel="canonical" href="https://example.com/shop/">
            <script src="https://cdn.example.net/lib.js"></script>
            <script>var inline = 1;</script>
        </head><body></body></html>"#;
        let found = extract_html(html, &page());

        assert_eq!(found.len(), 5);
        assert_eq!(found[0].asset_type, AssetType::Css);
        assert_eq!(found[1].asset_type, AssetType::Font);
        assert_eq!(found[1].provenance, Provenance::Preload);
        assert_eq!(found[2].url, "https://example.com/shop/app.mjs");
        assert_eq!(found[2].asset_type, AssetType::Js);
        assert_eq!(found[3].asset_type, AssetType::Image);
        assert_eq!(found[4].url, "https://cdn.example.net/lib.js");
    }

    #[test]
    fn test_images_srcset_and_media() {
        let html = r#"<body>
            <img src="a.png" srcset="a.png 1x, b.png 2x" data-src="lazy.jpg">
            <picture><source srcset="hero.avif" type="image/avif"><img src="hero.jpg"></picture>
            <video src="clip.mp4" poster="poster.jpg"><source src="clip.webm"></video>
            <img src="data:image/gif;base64,R0lGOD">
        </body>"#;
        let found = extract_html(html, &page());

        let srcset = urls_with(&found, Provenance::Srcset);
        assert_eq!(
            srcset,
            vec![
                "https://example.com/shop/a.png",
                "https://example.com/shop/b.png",
                "https://example.com/shop/hero.avif",
            ]
        );

        let media: Vec<_> = found
            .iter()
            .filter(|c| c.asset_type == AssetType::Media)
            .map(|c| c.url.as_str())
            .collect();
        assert_eq!(
            media,
            vec![
                "https://example.com/shop/clip.mp4",
                "https://example.com/shop/clip.webm"
            ]
        );
        assert!(found.iter().all(|c| !c.url.starts_with("data:")));
        assert!(found
            .iter()
            .any(|c| c.url.ends_with("poster.jpg") && c.asset_type == AssetType::Image));
    }

    #[test]
    fn test_inline_style_and_base_href() {
        let html = r#"<html><head>
            <base href="https://static.example.com/v2/">
            <style>@import url("theme.css"); body { background: url(bg.png); }</style>
        </head><body><div style="background-image:url('tile.gif')"></div></body></html>"#;
        let found = extract_html(html, &page());

        assert_eq!(
            urls_with(&found, Provenance::CssImport),
            vec!["https://static.example.com/v2/theme.css"]
        );
        assert_eq!(
            urls_with(&found, Provenance::CssUrl),
            vec![
                "https://static.example.com/v2/bg.png",
                "https://static.example.com/v2/tile.gif"
            ]
        );
    }

    #[test]
    fn test_parse_srcset_descriptors() {
        let entries = parse_srcset("small.jpg 480w,  large.jpg 1080w, plain.jpg");
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].url, "large.jpg");
        assert_eq!(entries[1].descriptor, "1080w");
        assert_eq!(entries[2].descriptor, "");
        assert_eq!(
            format_srcset(&entries),
            "small.jpg 480w, large.jpg 1080w, plain.jpg"
        );
    }

    #[test]
    fn test_parse_srcset_keeps_commas_inside_urls() {
        let entries = parse_srcset("data:image/png;base64,AAAA 1x, b.png, c.png 2x");
        let urls: Vec<_> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["data:image/png;base64,AAAA", "b.png", "c.png"]);
        assert_eq!(entries[0].descriptor, "1x");
        assert_eq!(entries[1].descriptor, "");
    }
}
