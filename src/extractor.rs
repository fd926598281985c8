//! Link extraction from fetched bodies.
//!
//! Output is a pure function of (body, content-type, base URL): the crawler
//! relies on that to keep the graph identical across concurrent orderings.
//! Only same-origin targets are kept; everything else is a leaf the mirror
//! does not own.

use crate::url_policy::PathPolicy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::OnceLock;
use url::Url;

const EXCLUDED_SCHEMES: &[&str] = &["mailto:", "tel:", "javascript:", "data:"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "avi", "mkv"];

fn css_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"url\(([^)]+)\)").expect("valid regex"))
}

/// Same-origin targets of one parsed document, partitioned by kind.
#[derive(Debug, Default, PartialEq)]
pub struct ExtractedLinks {
    /// HTML-like destinations a reader could navigate to.
    pub links: Vec<String>,
    /// Assets fetched alongside the document.
    pub resources: Vec<String>,
}

/// Extension of the last path segment of a normalized URL, if any.
fn extension(url: &str) -> Option<String> {
    let path = Url::parse(url).ok()?.path().to_string();
    let segment = path.rsplit('/').next()?.to_string();
    let dot = segment.rfind('.')?;
    Some(segment[dot + 1..].to_ascii_lowercase())
}

/// A target is a hyperlink when it has no extension or an `.html` one.
pub fn is_hyperlink(url: &str) -> bool {
    match extension(url) {
        None => true,
        Some(ext) => ext == "html",
    }
}

/// Ordered, deduplicating accumulator for edge targets.
#[derive(Default)]
struct TargetSet {
    seen: HashSet<String>,
    links: Vec<String>,
    resources: Vec<String>,
}

impl TargetSet {
    fn add(&mut self, url: String) {
        if !self.seen.insert(url.clone()) {
            return;
        }
        if is_hyperlink(&url) {
            self.links.push(url);
        } else {
            // The CMS renders a poster image next to every uploaded video;
            // nothing in the HTML links it, so derive it here.
            let thumb = video_thumbnail(&url);
            self.resources.push(url);
            if let Some(thumb) = thumb {
                if self.seen.insert(thumb.clone()) {
                    self.resources.push(thumb);
                }
            }
        }
    }

    fn finish(self) -> ExtractedLinks {
        ExtractedLinks {
            links: self.links,
            resources: self.resources,
        }
    }
}

/// `clip.mp4` -> `clip_thumb.jpg`, at the same path.
fn video_thumbnail(url: &str) -> Option<String> {
    let ext = extension(url)?;
    if !VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    let mut u = Url::parse(url).ok()?;
    let path = u.path().to_string();
    let dot = path.rfind('.')?;
    u.set_path(&format!("{}_thumb.jpg", &path[..dot]));
    u.set_query(None);
    Some(u.to_string())
}

fn excluded_scheme(raw: &str) -> bool {
    let lower = raw.trim().to_ascii_lowercase();
    lower.starts_with('#') || EXCLUDED_SCHEMES.iter().any(|s| lower.starts_with(s))
}

/// True when the element sits inside markup whose URLs are illustrative,
/// not navigational: code samples and text areas.
fn inside_literal_block(el: &ElementRef) -> bool {
    el.ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| matches!(a.value().name(), "pre" | "code" | "textarea"))
}

/// Scan an HTML document for `href`, `src`, and `srcset` targets.
pub fn extract_html(html: &str, page_url: &Url, policy: &PathPolicy) -> ExtractedLinks {
    let document = Html::parse_document(html);

    // Honor <base href> the way browsers do.
    let base_selector = Selector::parse("base[href]").expect("valid selector");
    let base_url = document
        .select(&base_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| page_url.join(href).ok())
        .unwrap_or_else(|| page_url.clone());

    let mut raw_targets: Vec<String> = Vec::new();
    for attr in ["href", "src"] {
        let selector = Selector::parse(&format!("[{}]", attr)).expect("valid selector");
        for el in document.select(&selector) {
            if inside_literal_block(&el) {
                continue;
            }
            if let Some(value) = el.value().attr(attr) {
                raw_targets.push(value.to_string());
            }
        }
    }

    let srcset_selector = Selector::parse("[srcset]").expect("valid selector");
    for el in document.select(&srcset_selector) {
        if inside_literal_block(&el) {
            continue;
        }
        if let Some(srcset) = el.value().attr("srcset") {
            // Each comma-separated candidate is "<url> <descriptor>?".
            for candidate in srcset.split(',') {
                if let Some(url) = candidate.split_whitespace().next() {
                    raw_targets.push(url.to_string());
                }
            }
        }
    }

    let mut targets = TargetSet::default();
    for raw in raw_targets {
        let raw = raw.trim();
        if raw.is_empty() || excluded_scheme(raw) {
            continue;
        }
        let Ok(resolved) = base_url.join(raw) else {
            continue;
        };
        if let Some(normalized) = policy.normalize_str(resolved.as_str()) {
            targets.add(normalized);
        }
    }
    targets.finish()
}

/// Scan a stylesheet for `url(...)` references. All targets are subresources.
pub fn extract_css(css: &str, sheet_url: &Url, policy: &PathPolicy) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut resources = Vec::new();

    for caps in css_url_re().captures_iter(css) {
        let raw = caps
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or("")
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        if raw.is_empty() || excluded_scheme(raw) {
            continue;
        }
        let Ok(resolved) = sheet_url.join(raw) else {
            continue;
        };
        if let Some(normalized) = policy.normalize_str(resolved.as_str()) {
            if seen.insert(normalized.clone()) {
                resources.push(normalized);
            }
        }
    }

    resources
}

/// All `<loc>` values of a sitemap or sitemap index, in document order.
pub fn sitemap_locs(xml: &[u8]) -> Vec<String> {
    let mut locs = Vec::new();
    for entity in SiteMapReader::new(Cursor::new(xml)) {
        match entity {
            SiteMapEntity::Url(entry) => {
                if let Some(url) = entry.loc.get_url() {
                    locs.push(url.to_string());
                }
            }
            SiteMapEntity::SiteMap(entry) => {
                if let Some(url) = entry.loc.get_url() {
                    locs.push(url.to_string());
                }
            }
            _ => {}
        }
    }
    locs
}

/// Cheap sniff used for documents fetched mid-crawl.
pub fn looks_like_sitemap(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(1024)]);
    head.contains("<urlset") || head.contains("<sitemapindex")
}

/// Sub-sitemaps are recognised by their generated filename.
pub fn is_sub_sitemap(loc: &str) -> bool {
    loc.contains("sitemap-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        PathPolicy::new(
            Url::parse("https://blog.example.com").unwrap(),
            vec![
                "content/files/".to_string(),
                "content/media/".to_string(),
                "content/images/".to_string(),
            ],
            vec![],
        )
    }

    fn page() -> Url {
        Url::parse("https://blog.example.com/post/").unwrap()
    }

    #[test]
    fn test_extract_href_and_src() {
        let html = r#"<html><body>
            <a href="/a/">A</a>
            <img src="/content/images/pic.png">
        </body></html>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(out.links, vec!["https://blog.example.com/a/"]);
        assert_eq!(
            out.resources,
            vec!["https://blog.example.com/content/images/pic.png"]
        );
    }

    #[test]
    fn test_relative_resolution() {
        let html = r#"<a href="sibling">S</a>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(out.links, vec!["https://blog.example.com/post/sibling/"]);
    }

    #[test]
    fn test_base_href_overrides_page_url() {
        let html = r#"<head><base href="https://blog.example.com/other/"></head>
            <body><a href="child">C</a></body>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(out.links, vec!["https://blog.example.com/other/child/"]);
    }

    #[test]
    fn test_cross_origin_dropped() {
        let html = r#"<a href="https://elsewhere.example.com/">X</a>
            <img src="https://cdn.example.net/pic.png">"#;
        let out = extract_html(html, &page(), &policy());
        assert!(out.links.is_empty());
        assert!(out.resources.is_empty());
    }

    #[test]
    fn test_excluded_schemes_and_fragments() {
        let html = r##"<a href="mailto:me@example.com">m</a>
            <a href="tel:+15551234">t</a>
            <a href="javascript:void(0)">j</a>
            <a href="data:text/plain,hi">d</a>
            <a href="#top">f</a>"##;
        let out = extract_html(html, &page(), &policy());
        assert!(out.links.is_empty());
        assert!(out.resources.is_empty());
    }

    #[test]
    fn test_code_blocks_not_scanned() {
        let html = r#"<p><a href="/real/">real</a></p>
            <pre><a href="/example-in-pre/">nope</a></pre>
            <code><a href="/example-in-code/">nope</a></code>
            <textarea><a href="/example-in-textarea/">nope</a></textarea>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(out.links, vec!["https://blog.example.com/real/"]);
    }

    #[test]
    fn test_srcset_candidates() {
        let html = r#"<img srcset="/content/images/a-300.png 300w, /content/images/a-600.png 2x">"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(
            out.resources,
            vec![
                "https://blog.example.com/content/images/a-300.png",
                "https://blog.example.com/content/images/a-600.png",
            ]
        );
    }

    #[test]
    fn test_classification_by_extension() {
        let html = r#"<a href="/page.html">p</a>
            <a href="/doc.pdf">d</a>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(out.links, vec!["https://blog.example.com/page.html"]);
        assert_eq!(out.resources, vec!["https://blog.example.com/doc.pdf"]);
    }

    #[test]
    fn test_dedup_preserves_first_occurrence_order() {
        let html = r#"<a href="/b/">b</a><a href="/a/">a</a><a href="/b/">b again</a>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(
            out.links,
            vec![
                "https://blog.example.com/b/",
                "https://blog.example.com/a/"
            ]
        );
    }

    #[test]
    fn test_video_emits_thumbnail() {
        let html = r#"<video src="/content/media/clip.mp4"></video>"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(
            out.resources,
            vec![
                "https://blog.example.com/content/media/clip.mp4",
                "https://blog.example.com/content/media/clip_thumb.jpg",
            ]
        );
    }

    #[test]
    fn test_css_urls() {
        let css = r#"
            body { background: url("/content/images/bg.png"); }
            .a { background-image: url('relative.gif'); }
            .b { src: url(fonts/x.woff2); }
            .c { background: url(data:image/png;base64,AAAA); }
            .d { background: url(https://cdn.example.net/far.png); }
        "#;
        let sheet = Url::parse("https://blog.example.com/assets/site.css").unwrap();
        let out = extract_css(css, &sheet, &policy());
        assert_eq!(
            out,
            vec![
                "https://blog.example.com/content/images/bg.png",
                "https://blog.example.com/assets/relative.gif",
                "https://blog.example.com/assets/fonts/x.woff2",
            ]
        );
    }

    #[test]
    fn test_sitemap_urlset() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>https://blog.example.com/a/</loc></url>
              <url><loc>https://blog.example.com/b/</loc></url>
            </urlset>"#;
        assert_eq!(
            sitemap_locs(xml),
            vec![
                "https://blog.example.com/a/",
                "https://blog.example.com/b/"
            ]
        );
    }

    #[test]
    fn test_sitemap_index() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
            <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <sitemap><loc>https://blog.example.com/sitemap-posts.xml</loc></sitemap>
            </sitemapindex>"#;
        let locs = sitemap_locs(xml);
        assert_eq!(locs, vec!["https://blog.example.com/sitemap-posts.xml"]);
        assert!(is_sub_sitemap(&locs[0]));
    }

    #[test]
    fn test_sitemap_sniff() {
        assert!(looks_like_sitemap(b"<?xml version=\"1.0\"?><urlset>"));
        assert!(looks_like_sitemap(b"<sitemapindex>"));
        assert!(!looks_like_sitemap(b"<rss version=\"2.0\">"));
        assert!(!looks_like_sitemap(b"<!doctype html><html>"));
    }

    #[test]
    fn test_malformed_html_is_best_effort() {
        let html = r#"<a href="/ok/">ok<div><p><a href="/also/">also"#;
        let out = extract_html(html, &page(), &policy());
        assert_eq!(
            out.links,
            vec![
                "https://blog.example.com/ok/",
                "https://blog.example.com/also/"
            ]
        );
    }
}
