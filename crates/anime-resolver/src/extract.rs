//! Playable-stream extraction from episode pages.
//!
//! Strategies are tried in a fixed order and the first one that yields at
//! least one acceptable URL wins:
//! 1. iframe embeds (`src` or a lazy-load attribute)
//! 2. native `<video>` sources
//! 3. URLs embedded in inline scripts
//! 4. generic `data-*` attributes carrying a URL
//!
//! Every URL is normalized, checked against the blocklist and deduplicated
//! before it becomes a [`StreamServer`].

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use shared::{ServerKind, StreamServer};
use std::collections::HashSet;
use tracing::debug;

/// Ad, tracking and social hosts; matched against the host and its parents
const BLOCKED_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googletagmanager.com",
    "google-analytics.com",
    "googleadservices.com",
    "adservice.google.com",
    "facebook.com",
    "facebook.net",
    "twitter.com",
    "instagram.com",
    "disqus.com",
    "histats.com",
    "cloudflareinsights.com",
    "popads.net",
    "propellerads.com",
    "adsterra.com",
    "t.me",
    "discord.gg",
    // Not embeddable as episode streams
    "youtube.com",
    "youtu.be",
    "dailymotion.com",
];

/// Path fragments that mark ad or tracking endpoints on otherwise unknown hosts
const BLOCKED_MARKERS: &[&str] = &["/ads/", "adserver", "/pixel", "analytics", "/banner"];

const MEDIA_EXTENSIONS: &[&str] = &[".m3u8", ".mp4", ".webm", ".mkv"];

static IFRAME: Lazy<Selector> = Lazy::new(|| Selector::parse("iframe").expect("valid selector"));
static VIDEO: Lazy<Selector> =
    Lazy::new(|| Selector::parse("video[src], video source[src]").expect("valid selector"));
static SCRIPT: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("valid selector"));
static DATA_ATTRS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("[data-src], [data-url], [data-video], [data-link], [data-embed]")
        .expect("valid selector")
});

static SCRIPT_MEDIA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)["']((?:https?:)?//[^"'\s]+?\.(?:m3u8|mp4|webm)(?:\?[^"'\s]*)?)["']"#)
        .expect("valid regex")
});
static SCRIPT_PLAYER_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:file|source|src|embed_url)["']?\s*[:=]\s*["']([^"']+)["']"#)
        .expect("valid regex")
});
static SCRIPT_IFRAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<iframe[^>]+src=\\?["']([^"'\\]+)"#).expect("valid regex"));

const IFRAME_ATTRS: &[&str] = &["src", "data-src", "data-lazy-src"];
const DATA_ATTR_NAMES: &[&str] = &["data-src", "data-url", "data-video", "data-link", "data-embed"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    IframeEmbed,
    VideoElement,
    ScriptPattern,
    DataAttribute,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ExtractionMethod::IframeEmbed => "iframe",
            ExtractionMethod::VideoElement => "video",
            ExtractionMethod::ScriptPattern => "script",
            ExtractionMethod::DataAttribute => "data-attribute",
        }
    }
}

/// Make a discovered URL absolute.
///
/// Protocol-relative URLs get `https:`, relative ones are resolved against
/// `base`. Absolute http(s) URLs are returned unchanged. Anything that does not
/// end up as http(s) (`javascript:`, `about:blank`, ...) yields `None`.
pub fn normalize_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("https://") || lower.starts_with("http://") {
        return Some(raw.to_string());
    }
    if raw.starts_with("//") {
        return Some(format!("https:{}", raw));
    }
    if lower.contains(':') && !lower.starts_with('/') && !lower.starts_with('.') {
        // Some other scheme
        let scheme_end = lower.find(':').unwrap_or(0);
        if lower[..scheme_end].chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
    }

    let joined = Url::parse(base).ok()?.join(raw).ok()?;
    match joined.scheme() {
        "http" | "https" => Some(joined.to_string()),
        _ => None,
    }
}

/// True if the URL points at a known ad, tracking, social or disallowed host.
pub fn is_blocked(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if BLOCKED_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }

    let host = match Url::parse(&lower) {
        Ok(parsed) => parsed.host_str().map(str::to_string),
        Err(_) => None,
    };
    match host {
        Some(host) => BLOCKED_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d))),
        None => BLOCKED_DOMAINS.iter().any(|d| lower.contains(d)),
    }
}

/// URL identity for deduplication: scheme and host lowercased, path kept as is,
/// without query or fragment.
pub fn dedup_key(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let url = url[..end].trim_end_matches('/');

    let authority_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    let path_start = url[authority_start..]
        .find('/')
        .map(|i| authority_start + i)
        .unwrap_or(url.len());
    format!(
        "{}{}",
        url[..path_start].to_ascii_lowercase(),
        &url[path_start..]
    )
}

pub fn kind_for_url(url: &str) -> ServerKind {
    let path = &url[..url.find(['?', '#']).unwrap_or(url.len())];
    let path = path.to_ascii_lowercase();
    if MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        ServerKind::DirectMedia
    } else {
        ServerKind::Iframe
    }
}

/// A discovered stream before normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStream {
    pub url: String,
    pub kind: ServerKind,
    /// Server name shown by the site, if any
    pub label: Option<String>,
}

impl From<(String, ServerKind)> for RawStream {
    fn from((url, kind): (String, ServerKind)) -> Self {
        Self {
            url,
            kind,
            label: None,
        }
    }
}

/// Normalize, filter and deduplicate raw URLs into servers, keeping first-seen order.
pub fn build_servers<I, R>(raw: I, base: &str, provider: &str) -> Vec<StreamServer>
where
    I: IntoIterator<Item = R>,
    R: Into<RawStream>,
{
    let mut seen = HashSet::new();
    let mut servers = Vec::new();

    for RawStream { url, kind, label } in raw.into_iter().map(Into::into) {
        let Some(url) = normalize_url(&url, base) else {
            continue;
        };
        if is_blocked(&url) {
            debug!(url = %url, "Dropping blocklisted URL");
            continue;
        }
        if !seen.insert((dedup_key(&url), kind)) {
            continue;
        }

        let display_name = label
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| format!("{} #{}", provider, servers.len() + 1));
        servers.push(StreamServer {
            display_name,
            provider_label: host_label(&url).unwrap_or_else(|| provider.to_string()),
            quality_label: "auto".to_string(),
            url,
            kind,
        });
    }

    servers
}

fn host_label(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches("www.").to_string())
}

fn iframe_urls(doc: &Html) -> Vec<(String, ServerKind)> {
    doc.select(&IFRAME)
        .filter_map(|el| {
            IFRAME_ATTRS
                .iter()
                .filter_map(|attr| el.value().attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty() && !v.eq_ignore_ascii_case("about:blank"))
                .map(|v| (v.to_string(), ServerKind::Iframe))
        })
        .collect()
}

fn video_urls(doc: &Html) -> Vec<(String, ServerKind)> {
    doc.select(&VIDEO)
        .filter_map(|el| el.value().attr("src"))
        .map(|src| (src.to_string(), ServerKind::DirectMedia))
        .collect()
}

fn script_urls(doc: &Html) -> Vec<(String, ServerKind)> {
    let mut found = Vec::new();
    for script in doc.select(&SCRIPT) {
        let body: String = script.text().collect();
        if body.trim().is_empty() {
            continue;
        }
        for caps in SCRIPT_MEDIA.captures_iter(&body) {
            found.push((caps[1].to_string(), ServerKind::DirectMedia));
        }
        for caps in SCRIPT_PLAYER_KEY.captures_iter(&body) {
            let url = caps[1].to_string();
            if url.contains("//") || url.starts_with('/') {
                let kind = kind_for_url(&url);
                found.push((url, kind));
            }
        }
        for caps in SCRIPT_IFRAME.captures_iter(&body) {
            found.push((caps[1].to_string(), ServerKind::Iframe));
        }
    }
    found
}

fn data_attribute_urls(doc: &Html) -> Vec<(String, ServerKind)> {
    doc.select(&DATA_ATTRS)
        .filter(|el| el.value().name() != "iframe")
        .flat_map(|el| {
            DATA_ATTR_NAMES
                .iter()
                .filter_map(|attr| el.value().attr(attr))
                .filter(|v| v.contains("//"))
                .map(|v| (v.to_string(), kind_for_url(v)))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run the extraction strategies over an episode page.
///
/// Returns the servers found by the first productive strategy together with
/// that strategy, or an empty list if none produced anything.
pub fn extract_servers(
    html: &str,
    base: &str,
    provider: &str,
) -> (Vec<StreamServer>, Option<ExtractionMethod>) {
    let doc = Html::parse_document(html);

    let strategies: [(ExtractionMethod, fn(&Html) -> Vec<(String, ServerKind)>); 4] = [
        (ExtractionMethod::IframeEmbed, iframe_urls),
        (ExtractionMethod::VideoElement, video_urls),
        (ExtractionMethod::ScriptPattern, script_urls),
        (ExtractionMethod::DataAttribute, data_attribute_urls),
    ];

    for (method, strategy) in strategies {
        let servers = build_servers(strategy(&doc), base, provider);
        if !servers.is_empty() {
            debug!(method = method.as_str(), count = servers.len(), "Extracted servers");
            return (servers, Some(method));
        }
    }

    (Vec::new(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://site.test";

    #[test]
    fn test_normalize_absolute_unchanged() {
        let url = "https://example.com/embed/1?x=2";
        assert_eq!(normalize_url(url, BASE).as_deref(), Some(url));
    }

    #[test]
    fn test_normalize_protocol_relative() {
        assert_eq!(
            normalize_url("//example.com/x", BASE).as_deref(),
            Some("https://example.com/x")
        );
    }

    #[test]
    fn test_normalize_site_relative() {
        assert_eq!(normalize_url("/x", BASE).as_deref(), Some("https://site.test/x"));
        assert_eq!(
            normalize_url("embed/7", "https://site.test/watch/").as_deref(),
            Some("https://site.test/watch/embed/7")
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["//example.com/x", "/x", "https://a.test/v?x=1", "player/1"] {
            let once = normalize_url(raw, BASE).unwrap();
            let twice = normalize_url(&once, BASE).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert_eq!(normalize_url("javascript:void(0)", BASE), None);
        assert_eq!(normalize_url("about:blank", BASE), None);
        assert_eq!(normalize_url("   ", BASE), None);
    }

    #[test]
    fn test_dedup_ignores_query() {
        let servers = build_servers(
            vec![
                ("https://a.test/v?x=1".to_string(), ServerKind::Iframe),
                ("https://a.test/v?x=2".to_string(), ServerKind::Iframe),
            ],
            BASE,
            "Mock",
        );
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].url, "https://a.test/v?x=1");
    }

    #[test]
    fn test_dedup_key_keeps_path_case() {
        assert_eq!(
            dedup_key("HTTPS://Cdn.Test/e/AbC/?t=1"),
            "https://cdn.test/e/AbC"
        );
        assert_ne!(
            dedup_key("https://cdn.test/e/AbC"),
            dedup_key("https://cdn.test/e/abc")
        );
        assert_eq!(dedup_key("https://CDN.test"), "https://cdn.test");

        let servers = build_servers(
            vec![
                ("https://cdn.test/e/AbC".to_string(), ServerKind::Iframe),
                ("https://CDN.test/e/abc".to_string(), ServerKind::Iframe),
                ("https://cdn.TEST/e/AbC".to_string(), ServerKind::Iframe),
            ],
            BASE,
            "Mock",
        );
        assert_eq!(servers.len(), 2);
    }

    #[test]
    fn test_same_url_different_kind_kept() {
        let servers = build_servers(
            vec![
                ("https://a.test/v".to_string(), ServerKind::Iframe),
                ("https://a.test/v".to_string(), ServerKind::DirectMedia),
            ],
            BASE,
            "Mock",
        );
        assert_eq!(servers.len(), 2);
    }

    #[test]
    fn test_blocklist() {
        assert!(is_blocked("https://ad.doubleclick.net/x"));
        assert!(is_blocked("https://www.youtube.com/embed/abc"));
        assert!(is_blocked("https://cdn.test/ads/banner.js"));
        assert!(!is_blocked("https://netflix-mirror.test/embed/1"));
        assert!(!is_blocked("https://player.test/e/1"));
    }

    #[test]
    fn test_iframe_precedes_other_methods() {
        let html = r#"
            <html><body>
              <video src="https://media.test/ep.mp4"></video>
              <iframe src="about:blank" data-src="//player.test/e/1"></iframe>
              <iframe src="/embed/2"></iframe>
            </body></html>"#;
        let (servers, method) = extract_servers(html, BASE, "Mock");
        assert_eq!(method, Some(ExtractionMethod::IframeEmbed));
        let urls: Vec<&str> = servers.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://player.test/e/1", "https://site.test/embed/2"]);
        assert_eq!(servers[0].provider_label, "player.test");
        assert_eq!(servers[0].kind, ServerKind::Iframe);
    }

    #[test]
    fn test_video_element_fallback() {
        let html = r#"<video><source src="/media/ep5.m3u8"></video>"#;
        let (servers, method) = extract_servers(html, BASE, "Mock");
        assert_eq!(method, Some(ExtractionMethod::VideoElement));
        assert_eq!(servers[0].url, "https://site.test/media/ep5.m3u8");
        assert_eq!(servers[0].kind, ServerKind::DirectMedia);
    }

    #[test]
    fn test_script_fallback() {
        let html = r#"<script>
            var player = jwplayer("p").setup({ file: "https://cdn.test/hls/master.m3u8?t=1" });
            var embed = { embed_url: "//player.test/e/9" };
        </script>"#;
        let (servers, method) = extract_servers(html, BASE, "Mock");
        assert_eq!(method, Some(ExtractionMethod::ScriptPattern));
        assert_eq!(servers[0].url, "https://cdn.test/hls/master.m3u8?t=1");
        assert_eq!(servers[0].kind, ServerKind::DirectMedia);
        assert!(servers.iter().any(|s| s.url == "https://player.test/e/9"));
    }

    #[test]
    fn test_data_attribute_fallback() {
        let html = r#"<div class="server" data-video="//player.test/v/3">Server 1</div>"#;
        let (servers, method) = extract_servers(html, BASE, "Mock");
        assert_eq!(method, Some(ExtractionMethod::DataAttribute));
        assert_eq!(servers[0].url, "https://player.test/v/3");
    }

    #[test]
    fn test_blocklist_enforced_for_every_method() {
        let pages = [
            r#"<iframe src="https://www.facebook.com/plugins/like.php"></iframe>"#,
            r#"<video src="https://ads.doubleclick.net/pre.mp4"></video>"#,
            r#"<script>var s = { file: "https://www.youtube.com/embed/x" };</script>"#,
            r#"<div data-url="https://pagead.googlesyndication.com/ad"></div>"#,
        ];
        for page in pages {
            let (servers, method) = extract_servers(page, BASE, "Mock");
            assert!(servers.is_empty(), "leaked from {}", page);
            assert_eq!(method, None);
        }
    }

    #[test]
    fn test_blocked_iframe_falls_through_to_next_method() {
        let html = r#"
            <iframe src="https://www.youtube.com/embed/trailer"></iframe>
            <video src="https://media.test/ep.mp4"></video>"#;
        let (servers, method) = extract_servers(html, BASE, "Mock");
        assert_eq!(method, Some(ExtractionMethod::VideoElement));
        assert_eq!(servers.len(), 1);
    }

    #[test]
    fn test_empty_page() {
        let (servers, method) = extract_servers("<html><body><p>nothing</p></body></html>", BASE, "Mock");
        assert!(servers.is_empty());
        assert_eq!(method, None);
    }
}
