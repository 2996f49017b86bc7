//! WatchAnimeWorld: WordPress search, series page, episode page.

use super::{match_title, require_url, SourceAdapter, SourceHit};
use crate::extract::extract_servers;
use crate::http::PageFetcher;
use crate::matcher::Candidate;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use shared::{ResolveError, Result, SourceDescriptor, TitleQuery};
use tracing::{debug, info};

pub const SOURCE_ID: &str = "watchanimeworld";

static RESULT_ITEM: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".item, .post, article, .anime-card").expect("valid selector")
});
static RESULT_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2, h3, .title, a").expect("valid selector"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("valid selector"));

static EPISODE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)episode\s*(\d+)").expect("valid regex"));
static TRAILING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s(\d+)\s*$").expect("valid regex"));

/// Episode link on a series page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeLink {
    pub number: u32,
    pub url: String,
}

pub struct WatchAnimeWorldAdapter {
    descriptor: SourceDescriptor,
    fetcher: PageFetcher,
}

impl WatchAnimeWorldAdapter {
    pub fn new(descriptor: SourceDescriptor, user_agent: &str) -> Result<Self> {
        let fetcher = PageFetcher::new(
            &descriptor.id,
            &descriptor.base_url,
            user_agent,
            descriptor.timeout(),
        )?;
        Ok(Self {
            descriptor,
            fetcher,
        })
    }

    async fn search_page(&self, keyword: &str) -> Result<Vec<Candidate>> {
        let encoded = urlencoding::encode(keyword);
        let url = require_url(&self.descriptor, "search", &[("query", encoded.as_ref())])?;
        let html = self.fetcher.get_text(&url).await?;
        Ok(parse_search_results(&html, &self.descriptor.base_url))
    }
}

#[async_trait]
impl SourceAdapter for WatchAnimeWorldAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &TitleQuery,
        episode: u32,
        _season: Option<u32>,
    ) -> Result<SourceHit> {
        // Result cards carry no type label, so no type filter here
        let (_, best) = match_title(query, None, |keyword| async move {
            self.search_page(&keyword).await
        })
        .await?;

        let series_url = best.source_identifier;
        let series_html = self.fetcher.get_text(&series_url).await?;
        let links = parse_episode_links(&series_html, &series_url);
        let Some(link) = links.into_iter().find(|l| l.number == episode) else {
            return Err(ResolveError::not_found(format!(
                "'{}' lists no episode {}",
                best.source_title, episode
            )));
        };

        debug!(url = %link.url, "Opening episode page");
        let episode_html = self.fetcher.get_text(&link.url).await?;
        let (servers, method) =
            extract_servers(&episode_html, &link.url, &self.descriptor.display_name);
        let Some(method) = method else {
            return Err(ResolveError::not_found(format!(
                "no playable servers on the page for '{}' episode {}",
                best.source_title, episode
            )));
        };

        info!(
            title = %best.source_title,
            episode,
            method = method.as_str(),
            servers = servers.len(),
            "WatchAnimeWorld episode resolved"
        );
        Ok(SourceHit {
            title_used: best.source_title,
            season: None,
            episode,
            servers,
            skip: None,
        })
    }
}

/// Search result cards; the candidate id is the absolute series URL
pub fn parse_search_results(html: &str, base: &str) -> Vec<Candidate> {
    let doc = Html::parse_document(html);
    let mut found: Vec<Candidate> = Vec::new();

    for item in doc.select(&RESULT_ITEM) {
        let Some(title) = item
            .select(&RESULT_TITLE)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .find(|t| !t.is_empty())
        else {
            continue;
        };
        let Some(url) = item
            .select(&ANCHOR)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| crate::extract::normalize_url(href, base))
        else {
            continue;
        };
        // Nested matches (an article inside a .post) describe the same card
        if found.iter().any(|c| c.id == url) {
            continue;
        }
        found.push(Candidate::new(title, url));
    }

    found
}

/// Episode links on a series page, in page order
pub fn parse_episode_links(html: &str, base: &str) -> Vec<EpisodeLink> {
    let doc = Html::parse_document(html);
    let mut links: Vec<EpisodeLink> = Vec::new();

    for anchor in doc.select(&ANCHOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let text = anchor.text().collect::<String>();
        let text = text.trim();
        if !href.contains("/episode/") || !text.to_lowercase().contains("episode") {
            continue;
        }
        let Some(number) = episode_number(text) else {
            continue;
        };
        let Some(url) = crate::extract::normalize_url(href, base) else {
            continue;
        };
        if !links.iter().any(|l| l.url == url) {
            links.push(EpisodeLink { number, url });
        }
    }

    links
}

fn episode_number(text: &str) -> Option<u32> {
    EPISODE_WORD
        .captures(text)
        .or_else(|| TRAILING_NUMBER.captures(text))
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://watchanimeworld.in";

    #[test]
    fn test_parse_search_results() {
        let html = r#"
            <div class="results">
              <article class="post">
                <h2 class="entry-title">Jujutsu Kaisen</h2>
                <a href="/series/jujutsu-kaisen/">Watch</a>
              </article>
              <div class="anime-card">
                <a href="https://watchanimeworld.in/series/jujutsu-kaisen-0/"><span class="title">Jujutsu Kaisen 0</span></a>
              </div>
              <article class="post"><h2>No link</h2></article>
            </div>"#;
        let found = parse_search_results(html, BASE);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "Jujutsu Kaisen");
        assert_eq!(found[0].id, "https://watchanimeworld.in/series/jujutsu-kaisen/");
        assert_eq!(found[1].name, "Jujutsu Kaisen 0");
        assert_eq!(found[1].declared_type, None);
    }

    #[test]
    fn test_parse_episode_links() {
        let html = r#"
            <ul class="episodes">
              <li><a href="/episode/jujutsu-kaisen-1x1/">Episode 1</a></li>
              <li><a href="/episode/jujutsu-kaisen-1x2/">Jujutsu Kaisen Episode 2</a></li>
              <li><a href="/episode/jujutsu-kaisen-1x2/">Episode 2</a></li>
              <li><a href="/series/jujutsu-kaisen/">Episode 3</a></li>
              <li><a href="/episode/jujutsu-kaisen-1x4/">Next</a></li>
            </ul>"#;
        let links = parse_episode_links(html, BASE);
        assert_eq!(
            links,
            vec![
                EpisodeLink {
                    number: 1,
                    url: "https://watchanimeworld.in/episode/jujutsu-kaisen-1x1/".to_string()
                },
                EpisodeLink {
                    number: 2,
                    url: "https://watchanimeworld.in/episode/jujutsu-kaisen-1x2/".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_episode_number_formats() {
        assert_eq!(episode_number("Episode 12"), Some(12));
        assert_eq!(episode_number("episode12"), Some(12));
        assert_eq!(episode_number("Watch episode of Naruto 7"), Some(7));
        assert_eq!(episode_number("Episode"), None);
    }
}
