//! AnimeWorld: titles addressed by slug, episodes grouped by season.
//!
//! The series page lists seasons; each season's episode list comes from an
//! AJAX POST. Episode lists are fetched lazily and kept for the lifetime of
//! one [`AnimeWorldCatalog`], so repeated probes of the same season are free.

use super::{require_url, SeasonCatalog, SourceAdapter, SourceHit};
use crate::extract::extract_servers;
use crate::http::PageFetcher;
use crate::matcher::slugify;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use shared::{ResolveError, Result, ShowType, SourceDescriptor, TitleQuery};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const SOURCE_ID: &str = "animeworld";

static SEASON_LINK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("ul.aa-cnt.sub-menu li a[data-season][data-post]").expect("valid selector")
});
static EPISODE_ARTICLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li article.post").expect("valid selector"));
static EPISODE_NUMBER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".num-epi").expect("valid selector"));
static EPISODE_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a.lnk-blk").expect("valid selector"));

static NUM_EPI: Lazy<Regex> = Lazy::new(|| Regex::new(r"x\s*(\d+)").expect("valid regex"));

/// Season entry from the series page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeasonRef {
    pub number: u32,
    pub post: String,
    pub aslug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub number: u32,
    pub url: String,
}

pub struct AnimeWorldAdapter {
    descriptor: SourceDescriptor,
    fetcher: PageFetcher,
}

impl AnimeWorldAdapter {
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

    /// Find the series page by slug, trying each resolved title in turn
    async fn open_series(&self, query: &TitleQuery) -> Result<AnimeWorldCatalog> {
        let mut last_error = None;
        let mut tried = Vec::new();

        for title in &query.resolved_titles {
            let slug = slugify(title);
            if slug.is_empty() || tried.contains(&slug) {
                continue;
            }
            tried.push(slug.clone());

            let url = require_url(&self.descriptor, "series", &[("slug", slug.as_str())])?;
            let html = match self.fetcher.get_text(&url).await {
                Ok(html) => html,
                Err(e) => {
                    debug!(slug = %slug, error = %e, "Series page unavailable");
                    last_error = Some(e);
                    continue;
                }
            };

            let seasons = parse_seasons(&html);
            if seasons.is_empty() {
                last_error = Some(ResolveError::not_found(format!(
                    "series page for '{}' lists no seasons",
                    title
                )));
                continue;
            }

            info!(title = %title, seasons = seasons.len(), "Opened AnimeWorld series");
            return Ok(AnimeWorldCatalog {
                descriptor: self.descriptor.clone(),
                fetcher: self.fetcher.clone(),
                title_used: title.clone(),
                series_url: url,
                seasons,
                episodes: Mutex::new(HashMap::new()),
            });
        }

        Err(last_error.unwrap_or_else(|| {
            ResolveError::not_found(format!("no usable slug for '{}'", query.primary_title()))
        }))
    }

    async fn search_movie(&self, query: &TitleQuery, episode: u32) -> Result<SourceHit> {
        if episode != 1 {
            return Err(ResolveError::not_found(format!(
                "movies have a single episode, {} requested",
                episode
            )));
        }

        let mut last_error = None;
        for title in &query.resolved_titles {
            let slug = slugify(title);
            if slug.is_empty() {
                continue;
            }
            let url = require_url(&self.descriptor, "movie", &[("slug", slug.as_str())])?;
            match self.episode_page(&url, title, None, 1).await {
                Ok(hit) => return Ok(hit),
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ResolveError::not_found(format!("no usable slug for '{}'", query.primary_title()))
        }))
    }

    async fn episode_page(
        &self,
        url: &str,
        title: &str,
        season: Option<u32>,
        episode: u32,
    ) -> Result<SourceHit> {
        fetch_episode(&self.fetcher, &self.descriptor, url, title, season, episode).await
    }
}

async fn fetch_episode(
    fetcher: &PageFetcher,
    descriptor: &SourceDescriptor,
    url: &str,
    title: &str,
    season: Option<u32>,
    episode: u32,
) -> Result<SourceHit> {
    let html = fetcher.get_text(url).await?;
    let (servers, method) = extract_servers(&html, url, &descriptor.display_name);
    if method.is_none() {
        return Err(ResolveError::not_found(format!(
            "no playable servers on {}",
            url
        )));
    }
    Ok(SourceHit {
        title_used: title.to_string(),
        season,
        episode,
        servers,
        skip: None,
    })
}

#[async_trait]
impl SourceAdapter for AnimeWorldAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &TitleQuery,
        episode: u32,
        season: Option<u32>,
    ) -> Result<SourceHit> {
        if query.show_type == Some(ShowType::Movie) {
            return self.search_movie(query, episode).await;
        }

        let catalog = self.open_series(query).await?;
        let seasons: Vec<u32> = match season {
            Some(s) => vec![s],
            None => catalog.seasons.iter().map(|s| s.number).collect(),
        };

        let mut last_error = None;
        for s in seasons {
            match catalog.lookup(s, episode).await {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => {}
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ResolveError::not_found(format!(
                "'{}' has no episode {}{}",
                catalog.title_used,
                episode,
                season.map(|s| format!(" in season {}", s)).unwrap_or_default()
            ))
        }))
    }

    async fn open_catalog(&self, query: &TitleQuery) -> Result<Option<Box<dyn SeasonCatalog>>> {
        if query.show_type == Some(ShowType::Movie) {
            return Ok(None);
        }
        let catalog = self.open_series(query).await?;
        Ok(Some(Box::new(catalog)))
    }
}

/// One series on AnimeWorld with lazily loaded season episode lists
pub struct AnimeWorldCatalog {
    descriptor: SourceDescriptor,
    fetcher: PageFetcher,
    title_used: String,
    series_url: String,
    seasons: Vec<SeasonRef>,
    episodes: Mutex<HashMap<u32, Vec<EpisodeRef>>>,
}

impl AnimeWorldCatalog {
    async fn load_season(&self, season: &SeasonRef) -> Result<Vec<EpisodeRef>> {
        let url = require_url(&self.descriptor, "seasons", &[])?;
        let number = season.number.to_string();
        let form = [
            ("action", "action_select_season"),
            ("season", number.as_str()),
            ("post", season.post.as_str()),
            ("aslug", season.aslug.as_str()),
        ];
        let origin = self.descriptor.base_url.trim_end_matches('/');

        let html = self
            .fetcher
            .post_form(&url, &form, &self.series_url, origin)
            .await
            .map_err(|e| {
                warn!(season = season.number, error = %e, "Failed to load season");
                e
            })?;
        let episodes = parse_season_episodes(&html, &self.descriptor.base_url);
        debug!(season = season.number, episodes = episodes.len(), "Loaded season");
        Ok(episodes)
    }

    /// Episode page URL for (season, episode); only successful loads are memoized
    async fn episode_url(&self, season: &SeasonRef, episode: u32) -> Result<Option<String>> {
        let mut episodes = self.episodes.lock().await;
        if !episodes.contains_key(&season.number) {
            let loaded = self.load_season(season).await?;
            episodes.insert(season.number, loaded);
        }
        Ok(episodes
            .get(&season.number)
            .and_then(|list| list.iter().find(|e| e.number == episode))
            .map(|e| e.url.clone()))
    }

    /// Servers for (season, episode); `Ok(None)` if the site does not list it
    async fn lookup(&self, season: u32, episode: u32) -> Result<Option<SourceHit>> {
        let Some(season_ref) = self.seasons.iter().find(|s| s.number == season) else {
            return Ok(None);
        };
        let Some(url) = self.episode_url(season_ref, episode).await? else {
            return Ok(None);
        };

        fetch_episode(
            &self.fetcher,
            &self.descriptor,
            &url,
            &self.title_used,
            Some(season),
            episode,
        )
        .await
        .map(Some)
    }
}

#[async_trait]
impl SeasonCatalog for AnimeWorldCatalog {
    fn title_used(&self) -> &str {
        &self.title_used
    }

    async fn probe(&self, season: u32, episode: u32) -> Option<SourceHit> {
        match self.lookup(season, episode).await {
            Ok(hit) => hit,
            Err(e) => {
                debug!(season, episode, error = %e, "Probe failed");
                None
            }
        }
    }
}

/// Season menu on a series page, in page order
pub fn parse_seasons(html: &str) -> Vec<SeasonRef> {
    let doc = Html::parse_document(html);
    let mut seasons: Vec<SeasonRef> = Vec::new();

    for link in doc.select(&SEASON_LINK) {
        let attrs = link.value();
        let Some(number) = attrs
            .attr("data-season")
            .and_then(|s| s.trim().parse::<u32>().ok())
        else {
            continue;
        };
        let Some(post) = attrs.attr("data-post") else {
            continue;
        };
        if seasons.iter().any(|s| s.number == number) {
            continue;
        }
        seasons.push(SeasonRef {
            number,
            post: post.trim().to_string(),
            aslug: attrs.attr("data-aslug").unwrap_or_default().trim().to_string(),
        });
    }

    seasons
}

/// Episodes in one season's AJAX fragment.
///
/// The number comes from the `SxE` label, falling back to list position.
pub fn parse_season_episodes(html: &str, base: &str) -> Vec<EpisodeRef> {
    let doc = Html::parse_fragment(html);
    doc.select(&EPISODE_ARTICLE)
        .enumerate()
        .filter_map(|(index, article)| {
            let href = article.select(&EPISODE_LINK).next()?.value().attr("href")?;
            let url = crate::extract::normalize_url(href, base)?;
            let number = article
                .select(&EPISODE_NUMBER)
                .next()
                .and_then(|el| {
                    let label = el.text().collect::<String>();
                    NUM_EPI.captures(&label).and_then(|c| c[1].parse().ok())
                })
                .unwrap_or(index as u32 + 1);
            Some(EpisodeRef { number, url })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::canned::{serve, Route};
    use shared::ErrorKind;

    const BASE: &str = "https://animeworld-india.me";

    #[test]
    fn test_parse_seasons() {
        let html = r#"
            <div class="choose-season">
              <ul class="aa-cnt sub-menu">
                <li><a href="javascript:void(0)" data-post="1187" data-season="1" data-aslug="naruto-shippuden">Season 1</a></li>
                <li><a href="javascript:void(0)" data-post="1187" data-season="2" data-aslug="naruto-shippuden">Season 2</a></li>
                <li><a href="javascript:void(0)" data-post="1187" data-season="2">Season 2 again</a></li>
                <li><a href="javascript:void(0)" data-post="1187" data-season="Extras">Extras</a></li>
              </ul>
            </div>"#;
        let seasons = parse_seasons(html);
        assert_eq!(seasons.len(), 2);
        assert_eq!(
            seasons[1],
            SeasonRef {
                number: 2,
                post: "1187".to_string(),
                aslug: "naruto-shippuden".to_string()
            }
        );
    }

    #[test]
    fn test_parse_season_episodes() {
        let html = r#"
            <li><article class="post dfx fcl movies">
              <header class="entry-header"><span class="num-epi">2x1</span></header>
              <a href="/episode/naruto-shippuden-2x1/" class="lnk-blk"></a>
            </article></li>
            <li><article class="post dfx fcl movies">
              <header class="entry-header"><span class="num-epi">2x2</span></header>
              <a href="https://animeworld-india.me/episode/naruto-shippuden-2x2/" class="lnk-blk"></a>
            </article></li>
            <li><article class="post dfx fcl movies">
              <a href="/episode/naruto-shippuden-special/" class="lnk-blk"></a>
            </article></li>"#;
        let episodes = parse_season_episodes(html, BASE);
        assert_eq!(episodes.len(), 3);
        assert_eq!(episodes[0].number, 1);
        assert_eq!(
            episodes[0].url,
            "https://animeworld-india.me/episode/naruto-shippuden-2x1/"
        );
        assert_eq!(episodes[1].number, 2);
        // No label: position in the list
        assert_eq!(episodes[2].number, 3);
    }

    fn catalog(base_url: &str, loaded: HashMap<u32, Vec<EpisodeRef>>) -> AnimeWorldCatalog {
        let mut descriptor = shared::default_sources()
            .into_iter()
            .find(|d| d.id == SOURCE_ID)
            .unwrap();
        descriptor.base_url = base_url.to_string();
        let fetcher = PageFetcher::new(
            &descriptor.id,
            &descriptor.base_url,
            "TestAgent/1.0",
            descriptor.timeout(),
        )
        .unwrap();
        AnimeWorldCatalog {
            descriptor,
            fetcher,
            title_used: "Naruto Shippuden".to_string(),
            series_url: format!("{}/series/naruto-shippuden/", base_url),
            seasons: vec![SeasonRef {
                number: 1,
                post: "1187".to_string(),
                aslug: "naruto-shippuden".to_string(),
            }],
            episodes: Mutex::new(loaded),
        }
    }

    #[tokio::test]
    async fn test_probe_unknown_season_is_free() {
        let catalog = catalog(BASE, HashMap::from([(1, Vec::new())]));

        // Season 7 is not listed and season 1 is already loaded (empty): no requests made
        assert!(catalog.probe(7, 1).await.is_none());
        assert!(catalog.probe(1, 1).await.is_none());
        assert_eq!(catalog.title_used(), "Naruto Shippuden");
    }

    #[tokio::test]
    async fn test_failed_season_load_is_upstream_and_not_memoized() {
        let base = serve(vec![Route::new("/ajax/ajax.php", 503, "busy")]).await;
        let catalog = catalog(&base, HashMap::new());

        let err = catalog.lookup(1, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(catalog.probe(1, 1).await.is_none());
        assert!(catalog.episodes.lock().await.is_empty());
    }

    const SERIES_HTML: &str = r#"<ul class="aa-cnt sub-menu">
        <li><a data-post="1187" data-season="1" data-aslug="naruto-shippuden">Season 1</a></li>
        <li><a data-post="1187" data-season="2" data-aslug="naruto-shippuden">Season 2</a></li>
    </ul>"#;

    #[tokio::test]
    async fn test_search_reports_upstream_season_failure() {
        let base = serve(vec![
            Route::new("/series/naruto-shippuden", 200, SERIES_HTML),
            Route::new("/ajax/ajax.php", 503, "busy"),
        ])
        .await;
        let mut descriptor = shared::default_sources()
            .into_iter()
            .find(|d| d.id == SOURCE_ID)
            .unwrap();
        descriptor.base_url = base;
        let adapter = AnimeWorldAdapter::new(descriptor, "TestAgent/1.0").unwrap();

        let query = TitleQuery::from_title("Naruto Shippuden");
        let err = adapter.search(&query, 3, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn test_search_missing_episode_is_not_found() {
        let base = serve(vec![
            Route::new("/series/naruto-shippuden", 200, SERIES_HTML),
            Route::new("/ajax/ajax.php", 200, ""),
        ])
        .await;
        let mut descriptor = shared::default_sources()
            .into_iter()
            .find(|d| d.id == SOURCE_ID)
            .unwrap();
        descriptor.base_url = base;
        let adapter = AnimeWorldAdapter::new(descriptor, "TestAgent/1.0").unwrap();

        let query = TitleQuery::from_title("Naruto Shippuden");
        let err = adapter.search(&query, 3, None).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
