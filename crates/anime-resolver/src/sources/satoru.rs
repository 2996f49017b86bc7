//! Satoru: search page plus a chain of AJAX endpoints.
//!
//! search page → anime id → episode list → episode id → server list → embed
//! link per server. Numbering is absolute, so `season` is ignored.

use super::{match_title, require_url, SourceAdapter, SourceHit};
use crate::extract::{build_servers, RawStream};
use crate::http::PageFetcher;
use crate::matcher::Candidate;
use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Deserialize;
use shared::{
    ResolveError, Result, ServerKind, ShowType, SkipTimes, SkipWindow, SourceDescriptor,
    TitleQuery,
};
use tracing::{debug, info, warn};

pub const SOURCE_ID: &str = "satoru";

static ITEM: Lazy<Selector> = Lazy::new(|| Selector::parse(".flw-item").expect("valid selector"));
static ITEM_NAME: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".film-name a").expect("valid selector"));
static ITEM_POSTER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".film-poster-ahref").expect("valid selector"));
static ITEM_INFO: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".fd-infor .fdi-item").expect("valid selector"));
static EPISODE_ITEM: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".ep-item").expect("valid selector"));
static SERVER_ITEM: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".server-item").expect("valid selector"));

#[derive(Debug, Deserialize)]
struct HtmlFragment {
    #[serde(default)]
    html: String,
}

#[derive(Debug, Deserialize)]
struct ServersResponse {
    #[serde(default)]
    html: String,
    #[serde(default)]
    skip: Vec<SkipEntry>,
}

#[derive(Debug, Deserialize)]
struct SkipEntry {
    skip_type: String,
    start_time: f64,
    end_time: f64,
}

#[derive(Debug, Deserialize)]
struct SourceLink {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    link: String,
}

/// Episode entry from the episode list fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeRef {
    pub number: u32,
    pub id: String,
}

/// Server entry from the server list fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRef {
    pub id: String,
    pub label: Option<String>,
}

pub struct SatoruAdapter {
    descriptor: SourceDescriptor,
    fetcher: PageFetcher,
}

impl SatoruAdapter {
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
        Ok(parse_search_results(&html))
    }

    async fn episode_list(&self, anime_id: &str, referer: &str) -> Result<Vec<EpisodeRef>> {
        let url = require_url(&self.descriptor, "episodes", &[("id", anime_id)])?;
        let fragment: HtmlFragment = self.fetcher.get_json(&url, referer).await?;
        Ok(parse_episode_list(&fragment.html))
    }

    async fn server_list(
        &self,
        episode_id: &str,
        referer: &str,
    ) -> Result<(Vec<ServerRef>, Option<SkipTimes>)> {
        let url = require_url(&self.descriptor, "servers", &[("id", episode_id)])?;
        let response: ServersResponse = self.fetcher.get_json(&url, referer).await?;
        Ok((
            parse_server_list(&response.html),
            skip_times(&response.skip),
        ))
    }

    async fn embed_link(&self, server: &ServerRef, referer: &str) -> Result<Option<RawStream>> {
        let url = require_url(&self.descriptor, "sources", &[("id", server.id.as_str())])?;
        let link = self
            .fetcher
            .get_json::<SourceLink>(&url, referer)
            .await
            .map_err(|e| {
                warn!(server = %server.id, error = %e, "Failed to fetch server source");
                e
            })?;

        if !link.kind.eq_ignore_ascii_case("iframe") || link.link.is_empty() {
            debug!(server = %server.id, kind = %link.kind, "Skipping non-iframe source");
            return Ok(None);
        }
        Ok(Some(RawStream {
            url: link.link,
            kind: ServerKind::Iframe,
            label: server.label.clone(),
        }))
    }
}

/// Keep the streams that came back; if none did, surface the last fetch error
fn gather_streams(results: Vec<Result<Option<RawStream>>>) -> Result<Vec<RawStream>> {
    let mut streams = Vec::new();
    let mut last_error = None;

    for result in results {
        match result {
            Ok(Some(stream)) => streams.push(stream),
            Ok(None) => {}
            Err(e) => last_error = Some(e),
        }
    }

    match last_error {
        Some(e) if streams.is_empty() => Err(e),
        _ => Ok(streams),
    }
}

#[async_trait]
impl SourceAdapter for SatoruAdapter {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search(
        &self,
        query: &TitleQuery,
        episode: u32,
        _season: Option<u32>,
    ) -> Result<SourceHit> {
        let (title, best) = match_title(query, query.show_type, |keyword| async move {
            self.search_page(&keyword).await
        })
        .await?;

        let referer = format!("{}/", self.descriptor.base_url.trim_end_matches('/'));
        let episodes = self.episode_list(&best.source_identifier, &referer).await?;
        let Some(entry) = episodes.iter().find(|e| e.number == episode) else {
            return Err(ResolveError::not_found(format!(
                "'{}' has {} episodes listed, none numbered {}",
                best.source_title,
                episodes.len(),
                episode
            )));
        };

        let (server_refs, skip) = self.server_list(&entry.id, &referer).await?;
        if server_refs.is_empty() {
            return Err(ResolveError::not_found(format!(
                "no servers listed for '{}' episode {}",
                best.source_title, episode
            )));
        }

        let links = join_all(server_refs.iter().map(|s| self.embed_link(s, &referer))).await;
        let servers = build_servers(
            gather_streams(links)?,
            &self.descriptor.base_url,
            &self.descriptor.display_name,
        );
        if servers.is_empty() {
            return Err(ResolveError::not_found(format!(
                "no playable servers for '{}' episode {}",
                best.source_title, episode
            )));
        }

        info!(title = %best.source_title, episode, servers = servers.len(), "Satoru episode resolved");
        Ok(SourceHit {
            title_used: if best.source_title.is_empty() { title } else { best.source_title },
            season: None,
            episode,
            servers,
            skip,
        })
    }
}

/// Search result cards: title, anime id and declared type
pub fn parse_search_results(html: &str) -> Vec<Candidate> {
    let doc = Html::parse_document(html);
    doc.select(&ITEM)
        .filter_map(|item| {
            let name = item
                .select(&ITEM_NAME)
                .next()
                .map(|a| a.text().collect::<String>().trim().to_string())?;
            let id = item
                .select(&ITEM_POSTER)
                .next()
                .and_then(|a| a.value().attr("data-id"))?
                .trim()
                .to_string();
            if name.is_empty() || id.is_empty() {
                return None;
            }
            let declared_type = item
                .select(&ITEM_INFO)
                .find_map(|info| ShowType::parse(info.text().collect::<String>().trim()));
            Some(Candidate::new(name, id).with_type(declared_type))
        })
        .collect()
}

pub fn parse_episode_list(html: &str) -> Vec<EpisodeRef> {
    let doc = Html::parse_fragment(html);
    doc.select(&EPISODE_ITEM)
        .filter_map(|el| {
            let number = el.value().attr("data-number")?.trim().parse().ok()?;
            let id = el.value().attr("data-id")?.trim().to_string();
            Some(EpisodeRef { number, id })
        })
        .collect()
}

pub fn parse_server_list(html: &str) -> Vec<ServerRef> {
    let doc = Html::parse_fragment(html);
    doc.select(&SERVER_ITEM)
        .filter_map(|el| {
            let id = el.value().attr("data-id")?.trim().to_string();
            if id.is_empty() {
                return None;
            }
            let name = el.text().collect::<String>().trim().to_string();
            let label = match (name.is_empty(), el.value().attr("data-type")) {
                (true, _) => None,
                (false, Some(track)) => Some(format!("{} ({})", name, track)),
                (false, None) => Some(name),
            };
            Some(ServerRef { id, label })
        })
        .collect()
}

fn skip_times(entries: &[SkipEntry]) -> Option<SkipTimes> {
    let mut skip = SkipTimes::default();
    for entry in entries {
        if entry.end_time <= entry.start_time {
            continue;
        }
        let window = SkipWindow {
            start: entry.start_time,
            end: entry.end_time,
        };
        match entry.skip_type.to_ascii_lowercase().as_str() {
            "op" | "intro" | "opening" => skip.intro = Some(window),
            "ed" | "outro" | "ending" => skip.outro = Some(window),
            _ => {}
        }
    }
    (skip.intro.is_some() || skip.outro.is_some()).then_some(skip)
}
