//! Streaming-site adapters.
//!
//! An adapter turns a [`TitleQuery`] plus an episode number into playable
//! servers for one site. Sites that restart numbering every season also hand
//! out a [`SeasonCatalog`] so the episode mapper can probe (season, episode)
//! pairs without repeating the title lookup.

pub mod animeworld;
pub mod satoru;
pub mod watchanimeworld;

pub use animeworld::AnimeWorldAdapter;
pub use satoru::SatoruAdapter;
pub use watchanimeworld::WatchAnimeWorldAdapter;

use crate::matcher::{merge_candidates, select_best, title_variants, Candidate};
use async_trait::async_trait;
use shared::{
    CandidateMatch, Config, ResolveError, Result, ShowType, SkipTimes, SourceDescriptor,
    StreamServer, TitleQuery,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolved titles tried per source before giving up
const MAX_TITLES_PER_SOURCE: usize = 3;

/// What one adapter found for one episode
#[derive(Debug, Clone, PartialEq)]
pub struct SourceHit {
    /// Title as the site spells it
    pub title_used: String,
    /// Season the episode was found in, for season-organized sites
    pub season: Option<u32>,
    pub episode: u32,
    /// Never empty
    pub servers: Vec<StreamServer>,
    pub skip: Option<SkipTimes>,
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Look up `episode` of the queried title.
    ///
    /// `season` is only meaningful for season-organized sites; `None` lets the
    /// adapter pick (first season carrying that episode number).
    async fn search(
        &self,
        query: &TitleQuery,
        episode: u32,
        season: Option<u32>,
    ) -> Result<SourceHit>;

    /// Open the title's season listing for episode mapping.
    ///
    /// Flat-numbered sites keep the default and are searched directly.
    async fn open_catalog(&self, _query: &TitleQuery) -> Result<Option<Box<dyn SeasonCatalog>>> {
        Ok(None)
    }
}

/// Season listing of one title on one site
#[async_trait]
pub trait SeasonCatalog: Send + Sync {
    fn title_used(&self) -> &str;

    /// Servers for (season, episode), or `None` if the site does not have it.
    async fn probe(&self, season: u32, episode: u32) -> Option<SourceHit>;
}

/// Look a template up on the descriptor, failing with a configuration error if it is missing
pub(crate) fn require_url(
    descriptor: &SourceDescriptor,
    pattern: &str,
    vars: &[(&str, &str)],
) -> Result<String> {
    descriptor.url_for(pattern, vars).ok_or_else(|| {
        ResolveError::configuration(format!(
            "source '{}' has no '{}' url pattern",
            descriptor.id, pattern
        ))
    })
}

/// Search for `title`, widening to shorter prefixes only when the full title finds nothing.
///
/// Once widening starts every remaining variant is searched and the results
/// are merged. Failing variant searches are skipped; the last failure is
/// returned only if no variant produced candidates.
pub(crate) async fn collect_candidates<F, Fut>(title: &str, mut search: F) -> Result<Vec<Candidate>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Candidate>>>,
{
    let mut all = Vec::new();
    let mut last_error = None;

    for (i, variant) in title_variants(title).into_iter().enumerate() {
        if i == 1 && !all.is_empty() {
            break;
        }
        match search(variant.clone()).await {
            Ok(found) => {
                debug!(variant = %variant, count = found.len(), "Search returned");
                merge_candidates(&mut all, found);
            }
            Err(e) => {
                debug!(variant = %variant, error = %e, "Search variant failed");
                last_error = Some(e);
            }
        }
    }

    match (all.is_empty(), last_error) {
        (true, Some(e)) => Err(e),
        _ => Ok(all),
    }
}

/// Try the query's titles in order and return the first one the site matches.
///
/// Candidates are always scored against the full title being tried, never
/// against the shortened search variant.
pub(crate) async fn match_title<F, Fut>(
    query: &TitleQuery,
    expected_type: Option<ShowType>,
    mut search: F,
) -> Result<(String, CandidateMatch)>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Vec<Candidate>>>,
{
    let mut last_error = None;

    for title in query.resolved_titles.iter().take(MAX_TITLES_PER_SOURCE) {
        let outcome = match collect_candidates(title, &mut search).await {
            Ok(candidates) => select_best(title, &candidates, expected_type),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(best) => {
                info!(title = %title, matched = %best.source_title, score = best.score, "Matched title");
                return Ok((title.clone(), best));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        ResolveError::not_found(format!("no titles to search for '{}'", query.raw_identifier))
    }))
}

/// Build the adapters for every enabled source, in priority order.
///
/// A descriptor whose id names no known adapter is a configuration error.
pub fn build_adapters(config: &Config) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let user_agent = config.resolver.user_agent.as_str();
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();

    for descriptor in config.enabled_sources() {
        let adapter: Arc<dyn SourceAdapter> = match descriptor.id.as_str() {
            satoru::SOURCE_ID => Arc::new(SatoruAdapter::new(descriptor, user_agent)?),
            watchanimeworld::SOURCE_ID => {
                Arc::new(WatchAnimeWorldAdapter::new(descriptor, user_agent)?)
            }
            animeworld::SOURCE_ID => Arc::new(AnimeWorldAdapter::new(descriptor, user_agent)?),
            other => {
                return Err(ResolveError::configuration(format!(
                    "no adapter implements source '{}'",
                    other
                )))
            }
        };
        adapters.push(adapter);
    }

    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_full_title_searched_first() {
        let searched = Mutex::new(Vec::new());
        let found = collect_candidates("Attack on Titan Final Season", |q| {
            searched.lock().unwrap().push(q.clone());
            async move { Ok(vec![Candidate::new("Attack on Titan: The Final Season", "aot-fs")]) }
        })
        .await
        .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(*searched.lock().unwrap(), vec!["Attack on Titan Final Season"]);
    }

    #[tokio::test]
    async fn test_variants_widen_when_full_title_misses() {
        let searched = Mutex::new(Vec::new());
        let found = collect_candidates("Boku no Hero Academia", |q| {
            searched.lock().unwrap().push(q.clone());
            let hits = if q == "Boku no Hero" {
                vec![Candidate::new("Boku no Hero Academia", "bnha")]
            } else {
                Vec::new()
            };
            async move { Ok(hits) }
        })
        .await
        .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "bnha");
        assert_eq!(
            *searched.lock().unwrap(),
            vec!["Boku no Hero Academia", "Boku no Hero", "Boku no"]
        );
    }

    #[tokio::test]
    async fn test_widening_merges_every_variant() {
        let searched = Mutex::new(Vec::new());
        let found = collect_candidates("Alpha Beta Gamma Delta", |q| {
            searched.lock().unwrap().push(q.clone());
            let hits = match q.as_str() {
                "Alpha Beta Gamma" => vec![Candidate::new("Alpha Beta Gamma Zeta", "wrong")],
                "Alpha Beta" => vec![Candidate::new("Alpha Beta Gamma Delta", "right")],
                _ => Vec::new(),
            };
            async move { Ok(hits) }
        })
        .await
        .unwrap();

        let ids: Vec<&str> = found.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["wrong", "right"]);
        assert_eq!(
            *searched.lock().unwrap(),
            vec!["Alpha Beta Gamma Delta", "Alpha Beta Gamma", "Alpha Beta"]
        );
    }

    #[tokio::test]
    async fn test_search_errors_surface_when_nothing_found() {
        let result = collect_candidates("One Piece", |_| async {
            Err::<Vec<Candidate>, _>(ResolveError::upstream("HTTP 503"))
        })
        .await;
        assert_eq!(result.unwrap_err().kind(), shared::ErrorKind::Upstream);
    }

    #[tokio::test]
    async fn test_match_title_falls_back_to_alternate_title() {
        let query = TitleQuery {
            raw_identifier: "20".to_string(),
            resolved_titles: vec!["Naruto Shippuden".to_string(), "Naruto Shippūden".to_string()],
            total_episodes_known: None,
            show_type: None,
        };

        let (title, best) = match_title(&query, None, |q| {
            let hits = if q == "Naruto Shippūden" {
                vec![Candidate::new("Naruto Shippūden", "355")]
            } else {
                Vec::new()
            };
            async move { Ok(hits) }
        })
        .await
        .unwrap();

        assert_eq!(title, "Naruto Shippūden");
        assert_eq!(best.source_identifier, "355");
    }

    #[test]
    fn test_unknown_source_rejected() {
        let mut config = Config::default();
        config.sources[0].id = "nyaa".to_string();
        let err = build_adapters(&config).err().unwrap();
        assert_eq!(err.kind(), shared::ErrorKind::Configuration);
        assert!(err.to_string().contains("nyaa"));
    }

    #[test]
    fn test_registry_respects_enabled_and_priority() {
        let mut config = Config::default();
        config.sources[0].priority = 10;
        config.sources[1].enabled = false;
        let adapters = build_adapters(&config).unwrap();
        let ids: Vec<&str> = adapters.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["animeworld", "satoru"]);
    }
}
