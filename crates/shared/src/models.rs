//! Data models for the resolution pipeline.
//!
//! This module defines the structures that flow from the metadata lookup,
//! through the source adapters, to the final result handed to callers.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Declared release format of a title
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShowType {
    Movie,
    Tv,
}

impl ShowType {
    /// Parse a loose type label ("TV", "Movie", "TV_SHORT", ...).
    ///
    /// Labels that are neither a movie nor a regular series (OVA, ONA, specials)
    /// yield `None` so they never act as a hard filter.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "MOVIE" | "MOVIES" | "FILM" => Some(ShowType::Movie),
            "TV" | "TV_SHORT" | "TV SHORT" | "SERIES" => Some(ShowType::Tv),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShowType::Movie => write!(f, "MOVIE"),
            ShowType::Tv => write!(f, "TV"),
        }
    }
}

/// What a caller asked for, after metadata resolution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TitleQuery {
    pub raw_identifier: String,
    /// Primary title first, then alternates
    pub resolved_titles: Vec<String>,
    pub total_episodes_known: Option<u32>,
    pub show_type: Option<ShowType>,
}

impl TitleQuery {
    /// Build a query from a free-text title, skipping the metadata service.
    pub fn from_title(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            raw_identifier: title.clone(),
            resolved_titles: vec![title],
            total_episodes_known: None,
            show_type: None,
        }
    }

    pub fn primary_title(&self) -> &str {
        self.resolved_titles
            .first()
            .map(String::as_str)
            .unwrap_or(self.raw_identifier.as_str())
    }
}

/// How a source numbers its episodes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EpisodeNumbering {
    /// One absolute counter across the whole run
    #[default]
    Flat,
    /// Episode numbers restart every season
    Seasonal,
}

fn default_enabled() -> bool {
    true
}

/// Static configuration of one streaming site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Lower is tried first
    pub priority: i32,
    pub timeout_ms: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub numbering: EpisodeNumbering,
    /// Named URL templates; placeholders are written as `{name}`
    #[serde(default)]
    pub url_patterns: BTreeMap<String, String>,
}

impl SourceDescriptor {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Render a named URL template, resolving site-relative results against `base_url`.
    ///
    /// Returns `None` if the template is not configured.
    pub fn url_for(&self, pattern: &str, vars: &[(&str, &str)]) -> Option<String> {
        let template = self.url_patterns.get(pattern)?;
        let mut rendered = template.replace("{base}", self.base_url.trim_end_matches('/'));
        for (name, value) in vars {
            rendered = rendered.replace(&format!("{{{}}}", name), value);
        }

        if rendered.starts_with("http://") || rendered.starts_with("https://") {
            Some(rendered)
        } else {
            Some(format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                rendered.trim_start_matches('/')
            ))
        }
    }
}

/// One search hit from a source, scored against the query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateMatch {
    pub source_title: String,
    /// Site-internal id or slug
    pub source_identifier: String,
    pub score: i64,
    pub declared_type: Option<ShowType>,
}

/// How the requested episode number was translated for a source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingKind {
    Exact,
    PatternCalculated,
    BoundaryCalculated,
    ProgressiveFallback,
    LatestAvailable,
}

impl MappingKind {
    pub fn as_str(&self) -> &str {
        match self {
            MappingKind::Exact => "exact",
            MappingKind::PatternCalculated => "pattern_calculated",
            MappingKind::BoundaryCalculated => "boundary_calculated",
            MappingKind::ProgressiveFallback => "progressive_fallback",
            MappingKind::LatestAvailable => "latest_available",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EpisodeMapping {
    pub requested_episode: u32,
    pub resolved_season: u32,
    pub resolved_episode: u32,
    pub mapping_kind: MappingKind,
    pub explanation: String,
}

impl EpisodeMapping {
    /// The requested number was used as-is.
    pub fn exact(requested_episode: u32, season: u32) -> Self {
        Self {
            requested_episode,
            resolved_season: season,
            resolved_episode: requested_episode,
            mapping_kind: MappingKind::Exact,
            explanation: format!(
                "episode {} found as season {} episode {}",
                requested_episode, season, requested_episode
            ),
        }
    }

    /// True if the caller got a different episode than the one requested.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.mapping_kind,
            MappingKind::ProgressiveFallback | MappingKind::LatestAvailable
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerKind {
    Iframe,
    DirectMedia,
}

/// One playable stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamServer {
    pub display_name: String,
    pub url: String,
    pub kind: ServerKind,
    pub provider_label: String,
    pub quality_label: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SkipWindow {
    pub start: f64,
    pub end: f64,
}

/// Intro/outro timestamps, when a source publishes them
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SkipTimes {
    pub intro: Option<SkipWindow>,
    pub outro: Option<SkipWindow>,
}

/// One source that was tried and did not produce the result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Observability data attached to every result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AttemptReport {
    pub sources_attempted: usize,
    pub elapsed_ms: u64,
    /// Sources that failed before the winning one, in the order they failed
    pub failures: Vec<SourceFailure>,
    pub from_cache: bool,
}

/// Final answer handed to the presentation layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolutionResult {
    pub source_id: String,
    pub title_used: String,
    pub episode_mapping: EpisodeMapping,
    /// Never empty; `servers[0]` is the primary server
    pub servers: Vec<StreamServer>,
    pub skip: Option<SkipTimes>,
    pub fetched_at: DateTime<Utc>,
    pub attempts: AttemptReport,
}

impl ResolutionResult {
    pub fn primary(&self) -> Option<&StreamServer> {
        self.servers.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SourceDescriptor {
        let mut url_patterns = BTreeMap::new();
        url_patterns.insert("series".to_string(), "/series/{slug}".to_string());
        url_patterns.insert("mirror".to_string(), "https://cdn.test/{slug}/{episode}".to_string());
        SourceDescriptor {
            id: "mock".to_string(),
            display_name: "Mock".to_string(),
            base_url: "https://site.test/".to_string(),
            priority: 1,
            timeout_ms: 1000,
            enabled: true,
            numbering: EpisodeNumbering::Flat,
            url_patterns,
        }
    }

    #[test]
    fn test_url_for_relative_template() {
        let d = descriptor();
        assert_eq!(
            d.url_for("series", &[("slug", "one-piece")]).as_deref(),
            Some("https://site.test/series/one-piece")
        );
    }

    #[test]
    fn test_url_for_absolute_template() {
        let d = descriptor();
        assert_eq!(
            d.url_for("mirror", &[("slug", "x"), ("episode", "5")]).as_deref(),
            Some("https://cdn.test/x/5")
        );
        assert_eq!(d.url_for("missing", &[]), None);
    }

    #[test]
    fn test_show_type_parse() {
        assert_eq!(ShowType::parse("Movie"), Some(ShowType::Movie));
        assert_eq!(ShowType::parse(" tv "), Some(ShowType::Tv));
        assert_eq!(ShowType::parse("TV_SHORT"), Some(ShowType::Tv));
        assert_eq!(ShowType::parse("OVA"), None);
    }

    #[test]
    fn test_exact_mapping_invariant() {
        let mapping = EpisodeMapping::exact(5, 2);
        assert_eq!(mapping.resolved_episode, 5);
        assert_eq!(mapping.resolved_season, 2);
        assert_eq!(mapping.mapping_kind, MappingKind::Exact);
        assert!(!mapping.is_degraded());
    }

    #[test]
    fn test_mapping_kind_serialization() {
        let json = serde_json::to_string(&MappingKind::PatternCalculated).unwrap();
        assert_eq!(json, "\"PATTERN_CALCULATED\"");
        let json = serde_json::to_string(&ServerKind::DirectMedia).unwrap();
        assert_eq!(json, "\"DIRECT_MEDIA\"");
    }

    #[test]
    fn test_primary_title_falls_back_to_identifier() {
        let mut query = TitleQuery::from_title("Naruto");
        assert_eq!(query.primary_title(), "Naruto");
        query.resolved_titles.clear();
        assert_eq!(query.primary_title(), "Naruto");
    }
}
