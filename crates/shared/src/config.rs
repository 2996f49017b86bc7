//! Configuration management for the resolver.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings. One file describes one deployment
//! profile: timeouts, the source registry, cache TTL and mapping strategy.

use crate::error::ResolveError;
use crate::models::{EpisodeNumbering, SourceDescriptor};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metadata service settings
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Fan-out and cache settings
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Episode-number mapping settings
    #[serde(default)]
    pub mapping: MappingConfig,

    /// Streaming source registry
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceDescriptor>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Metadata service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// AniList GraphQL endpoint
    pub endpoint: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

/// How sources are fanned out for one request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FanOutPolicy {
    /// Ascending priority, one at a time, first success wins
    #[default]
    Sequential,
    /// All sources at once, first success wins
    Race,
}

/// What happens when the caller names a source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PreferredMode {
    /// Try the preferred source first, then fall back to the others
    #[default]
    Soft,
    /// Only the preferred source is tried; its failure is the answer
    Strict,
}

/// Fan-out and cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub policy: FanOutPolicy,

    pub preferred_mode: PreferredMode,

    /// Enable the in-memory result cache
    pub cache_enabled: bool,

    /// Result cache time-to-live in seconds
    pub cache_ttl_secs: u64,

    /// User agent sent to every streaming site
    pub user_agent: String,
}

/// Episode-number mapping configuration
///
/// The numbers here are heuristics, not facts about any real catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappingConfig {
    /// Highest season probed by the exact and pattern steps
    pub max_seasons: u32,

    /// Plausible per-season episode counts tried by the pattern step
    pub season_counts: Vec<u32>,

    /// Range of per-season counts tried by the boundary step
    pub boundary_min: u32,
    pub boundary_max: u32,

    /// Largest distance from the requested episode tried by the progressive step
    pub progressive_window: u32,

    /// Seasons scanned by the progressive step
    pub progressive_seasons: u32,

    /// Highest episode number scanned by the latest-available step
    pub latest_episode_cap: u32,

    /// Seasons scanned by the latest-available step
    pub latest_seasons: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "data/logs".to_string(),
            default_level: "info".to_string(),
            console: true,
            file: false,
            json_format: false,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://graphql.anilist.co".to_string(),
            timeout_ms: 8000,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            policy: FanOutPolicy::Sequential,
            preferred_mode: PreferredMode::Soft,
            cache_enabled: true,
            cache_ttl_secs: 15 * 60,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        }
    }
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            max_seasons: 50,
            season_counts: vec![12, 13, 24, 25, 26, 50, 52, 100],
            boundary_min: 10,
            boundary_max: 120,
            progressive_window: 10,
            progressive_seasons: 10,
            latest_episode_cap: 200,
            latest_seasons: 10,
        }
    }
}

fn patterns(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, template)| (name.to_string(), template.to_string()))
        .collect()
}

/// Built-in source registry
pub fn default_sources() -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor {
            id: "satoru".to_string(),
            display_name: "Satoru".to_string(),
            base_url: "https://satoru.one".to_string(),
            priority: 1,
            timeout_ms: 15_000,
            enabled: true,
            numbering: EpisodeNumbering::Flat,
            url_patterns: patterns(&[
                ("search", "/filter?keyword={query}"),
                ("episodes", "/ajax/episode/list/{id}"),
                ("servers", "/ajax/episode/servers?episodeId={id}"),
                ("sources", "/ajax/episode/sources?id={id}"),
            ]),
        },
        SourceDescriptor {
            id: "watchanimeworld".to_string(),
            display_name: "WatchAnimeWorld".to_string(),
            base_url: "https://watchanimeworld.in".to_string(),
            priority: 2,
            timeout_ms: 15_000,
            enabled: true,
            numbering: EpisodeNumbering::Flat,
            url_patterns: patterns(&[("search", "/?s={query}")]),
        },
        SourceDescriptor {
            id: "animeworld".to_string(),
            display_name: "AnimeWorld".to_string(),
            base_url: "https://animeworld-india.me".to_string(),
            priority: 3,
            timeout_ms: 20_000,
            enabled: true,
            numbering: EpisodeNumbering::Seasonal,
            url_patterns: patterns(&[
                ("series", "/series/{slug}"),
                ("movie", "/movies/{slug}"),
                ("seasons", "/ajax/ajax.php"),
            ]),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            metadata: MetadataConfig::default(),
            resolver: ResolverConfig::default(),
            mapping: MappingConfig::default(),
            sources: default_sources(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            sources = config.sources.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Check the registry and mapping settings for contradictions
    pub fn validate(&self) -> std::result::Result<(), ResolveError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(ResolveError::configuration("source with empty id"));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(ResolveError::configuration(format!(
                    "duplicate source id '{}'",
                    source.id
                )));
            }
            if source.timeout_ms == 0 {
                return Err(ResolveError::configuration(format!(
                    "source '{}' has a zero timeout",
                    source.id
                )));
            }
        }

        let mapping = &self.mapping;
        if mapping.max_seasons == 0 {
            return Err(ResolveError::configuration("mapping.max_seasons must be at least 1"));
        }
        if mapping.season_counts.contains(&0) {
            return Err(ResolveError::configuration(
                "mapping.season_counts must not contain 0",
            ));
        }
        if mapping.boundary_min == 0 || mapping.boundary_min > mapping.boundary_max {
            return Err(ResolveError::configuration(
                "mapping.boundary_min must be in 1..=boundary_max",
            ));
        }

        Ok(())
    }

    /// Enabled sources in ascending priority; ties keep registry order
    pub fn enabled_sources(&self) -> Vec<SourceDescriptor> {
        let mut sources: Vec<SourceDescriptor> =
            self.sources.iter().filter(|s| s.enabled).cloned().collect();
        sources.sort_by_key(|s| s.priority);
        sources
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.resolver.cache_ttl_secs)
    }

    /// Get the path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.logging.log_dir)
    }
}
