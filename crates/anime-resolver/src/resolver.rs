//! Resolution orchestrator.
//!
//! Turns an identifier and an episode number into playable servers:
//! metadata lookup, cache check, then a fan-out over the source registry
//! (sequential by priority, or a race), with episode mapping for
//! season-organized sources.

use crate::api::{AniListClient, MetadataResolver};
use crate::cache::{CacheKey, ResultCache};
use crate::mapper::EpisodeMapper;
use crate::matcher::clean_title;
use crate::metrics::MetricsCollector;
use crate::sources::{build_adapters, SourceAdapter, SourceHit};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use shared::{
    AttemptReport, Config, EpisodeMapping, EpisodeNumbering, FanOutPolicy, MappingConfig,
    PreferredMode, ResolutionResult, ResolveError, ResolverConfig, Result, SourceDescriptor,
    SourceFailure, TitleQuery,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Which sources get season-aware episode mapping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MappingMode {
    /// Sources declared as season-organized
    #[default]
    Auto,
    /// None; every source is asked for the requested number as-is
    Flat,
    /// Every source that can list seasons
    Seasonal,
}

/// Per-request knobs
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub preferred_source: Option<String>,
    /// Skip the cache lookup; the fresh result is still stored
    pub bypass_cache: bool,
    pub mapping: MappingMode,
}

/// Sources that failed during one fan-out, in the order they failed
type Failures = Vec<(String, ResolveError)>;

pub struct Resolver {
    metadata: Arc<dyn MetadataResolver>,
    /// Ascending priority
    sources: Vec<Arc<dyn SourceAdapter>>,
    cache: ResultCache,
    mapper: EpisodeMapper,
    metrics: Arc<dyn MetricsCollector>,
    policy: FanOutPolicy,
    preferred_mode: PreferredMode,
}

impl Resolver {
    pub fn new(
        metadata: Arc<dyn MetadataResolver>,
        mut sources: Vec<Arc<dyn SourceAdapter>>,
        config: &ResolverConfig,
        mapping: MappingConfig,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        sources.sort_by_key(|s| s.descriptor().priority);

        Self {
            metadata,
            sources,
            cache: ResultCache::new(
                config.cache_enabled,
                Duration::from_secs(config.cache_ttl_secs),
            ),
            mapper: EpisodeMapper::new(mapping),
            metrics,
            policy: config.policy,
            preferred_mode: config.preferred_mode,
        }
    }

    /// Wire up AniList and the built-in adapters from a validated configuration
    pub fn from_config(config: &Config, metrics: Arc<dyn MetricsCollector>) -> Result<Self> {
        config.validate()?;

        let metadata = AniListClient::new(
            config.metadata.endpoint.as_str(),
            Duration::from_millis(config.metadata.timeout_ms),
        )?;
        let sources = build_adapters(config)?;
        info!(
            sources = sources.len(),
            policy = ?config.resolver.policy,
            "Resolver initialized"
        );

        Ok(Self::new(
            Arc::new(metadata),
            sources,
            &config.resolver,
            config.mapping.clone(),
            metrics,
        ))
    }

    /// Replace the result cache
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Registered sources in the order they are tried
    pub fn sources(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().map(|s| s.descriptor())
    }

    /// Resolve `episode` of the title behind `identifier`.
    ///
    /// All-digit identifiers are AniList ids and go through the metadata
    /// service; anything else is taken as a title.
    pub async fn resolve(
        &self,
        identifier: &str,
        episode: u32,
        options: &ResolveOptions,
    ) -> Result<ResolutionResult> {
        if episode == 0 {
            return Err(ResolveError::not_found("episode numbers start at 1"));
        }

        let query = self.title_query(identifier).await?;
        info!(
            identifier = %query.raw_identifier,
            title = %query.primary_title(),
            episode,
            "Resolving"
        );
        self.resolve_title(&query, episode, options).await
    }

    async fn title_query(&self, identifier: &str) -> Result<TitleQuery> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(ResolveError::not_found("empty identifier"));
        }

        if identifier.chars().all(|c| c.is_ascii_digit()) {
            let outcome = self.metadata.resolve(identifier).await;
            self.metrics.record_metadata_lookup(outcome.is_ok());
            if let Err(e) = &outcome {
                warn!(identifier, error = %e, "Metadata lookup failed");
                self.metrics.record_failure(e.kind());
            }
            return outcome;
        }

        let title = clean_title(identifier);
        if title.is_empty() {
            return Err(ResolveError::not_found(format!(
                "'{}' contains no searchable title",
                identifier
            )));
        }
        Ok(TitleQuery {
            raw_identifier: identifier.to_string(),
            ..TitleQuery::from_title(title)
        })
    }

    /// Resolve an already-built query, consulting and filling the cache
    pub async fn resolve_title(
        &self,
        query: &TitleQuery,
        episode: u32,
        options: &ResolveOptions,
    ) -> Result<ResolutionResult> {
        let plan = self.plan(options.preferred_source.as_deref())?;
        let key = CacheKey::new(
            options.preferred_source.as_deref(),
            query.primary_title(),
            episode,
        );

        if !options.bypass_cache {
            if let Some(mut cached) = self.cache.get(&key) {
                self.metrics.record_cache_hit();
                cached.attempts.from_cache = true;
                info!(source = %cached.source_id, episode, "Served from cache");
                return Ok(cached);
            }
        }

        let started = Instant::now();
        let outcome = match self.policy {
            FanOutPolicy::Sequential => {
                self.run_sequential(&plan, query, episode, options.mapping)
                    .await
            }
            FanOutPolicy::Race => self.run_race(&plan, query, episode, options.mapping).await,
        };
        let elapsed = started.elapsed();

        match outcome {
            Ok(mut result) => {
                result.attempts.elapsed_ms = elapsed.as_millis() as u64;
                self.metrics.record_success(&result.source_id, elapsed);
                info!(
                    source = %result.source_id,
                    mapping = result.episode_mapping.mapping_kind.as_str(),
                    servers = result.servers.len(),
                    elapsed_ms = result.attempts.elapsed_ms,
                    "Resolved"
                );
                self.cache.set(key, result.clone(), self.cache.default_ttl());
                Ok(result)
            }
            Err(failures) => {
                let strict = options.preferred_source.is_some()
                    && self.preferred_mode == PreferredMode::Strict;
                let err = aggregate_failures(query, episode, failures, strict);
                self.metrics.record_failure(err.kind());
                warn!(title = %query.primary_title(), episode, error = %err, "Resolution failed");
                Err(err)
            }
        }
    }

    /// Sources to try for one request, in order
    fn plan(&self, preferred: Option<&str>) -> Result<Vec<Arc<dyn SourceAdapter>>> {
        if self.sources.is_empty() {
            return Err(ResolveError::configuration("no sources are enabled"));
        }

        let Some(preferred) = preferred else {
            return Ok(self.sources.clone());
        };
        let Some(chosen) = self.sources.iter().find(|s| s.id() == preferred) else {
            return Err(ResolveError::configuration(format!(
                "unknown or disabled source '{}'",
                preferred
            )));
        };

        let mut plan = vec![Arc::clone(chosen)];
        if self.preferred_mode == PreferredMode::Soft {
            plan.extend(self.sources.iter().filter(|s| s.id() != preferred).cloned());
        }
        Ok(plan)
    }

    async fn run_sequential(
        &self,
        plan: &[Arc<dyn SourceAdapter>],
        query: &TitleQuery,
        episode: u32,
        mode: MappingMode,
    ) -> std::result::Result<ResolutionResult, Failures> {
        let mut failures: Failures = Vec::new();

        for (index, adapter) in plan.iter().enumerate() {
            let id = adapter.id().to_string();
            debug!(source = %id, position = index + 1, of = plan.len(), "Trying source");

            match self.attempt(adapter.as_ref(), query, episode, mode).await {
                Ok((mapping, hit)) => {
                    if !failures.is_empty() {
                        let chain: Vec<&str> = failures.iter().map(|(id, _)| id.as_str()).collect();
                        info!(source = %id, fallback_chain = ?chain, "Resolved after fallback");
                    }
                    return Ok(build_result(&id, mapping, hit, index + 1, &failures));
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "Source failed");
                    self.metrics.record_source_failure(&id, e.kind());
                    failures.push((id, e));
                }
            }
        }

        Err(failures)
    }

    async fn run_race(
        &self,
        plan: &[Arc<dyn SourceAdapter>],
        query: &TitleQuery,
        episode: u32,
        mode: MappingMode,
    ) -> std::result::Result<ResolutionResult, Failures> {
        let mut pending: FuturesUnordered<_> = plan
            .iter()
            .map(|adapter| async move {
                let outcome = self.attempt(adapter.as_ref(), query, episode, mode).await;
                (adapter.id().to_string(), outcome)
            })
            .collect();
        let mut failures: Failures = Vec::new();

        while let Some((id, outcome)) = pending.next().await {
            match outcome {
                Ok((mapping, hit)) => {
                    // Dropping the stream abandons the slower sources
                    debug!(source = %id, abandoned = pending.len(), "Race won");
                    return Ok(build_result(&id, mapping, hit, plan.len(), &failures));
                }
                Err(e) => {
                    warn!(source = %id, error = %e, "Source failed");
                    self.metrics.record_source_failure(&id, e.kind());
                    failures.push((id, e));
                }
            }
        }

        Err(failures)
    }

    /// One source, bounded by its timeout. A timeout counts as not found.
    async fn attempt(
        &self,
        adapter: &dyn SourceAdapter,
        query: &TitleQuery,
        episode: u32,
        mode: MappingMode,
    ) -> Result<(EpisodeMapping, SourceHit)> {
        let descriptor = adapter.descriptor();
        let (mapping, hit) = match tokio::time::timeout(
            descriptor.timeout(),
            self.run_adapter(adapter, query, episode, mode),
        )
        .await
        {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(ResolveError::not_found(format!(
                    "timed out after {} ms",
                    descriptor.timeout_ms
                )))
            }
        };

        if hit.servers.is_empty() {
            return Err(ResolveError::not_found(format!(
                "episode {} found but no playable servers",
                episode
            )));
        }
        Ok((mapping, hit))
    }

    async fn run_adapter(
        &self,
        adapter: &dyn SourceAdapter,
        query: &TitleQuery,
        episode: u32,
        mode: MappingMode,
    ) -> Result<(EpisodeMapping, SourceHit)> {
        let seasonal = match mode {
            MappingMode::Flat => false,
            MappingMode::Seasonal => true,
            MappingMode::Auto => adapter.descriptor().numbering == EpisodeNumbering::Seasonal,
        };

        if seasonal {
            if let Some(catalog) = adapter.open_catalog(query).await? {
                let catalog = catalog.as_ref();
                debug!(source = %adapter.id(), title = %catalog.title_used(), "Mapping episode");
                return self
                    .mapper
                    .map(episode, |season, number| catalog.probe(season, number))
                    .await;
            }
        }

        let hit = adapter.search(query, episode, None).await?;
        let mapping = EpisodeMapping::exact(episode, hit.season.unwrap_or(1));
        Ok((mapping, hit))
    }
}

fn build_result(
    source_id: &str,
    mapping: EpisodeMapping,
    hit: SourceHit,
    sources_attempted: usize,
    failures: &[(String, ResolveError)],
) -> ResolutionResult {
    ResolutionResult {
        source_id: source_id.to_string(),
        title_used: hit.title_used,
        episode_mapping: mapping,
        servers: hit.servers,
        skip: hit.skip,
        fetched_at: Utc::now(),
        attempts: AttemptReport {
            sources_attempted,
            elapsed_ms: 0,
            failures: failures
                .iter()
                .map(|(id, e)| SourceFailure {
                    source_id: id.clone(),
                    kind: e.kind(),
                    message: e.message().to_string(),
                })
                .collect(),
            from_cache: false,
        },
    }
}

/// Final error once every planned source failed.
///
/// A strictly preferred source reports its own error; otherwise the result is
/// a not-found carrying every source's message.
fn aggregate_failures(
    query: &TitleQuery,
    episode: u32,
    mut failures: Failures,
    strict: bool,
) -> ResolveError {
    if strict && failures.len() == 1 {
        if let Some((id, err)) = failures.pop() {
            return err.labelled(&id);
        }
    }

    let detail = failures
        .iter()
        .map(|(id, e)| format!("{}: {}", id, e.message()))
        .collect::<Vec<_>>()
        .join("; ");
    ResolveError::not_found(format!(
        "episode {} of '{}' not found on any of {} sources ({})",
        episode,
        query.primary_title(),
        failures.len(),
        detail
    ))
}
