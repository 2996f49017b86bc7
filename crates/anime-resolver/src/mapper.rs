//! Flat episode number → (season, episode) mapping.
//!
//! Sources that restart numbering every season cannot be asked for "episode
//! 52" directly. The mapper runs an ordered waterfall of guesses against a
//! probe function and stops at the first guess the source can serve:
//!
//! 1. exact: the same number in every season
//! 2. pattern: divide by common per-season counts
//! 3. boundary: divide by every count in a configured range
//! 4. progressive: nearby episode numbers (degraded)
//! 5. latest available: any episode at all, newest first (degraded)
//!
//! Each step is exhausted before the next one starts. A pair is never probed
//! twice within one mapping.

use shared::{EpisodeMapping, MappingConfig, MappingKind, ResolveError, Result};
use std::collections::HashSet;
use std::future::Future;
use tracing::{debug, info, trace};

/// Remembers which pairs were already probed
struct Prober<F> {
    probe: F,
    tried: HashSet<(u32, u32)>,
}

impl<F, Fut, T> Prober<F>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    async fn attempt(&mut self, season: u32, episode: u32) -> Option<T> {
        if episode == 0 || season == 0 || !self.tried.insert((season, episode)) {
            return None;
        }
        trace!(season, episode, "Probing");
        (self.probe)(season, episode).await
    }

    fn count(&self) -> usize {
        self.tried.len()
    }
}

pub struct EpisodeMapper {
    config: MappingConfig,
}

impl EpisodeMapper {
    pub fn new(config: MappingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MappingConfig {
        &self.config
    }

    /// Find a (season, episode) pair the probe can serve for `target`.
    ///
    /// The probe reports absence as `None`; it should not fail. Returns the
    /// mapping together with whatever the successful probe produced.
    pub async fn map<T, F, Fut>(&self, target: u32, probe: F) -> Result<(EpisodeMapping, T)>
    where
        F: FnMut(u32, u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if target == 0 {
            return Err(ResolveError::not_found("episode numbers start at 1"));
        }

        let cfg = &self.config;
        let mut prober = Prober {
            probe,
            tried: HashSet::new(),
        };

        // 1. Exact number, season unknown
        debug!(target, max_seasons = cfg.max_seasons, "Mapping step: exact");
        for season in 1..=cfg.max_seasons {
            if let Some(hit) = prober.attempt(season, target).await {
                return Ok((EpisodeMapping::exact(target, season), hit));
            }
        }

        // 2. Common per-season counts
        debug!(target, counts = ?cfg.season_counts, "Mapping step: pattern");
        for &count in &cfg.season_counts {
            for season in 1..=cfg.max_seasons {
                let Some(offset) = count.checked_mul(season - 1) else {
                    break;
                };
                if offset >= target {
                    break;
                }
                let episode = target - offset;
                if episode > count {
                    continue;
                }
                if let Some(hit) = prober.attempt(season, episode).await {
                    let mapping = EpisodeMapping {
                        requested_episode: target,
                        resolved_season: season,
                        resolved_episode: episode,
                        mapping_kind: MappingKind::PatternCalculated,
                        explanation: format!(
                            "episode {} read as season {} episode {} assuming {} episodes per season",
                            target, season, episode, count
                        ),
                    };
                    return Ok((mapping, hit));
                }
            }
        }

        // 3. Every per-season count in the boundary range
        debug!(
            target,
            min = cfg.boundary_min,
            max = cfg.boundary_max,
            "Mapping step: boundary"
        );
        for count in cfg.boundary_min..=cfg.boundary_max {
            if count == 0 || cfg.season_counts.contains(&count) {
                continue;
            }
            let season = (target - 1) / count + 1;
            let episode = (target - 1) % count + 1;
            if season > cfg.max_seasons {
                continue;
            }
            if let Some(hit) = prober.attempt(season, episode).await {
                let mapping = EpisodeMapping {
                    requested_episode: target,
                    resolved_season: season,
                    resolved_episode: episode,
                    mapping_kind: MappingKind::BoundaryCalculated,
                    explanation: format!(
                        "episode {} read as season {} episode {} with a season boundary every {} episodes",
                        target, season, episode, count
                    ),
                };
                return Ok((mapping, hit));
            }
        }

        // 4. Nearby episodes, closest first
        debug!(target, window = cfg.progressive_window, "Mapping step: progressive");
        for distance in 1..=cfg.progressive_window {
            let below = target.checked_sub(distance).filter(|e| *e >= 1);
            let above = target.checked_add(distance);
            for episode in [below, above].into_iter().flatten() {
                for season in 1..=cfg.progressive_seasons {
                    if let Some(hit) = prober.attempt(season, episode).await {
                        let mapping = EpisodeMapping {
                            requested_episode: target,
                            resolved_season: season,
                            resolved_episode: episode,
                            mapping_kind: MappingKind::ProgressiveFallback,
                            explanation: format!(
                                "requested episode {} not found; returning nearby season {} episode {} instead",
                                target, season, episode
                            ),
                        };
                        info!(target, season, episode, "Mapped to a nearby episode");
                        return Ok((mapping, hit));
                    }
                }
            }
        }

        // 5. Anything playable, newest first
        debug!(
            target,
            cap = cfg.latest_episode_cap,
            seasons = cfg.latest_seasons,
            "Mapping step: latest available"
        );
        for season in (1..=cfg.latest_seasons).rev() {
            for episode in (1..=cfg.latest_episode_cap).rev() {
                if let Some(hit) = prober.attempt(season, episode).await {
                    let mapping = EpisodeMapping {
                        requested_episode: target,
                        resolved_season: season,
                        resolved_episode: episode,
                        mapping_kind: MappingKind::LatestAvailable,
                        explanation: format!(
                            "could not find requested episode {}; latest available is season {} episode {}",
                            target, season, episode
                        ),
                    };
                    info!(target, season, episode, "Mapped to the latest available episode");
                    return Ok((mapping, hit));
                }
            }
        }

        Err(ResolveError::not_found(format!(
            "episode {} not found after {} probes (exact over {} seasons, pattern, boundary {}-{}, progressive ±{}, latest available)",
            target,
            prober.count(),
            cfg.max_seasons,
            cfg.boundary_min,
            cfg.boundary_max,
            cfg.progressive_window
        )))
    }
}
