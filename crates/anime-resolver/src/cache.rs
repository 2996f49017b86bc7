//! Short-lived memoization of successful resolutions.
//!
//! Entries expire passively: an expired entry is dropped when it is read.
//! Nothing is persisted, and a broken cache behaves like an empty one.

use shared::ResolutionResult;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Cache key: source (empty for "any source"), normalized title, requested episode
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source_id: String,
    pub title: String,
    pub episode: u32,
}

impl CacheKey {
    pub fn new(source_id: Option<&str>, title: &str, episode: u32) -> Self {
        Self {
            source_id: source_id.unwrap_or_default().to_string(),
            title: normalize_title(title),
            episode,
        }
    }
}

/// Lowercase and collapse whitespace so trivially different spellings share an entry
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: ResolutionResult,
    expires_at: Instant,
}

/// In-memory TTL cache for resolution results
pub struct ResultCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    /// Whether caching is enabled
    enabled: bool,
    default_ttl: Duration,
}

impl ResultCache {
    /// Create a new result cache
    pub fn new(enabled: bool, default_ttl: Duration) -> Self {
        if enabled {
            info!(ttl_secs = default_ttl.as_secs(), "Result cache initialized");
        }
        Self {
            entries: Mutex::new(HashMap::new()),
            enabled,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get a cached result if present and not expired
    pub fn get(&self, key: &CacheKey) -> Option<ResolutionResult> {
        if !self.enabled {
            return None;
        }

        let mut entries = self.entries.lock().ok()?;
        let expired = match entries.get(key) {
            Some(entry) if Instant::now() <= entry.expires_at => {
                debug!(source = %key.source_id, title = %key.title, episode = key.episode, "Cache hit");
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            debug!(title = %key.title, episode = key.episode, "Cache entry expired");
        } else {
            debug!(title = %key.title, episode = key.episode, "Cache miss");
        }
        None
    }

    /// Store a result for `ttl`
    pub fn set(&self, key: CacheKey, value: ResolutionResult, ttl: Duration) {
        if !self.enabled {
            return;
        }

        if let Ok(mut entries) = self.entries.lock() {
            debug!(source = %key.source_id, title = %key.title, episode = key.episode, ttl_secs = ttl.as_secs(), "Cache stored");
            entries.insert(
                key,
                CacheEntry {
                    value,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Drop one entry, or everything when `key` is `None`
    pub fn clear(&self, key: Option<&CacheKey>) {
        if let Ok(mut entries) = self.entries.lock() {
            match key {
                Some(key) => {
                    entries.remove(key);
                }
                None => {
                    entries.clear();
                    info!("Cache cleared");
                }
            }
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let Ok(entries) = self.entries.lock() else {
            return CacheStats::default();
        };
        let now = Instant::now();
        CacheStats {
            total_entries: entries.len(),
            expired_entries: entries.values().filter(|e| now > e.expires_at).count(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
}
