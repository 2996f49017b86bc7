//! Resolution outcome counters.
//!
//! The resolver reports every outcome to an injected collector instead of
//! bumping process-wide counters.

use shared::ErrorKind;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub trait MetricsCollector: Send + Sync {
    /// A metadata lookup finished
    fn record_metadata_lookup(&self, success: bool);

    /// A request was answered from the result cache
    fn record_cache_hit(&self);

    /// One source failed (or timed out) for one request
    fn record_source_failure(&self, source_id: &str, kind: ErrorKind);

    /// A request produced a result
    fn record_success(&self, source_id: &str, elapsed: Duration);

    /// A request failed as a whole
    fn record_failure(&self, kind: ErrorKind);
}

/// Collector that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_metadata_lookup(&self, _success: bool) {}
    fn record_cache_hit(&self) {}
    fn record_source_failure(&self, _source_id: &str, _kind: ErrorKind) {}
    fn record_success(&self, _source_id: &str, _elapsed: Duration) {}
    fn record_failure(&self, _kind: ErrorKind) {}
}

/// Statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    pub metadata_lookups: u64,
    pub metadata_failures: u64,
    pub cache_hits: u64,
    pub successes: u64,
    pub failures: u64,
    pub source_failures: HashMap<String, u64>,
    pub source_failures_by_kind: HashMap<ErrorKind, u64>,
    pub failures_by_kind: HashMap<ErrorKind, u64>,
    pub successes_by_source: HashMap<String, u64>,
    /// Summed wall time of successful resolutions
    pub success_elapsed_ms: u64,
}

/// In-process counters, suitable for a status endpoint or a final summary
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    metadata_lookups: AtomicU64,
    metadata_failures: AtomicU64,
    cache_hits: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    success_elapsed_ms: AtomicU64,
    per_source: Mutex<PerSource>,
}

#[derive(Debug, Default)]
struct PerSource {
    failures: HashMap<String, u64>,
    failure_kinds: HashMap<ErrorKind, u64>,
    request_failure_kinds: HashMap<ErrorKind, u64>,
    successes: HashMap<String, u64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ResolverStats {
        let per_source = match self.per_source.lock() {
            Ok(per_source) => PerSource {
                failures: per_source.failures.clone(),
                failure_kinds: per_source.failure_kinds.clone(),
                request_failure_kinds: per_source.request_failure_kinds.clone(),
                successes: per_source.successes.clone(),
            },
            Err(_) => PerSource::default(),
        };

        ResolverStats {
            metadata_lookups: self.metadata_lookups.load(Ordering::Relaxed),
            metadata_failures: self.metadata_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            source_failures: per_source.failures,
            source_failures_by_kind: per_source.failure_kinds,
            failures_by_kind: per_source.request_failure_kinds,
            successes_by_source: per_source.successes,
            success_elapsed_ms: self.success_elapsed_ms.load(Ordering::Relaxed),
        }
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_metadata_lookup(&self, success: bool) {
        self.metadata_lookups.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.metadata_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_source_failure(&self, source_id: &str, kind: ErrorKind) {
        if let Ok(mut per_source) = self.per_source.lock() {
            *per_source.failures.entry(source_id.to_string()).or_default() += 1;
            *per_source.failure_kinds.entry(kind).or_default() += 1;
        }
    }

    fn record_success(&self, source_id: &str, elapsed: Duration) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.success_elapsed_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        if let Ok(mut per_source) = self.per_source.lock() {
            *per_source.successes.entry(source_id.to_string()).or_default() += 1;
        }
    }

    fn record_failure(&self, kind: ErrorKind) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut per_source) = self.per_source.lock() {
            *per_source.request_failure_kinds.entry(kind).or_default() += 1;
        }
    }
}
