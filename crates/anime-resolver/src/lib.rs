//! Anime episode stream resolver.
//!
//! Resolves an AniList id (or a plain title) plus an episode number to
//! playable stream URLs by querying a registry of streaming-site adapters.

pub mod api;
pub mod cache;
pub mod extract;
pub mod http;
pub mod mapper;
pub mod matcher;
pub mod metrics;
pub mod resolver;
pub mod sources;

pub use api::{AniListClient, MetadataResolver};
pub use cache::{CacheKey, CacheStats, ResultCache};
pub use mapper::EpisodeMapper;
pub use metrics::{InMemoryMetrics, MetricsCollector, NoopMetrics, ResolverStats};
pub use resolver::{MappingMode, ResolveOptions, Resolver};
pub use sources::{build_adapters, SeasonCatalog, SourceAdapter, SourceHit};
