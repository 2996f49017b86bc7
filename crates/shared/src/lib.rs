//! Shared library for the anime stream resolver.
//!
//! This crate provides the pieces every other crate in the workspace leans on:
//! - Configuration management (deployment profiles, source registry)
//! - Data models for titles, mappings, servers and resolution results
//! - The resolver error taxonomy
//! - Logging infrastructure

pub mod config;
pub mod error;
pub mod logging;
pub mod models;

// Re-export commonly used types
pub use config::{
    default_sources, Config, FanOutPolicy, MappingConfig, PreferredMode, ResolverConfig,
};
pub use error::{ErrorKind, ResolveError, Result};
pub use logging::LogConfig;
pub use models::*;
