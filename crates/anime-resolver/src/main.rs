//! Anime resolver CLI application.

use anime_resolver::{InMemoryMetrics, MappingMode, ResolveOptions, Resolver};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use shared::{Config, FanOutPolicy, PreferredMode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve one episode to playable stream URLs (JSON on stdout)
    Resolve {
        /// AniList id, or a title
        identifier: String,

        /// Absolute episode number
        episode: u32,

        /// Try this source first
        #[arg(long)]
        source: Option<String>,

        /// Only try the source given with --source
        #[arg(long, requires = "source")]
        strict: bool,

        /// Ignore cached results
        #[arg(long)]
        no_cache: bool,

        #[arg(long, value_enum, default_value_t = MappingArg::Auto)]
        mapping: MappingArg,

        /// Override the configured fan-out policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
    },

    /// List enabled sources in the order they are tried
    Sources,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MappingArg {
    Auto,
    Flat,
    Seasonal,
}

impl From<MappingArg> for MappingMode {
    fn from(arg: MappingArg) -> Self {
        match arg {
            MappingArg::Auto => MappingMode::Auto,
            MappingArg::Flat => MappingMode::Flat,
            MappingArg::Seasonal => MappingMode::Seasonal,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Sequential,
    Race,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize logging; stdout is reserved for JSON output
    let mut log_config = shared::LogConfig::from_settings(&config.logging, "anime-resolver");
    if args.verbose {
        log_config.default_level = tracing::Level::DEBUG;
    }
    shared::logging::init(log_config)?;

    info!(config_file = %args.config.display(), "Loaded configuration");

    match args.command {
        Command::Sources => {
            let resolver = Resolver::from_config(&config, Arc::new(InMemoryMetrics::new()))
                .context("Failed to initialize resolver")?;
            let sources: Vec<_> = resolver.sources().collect();
            println!("{}", serde_json::to_string_pretty(&sources)?);
        }
        Command::Resolve {
            identifier,
            episode,
            source,
            strict,
            no_cache,
            mapping,
            policy,
        } => {
            if let Some(policy) = policy {
                config.resolver.policy = match policy {
                    PolicyArg::Sequential => FanOutPolicy::Sequential,
                    PolicyArg::Race => FanOutPolicy::Race,
                };
            }
            if strict {
                config.resolver.preferred_mode = PreferredMode::Strict;
            }

            let metrics = Arc::new(InMemoryMetrics::new());
            let resolver = Resolver::from_config(&config, metrics.clone())
                .context("Failed to initialize resolver")?;
            let options = ResolveOptions {
                preferred_source: source,
                bypass_cache: no_cache,
                mapping: mapping.into(),
            };

            match resolver.resolve(&identifier, episode, &options).await {
                Ok(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                }
                Err(e) => {
                    let body = json!({
                        "error": e.kind(),
                        "message": e.message(),
                        "identifier": identifier,
                        "episode": episode,
                    });
                    println!("{}", serde_json::to_string_pretty(&body)?);
                    info!(stats = ?metrics.snapshot(), "Resolution failed");
                    std::process::exit(1);
                }
            }

            info!(stats = ?metrics.snapshot(), "Done");
        }
    }

    Ok(())
}
