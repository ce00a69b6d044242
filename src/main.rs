//! stage_cache CLI application
//!
//! Command-line interface for staging paired datasets from object stores
//! and reading them locally.

use std::process;
use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use stage_cache::app::cache::LocalBlobCache;
use stage_cache::app::reader::Stager;
use stage_cache::app::store::HttpObjectStore;
use stage_cache::cli::{
    handle_cat, handle_config, handle_delete, handle_get, handle_pack, handle_stage, Cli,
    Commands,
};
use stage_cache::config::AppConfig;
use stage_cache::errors::{AppError, Result};

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        let mut source = std::error::Error::source(&e);
        while let Some(cause) = source {
            eprintln!("  caused by: {}", cause);
            source = cause.source();
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    let mut config = AppConfig::load(cli.global.config.clone()).await?;
    cli.global.apply_to(&mut config);
    config.validate()?;

    init_logging(&cli, &config);
    info!("stage_cache v{} starting", env!("CARGO_PKG_VERSION"));

    // Commands that never touch the cache
    let command = match cli.command {
        Commands::Pack(args) => return handle_pack(args).await,
        Commands::Config(args) => return handle_config(args, &config).await,
        command => command,
    };

    let (cache_config, store_config) = config.to_runtime_config();
    let cache = Arc::new(LocalBlobCache::start(cache_config).await?);
    let store = Arc::new(HttpObjectStore::new(&store_config)?);
    let stager = Stager::new(Arc::clone(&cache), store)
        .with_consistency_policy(config.store.consistency_policy());

    let result = match command {
        Commands::Stage(args) => {
            info!("Executing stage command");
            handle_stage(&stager, args).await
        }
        Commands::Cat(args) => {
            info!("Executing cat command");
            handle_cat(&stager, args).await
        }
        Commands::Get(args) => {
            info!("Executing get command");
            handle_get(&stager, args).await
        }
        Commands::Delete(args) => {
            info!("Executing delete command");
            handle_delete(&stager, args).await
        }
        Commands::Pack(_) | Commands::Config(_) => {
            Err(AppError::generic("command does not use the cache"))
        }
    };

    let stats = cache.stats().await;
    info!(
        "Cache: {} hits, {} misses, {} fetches, {} evictions",
        stats.hits, stats.misses, stats.fetches, stats.evictions
    );
    if stats.cleanup_failures > 0 {
        warn!("{} staged files could not be removed", stats.cleanup_failures);
    }
    cache.shutdown().await;

    result
}

/// Initialize logging based on CLI verbosity and the configured level
fn init_logging(cli: &Cli, config: &AppConfig) {
    let any_flag = cli.global.quiet || cli.global.verbose || cli.global.very_verbose;
    let level = if any_flag {
        cli.log_level().to_string().to_lowercase()
    } else {
        config.logging.level.clone()
    };

    let mut filter = EnvFilter::from_default_env();
    match format!("stage_cache={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log level '{}': {}", level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(cli.global.very_verbose)
        .with_writer(std::io::stderr)
        .init();

    if cli.global.very_verbose {
        info!("Very verbose logging enabled");
    } else if cli.global.verbose {
        info!("Verbose logging enabled");
    }
}
