//! Command-line argument parsing for stage_cache
//!
//! This module defines the CLI structure using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::AppConfig;
use crate::constants::files;

/// stage_cache - Stage paired datasets from object stores onto local disk
#[derive(Parser, Debug)]
#[command(
    name = "stage_cache",
    version,
    about = "Stage paired index/data datasets from object stores and read them locally",
    long_about = "Stages the index and data parts of a dataset held in an eventually-consistent
object store onto local disk, reads them through sequence or map decoders, and
deletes remote datasets while waiting for the store to stop reporting them."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base directory for the staging root
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Object store endpoint URL
    #[arg(long, global = true, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Maximum number of staged resources
    #[arg(long, global = true, value_name = "N")]
    pub cache_size: Option<usize>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stage a resource and report where it lives locally
    Stage(StageArgs),

    /// Print the records of a resource in key order
    Cat(CatArgs),

    /// Look up a single key in a resource
    Get(GetArgs),

    /// Delete a resource and wait until the store no longer reports it
    Delete(DeleteArgs),

    /// Write a local paired resource from tab-separated records
    Pack(PackArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the stage command
#[derive(Args, Debug, Clone)]
pub struct StageArgs {
    /// Logical resource path (s3://bucket/key, file:///dir or a local dir)
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the cat command
#[derive(Args, Debug, Clone)]
pub struct CatArgs {
    /// Logical resource path
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Stop after this many records
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for the get command
#[derive(Args, Debug, Clone)]
pub struct GetArgs {
    /// Logical resource path
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Key to look up (UTF-8)
    #[arg(value_name = "KEY")]
    pub key: String,
}

/// Arguments for the delete command
#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    /// Logical resource path
    #[arg(value_name = "PATH")]
    pub path: String,
}

/// Arguments for the pack command
#[derive(Args, Debug, Clone)]
pub struct PackArgs {
    /// Output directory for the index and data parts
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Input file with one `key<TAB>value` record per line, keys ascending
    #[arg(short, long, value_name = "TSV")]
    pub input: PathBuf,

    /// Number of data records between index entries
    #[arg(long, default_value_t = files::DEFAULT_INDEX_INTERVAL)]
    pub interval: usize,
}

/// Arguments for configuration management
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,

    /// Write a commented default configuration file
    Init {
        /// Destination (defaults to the user config directory)
        #[arg(value_name = "FILE")]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    pub fn log_level(&self) -> tracing::Level {
        if self.global.quiet {
            tracing::Level::ERROR
        } else if self.global.very_verbose {
            tracing::Level::DEBUG
        } else if self.global.verbose {
            tracing::Level::INFO
        } else {
            tracing::Level::WARN
        }
    }
}

impl GlobalArgs {
    /// Apply command-line overrides on top of file and environment settings
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(dir) = &self.cache_dir {
            config.cache.dir = Some(dir.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            config.store.endpoint = endpoint.clone();
        }
        if let Some(size) = self.cache_size {
            config.cache.size.elements = size;
        }
    }
}

impl PackArgs {
    /// Check argument combinations clap cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.interval == 0 {
            return Err("Index interval must be greater than 0".to_string());
        }
        Ok(())
    }
}
