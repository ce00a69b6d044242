//! Command handlers for the stage_cache CLI
//!
//! Each handler takes parsed arguments, performs the operation through the
//! library API and prints results for the user.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::app::cache::CacheStats;
use crate::app::reader::{PairedFileWriter, Stager};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

use super::args::{CatArgs, ConfigAction, ConfigArgs, DeleteArgs, GetArgs, PackArgs, StageArgs};

/// Outcome of a stage command
#[derive(Debug, Serialize)]
pub struct StageReport {
    /// Qualified logical path
    pub path: String,
    /// Directory the resource is read from
    pub local_dir: PathBuf,
    /// Whether the resource went through the cache
    pub staged: bool,
    /// Time spent opening the resource
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Cache state after staging
    pub cache: CacheStats,
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        spinner.set_style(style.tick_strings(&["◐", "◓", "◑", "◒"]));
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Stage a resource and report its local directory
pub async fn handle_stage(stager: &Stager, args: StageArgs) -> Result<()> {
    let start = Instant::now();
    let progress = spinner(format!("Staging {}...", args.path));

    let opened = stager.open_sequence(&args.path).await;
    progress.finish_and_clear();
    let mut reader = opened?;

    let report = StageReport {
        path: reader.path().to_string(),
        local_dir: reader.local_dir().to_path_buf(),
        staged: reader.is_staged(),
        elapsed: start.elapsed(),
        cache: stager.cache().stats().await,
    };
    reader.close();

    if args.json {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::generic(format!("Failed to serialize report: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    println!("✅ {}", report.path);
    println!("  Local directory: {}", report.local_dir.display());
    if report.staged {
        println!(
            "  Cache: {}/{} entries, {} staged, hit rate {:.1}%",
            report.cache.entries,
            report.cache.capacity,
            report.cache.format_staged_size(),
            report.cache.hit_rate()
        );
    } else {
        println!("  Read in place (not staged)");
    }
    println!("  Time: {:?}", report.elapsed);
    Ok(())
}

/// Print records in key order
pub async fn handle_cat(stager: &Stager, args: CatArgs) -> Result<()> {
    let mut reader = stager.open_sequence(&args.path).await?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut printed = 0usize;
    while printed < limit {
        let Some(record) = reader.next_record().await? else {
            break;
        };
        println!(
            "{}\t{}",
            String::from_utf8_lossy(&record.key),
            String::from_utf8_lossy(&record.value)
        );
        printed += 1;
    }

    reader.close();
    debug!("Printed {} records from {}", printed, args.path);
    Ok(())
}

/// Look up one key
pub async fn handle_get(stager: &Stager, args: GetArgs) -> Result<()> {
    let mut reader = stager.open_map(&args.path).await?;
    let value = reader.get(args.key.as_bytes()).await;
    reader.close();

    match value? {
        Some(value) => {
            println!("{}", String::from_utf8_lossy(&value));
            Ok(())
        }
        None => Err(AppError::generic(format!(
            "Key '{}' not found in {}",
            args.key, args.path
        ))),
    }
}

/// Delete a resource, waiting for the store to stop reporting it
pub async fn handle_delete(stager: &Stager, args: DeleteArgs) -> Result<()> {
    let start = Instant::now();
    let max_wait = humantime_serde::re::humantime::format_duration(
        stager.consistency_policy().max_wait(),
    );
    let progress = spinner(format!(
        "Deleting {} (waiting up to {})...",
        args.path, max_wait
    ));

    let result = stager.delete(&args.path).await;
    progress.finish_and_clear();
    result?;

    println!("🗑️  Deleted {} in {:?}", args.path, start.elapsed());
    Ok(())
}

/// Build a local paired resource from a TSV file
pub async fn handle_pack(args: PackArgs) -> Result<()> {
    args.validate().map_err(AppError::generic)?;

    let input = tokio::fs::File::open(&args.input).await?;
    let mut lines = BufReader::new(input).lines();
    let mut writer = PairedFileWriter::create(&args.dir, args.interval).await?;

    let mut line_number = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once('\t').ok_or_else(|| {
            AppError::generic(format!(
                "{}:{}: expected key<TAB>value",
                args.input.display(),
                line_number
            ))
        })?;
        writer.append(key.as_bytes(), value.as_bytes()).await?;
    }

    let summary = writer.finish().await?;
    info!("Packed {} into {}", args.input.display(), args.dir.display());
    println!(
        "📦 Wrote {} records ({} index entries, {} data bytes) to {}",
        summary.records,
        summary.index_entries,
        summary.data_bytes,
        args.dir.display()
    );
    Ok(())
}

/// Show or initialize configuration
pub async fn handle_config(args: ConfigArgs, config: &AppConfig) -> Result<()> {
    match args.action {
        ConfigAction::Show => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        ConfigAction::Init { path, force } => {
            let written = AppConfig::write_default_config(path, force).await?;
            println!("✅ Wrote default configuration to {}", written.display());
            Ok(())
        }
    }
}
