//! Downloader Service - Fetches Transferegov source files for the pipeline
//!
//! Responsibilities:
//! - Load the sources config (entity file -> repository URL)
//! - Download each enabled source with rate limiting
//! - Hash every payload (SHA-256) and record sizes in a manifest
//! - Organize files into data/raw/YYYY-MM-DD/ for the pipeline to pick up
//!
//! Usage:
//!   # All enabled sources:
//!   cargo run --bin downloader -- --config config/sources.json
//!
//!   # A single source:
//!   cargo run --bin downloader -- --config config/sources.json --source-id propostas

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(name = "downloader", about = "Downloads Transferegov source files")]
struct Args {
    /// Path to sources config file
    #[arg(long, default_value = "config/sources.json")]
    config: String,

    /// Only download this source id
    #[arg(long)]
    source_id: Option<String>,

    /// Date directory to download into (YYYY-MM-DD, default: today)
    #[arg(long)]
    date: Option<String>,

    /// Re-download files that already exist
    #[arg(long, default_value = "false")]
    force: bool,

    /// Dry run - list what would be downloaded without writing anything
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

// =============================================================================
// Source Configuration Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SourcesConfig {
    version: String,
    sources: Vec<Source>,
}

#[derive(Debug, Deserialize)]
struct Source {
    id: String,
    name: String,
    url: String,
    /// Filename to save as; the pipeline infers the entity type from it.
    filename: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct ManifestEntry {
    source_id: String,
    url: String,
    filename: String,
    sha256: String,
    size_bytes: i64,
    downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Config {
    raw_data_dir: PathBuf,
    rate_limit_ms: u64,
    timeout_secs: u64,
}

impl Config {
    fn from_env() -> Result<Self> {
        Ok(Self {
            raw_data_dir: PathBuf::from(
                std::env::var("RAW_DATA_DIR").unwrap_or_else(|_| "./data/raw".to_string()),
            ),
            rate_limit_ms: std::env::var("RATE_LIMIT_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            timeout_secs: std::env::var("DOWNLOAD_TIMEOUT_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .unwrap_or(300),
        })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Select the sources to download for this invocation.
fn select_sources<'a>(config: &'a SourcesConfig, source_id: Option<&str>) -> Vec<&'a Source> {
    config
        .sources
        .iter()
        .filter(|source| {
            if !source.enabled {
                return false;
            }
            match source_id {
                Some(id) => source.id == id,
                None => true,
            }
        })
        .collect()
}

fn print_sources_summary(sources_config: &SourcesConfig) {
    println!("\nConfigured sources:");
    println!("{:-<60}", "");
    for source in &sources_config.sources {
        let status = if source.enabled { "✓" } else { "✗" };
        println!(
            "  {} {} - {} -> {}",
            status, source.id, source.name, source.filename
        );
    }
    println!("{:-<60}", "");
}

async fn load_sources_config(path: &str) -> Result<SourcesConfig> {
    let content = fs::read_to_string(path)
        .await
        .context("Failed to read sources config")?;
    let config: SourcesConfig =
        serde_json::from_str(&content).context("Failed to parse sources config")?;
    Ok(config)
}

/// Fetch one source into the dated directory. Returns the manifest entry,
/// or None when the file was skipped (already present, or dry run).
async fn fetch_source(
    client: &reqwest::Client,
    config: &Config,
    source: &Source,
    target_dir: &Path,
    force: bool,
    dry_run: bool,
) -> Result<Option<ManifestEntry>> {
    let target = target_dir.join(&source.filename);

    if target.exists() && !force {
        println!("  Already downloaded: {} (use --force to refresh)", target.display());
        return Ok(None);
    }

    println!("  Rate limit: waiting {}ms...", config.rate_limit_ms);
    sleep(Duration::from_millis(config.rate_limit_ms)).await;

    println!("  Fetching: {}", source.url);
    let resp = client
        .get(&source.url)
        .send()
        .await?
        .error_for_status()
        .context("HTTP request failed")?;

    let bytes = resp.bytes().await?;
    let size_bytes = bytes.len() as i64;
    let sha256 = sha256_hex(&bytes);

    println!("  Downloaded: {} bytes", size_bytes);
    println!("  Hash: sha256:{}", sha256);

    if dry_run {
        println!("  Dry run - would save to {}", target.display());
        return Ok(None);
    }

    fs::write(&target, &bytes).await?;
    println!("  Saved to: {}", target.display());

    Ok(Some(ManifestEntry {
        source_id: source.id.clone(),
        url: source.url.clone(),
        filename: source.filename.clone(),
        sha256,
        size_bytes,
        downloaded_at: Utc::now(),
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env()?;

    println!("=== Transferegov Downloader ===");

    let date = match &args.date {
        Some(date) => NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .context("invalid --date, expected YYYY-MM-DD")?,
        None => chrono::Local::now().date_naive(),
    };
    let target_dir = config.raw_data_dir.join(date.format("%Y-%m-%d").to_string());
    println!("Target directory: {}", target_dir.display());

    if !args.dry_run {
        fs::create_dir_all(&target_dir).await?;
    }

    println!("Loading sources from: {}", args.config);
    let sources_config = load_sources_config(&args.config).await?;
    println!("Config version: {}", sources_config.version);

    let sources = select_sources(&sources_config, args.source_id.as_deref());
    if sources.is_empty() {
        print_sources_summary(&sources_config);
        anyhow::bail!("No sources match the filter criteria");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent("TransferegovPipeline/0.1 (coleta de dados publicos)")
        .build()?;

    println!("\nProcessing {} source(s)...", sources.len());

    let mut manifest: Vec<ManifestEntry> = Vec::new();
    let mut collected = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for source in sources {
        println!("\n[{}] {}", source.id, source.name);
        match fetch_source(&client, &config, source, &target_dir, args.force, args.dry_run).await {
            Ok(Some(entry)) => {
                println!("  ✓ Collected: {}", entry.filename);
                manifest.push(entry);
                collected += 1;
            }
            Ok(None) => skipped += 1,
            Err(e) => {
                eprintln!("  ✗ Failed: {}", e);
                failed += 1;
            }
        }
    }

    if !manifest.is_empty() {
        let manifest_path = target_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&manifest_path, json).await?;
        println!("\nManifest written: {}", manifest_path.display());
    }

    println!("\n=== Download Summary ===");
    println!("Collected: {}", collected);
    println!("Skipped: {}", skipped);
    println!("Failed: {}", failed);

    if collected > 0 {
        println!("\nReady for parsing: cargo run --bin pipeline");
    }

    Ok(())
}
