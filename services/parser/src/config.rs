//! Command line, environment, and input discovery

use crate::chapter::ChapterStrategy;
use anyhow::{Context, Result};
use clap::Parser;
use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Parser, Debug)]
#[command(name = "parser", about = "Loads AMECO extracts into the relational model")]
pub struct Args {
    /// Directory scanned for extracts
    #[arg(long, default_value = "./data")]
    pub data_dir: PathBuf,

    /// File name pattern (case-insensitive glob: `*`, `?`, `[...]`)
    #[arg(long, default_value = "AMECO*.CSV")]
    pub pattern: String,

    /// Explicit file to load; repeatable. Skips directory discovery.
    #[arg(long = "file")]
    pub files: Vec<PathBuf>,

    /// How each row's chapter is resolved
    #[arg(long, value_enum, default_value_t = ChapterStrategy::FileName)]
    pub chapter_strategy: ChapterStrategy,

    /// Dry run - use an in-memory store, don't touch the database
    #[arg(long, default_value = "false")]
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

impl DbConfig {
    /// Reads `DB_URL` and optional `DB_MAX_CONNECTIONS`
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("DB_URL").context("DB_URL env var missing")?;
        let max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid DB_MAX_CONNECTIONS '{}'", raw))?,
            Err(_) => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            url,
            max_connections,
        })
    }
}

/// Files to process: the explicit list if given, otherwise matching files
/// directly under `data_dir`, sorted by name.
pub async fn input_files(args: &Args) -> Result<Vec<PathBuf>> {
    if !args.files.is_empty() {
        return Ok(args.files.clone());
    }
    discover(&args.data_dir, &args.pattern).await
}

pub async fn discover(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = file_pattern(pattern)?;
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read data directory {}", dir.display()))?;

    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if pattern.matches_with(name, MATCH_OPTIONS) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// File names are matched without regard to case
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compile a `--pattern` value (`*`, `?`, `[...]` wildcards)
pub fn file_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).with_context(|| format!("Invalid file pattern '{}'", pattern))
}
