//! Parser Service - Loads AMECO extracts into the relational model
//!
//! Responsibilities:
//! - Discover extract files (or take an explicit list)
//! - Read and validate each file's header
//! - Map rows and resolve dimensions get-or-create
//! - Insert yearly values, one unit of work per row
//! - Report per-file and per-batch outcomes
//!
//! Re-running a batch is safe: dimensions are never duplicated and existing
//! values are left untouched.

mod chapter;
mod config;
mod header;
mod mapper;
mod model;
mod pipeline;
mod reader;
mod resolver;
mod store;

use anyhow::{Context, Result};
use chapter::ChapterClassifier;
use clap::Parser;
use config::{Args, DbConfig};
use pipeline::{BatchReport, Pipeline};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::{AmecoStore, MemoryStore, PgStore};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %format!("{:#}", e), "parser failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let classifier = ChapterClassifier::new(args.chapter_strategy);
    info!(
        mode = if args.dry_run { "dry-run" } else { "live" },
        strategy = ?classifier.strategy(),
        "parser starting"
    );

    let files = config::input_files(&args).await?;
    if files.is_empty() {
        warn!(
            dir = %args.data_dir.display(),
            pattern = %args.pattern,
            "no input files found"
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current row");
            flag.store(true, Ordering::SeqCst);
        }
    });

    if args.dry_run {
        let (report, store) = ingest(MemoryStore::new(), classifier, cancel, &files).await?;
        info!(units_of_work = store.commit_count(), "dry run finished, nothing written");
        return Ok(report.success());
    }

    let db = DbConfig::from_env()?;
    let store = PgStore::connect(&db.url, db.max_connections).await?;
    let (report, _) = ingest(store, classifier, cancel, &files).await?;
    Ok(report.success())
}

async fn ingest<S: AmecoStore>(
    store: S,
    classifier: ChapterClassifier,
    cancel: Arc<AtomicBool>,
    files: &[std::path::PathBuf],
) -> Result<(BatchReport, S)> {
    let mut pipeline = Pipeline::new(store, classifier).with_cancel_flag(cancel);
    let report = pipeline.run(files).await;

    let counts = pipeline
        .store_mut()
        .counts()
        .await
        .context("Failed to read table counts")?;

    let summary = serde_json::json!({
        "success": report.success(),
        "report": &report,
        "tables": counts,
    });
    info!(summary = %summary, "batch summary");
    Ok((report, pipeline.into_store()))
}
