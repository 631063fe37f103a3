//! # repo-kb CLI (`rkb`)
//!
//! ```bash
//! # Index a repository and publish the snapshot
//! rkb --mode index --path ~/src/my-repo --config ./config/rkb.toml
//!
//! # Restore the snapshot if needed and serve /search and /ask
//! rkb --mode search --config ./config/rkb.toml
//! ```
//!
//! Input mistakes (unknown mode, missing or bad `--path`) print one line on
//! stdout and exit normally without doing any work.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use repo_kb::app::{self, IndexDeps, Mode};
use repo_kb::config;
use repo_kb::engine::KernelMemoryClient;
use repo_kb::error::RepoKbError;
use repo_kb::lifecycle::create_barrier;
use repo_kb::progress::ProgressMode;
use repo_kb::store::AzureBlobStore;

/// repo-kb: index a git repository into a knowledge engine and serve
/// search and ask over it.
#[derive(Parser)]
#[command(name = "rkb", version)]
struct Cli {
    /// Mode of operation (index or search).
    #[arg(short = 'm', long)]
    mode: String,

    /// Path to the repository to index. Required in index mode.
    #[arg(short = 'p', long)]
    path: Option<PathBuf>,

    /// Path to configuration file (TOML).
    #[arg(long, default_value = "./config/rkb.toml")]
    config: PathBuf,

    /// Ingestion progress on stderr: auto, human, json or off.
    #[arg(long, default_value = "auto")]
    progress: String,

    /// Show debug logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("repo_kb={},rkb={}", log_level, log_level))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mode = match Mode::parse(&cli.mode) {
        Ok(mode) => mode,
        Err(e) => {
            println!("{}", e);
            return Ok(());
        }
    };

    if mode == Mode::Index {
        match &cli.path {
            None => {
                println!("Error: --path or -p is required when --mode or -m is index.");
                return Ok(());
            }
            Some(path) if !path.is_dir() => {
                println!("Error: Please provide a path to a directory: {}", path.display());
                return Ok(());
            }
            Some(_) => {}
        }
    }

    let progress = match ProgressMode::from_flag(&cli.progress) {
        Some(p) => p,
        None => {
            println!("Error: --progress must be one of auto, human, json, off.");
            return Ok(());
        }
    };

    let cfg = config::load_config(&cli.config)?;
    app::log_engine_profile(&cfg);

    let engine = KernelMemoryClient::new(&cfg.engine)?;
    let store = AzureBlobStore::from_config(&cfg.blob_storage)?;
    let barrier = create_barrier(&cfg.qdrant, &cfg.lifecycle)?;

    match mode {
        Mode::Index => {
            let repo = cli.path.unwrap_or_default();
            let deps = IndexDeps {
                engine: &engine,
                store: &store,
                barrier: barrier.as_ref(),
                progress: progress.reporter(),
            };
            match app::run_index(&cfg, &repo, deps).await {
                Ok(summary) => {
                    println!("index {}", repo.display());
                    println!("  cleared objects: {}", summary.cleared.objects);
                    println!("  ingested documents: {}", summary.ingest.ingested.len());
                    if !summary.ingest.collisions.is_empty() {
                        println!("  id collisions: {}", summary.ingest.collisions.len());
                    }
                    println!("  uploaded objects: {}", summary.uploaded.objects);
                    println!("  uploaded bytes: {}", summary.uploaded.bytes);
                    println!("ok");
                }
                Err(e) => match e.downcast_ref::<RepoKbError>() {
                    Some(user) if user.is_user_input() => println!("Error: {}", user),
                    _ => return Err(e),
                },
            }
        }
        Mode::Search => {
            app::run_search(&cfg, Arc::new(engine), &store, barrier.as_ref()).await?;
        }
    }

    Ok(())
}
