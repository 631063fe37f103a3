//! Top-level index and search flows.
//!
//! ```text
//! index:  validate ─▶ enumerate ─▶ clear remote ─▶ ingest (one by one)
//!                    ─▶ barrier: stop database ─▶ upload snapshot
//!
//! search: no local snapshot? ─▶ download ─▶ barrier: start database
//!                    ─▶ serve /search and /ask
//! ```
//!
//! Neither flow can resume. An interrupted index run leaves a partially
//! cleared or partially uploaded container and is recovered by running the
//! whole index mode again (it clears first). An interrupted download leaves
//! a non-empty snapshot directory; empty it before the next search run.

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::connector_git::scan_repository;
use crate::engine::KnowledgeEngine;
use crate::error::RepoKbError;
use crate::ingest::Ingestor;
use crate::lifecycle::{BarrierStep, LifecycleBarrier};
use crate::models::{IngestReport, SyncReport};
use crate::progress::IngestProgressReporter;
use crate::server;
use crate::snapshot;
use crate::store::ObjectStore;

/// Operating mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Index,
    Search,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self, RepoKbError> {
        match value {
            "index" => Ok(Mode::Index),
            "search" => Ok(Mode::Search),
            _ => Err(RepoKbError::InvalidInput(
                "Error: Invalid mode. Please specify either 'index' or 'search'.".to_string(),
            )),
        }
    }
}

/// What an index run did.
#[derive(Debug, Clone, Default)]
pub struct IndexSummary {
    pub cleared: SyncReport,
    pub ingest: IngestReport,
    pub uploaded: SyncReport,
}

/// External collaborators of the index flow.
pub struct IndexDeps<'a> {
    pub engine: &'a dyn KnowledgeEngine,
    pub store: &'a dyn ObjectStore,
    pub barrier: &'a dyn LifecycleBarrier,
    pub progress: Box<dyn IngestProgressReporter>,
}

/// Index every eligible tracked file of `repo` and publish the snapshot.
///
/// Input is validated before anything remote is touched: a bad path fails
/// with [`RepoKbError::InvalidInput`] and the container is left alone.
pub async fn run_index(config: &Config, repo: &Path, deps: IndexDeps<'_>) -> Result<IndexSummary> {
    let files = scan_repository(repo, &config.index.denylist)?;

    let cleared = snapshot::clear(deps.store).await?;

    let ingestor = Ingestor::new(deps.engine, &config.index).with_progress(deps.progress);
    let ingest = ingestor.ingest_all(repo, files).await?;
    println!("Ingestion complete.");

    deps.barrier.wait(BarrierStep::StopIndexEngine).await?;

    let uploaded = snapshot::upload(deps.store, &config.qdrant.storage_dir).await?;

    Ok(IndexSummary {
        cleared,
        ingest,
        uploaded,
    })
}

/// Restore the snapshot when there is no local index. Returns the download
/// report, or `None` when the local snapshot was already present.
pub async fn prepare_search(
    config: &Config,
    store: &dyn ObjectStore,
    barrier: &dyn LifecycleBarrier,
) -> Result<Option<SyncReport>> {
    let root = &config.qdrant.storage_dir;
    if !snapshot::needs_download(root)? {
        tracing::info!(root = %root.display(), "local snapshot present; skipping download");
        return Ok(None);
    }

    let report = snapshot::download(store, root).await?;
    barrier.wait(BarrierStep::StartIndexEngine).await?;
    Ok(Some(report))
}

/// Restore the snapshot if needed, then serve until terminated.
pub async fn run_search(
    config: &Config,
    engine: Arc<dyn KnowledgeEngine>,
    store: &dyn ObjectStore,
    barrier: &dyn LifecycleBarrier,
) -> Result<()> {
    prepare_search(config, store, barrier).await?;
    server::run_server(config, engine).await
}

/// Log the provider settings the engine is expected to run with.
pub fn log_engine_profile(config: &Config) {
    let openai = &config.openai;
    tracing::info!(
        endpoint = %openai.endpoint,
        chat = %openai.chat.deployment,
        chat_max_tokens = openai.chat.max_tokens,
        embedding = %openai.embedding.deployment,
        embedding_max_tokens = openai.embedding.max_tokens,
        vector_db = %config.qdrant.url,
        engine = %config.engine.url,
        "knowledge engine profile"
    );
    if openai.resolved_api_key().is_none() {
        tracing::warn!("openai.api_key is not set and AZURE_OPENAI_API_KEY is missing");
    }
}
