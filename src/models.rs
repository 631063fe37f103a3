//! Core data types that flow through ingestion, synchronization and
//! retrieval.

use serde::{Deserialize, Serialize};

/// Readiness of one document inside an index run.
///
/// ```text
/// Unsubmitted ──import──▶ Submitted ──ready──▶ Ready
///                              │
///                              └──wait exceeded──▶ TimedOut
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Unsubmitted,
    Submitted,
    Ready,
    TimedOut,
}

/// The unit of ingestion: one tracked file read from disk.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub source_path: String,
    pub content: String,
    pub state: DocumentState,
}

impl Document {
    pub fn new(id: String, source_path: String, content: String) -> Self {
        Self {
            id,
            source_path,
            content,
            state: DocumentState::Unsubmitted,
        }
    }
}

/// Outcome of a completed ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Document identifiers in the order they became ready.
    pub ingested: Vec<String>,
    /// `(earlier path, later path, id)` for paths that mapped to one id.
    pub collisions: Vec<(String, String, String)>,
}

/// Outcome of a clear, upload or download pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub objects: u64,
    pub bytes: u64,
}

fn default_relevance() -> f64 {
    0.5
}

fn default_limit() -> usize {
    10
}

/// Body of `POST /ask`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AskRequest {
    pub query: String,
    #[serde(default = "default_relevance")]
    pub relevance: f64,
}

/// Body of `POST /search`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_relevance")]
    pub relevance: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}
