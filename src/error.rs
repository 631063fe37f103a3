//! Error types for repo-kb.
//!
//! Flows return `anyhow::Result` and attach context as they go; the variants
//! here exist for the cases a caller needs to tell apart (user input
//! problems are reported and swallowed by the CLI, everything else ends the
//! run).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Domain-specific errors.
#[derive(Error, Debug)]
pub enum RepoKbError {
    /// Bad user input: wrong mode, missing `--path`, or a path that is not
    /// a directory.
    #[error("{0}")]
    InvalidInput(String),

    /// The directory exists but git does not recognize it as a repository.
    #[error("Not a git repository: {path} ({message})")]
    NotARepository {
        /// Directory that was scanned.
        path: PathBuf,
        /// stderr reported by git.
        message: String,
    },

    /// A remote object key that cannot be mapped under the snapshot root.
    #[error("Refusing to write remote object with unsafe key `{0}`")]
    InvalidObjectKey(String),

    /// A document never became ready within the configured wait.
    #[error("Document `{document_id}` was not ready after {waited:?}")]
    TimedOut {
        /// Identifier the document was submitted under.
        document_id: String,
        /// Total time spent polling.
        waited: Duration,
    },

    /// The knowledge engine rejected a request or reported a failed pipeline.
    #[error("Knowledge engine error: {0}")]
    Engine(String),

    /// The remote object container rejected a request.
    #[error("Object store error: {0}")]
    Store(String),

    /// Configuration is present but invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RepoKbError {
    /// True for errors the CLI reports as a plain line on stdout and then
    /// stops without doing any work.
    pub fn is_user_input(&self) -> bool {
        matches!(self, RepoKbError::InvalidInput(_))
    }
}
