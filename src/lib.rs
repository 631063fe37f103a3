//! # repo-kb
//!
//! Index the tracked files of a git repository into a knowledge engine and
//! serve semantic search and question answering over the result.
//!
//! The interesting part is the orchestration around the engine: deciding
//! which files are eligible, pushing them through the engine's asynchronous
//! ingestion one at a time, and carrying the engine's on-disk index between
//! an index run and a later search run through a blob container.
//!
//! ## Architecture
//!
//! ```text
//!  index run                                   search run
//! ┌──────────────┐  ┌───────────┐         ┌──────────────┐  ┌──────────┐
//! │ connector_git│─▶│  ingest   │         │   snapshot   │─▶│  server  │
//! │  (ls-files)  │  │ (engine)  │         │  (download)  │  │ /search  │
//! └──────────────┘  └─────┬─────┘         └──────▲───────┘  │ /ask     │
//!                         ▼                      │          └──────────┘
//!                  ┌─────────────┐        ┌──────┴──────┐
//!                  │  snapshot   │───────▶│ blob store  │
//!                  │  (upload)   │        └─────────────┘
//!                  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML settings |
//! | [`connector_git`] | Tracked file enumeration with a denylist |
//! | [`doc_id`] | Document identifiers from relative paths |
//! | [`engine`] | Knowledge engine trait and HTTP client |
//! | [`ingest`] | Sequential ingestion with bounded readiness polling |
//! | [`snapshot`] | Clear, upload and download of the index snapshot |
//! | [`store`] | Blob container abstraction |
//! | [`lifecycle`] | Hand-off with the external vector database |
//! | [`server`] | `/search` and `/ask` HTTP service |
//! | [`app`] | Index and search flows |

pub mod app;
pub mod config;
pub mod connector_git;
pub mod doc_id;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod models;
pub mod progress;
pub mod server;
pub mod snapshot;
pub mod store;
