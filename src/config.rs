//! TOML settings.
//!
//! Loaded once at startup by [`load_config`] and passed by reference into
//! every component constructor. Secrets may be left out of the file and
//! supplied through the environment instead:
//!
//! | Setting | Environment fallback |
//! |---------|----------------------|
//! | `openai.api_key` | `AZURE_OPENAI_API_KEY` |
//! | `blob_storage.connection_string` | `AZURE_STORAGE_CONNECTION_STRING` |
//! | `engine.api_key` | `KERNEL_MEMORY_API_KEY` |

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::doc_id::IdScheme;
use crate::lifecycle::BarrierKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub openai: OpenAiConfig,
    pub blob_storage: BlobStorageConfig,
    pub qdrant: QdrantConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    pub server: ServerConfig,
}

/// Generation and embedding provider used by the knowledge engine.
#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub chat: DeploymentConfig,
    pub embedding: DeploymentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeploymentConfig {
    pub deployment: String,
    pub max_tokens: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BlobStorageConfig {
    #[serde(default)]
    pub connection_string: Option<String>,
    pub container_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QdrantConfig {
    pub url: String,
    /// Directory the vector database persists into; this is the snapshot
    /// synchronized with the blob container.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./qdrant_storage")
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    #[serde(default = "default_engine_index")]
    pub index: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_engine_index() -> String {
    "default".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    #[serde(default)]
    pub id_scheme: IdScheme,
    #[serde(default = "default_denylist")]
    pub denylist: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            id_scheme: IdScheme::default(),
            denylist: default_denylist(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1500
}
fn default_ready_timeout_secs() -> u64 {
    900
}

/// Lockfiles and binary assets that never make useful documents.
pub fn default_denylist() -> Vec<String> {
    ["yarn.lock", ".yarn", ".png", ".svg", ".ico", ".woff2"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub barrier: BarrierKind,
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            barrier: BarrierKind::default(),
            probe_interval_ms: default_probe_interval_ms(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_probe_interval_ms() -> u64 {
    1000
}
fn default_probe_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl BlobStorageConfig {
    /// Connection string from the file, or `AZURE_STORAGE_CONNECTION_STRING`.
    pub fn resolved_connection_string(&self) -> Result<String> {
        match &self.connection_string {
            Some(s) if !s.trim().is_empty() => Ok(s.clone()),
            _ => std::env::var("AZURE_STORAGE_CONNECTION_STRING").context(
                "blob_storage.connection_string not set and AZURE_STORAGE_CONNECTION_STRING missing",
            ),
        }
    }
}

impl OpenAiConfig {
    /// API key from the file, or `AZURE_OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("AZURE_OPENAI_API_KEY").ok())
    }
}

impl EngineConfig {
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("KERNEL_MEMORY_API_KEY").ok())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate settings from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.blob_storage.container_name.trim().is_empty() {
        bail!("blob_storage.container_name must not be empty");
    }

    if config.index.poll_interval_ms == 0 {
        bail!("index.poll_interval_ms must be > 0");
    }
    if config.index.ready_timeout_secs == 0 {
        bail!("index.ready_timeout_secs must be > 0");
    }

    if config.openai.chat.max_tokens == 0 || config.openai.embedding.max_tokens == 0 {
        bail!("openai.chat.max_tokens and openai.embedding.max_tokens must be > 0");
    }

    if config.lifecycle.probe_interval_ms == 0 {
        bail!("lifecycle.probe_interval_ms must be > 0");
    }

    if config.engine.url.trim().is_empty() {
        bail!("engine.url must not be empty");
    }

    Ok(config)
}
