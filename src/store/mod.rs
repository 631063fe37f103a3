//! Remote object container abstraction.
//!
//! The snapshot synchronizer only needs five things from remote storage:
//! make sure the container exists, list every key, and put, get or delete
//! one object. Keys are `/`-separated paths relative to the snapshot root.
//!
//! # Implementations
//!
//! | Type | Backend |
//! |------|---------|
//! | [`AzureBlobStore`] | Azure Blob Storage (or Azurite) over REST |
//! | [`InMemoryObjectStore`] | `BTreeMap` behind a lock, for tests |

pub mod azure_blob;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use azure_blob::AzureBlobStore;
pub use memory::InMemoryObjectStore;

/// A flat key/bytes container.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable container name, used in log lines.
    fn container(&self) -> &str;

    /// Create the container if the backend requires it. Default: nothing.
    async fn ensure_container(&self) -> Result<()> {
        Ok(())
    }

    /// Every key currently in the container.
    async fn list(&self) -> Result<Vec<String>>;

    /// Create or overwrite the object at `key`.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    /// Read the object at `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove the object at `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}
