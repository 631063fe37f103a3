//! Index snapshot synchronization.
//!
//! Mirrors the vector database's storage directory to and from a remote
//! [`ObjectStore`]. Every operation is a full traversal; nothing is diffed.
//!
//! - [`clear`] empties the container before an index run, so nothing from a
//!   previous snapshot survives into the next one.
//! - [`upload`] copies every regular file under the snapshot root to the key
//!   formed by its root-relative path (`/`-separated). It must only run once
//!   the database process has stopped and flushed to disk.
//! - [`download`] recreates every remote object under the snapshot root.
//!   It runs only when [`needs_download`] reports no local index.
//!
//! After `clear` followed by `upload`, the remote key set equals the set of
//! files under the root at upload time.

use anyhow::{Context, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::RepoKbError;
use crate::models::SyncReport;
use crate::store::ObjectStore;

/// Delete every object in the container.
pub async fn clear(store: &dyn ObjectStore) -> Result<SyncReport> {
    tracing::info!(container = store.container(), "clearing blob container");

    let mut report = SyncReport::default();
    for key in store.list().await? {
        store
            .delete(&key)
            .await
            .with_context(|| format!("Failed to delete {}", key))?;
        tracing::debug!(key = %key, "deleted blob");
        report.objects += 1;
    }

    tracing::info!(
        container = store.container(),
        deleted = report.objects,
        "blob container cleared"
    );
    Ok(report)
}

/// Upload every regular file under `root`, overwriting existing keys.
pub async fn upload(store: &dyn ObjectStore, root: &Path) -> Result<SyncReport> {
    tracing::info!(root = %root.display(), container = store.container(), "uploading snapshot");

    store.ensure_container().await?;

    let mut report = SyncReport::default();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let key = object_key(root, entry.path())?;
        let bytes = tokio::fs::read(entry.path())
            .await
            .with_context(|| format!("Failed to read {}", entry.path().display()))?;
        let len = bytes.len() as u64;

        store
            .put(&key, bytes)
            .await
            .with_context(|| format!("Failed to upload {}", key))?;
        tracing::debug!(key = %key, bytes = len, "uploaded");

        report.objects += 1;
        report.bytes += len;
    }

    tracing::info!(
        objects = report.objects,
        bytes = report.bytes,
        "snapshot uploaded"
    );
    Ok(report)
}

/// Write every remote object under `root`, creating directories as needed.
pub async fn download(store: &dyn ObjectStore, root: &Path) -> Result<SyncReport> {
    tracing::info!(root = %root.display(), container = store.container(), "downloading snapshot");

    tokio::fs::create_dir_all(root)
        .await
        .with_context(|| format!("Failed to create {}", root.display()))?;

    let mut report = SyncReport::default();
    for key in store.list().await? {
        let local = local_path(root, &key)?;
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let bytes = store
            .get(&key)
            .await
            .with_context(|| format!("Failed to download {}", key))?;
        let len = bytes.len() as u64;
        tokio::fs::write(&local, bytes)
            .await
            .with_context(|| format!("Failed to write {}", local.display()))?;
        tracing::debug!(key = %key, bytes = len, "downloaded");

        report.objects += 1;
        report.bytes += len;
    }

    tracing::info!(
        objects = report.objects,
        bytes = report.bytes,
        "snapshot downloaded"
    );
    Ok(report)
}

/// True when there is no local index: the root is missing or has no
/// entries at all.
pub fn needs_download(root: &Path) -> Result<bool> {
    if !root.exists() {
        return Ok(true);
    }
    let mut entries =
        std::fs::read_dir(root).with_context(|| format!("Failed to read {}", root.display()))?;
    Ok(entries.next().is_none())
}

/// Remote key for a file under `root`: its relative path, `/`-joined.
pub fn object_key(root: &Path, file: &Path) -> Result<String> {
    let relative = file.strip_prefix(root).with_context(|| {
        format!("{} is not under {}", file.display(), root.display())
    })?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    Ok(parts.join("/"))
}

/// Local path for a remote key. Keys that would escape `root` are refused.
pub fn local_path(root: &Path, key: &str) -> Result<PathBuf> {
    let unsafe_key = || RepoKbError::InvalidObjectKey(key.to_string());

    if key.is_empty() || key.starts_with('/') || key.contains('\\') {
        return Err(unsafe_key().into());
    }

    let mut path = root.to_path_buf();
    for segment in key.split('/') {
        if segment.is_empty() {
            return Err(unsafe_key().into());
        }
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => path.push(part),
            _ => return Err(unsafe_key().into()),
        }
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryObjectStore;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_clear_leaves_container_empty() {
        let store = InMemoryObjectStore::with_objects(
            "snap",
            [("a.txt", "1"), ("x/y/z.bin", "2"), ("old/stale.json", "3")],
        );
        let report = clear(&store).await.unwrap();
        assert_eq!(report.objects, 3);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_empty_container() {
        let store = InMemoryObjectStore::new("snap");
        assert_eq!(clear(&store).await.unwrap().objects, 0);
    }

    #[tokio::test]
    async fn test_upload_key_set_matches_tree() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("a")).unwrap();
        std::fs::write(tmp.path().join("a/b.txt"), "bee").unwrap();
        std::fs::write(tmp.path().join("c.txt"), "sea").unwrap();
        std::fs::create_dir_all(tmp.path().join("empty_dir")).unwrap();

        let store = InMemoryObjectStore::new("snap");
        let report = upload(&store, tmp.path()).await.unwrap();

        let keys: BTreeSet<String> = store.list().await.unwrap().into_iter().collect();
        let expected: BTreeSet<String> = ["a/b.txt", "c.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(keys, expected);
        assert_eq!(report, SyncReport { objects: 2, bytes: 6 });
        assert_eq!(store.get("a/b.txt").await.unwrap(), b"bee");
    }

    #[tokio::test]
    async fn test_clear_then_upload_drops_stale_objects() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("c.txt"), "new").unwrap();

        let store = InMemoryObjectStore::with_objects("snap", [("c.txt", "old"), ("gone.txt", "x")]);
        clear(&store).await.unwrap();
        upload(&store, tmp.path()).await.unwrap();
        upload(&store, tmp.path()).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["c.txt"]);
        assert_eq!(store.get("c.txt").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_download_creates_intermediate_dirs() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("qdrant_storage");
        std::fs::create_dir_all(&root).unwrap();

        let store = InMemoryObjectStore::with_objects("snap", [("x/y.txt", "hello")]);
        let report = download(&store, &root).await.unwrap();

        assert_eq!(report.objects, 1);
        assert!(root.join("x").is_dir());
        assert_eq!(std::fs::read_to_string(root.join("x/y.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_download_rejects_escaping_key() {
        let tmp = TempDir::new().unwrap();
        let store = InMemoryObjectStore::with_objects("snap", [("../evil.txt", "x")]);
        let err = download(&store, tmp.path()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RepoKbError>(),
            Some(RepoKbError::InvalidObjectKey(_))
        ));
        assert!(!tmp.path().parent().unwrap().join("evil.txt").exists());
    }

    #[test]
    fn test_local_path_rules() {
        let root = Path::new("/data/snap");
        assert_eq!(
            local_path(root, "collections/c/0.dat").unwrap(),
            PathBuf::from("/data/snap/collections/c/0.dat")
        );
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a\\b", "a/"] {
            assert!(local_path(root, bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_object_key_uses_forward_slashes() {
        let root = Path::new("/data/snap");
        let file = root.join("collections").join("c").join("0.dat");
        assert_eq!(object_key(root, &file).unwrap(), "collections/c/0.dat");
    }

    #[test]
    fn test_needs_download() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("snap");
        assert!(needs_download(&root).unwrap());

        std::fs::create_dir_all(&root).unwrap();
        assert!(needs_download(&root).unwrap());

        std::fs::create_dir_all(root.join("collections")).unwrap();
        assert!(!needs_download(&root).unwrap());
    }
}
