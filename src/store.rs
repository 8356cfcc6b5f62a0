//! Object storage collaborator.
//!
//! Attachments are fetched by path through [`ObjectStore`]. Docent only
//! needs two operations, so any blob store can sit behind the trait.
//!
//! # Usage
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use docent::store::{MemoryObjectStore, ObjectStore};
//!
//! let store = MemoryObjectStore::new();
//! store.put_bytes("uploads/a.txt", b"hello".to_vec()).await.unwrap();
//! assert_eq!(store.fetch_bytes("uploads/a.txt").await.unwrap(), b"hello");
//! # }
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;

/// A byte store addressed by relative path.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>>;

    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()>;
}

/// Files under a root directory. Paths may not escape the root.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe || path.is_empty() {
            bail!("invalid object path: {}", path);
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read object: {}", full.display()))
    }

    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write object: {}", full.display()))
    }
}

/// In-process store, mostly for tests.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch_bytes(&self, path: &str) -> Result<Vec<u8>> {
        match self.objects.read().await.get(path) {
            Some(bytes) => Ok(bytes.clone()),
            None => bail!("object not found: {}", path),
        }
    }

    async fn put_bytes(&self, path: &str, bytes: Vec<u8>) -> Result<()> {
        self.objects.write().await.insert(path.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        store.put_bytes("docs/handbook.txt", b"Chapter 1".to_vec()).await.unwrap();
        assert_eq!(store.fetch_bytes("docs/handbook.txt").await.unwrap(), b"Chapter 1");
        assert!(dir.path().join("docs/handbook.txt").exists());
    }

    #[tokio::test]
    async fn test_fs_store_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.fetch_bytes("../etc/passwd").await.is_err());
        assert!(store.put_bytes("/abs/path", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_missing_object() {
        let store = MemoryObjectStore::new();
        assert!(store.fetch_bytes("nope").await.is_err());
    }
}
