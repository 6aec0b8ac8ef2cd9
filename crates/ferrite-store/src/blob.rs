//! Filesystem-backed blob store.

use async_trait::async_trait;
use ferrite_core::ports::BlobStore;
use ferrite_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// [`BlobStore`] that lays keys out as files under a root directory.
/// Keys are slash-separated; each segment becomes a path component after
/// sanitization, so `workspaces/inv_x/build` lands at
/// `<root>/workspaces/inv_x/build`.
#[derive(Debug, Clone)]
pub struct FilesystemStore {
    root: PathBuf,
}

impl FilesystemStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Storage(format!("invalid blob key: {:?}", key)));
            }
            path.push(sanitize(segment));
        }
        Ok(path)
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl BlobStore for FilesystemStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(key, size = bytes.len(), "stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_for(key)?.exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            keys.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        store.put("workspaces/inv_1/build", b"snapshot").await.unwrap();
        assert_eq!(
            store.get("workspaces/inv_1/build").await.unwrap(),
            Some(b"snapshot".to_vec())
        );
        assert!(store.exists("workspaces/inv_1/build").await.unwrap());
        assert_eq!(store.get("workspaces/inv_1/deploy").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());

        store.put("inv/a/job1/out.bin", b"1").await.unwrap();
        store.put("inv/a/job2/out.bin", b"2").await.unwrap();
        store.put("inv/b/job1/out.bin", b"3").await.unwrap();

        let keys = store.list("inv/a/").await.unwrap();
        assert_eq!(keys, vec!["inv/a/job1/out.bin", "inv/a/job2/out.bin"]);
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemStore::new(dir.path());
        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.get("a//b").await.is_err());
    }
}
