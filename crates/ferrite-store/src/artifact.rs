//! Durable artifacts.
//!
//! Unlike workspace snapshots, artifacts outlive the invocation: they are
//! stored under a stable destination name and only an external retention
//! policy removes them. A file is stored as its raw bytes; a directory is
//! packed into a single archive.

use ferrite_core::ids::InvocationId;
use ferrite_core::ports::BlobStore;
use ferrite_core::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::archive;

const DIR_SUFFIX: &str = ".tar.zst";

#[derive(Clone)]
pub struct ArtifactStore {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn key(invocation: InvocationId, job: &str, destination: &str) -> String {
        format!("{}/{}/{}", invocation, job, destination.trim_matches('/'))
    }

    /// Store the file or directory at `path` (relative to `workdir`)
    /// under the given destination. A missing source path fails the step.
    pub async fn store(
        &self,
        invocation: InvocationId,
        job: &str,
        workdir: &Path,
        path: &str,
        destination: &str,
    ) -> Result<()> {
        let source = workdir.join(path);
        if !source.exists() {
            return Err(Error::Artifact(format!(
                "artifact source does not exist: {}",
                source.display()
            )));
        }
        let (key, bytes) = if source.is_dir() {
            let base = source.clone();
            let bytes =
                tokio::task::spawn_blocking(move || archive::pack(&base, &[".".into()]))
                    .await
                    .map_err(|e| Error::Internal(format!("pack task failed: {}", e)))??;
            (
                format!("{}{}", Self::key(invocation, job, destination), DIR_SUFFIX),
                bytes,
            )
        } else {
            (
                Self::key(invocation, job, destination),
                tokio::fs::read(&source).await?,
            )
        };
        info!(job, key, size = bytes.len(), "stored artifact");
        self.blobs.put(&key, &bytes).await
    }

    /// Raw bytes of a previously stored file artifact.
    pub async fn retrieve(
        &self,
        invocation: InvocationId,
        job: &str,
        destination: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.blobs
            .get(&Self::key(invocation, job, destination))
            .await
    }

    /// All artifact keys recorded for an invocation.
    pub async fn list(&self, invocation: InvocationId) -> Result<Vec<String>> {
        self.blobs.list(&format!("{}/", invocation)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FilesystemStore;

    fn store(root: &Path) -> ArtifactStore {
        ArtifactStore::new(Arc::new(FilesystemStore::new(root)))
    }

    #[tokio::test]
    async fn test_store_and_retrieve_file() {
        let blobs = tempfile::tempdir().unwrap();
        let artifacts = store(blobs.path());
        let inv = InvocationId::new();

        let workdir = tempfile::tempdir().unwrap();
        std::fs::write(workdir.path().join("report.xml"), b"<ok/>").unwrap();

        artifacts
            .store(inv, "test", workdir.path(), "report.xml", "reports/junit.xml")
            .await
            .unwrap();
        let bytes = artifacts
            .retrieve(inv, "test", "reports/junit.xml")
            .await
            .unwrap();
        assert_eq!(bytes, Some(b"<ok/>".to_vec()));
    }

    #[tokio::test]
    async fn test_directory_is_packed() {
        let blobs = tempfile::tempdir().unwrap();
        let artifacts = store(blobs.path());
        let inv = InvocationId::new();

        let workdir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(workdir.path().join("coverage")).unwrap();
        std::fs::write(workdir.path().join("coverage/index.html"), b"<html>").unwrap();

        artifacts
            .store(inv, "test", workdir.path(), "coverage", "coverage")
            .await
            .unwrap();

        let keys = artifacts.list(inv).await.unwrap();
        assert_eq!(keys, vec![format!("{}/test/coverage.tar.zst", inv)]);
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let blobs = tempfile::tempdir().unwrap();
        let artifacts = store(blobs.path());
        let workdir = tempfile::tempdir().unwrap();

        let err = artifacts
            .store(InvocationId::new(), "build", workdir.path(), "missing", "out")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Artifact(_)));
    }
}
