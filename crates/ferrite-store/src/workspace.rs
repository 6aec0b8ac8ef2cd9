//! Workflow-scoped workspace snapshots.
//!
//! One job run per workflow may persist paths from its working directory;
//! downstream runs in the same workflow restore them before their steps
//! execute. Snapshots are keyed by invocation and workflow so parallel
//! invocations never see each other's files.

use ferrite_core::ids::InvocationId;
use ferrite_core::ports::BlobStore;
use ferrite_core::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::archive;

#[derive(Clone)]
pub struct WorkspaceStore {
    blobs: Arc<dyn BlobStore>,
}

impl WorkspaceStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn key(invocation: InvocationId, workflow: &str) -> String {
        format!("workspaces/{}/{}", invocation, workflow)
    }

    /// Snapshot the given paths out of `workdir` into workflow-scoped
    /// storage. Paths that do not exist fail the persist.
    pub async fn persist(
        &self,
        invocation: InvocationId,
        workflow: &str,
        workdir: &Path,
        paths: &[PathBuf],
    ) -> Result<()> {
        let workdir = workdir.to_path_buf();
        let paths = paths.to_vec();
        let bytes = tokio::task::spawn_blocking(move || archive::pack(&workdir, &paths))
            .await
            .map_err(|e| Error::Internal(format!("pack task failed: {}", e)))??;
        let key = Self::key(invocation, workflow);
        info!(workflow, key, size = bytes.len(), "persisted workspace");
        self.blobs.put(&key, &bytes).await
    }

    /// Restore the workflow's snapshot into `workdir`. Attaching before
    /// any snapshot exists is a workspace error, not a silent no-op.
    pub async fn attach(
        &self,
        invocation: InvocationId,
        workflow: &str,
        workdir: &Path,
    ) -> Result<()> {
        let key = Self::key(invocation, workflow);
        let bytes = self.blobs.get(&key).await?.ok_or_else(|| {
            Error::Workspace(format!(
                "no workspace snapshot exists for workflow {:?}",
                workflow
            ))
        })?;
        let dest = workdir.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack(&bytes, &dest))
            .await
            .map_err(|e| Error::Internal(format!("unpack task failed: {}", e)))??;
        info!(workflow, key, "attached workspace");
        Ok(())
    }
}
