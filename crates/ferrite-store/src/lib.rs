//! Ferrite CI storage: workspace snapshots and durable artifacts.
//!
//! Workspaces are ephemeral to the invocation: a single producer job run
//! snapshots paths into workflow-scoped storage, and dependent runs
//! restore the snapshot before their own steps execute. Artifacts are
//! durable: they outlive the invocation under a stable name, subject only
//! to an external retention policy.

pub mod archive;
pub mod artifact;
pub mod blob;
pub mod workspace;

pub use artifact::ArtifactStore;
pub use blob::FilesystemStore;
pub use workspace::WorkspaceStore;
