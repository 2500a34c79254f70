//! Google Drive back-end contract
//!
//! The HTTP client itself lives outside this crate; commands talk to whatever
//! implements [`DriveClient`]. All calls are made outside tree-store locks.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Drive API error: {0}")]
    Api(String),

    #[error("Remote node not found: {0}")]
    NotFound(String),

    #[error("I/O error during transfer: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata the remote reports for a created or copied node.
#[derive(Debug, Clone)]
pub struct DriveNodeMeta {
    pub goog_id: String,
    pub name: String,
    pub size_bytes: Option<u64>,
    pub md5: Option<String>,
    pub create_ts: i64,
    pub modify_ts: i64,
}

#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Create a folder under `parent_goog_id` and return its metadata.
    async fn create_folder(
        &self,
        name: &str,
        parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError>;

    /// Upload a local file as a child of `parent_goog_id`.
    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError>;

    /// Overwrite the content of an existing remote file.
    async fn update_file_content(
        &self,
        goog_id: &str,
        local_path: &Path,
    ) -> Result<DriveNodeMeta, DriveError>;

    /// Download a remote file to `local_path`.
    async fn download_file(&self, goog_id: &str, local_path: &Path) -> Result<(), DriveError>;

    /// Server-side copy of a remote file into `dst_parent_goog_id`.
    async fn copy_file(
        &self,
        goog_id: &str,
        new_name: &str,
        dst_parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError>;

    /// Re-parent and/or rename a remote node.
    async fn move_node(
        &self,
        goog_id: &str,
        from_parent_goog_id: &str,
        to_parent_goog_id: &str,
        new_name: Option<&str>,
    ) -> Result<(), DriveError>;

    /// Move a remote node to the trash.
    async fn trash_node(&self, goog_id: &str) -> Result<(), DriveError>;
}
