//! Commands realizing ops against the back-ends
//!
//! One entry point per op: `execute` dispatches on the op type and the tree
//! types of its sides, performs the filesystem or Drive call, then updates
//! the tree caches write-through. Cache signals fire from the stores; this
//! layer never emits directly.

use crate::cache::{CacheError, CacheManager};
use crate::domain::{Node, OpStatus, OpType, SpidNodePair, TreeType, UserOp};
use crate::services::{DriveClient, DriveError};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Filesystem command failed: {0}")]
    Local(#[from] std::io::Error),

    #[error("Drive command failed: {0}")]
    Drive(#[from] DriveError),

    #[error("Cache update failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Unsupported op shape: {0}")]
    Unsupported(String),
}

impl From<crate::store::TreeStoreError> for CommandError {
    fn from(e: crate::store::TreeStoreError) -> Self {
        CommandError::Cache(CacheError::Store(e))
    }
}

pub struct CommandExecutor {
    cacheman: Arc<CacheManager>,
    drive: Arc<dyn DriveClient>,
}

impl CommandExecutor {
    pub fn new(cacheman: Arc<CacheManager>, drive: Arc<dyn DriveClient>) -> Self {
        Self { cacheman, drive }
    }

    /// Run the back-end action for `op` and apply the resulting cache
    /// mutations. Returns the final ledger status.
    pub async fn execute(&self, op: &UserOp) -> Result<OpStatus, CommandError> {
        debug!("Executing {}", op);
        match op.op_type {
            OpType::Mkdir => self.execute_mkdir(op).await,
            OpType::Rm => self.execute_rm(op).await,
            OpType::Cp | OpType::CpOnto => self.execute_transfer(op, false).await,
            OpType::Mv | OpType::MvOnto => self.execute_transfer(op, true).await,
            OpType::StartDirCp | OpType::StartDirMv => self.execute_start_dir(op).await,
            // The copy flavor has nothing left to do once its descendants
            // are in; it completes as soon as the graph releases it.
            OpType::FinishDirCp => Ok(OpStatus::CompletedOk),
            OpType::FinishDirMv => self.execute_finish_dir_mv(op).await,
        }
    }

    async fn execute_mkdir(&self, op: &UserOp) -> Result<OpStatus, CommandError> {
        self.create_dir_for(&op.src).await?;
        Ok(OpStatus::CompletedOk)
    }

    async fn execute_start_dir(&self, op: &UserOp) -> Result<OpStatus, CommandError> {
        let dst = op
            .dst
            .as_ref()
            .ok_or_else(|| CommandError::Unsupported(format!("START_DIR without dst: {}", op)))?;
        self.create_dir_for(dst).await?;
        Ok(OpStatus::CompletedOk)
    }

    /// Create the directory `sn` describes and mark the node live.
    async fn create_dir_for(&self, sn: &SpidNodePair) -> Result<(), CommandError> {
        let mut node = sn.node.clone();
        match node.tree_type() {
            TreeType::LocalDisk => {
                fs::create_dir_all(&sn.spid.path).await?;
            }
            TreeType::GDrive => {
                if node.goog_id().is_none() {
                    let parent_goog_id = self.parent_goog_id_of(&node).await?;
                    let meta = self
                        .drive
                        .create_folder(node.name(), &parent_goog_id)
                        .await?;
                    node.set_goog_id(meta.goog_id);
                }
            }
            TreeType::Mixed => {
                return Err(CommandError::Unsupported(format!(
                    "cannot create dir on mixed tree: {}",
                    sn.spid
                )));
            }
        }
        node.set_is_live(true);
        let store = self
            .cacheman
            .get_store_for_device_uid(node.device_uid())
            .await?;
        store.upsert(node).await?;
        Ok(())
    }

    async fn execute_rm(&self, op: &UserOp) -> Result<OpStatus, CommandError> {
        let node = &op.src.node;
        match node.tree_type() {
            TreeType::LocalDisk => {
                if node.is_dir() {
                    // Descendant RMs run first; the dir must be empty by now.
                    fs::remove_dir(&op.src.spid.path).await?;
                } else {
                    fs::remove_file(&op.src.spid.path).await?;
                }
            }
            TreeType::GDrive => {
                let goog_id = node.goog_id().ok_or_else(|| {
                    CommandError::Unsupported(format!("RM of GDrive node without goog_id: {}", op))
                })?;
                self.drive.trash_node(goog_id).await?;
            }
            TreeType::Mixed => {
                return Err(CommandError::Unsupported(format!(
                    "RM on mixed tree: {}",
                    op.src.spid
                )));
            }
        }

        let store = self
            .cacheman
            .get_store_for_device_uid(node.device_uid())
            .await?;
        store.remove(node.uid(), true).await?;
        info!("Removed {}", op.src.spid);
        Ok(OpStatus::CompletedOk)
    }

    async fn execute_finish_dir_mv(&self, op: &UserOp) -> Result<OpStatus, CommandError> {
        // All children have been moved out; delete the now-empty source dir.
        let node = &op.src.node;
        match node.tree_type() {
            TreeType::LocalDisk => {
                fs::remove_dir(&op.src.spid.path).await?;
            }
            TreeType::GDrive => {
                let goog_id = node.goog_id().ok_or_else(|| {
                    CommandError::Unsupported(format!(
                        "FINISH_DIR_MV of GDrive node without goog_id: {}",
                        op
                    ))
                })?;
                self.drive.trash_node(goog_id).await?;
            }
            TreeType::Mixed => {
                return Err(CommandError::Unsupported(format!(
                    "FINISH_DIR_MV on mixed tree: {}",
                    op.src.spid
                )));
            }
        }
        let store = self
            .cacheman
            .get_store_for_device_uid(node.device_uid())
            .await?;
        store.remove(node.uid(), true).await?;
        Ok(OpStatus::CompletedOk)
    }

    /// CP/MV (and the ONTO variants) of a single file. `delete_src` marks the
    /// move flavors.
    async fn execute_transfer(&self, op: &UserOp, delete_src: bool) -> Result<OpStatus, CommandError> {
        let dst = op
            .dst
            .as_ref()
            .ok_or_else(|| CommandError::Unsupported(format!("transfer without dst: {}", op)))?;
        let src = &op.src;
        let mut dst_node = dst.node.clone();
        let overwrite = matches!(op.op_type, OpType::CpOnto | OpType::MvOnto);

        match (src.node.tree_type(), dst_node.tree_type()) {
            (TreeType::LocalDisk, TreeType::LocalDisk) => {
                if delete_src && !overwrite {
                    // Same back-end: a rename is atomic and cheap.
                    fs::rename(&src.spid.path, &dst.spid.path).await?;
                } else {
                    fs::copy(&src.spid.path, &dst.spid.path).await?;
                    if delete_src {
                        fs::remove_file(&src.spid.path).await?;
                    }
                }
            }
            (TreeType::LocalDisk, TreeType::GDrive) => {
                let meta = if overwrite {
                    let goog_id = dst_node.goog_id().ok_or_else(|| {
                        CommandError::Unsupported(format!(
                            "overwrite of GDrive node without goog_id: {}",
                            op
                        ))
                    })?;
                    self.drive
                        .update_file_content(goog_id, src.spid.path_buf().as_path())
                        .await?
                } else {
                    let parent_goog_id = self.parent_goog_id_of(&dst_node).await?;
                    self.drive
                        .upload_file(
                            src.spid.path_buf().as_path(),
                            dst_node.name(),
                            &parent_goog_id,
                        )
                        .await?
                };
                dst_node.set_goog_id(meta.goog_id);
                if delete_src {
                    fs::remove_file(&src.spid.path).await?;
                }
            }
            (TreeType::GDrive, TreeType::LocalDisk) => {
                let goog_id = src.node.goog_id().ok_or_else(|| {
                    CommandError::Unsupported(format!(
                        "download of GDrive node without goog_id: {}",
                        op
                    ))
                })?;
                self.drive
                    .download_file(goog_id, dst.spid.path_buf().as_path())
                    .await?;
                if delete_src {
                    self.drive.trash_node(goog_id).await?;
                }
            }
            (TreeType::GDrive, TreeType::GDrive) => {
                let goog_id = src.node.goog_id().ok_or_else(|| {
                    CommandError::Unsupported(format!(
                        "transfer of GDrive node without goog_id: {}",
                        op
                    ))
                })?;
                if delete_src {
                    let from_parent = self.parent_goog_id_of(&src.node).await?;
                    let to_parent = self.parent_goog_id_of(&dst_node).await?;
                    self.drive
                        .move_node(goog_id, &from_parent, &to_parent, Some(dst_node.name()))
                        .await?;
                    dst_node.set_goog_id(goog_id.to_string());
                } else {
                    let parent_goog_id = self.parent_goog_id_of(&dst_node).await?;
                    let meta = self
                        .drive
                        .copy_file(goog_id, dst_node.name(), &parent_goog_id)
                        .await?;
                    dst_node.set_goog_id(meta.goog_id);
                }
            }
            (a, b) => {
                return Err(CommandError::Unsupported(format!(
                    "transfer between {} and {}",
                    a, b
                )));
            }
        }

        dst_node.set_is_live(true);
        let dst_store = self
            .cacheman
            .get_store_for_device_uid(dst_node.device_uid())
            .await?;
        dst_store.upsert(dst_node).await?;

        if delete_src {
            let src_store = self
                .cacheman
                .get_store_for_device_uid(src.node.device_uid())
                .await?;
            src_store.remove(src.node.uid(), true).await?;
        }
        info!("Transferred {} -> {}", src.spid, dst.spid);
        Ok(OpStatus::CompletedOk)
    }

    /// goog_id of a GDrive node's first parent, resolved through the cache.
    async fn parent_goog_id_of(&self, node: &Node) -> Result<String, CommandError> {
        let parent_uid = node.parent_uids().first().copied().ok_or_else(|| {
            CommandError::Unsupported(format!("GDrive node {} has no parent", node.uid()))
        })?;
        let parent = self
            .cacheman
            .get_node(node.device_uid(), parent_uid)
            .await?;
        parent
            .goog_id()
            .map(str::to_owned)
            .ok_or_else(|| {
                CommandError::Unsupported(format!(
                    "parent {} of {} has no goog_id yet",
                    parent_uid,
                    node.uid()
                ))
            })
    }
}
