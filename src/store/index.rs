//! Per-subtree on-disk tree index
//!
//! Each cached subtree is backed by one SQLite file holding the node rows for
//! that subtree. The owning tree store writes through to the index inside its
//! own critical section, so an observer sees memory and disk change together
//! or not at all.

use crate::domain::node::{FileTimes, GDriveFileNode, GDriveFolderNode, LocalDirNode, LocalFileNode};
use crate::domain::{DeviceUid, Node, NodeBase, TrashStatus, TreeType, Uid};
use crate::infrastructure::database::entities::gdrive_node::{
    gdrive_file, gdrive_folder, join_paths, join_uids, split_paths, split_uids,
};
use crate::infrastructure::database::entities::local_node::{local_dir, local_file};
use crate::infrastructure::database::Database;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DbErr, EntityTrait};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Index file name for a local subtree: `{device_uid}_LO_{mangled_path}.db`.
pub fn local_index_file_name(device_uid: DeviceUid, subtree_root_path: &str) -> String {
    let mangled: String = subtree_root_path
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    format!("{}_LO_{}.db", device_uid, mangled)
}

/// Index file name for a device's whole GDrive tree.
pub fn gdrive_index_file_name(device_uid: DeviceUid) -> String {
    format!("{}_gdrive.db", device_uid)
}

pub struct SubtreeIndex {
    db: Database,
    device_uid: DeviceUid,
    tree_type: TreeType,
    file_path: PathBuf,
}

impl SubtreeIndex {
    pub async fn open(
        file_path: &Path,
        device_uid: DeviceUid,
        tree_type: TreeType,
    ) -> Result<Self, DbErr> {
        let db = Database::open(file_path).await?;
        match tree_type {
            TreeType::LocalDisk => {
                db.ensure_table(local_file::Entity).await?;
                db.ensure_table(local_dir::Entity).await?;
            }
            TreeType::GDrive => {
                db.ensure_table(gdrive_file::Entity).await?;
                db.ensure_table(gdrive_folder::Entity).await?;
            }
            TreeType::Mixed => {}
        }
        Ok(Self {
            db,
            device_uid,
            tree_type,
            file_path: file_path.to_path_buf(),
        })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Read every node row back into memory.
    pub async fn load_all(&self) -> Result<Vec<Node>, DbErr> {
        let mut nodes = Vec::new();
        match self.tree_type {
            TreeType::LocalDisk => {
                for row in local_dir::Entity::find().all(self.db.conn()).await? {
                    nodes.push(self.local_dir_to_node(row));
                }
                for row in local_file::Entity::find().all(self.db.conn()).await? {
                    nodes.push(self.local_file_to_node(row));
                }
            }
            TreeType::GDrive => {
                for row in gdrive_folder::Entity::find().all(self.db.conn()).await? {
                    nodes.push(self.gdrive_folder_to_node(row));
                }
                for row in gdrive_file::Entity::find().all(self.db.conn()).await? {
                    nodes.push(self.gdrive_file_to_node(row));
                }
            }
            TreeType::Mixed => {}
        }
        debug!("Loaded {} nodes from {:?}", nodes.len(), self.file_path);
        Ok(nodes)
    }

    /// Insert or replace the row for `node`. Synthetic container nodes are
    /// memory-only and skipped.
    pub async fn upsert_node(&self, node: &Node) -> Result<(), DbErr> {
        match node {
            Node::LocalFile(n) => {
                local_file::Entity::delete_by_id(n.base.uid.0 as i64)
                    .exec(self.db.conn())
                    .await?;
                self.local_file_row(n).insert(self.db.conn()).await?;
            }
            Node::LocalDir(n) => {
                local_dir::Entity::delete_by_id(n.base.uid.0 as i64)
                    .exec(self.db.conn())
                    .await?;
                self.local_dir_row(n).insert(self.db.conn()).await?;
            }
            Node::GDriveFile(n) => {
                gdrive_file::Entity::delete_by_id(n.base.uid.0 as i64)
                    .exec(self.db.conn())
                    .await?;
                self.gdrive_file_row(n).insert(self.db.conn()).await?;
            }
            Node::GDriveFolder(n) => {
                gdrive_folder::Entity::delete_by_id(n.base.uid.0 as i64)
                    .exec(self.db.conn())
                    .await?;
                self.gdrive_folder_row(n).insert(self.db.conn()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn remove_node(&self, node: &Node) -> Result<(), DbErr> {
        let uid = node.uid().0 as i64;
        match node {
            Node::LocalFile(_) => {
                local_file::Entity::delete_by_id(uid).exec(self.db.conn()).await?;
            }
            Node::LocalDir(_) => {
                local_dir::Entity::delete_by_id(uid).exec(self.db.conn()).await?;
            }
            Node::GDriveFile(_) => {
                gdrive_file::Entity::delete_by_id(uid).exec(self.db.conn()).await?;
            }
            Node::GDriveFolder(_) => {
                gdrive_folder::Entity::delete_by_id(uid).exec(self.db.conn()).await?;
            }
            _ => {}
        }
        Ok(())
    }

    fn local_file_row(&self, n: &LocalFileNode) -> local_file::ActiveModel {
        local_file::ActiveModel {
            uid: Set(n.base.uid.0 as i64),
            parent_uid: Set(n.base.parent_uids.first().map(|u| u.0).unwrap_or(0) as i64),
            name: Set(n.base.name.clone()),
            full_path: Set(n.base.path_list.first().cloned().unwrap_or_default()),
            content_uid: Set(n.content_uid.0 as i64),
            trashed: Set(i32::from(n.base.trashed)),
            is_shared: Set(n.base.is_shared),
            is_live: Set(n.base.is_live),
            create_ts: Set(n.times.create_ts),
            modify_ts: Set(n.times.modify_ts),
            change_ts: Set(n.times.change_ts),
            sync_ts: Set(n.times.sync_ts),
        }
    }

    fn local_file_to_node(&self, row: local_file::Model) -> Node {
        let mut base = NodeBase::new(
            Uid(row.uid as u64),
            self.device_uid,
            row.name,
            row.full_path,
        );
        if row.parent_uid != 0 {
            base.parent_uids = vec![Uid(row.parent_uid as u64)];
        }
        base.trashed = TrashStatus::try_from(row.trashed).unwrap_or_default();
        base.is_shared = row.is_shared;
        base.is_live = row.is_live;
        Node::LocalFile(LocalFileNode {
            base,
            content_uid: Uid(row.content_uid as u64),
            times: FileTimes {
                create_ts: row.create_ts,
                modify_ts: row.modify_ts,
                change_ts: row.change_ts,
                sync_ts: row.sync_ts,
            },
        })
    }

    fn local_dir_row(&self, n: &LocalDirNode) -> local_dir::ActiveModel {
        local_dir::ActiveModel {
            uid: Set(n.base.uid.0 as i64),
            parent_uid: Set(n.base.parent_uids.first().map(|u| u.0).unwrap_or(0) as i64),
            name: Set(n.base.name.clone()),
            full_path: Set(n.base.path_list.first().cloned().unwrap_or_default()),
            trashed: Set(i32::from(n.base.trashed)),
            is_shared: Set(n.base.is_shared),
            is_live: Set(n.base.is_live),
            all_children_fetched: Set(n.all_children_fetched),
            sync_ts: Set(n.sync_ts),
        }
    }

    fn local_dir_to_node(&self, row: local_dir::Model) -> Node {
        let mut base = NodeBase::new(
            Uid(row.uid as u64),
            self.device_uid,
            row.name,
            row.full_path,
        );
        if row.parent_uid != 0 {
            base.parent_uids = vec![Uid(row.parent_uid as u64)];
        }
        base.trashed = TrashStatus::try_from(row.trashed).unwrap_or_default();
        base.is_shared = row.is_shared;
        base.is_live = row.is_live;
        Node::LocalDir(LocalDirNode {
            base,
            sync_ts: row.sync_ts,
            all_children_fetched: row.all_children_fetched,
            dir_stats: None,
        })
    }

    fn gdrive_file_row(&self, n: &GDriveFileNode) -> gdrive_file::ActiveModel {
        gdrive_file::ActiveModel {
            uid: Set(n.base.uid.0 as i64),
            goog_id: Set(n.goog_id.clone()),
            parent_uids: Set(join_uids(&n.base.parent_uids)),
            name: Set(n.base.name.clone()),
            path_list: Set(join_paths(&n.base.path_list)),
            content_uid: Set(n.content_uid.0 as i64),
            trashed: Set(i32::from(n.base.trashed)),
            is_shared: Set(n.base.is_shared),
            is_live: Set(n.base.is_live),
            create_ts: Set(n.times.create_ts),
            modify_ts: Set(n.times.modify_ts),
            sync_ts: Set(n.times.sync_ts),
        }
    }

    fn gdrive_file_to_node(&self, row: gdrive_file::Model) -> Node {
        let mut base = NodeBase::new(Uid(row.uid as u64), self.device_uid, row.name, "");
        base.parent_uids = split_uids(&row.parent_uids);
        base.path_list = split_paths(&row.path_list);
        base.trashed = TrashStatus::try_from(row.trashed).unwrap_or_default();
        base.is_shared = row.is_shared;
        base.is_live = row.is_live;
        Node::GDriveFile(GDriveFileNode {
            base,
            goog_id: row.goog_id,
            content_uid: Uid(row.content_uid as u64),
            times: FileTimes {
                create_ts: row.create_ts,
                modify_ts: row.modify_ts,
                change_ts: 0,
                sync_ts: row.sync_ts,
            },
        })
    }

    fn gdrive_folder_row(&self, n: &GDriveFolderNode) -> gdrive_folder::ActiveModel {
        gdrive_folder::ActiveModel {
            uid: Set(n.base.uid.0 as i64),
            goog_id: Set(n.goog_id.clone()),
            parent_uids: Set(join_uids(&n.base.parent_uids)),
            name: Set(n.base.name.clone()),
            path_list: Set(join_paths(&n.base.path_list)),
            trashed: Set(i32::from(n.base.trashed)),
            is_shared: Set(n.base.is_shared),
            is_live: Set(n.base.is_live),
            all_children_fetched: Set(n.all_children_fetched),
            sync_ts: Set(n.sync_ts),
        }
    }

    fn gdrive_folder_to_node(&self, row: gdrive_folder::Model) -> Node {
        let mut base = NodeBase::new(Uid(row.uid as u64), self.device_uid, row.name, "");
        base.parent_uids = split_uids(&row.parent_uids);
        base.path_list = split_paths(&row.path_list);
        base.trashed = TrashStatus::try_from(row.trashed).unwrap_or_default();
        base.is_shared = row.is_shared;
        base.is_live = row.is_live;
        Node::GDriveFolder(GDriveFolderNode {
            base,
            goog_id: row.goog_id,
            all_children_fetched: row.all_children_fetched,
            sync_ts: row.sync_ts,
            dir_stats: None,
        })
    }
}
