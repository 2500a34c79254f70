//! Persisted operation ledger
//!
//! One row per op in `op_pending` / `op_completed`, plus a copy of each op's
//! src and dst node payloads in per-(lifecycle, node table, side) companion
//! tables. All writes for a single op happen in one transaction; pending ops
//! are rehydrated in op-UID order at startup so execution survives restart.

use crate::domain::node::{FileTimes, GDriveFileNode, GDriveFolderNode, LocalDirNode, LocalFileNode};
use crate::domain::{
    DeviceUid, Node, NodeBase, ObjType, OpStatus, OpType, SpidNodePair, TrashStatus, Uid, UserOp,
};
use crate::infrastructure::database::entities::gdrive_node::{join_paths, join_uids, split_paths, split_uids};
use crate::infrastructure::database::entities::op::{op_completed, op_pending};
use crate::infrastructure::database::entities::op_node;
use crate::infrastructure::database::Database;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, TransactionTrait,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),

    #[error("Ledger row is corrupt: {0}")]
    Corrupt(String),
}

/// Field bundle shared by all sixteen companion tables.
struct NodePayload {
    op_uid: i64,
    uid: i64,
    device_uid: i64,
    parent_uids: String,
    name: String,
    path_list: String,
    goog_id: Option<String>,
    content_uid: Option<i64>,
    trashed: i32,
    is_shared: bool,
    is_live: bool,
    all_children_fetched: bool,
    create_ts: i64,
    modify_ts: i64,
    change_ts: i64,
    sync_ts: i64,
}

impl NodePayload {
    fn from_node(op_uid: Uid, node: &Node) -> Self {
        let base = node.base();
        let (create_ts, modify_ts, change_ts, sync_ts) = match node {
            Node::LocalFile(n) => (
                n.times.create_ts,
                n.times.modify_ts,
                n.times.change_ts,
                n.times.sync_ts,
            ),
            Node::GDriveFile(n) => (n.times.create_ts, n.times.modify_ts, 0, n.times.sync_ts),
            Node::LocalDir(n) => (0, 0, 0, n.sync_ts),
            Node::GDriveFolder(n) => (0, 0, 0, n.sync_ts),
            _ => (0, 0, 0, 0),
        };
        Self {
            op_uid: op_uid.0 as i64,
            uid: base.uid.0 as i64,
            device_uid: base.device_uid.0 as i64,
            parent_uids: join_uids(&base.parent_uids),
            name: base.name.clone(),
            path_list: join_paths(&base.path_list),
            goog_id: node.goog_id().map(str::to_owned),
            content_uid: node.content_uid().map(|u| u.0 as i64),
            trashed: i32::from(base.trashed),
            is_shared: base.is_shared,
            is_live: base.is_live,
            all_children_fetched: node.all_children_fetched(),
            create_ts,
            modify_ts,
            change_ts,
            sync_ts,
        }
    }

    fn into_node(self, flavor: ObjType) -> Node {
        let mut base = NodeBase::new(
            Uid(self.uid as u64),
            DeviceUid(self.device_uid as u64),
            self.name,
            "",
        );
        base.parent_uids = split_uids(&self.parent_uids);
        base.path_list = split_paths(&self.path_list);
        base.trashed = TrashStatus::try_from(self.trashed).unwrap_or_default();
        base.is_shared = self.is_shared;
        base.is_live = self.is_live;
        let times = FileTimes {
            create_ts: self.create_ts,
            modify_ts: self.modify_ts,
            change_ts: self.change_ts,
            sync_ts: self.sync_ts,
        };
        match flavor {
            ObjType::LocalFile => Node::LocalFile(LocalFileNode {
                base,
                content_uid: Uid(self.content_uid.unwrap_or_default() as u64),
                times,
            }),
            ObjType::GDriveFile => Node::GDriveFile(GDriveFileNode {
                base,
                goog_id: self.goog_id,
                content_uid: Uid(self.content_uid.unwrap_or_default() as u64),
                times,
            }),
            ObjType::GDriveFolder => Node::GDriveFolder(GDriveFolderNode {
                base,
                goog_id: self.goog_id,
                all_children_fetched: self.all_children_fetched,
                sync_ts: self.sync_ts,
                dir_stats: None,
            }),
            // Synthetic flavors are never persisted; default to a local dir.
            _ => Node::LocalDir(LocalDirNode {
                base,
                sync_ts: self.sync_ts,
                all_children_fetched: self.all_children_fetched,
                dir_stats: None,
            }),
        }
    }
}

macro_rules! insert_payload {
    ($table:ident, $txn:expr, $payload:expr) => {{
        let p = $payload;
        op_node::$table::ActiveModel {
            op_uid: Set(p.op_uid),
            uid: Set(p.uid),
            device_uid: Set(p.device_uid),
            parent_uids: Set(p.parent_uids),
            name: Set(p.name),
            path_list: Set(p.path_list),
            goog_id: Set(p.goog_id),
            content_uid: Set(p.content_uid),
            trashed: Set(p.trashed),
            is_shared: Set(p.is_shared),
            is_live: Set(p.is_live),
            all_children_fetched: Set(p.all_children_fetched),
            create_ts: Set(p.create_ts),
            modify_ts: Set(p.modify_ts),
            change_ts: Set(p.change_ts),
            sync_ts: Set(p.sync_ts),
        }
        .insert($txn)
        .await?;
    }};
}

macro_rules! delete_payload {
    ($table:ident, $txn:expr, $op_uid:expr) => {{
        op_node::$table::Entity::delete_by_id($op_uid)
            .exec($txn)
            .await?;
    }};
}

macro_rules! load_payloads {
    ($table:ident, $conn:expr, $flavor:expr, $out:expr, $side:expr) => {{
        for row in op_node::$table::Entity::find().all($conn).await? {
            let payload = NodePayload {
                op_uid: row.op_uid,
                uid: row.uid,
                device_uid: row.device_uid,
                parent_uids: row.parent_uids,
                name: row.name,
                path_list: row.path_list,
                goog_id: row.goog_id,
                content_uid: row.content_uid,
                trashed: row.trashed,
                is_shared: row.is_shared,
                is_live: row.is_live,
                all_children_fetched: row.all_children_fetched,
                create_ts: row.create_ts,
                modify_ts: row.modify_ts,
                change_ts: row.change_ts,
                sync_ts: row.sync_ts,
            };
            $out.insert(
                (Uid(payload.op_uid as u64), $side),
                payload.into_node($flavor),
            );
        }
    }};
}

async fn insert_pending_payload(
    txn: &DatabaseTransaction,
    op_uid: Uid,
    node: &Node,
    is_src: bool,
) -> Result<(), DbErr> {
    let payload = NodePayload::from_node(op_uid, node);
    match (node.obj_type(), is_src) {
        (ObjType::LocalFile, true) => insert_payload!(pending_local_file_src, txn, payload),
        (ObjType::LocalFile, false) => insert_payload!(pending_local_file_dst, txn, payload),
        (ObjType::GDriveFile, true) => insert_payload!(pending_gdrive_file_src, txn, payload),
        (ObjType::GDriveFile, false) => insert_payload!(pending_gdrive_file_dst, txn, payload),
        (ObjType::GDriveFolder, true) => insert_payload!(pending_gdrive_folder_src, txn, payload),
        (ObjType::GDriveFolder, false) => insert_payload!(pending_gdrive_folder_dst, txn, payload),
        (_, true) => insert_payload!(pending_local_dir_src, txn, payload),
        (_, false) => insert_payload!(pending_local_dir_dst, txn, payload),
    }
    Ok(())
}

async fn insert_archive_payload(
    txn: &DatabaseTransaction,
    op_uid: Uid,
    node: &Node,
    is_src: bool,
) -> Result<(), DbErr> {
    let payload = NodePayload::from_node(op_uid, node);
    match (node.obj_type(), is_src) {
        (ObjType::LocalFile, true) => insert_payload!(archive_local_file_src, txn, payload),
        (ObjType::LocalFile, false) => insert_payload!(archive_local_file_dst, txn, payload),
        (ObjType::GDriveFile, true) => insert_payload!(archive_gdrive_file_src, txn, payload),
        (ObjType::GDriveFile, false) => insert_payload!(archive_gdrive_file_dst, txn, payload),
        (ObjType::GDriveFolder, true) => insert_payload!(archive_gdrive_folder_src, txn, payload),
        (ObjType::GDriveFolder, false) => insert_payload!(archive_gdrive_folder_dst, txn, payload),
        (_, true) => insert_payload!(archive_local_dir_src, txn, payload),
        (_, false) => insert_payload!(archive_local_dir_dst, txn, payload),
    }
    Ok(())
}

async fn delete_pending_payload(
    txn: &DatabaseTransaction,
    op_uid: Uid,
    node: &Node,
    is_src: bool,
) -> Result<(), DbErr> {
    let id = op_uid.0 as i64;
    match (node.obj_type(), is_src) {
        (ObjType::LocalFile, true) => delete_payload!(pending_local_file_src, txn, id),
        (ObjType::LocalFile, false) => delete_payload!(pending_local_file_dst, txn, id),
        (ObjType::GDriveFile, true) => delete_payload!(pending_gdrive_file_src, txn, id),
        (ObjType::GDriveFile, false) => delete_payload!(pending_gdrive_file_dst, txn, id),
        (ObjType::GDriveFolder, true) => delete_payload!(pending_gdrive_folder_src, txn, id),
        (ObjType::GDriveFolder, false) => delete_payload!(pending_gdrive_folder_dst, txn, id),
        (_, true) => delete_payload!(pending_local_dir_src, txn, id),
        (_, false) => delete_payload!(pending_local_dir_dst, txn, id),
    }
    Ok(())
}

/// Side marker used while reassembling pending ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
    Src,
    Dst,
}

pub struct OpLedger {
    db: Arc<Database>,
}

impl OpLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn load(&self) -> Result<(), LedgerError> {
        self.db.ensure_table(op_pending::Entity).await?;
        self.db.ensure_table(op_completed::Entity).await?;
        self.db.ensure_table(op_node::pending_local_file_src::Entity).await?;
        self.db.ensure_table(op_node::pending_local_file_dst::Entity).await?;
        self.db.ensure_table(op_node::pending_local_dir_src::Entity).await?;
        self.db.ensure_table(op_node::pending_local_dir_dst::Entity).await?;
        self.db.ensure_table(op_node::pending_gdrive_file_src::Entity).await?;
        self.db.ensure_table(op_node::pending_gdrive_file_dst::Entity).await?;
        self.db.ensure_table(op_node::pending_gdrive_folder_src::Entity).await?;
        self.db.ensure_table(op_node::pending_gdrive_folder_dst::Entity).await?;
        self.db.ensure_table(op_node::archive_local_file_src::Entity).await?;
        self.db.ensure_table(op_node::archive_local_file_dst::Entity).await?;
        self.db.ensure_table(op_node::archive_local_dir_src::Entity).await?;
        self.db.ensure_table(op_node::archive_local_dir_dst::Entity).await?;
        self.db.ensure_table(op_node::archive_gdrive_file_src::Entity).await?;
        self.db.ensure_table(op_node::archive_gdrive_file_dst::Entity).await?;
        self.db.ensure_table(op_node::archive_gdrive_folder_src::Entity).await?;
        self.db.ensure_table(op_node::archive_gdrive_folder_dst::Entity).await?;
        Ok(())
    }

    /// Persist every op of a batch as PENDING, one transaction for the lot.
    pub async fn insert_pending_batch(&self, ops: &[Arc<UserOp>]) -> Result<(), LedgerError> {
        let txn = self.db.conn().begin().await?;
        for op in ops {
            op_pending::ActiveModel {
                op_uid: Set(op.op_uid.0 as i64),
                batch_uid: Set(op.batch_uid.0 as i64),
                op_type: Set(i32::from(op.op_type)),
                status: Set(i32::from(OpStatus::Pending)),
                src_node_uid: Set(op.src.spid.node_uid.0 as i64),
                dst_node_uid: Set(op.dst.as_ref().map(|d| d.spid.node_uid.0 as i64)),
                create_ts: Set(op.create_ts),
                detail_msg: Set(None),
            }
            .insert(&txn)
            .await?;
            insert_pending_payload(&txn, op.op_uid, &op.src.node, true).await?;
            if let Some(dst) = &op.dst {
                insert_pending_payload(&txn, op.op_uid, &dst.node, false).await?;
            }
        }
        txn.commit().await?;
        info!("Persisted batch of {} pending ops", ops.len());
        Ok(())
    }

    /// All pending (and stopped-on-error) ops in op-UID order, rebuilt with
    /// their node payloads.
    pub async fn get_all_pending_ops(&self) -> Result<Vec<UserOp>, LedgerError> {
        let conn = self.db.conn();
        let mut nodes: HashMap<(Uid, Side), Node> = HashMap::new();
        load_payloads!(pending_local_file_src, conn, ObjType::LocalFile, nodes, Side::Src);
        load_payloads!(pending_local_file_dst, conn, ObjType::LocalFile, nodes, Side::Dst);
        load_payloads!(pending_local_dir_src, conn, ObjType::LocalDir, nodes, Side::Src);
        load_payloads!(pending_local_dir_dst, conn, ObjType::LocalDir, nodes, Side::Dst);
        load_payloads!(pending_gdrive_file_src, conn, ObjType::GDriveFile, nodes, Side::Src);
        load_payloads!(pending_gdrive_file_dst, conn, ObjType::GDriveFile, nodes, Side::Dst);
        load_payloads!(pending_gdrive_folder_src, conn, ObjType::GDriveFolder, nodes, Side::Src);
        load_payloads!(pending_gdrive_folder_dst, conn, ObjType::GDriveFolder, nodes, Side::Dst);

        let rows = op_pending::Entity::find()
            .order_by_asc(op_pending::Column::OpUid)
            .all(conn)
            .await?;

        let mut ops = Vec::with_capacity(rows.len());
        for row in rows {
            let op_uid = Uid(row.op_uid as u64);
            let op_type = OpType::try_from(row.op_type)
                .map_err(|_| LedgerError::Corrupt(format!("bad op_type for op {}", op_uid)))?;
            let status = OpStatus::try_from(row.status)
                .map_err(|_| LedgerError::Corrupt(format!("bad status for op {}", op_uid)))?;
            let src = nodes
                .remove(&(op_uid, Side::Src))
                .ok_or_else(|| LedgerError::Corrupt(format!("missing src payload for op {}", op_uid)))?;
            let dst = if row.dst_node_uid.is_some() {
                Some(nodes.remove(&(op_uid, Side::Dst)).ok_or_else(|| {
                    LedgerError::Corrupt(format!("missing dst payload for op {}", op_uid))
                })?)
            } else {
                None
            };
            ops.push(UserOp {
                op_uid,
                batch_uid: Uid(row.batch_uid as u64),
                op_type,
                status,
                src: SpidNodePair::from_node(src),
                dst: dst.map(SpidNodePair::from_node),
                create_ts: row.create_ts,
            });
        }
        if !nodes.is_empty() {
            warn!("{} orphaned node payload rows in pending tables", nodes.len());
        }
        Ok(ops)
    }

    /// Move an op from pending to the archive with its final status.
    pub async fn archive(
        &self,
        op: &UserOp,
        status: OpStatus,
        detail_msg: Option<String>,
    ) -> Result<(), LedgerError> {
        let txn = self.db.conn().begin().await?;

        op_pending::Entity::delete_by_id(op.op_uid.0 as i64)
            .exec(&txn)
            .await?;
        delete_pending_payload(&txn, op.op_uid, &op.src.node, true).await?;
        if let Some(dst) = &op.dst {
            delete_pending_payload(&txn, op.op_uid, &dst.node, false).await?;
        }

        op_completed::ActiveModel {
            op_uid: Set(op.op_uid.0 as i64),
            batch_uid: Set(op.batch_uid.0 as i64),
            op_type: Set(i32::from(op.op_type)),
            status: Set(i32::from(status)),
            src_node_uid: Set(op.src.spid.node_uid.0 as i64),
            dst_node_uid: Set(op.dst.as_ref().map(|d| d.spid.node_uid.0 as i64)),
            create_ts: Set(op.create_ts),
            detail_msg: Set(detail_msg),
        }
        .insert(&txn)
        .await?;
        insert_archive_payload(&txn, op.op_uid, &op.src.node, true).await?;
        if let Some(dst) = &op.dst {
            insert_archive_payload(&txn, op.op_uid, &dst.node, false).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Leave the op pending but record that it stopped on an error, blocking
    /// the rest of its batch until the user intervenes.
    pub async fn mark_stopped_on_error(&self, op: &UserOp, msg: &str) -> Result<(), LedgerError> {
        op_pending::ActiveModel {
            op_uid: Set(op.op_uid.0 as i64),
            status: Set(i32::from(OpStatus::StoppedOnError)),
            detail_msg: Set(Some(msg.to_string())),
            ..Default::default()
        }
        .update(self.db.conn())
        .await?;
        Ok(())
    }

    /// Archive a whole rejected batch with the failure message.
    pub async fn archive_failed_batch(
        &self,
        ops: &[Arc<UserOp>],
        err_msg: &str,
    ) -> Result<(), LedgerError> {
        for op in ops {
            self.archive(op, OpStatus::StoppedOnError, Some(err_msg.to_string()))
                .await?;
        }
        Ok(())
    }

    pub async fn pending_op_count(&self) -> Result<u64, LedgerError> {
        use sea_orm::PaginatorTrait;
        Ok(op_pending::Entity::find().count(self.db.conn()).await?)
    }

    pub async fn completed_op_count(&self) -> Result<u64, LedgerError> {
        use sea_orm::PaginatorTrait;
        Ok(op_completed::Entity::find().count(self.db.conn()).await?)
    }

    /// Completed rows for one batch, newest first. Used by tests and the
    /// summary surface.
    pub async fn completed_ops_for_batch(
        &self,
        batch_uid: Uid,
    ) -> Result<Vec<op_completed::Model>, LedgerError> {
        Ok(op_completed::Entity::find()
            .filter(op_completed::Column::BatchUid.eq(batch_uid.0 as i64))
            .order_by_asc(op_completed::Column::OpUid)
            .all(self.db.conn())
            .await?)
    }
}
