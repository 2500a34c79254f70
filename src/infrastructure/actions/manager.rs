//! Action manager - routes UI gestures into the op pipeline
//!
//! One entry point per gesture. A drag-and-drop flows planner -> ledger ->
//! op graph -> executor; any rejection along the way aborts the whole batch
//! and is surfaced only through BATCH_FAILED / ERROR_OCCURRED.

use crate::cache::CacheError;
use crate::context::CoreContext;
use crate::domain::{
    Batch, DeviceUid, DirConflictPolicy, DragOperation, FileConflictPolicy, Guid, OpStatus, Spid,
    SpidNodePair, TreeId, Uid, UserOp,
};
use crate::infrastructure::events::Event;
use crate::infrastructure::ops::{LedgerError, OpGraphError};
use crate::operations::transfer::PlanError;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Graph(#[from] OpGraphError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone)]
pub struct DragAndDropRequest {
    pub src_tree_id: TreeId,
    pub src_guid_list: Vec<Guid>,
    pub dst_tree_id: TreeId,
    pub dst_guid: Guid,
    /// True when dropping *onto* the target row; false when dropping between
    /// rows, which targets the row's parent instead.
    pub is_into: bool,
    pub drag_op: DragOperation,
    pub dir_conflict_policy: DirConflictPolicy,
    pub file_conflict_policy: FileConflictPolicy,
}

pub struct ActionManager {
    context: Arc<CoreContext>,
}

impl ActionManager {
    pub fn new(context: Arc<CoreContext>) -> Self {
        Self { context }
    }

    /// Plan and submit a drag-and-drop gesture. Returns the batch UID.
    pub async fn drag_and_drop(&self, req: DragAndDropRequest) -> Result<Uid, ActionError> {
        let result = self.drag_and_drop_inner(&req).await;
        if let Err(e) = &result {
            self.context.events.emit(Event::ErrorOccurred {
                msg: format!("Failed to {} {} items", req.drag_op, req.src_guid_list.len()),
                secondary_msg: e.to_string(),
            });
        }
        result
    }

    async fn drag_and_drop_inner(&self, req: &DragAndDropRequest) -> Result<Uid, ActionError> {
        let cacheman = &self.context.cacheman;

        let mut sn_src_list = Vec::with_capacity(req.src_guid_list.len());
        for guid in &req.src_guid_list {
            sn_src_list.push(cacheman.node_for_guid(guid).await?);
        }

        let sn_dst = cacheman.node_for_guid(&req.dst_guid).await?;
        let sn_dst_parent = if req.is_into && sn_dst.node.is_dir() {
            sn_dst
        } else {
            self.parent_of(&sn_dst).await?
        };

        // The planner walks both subtrees; make sure their caches are in.
        let mut involved = sn_src_list.clone();
        involved.push(sn_dst_parent.clone());
        cacheman.ensure_caches_loaded_for_nodes(&involved).await?;

        let batch = self
            .context
            .planner
            .drag_and_drop(
                sn_src_list,
                sn_dst_parent,
                req.drag_op,
                req.dir_conflict_policy,
                req.file_conflict_policy,
                Some(req.dst_tree_id.clone()),
            )
            .await?;

        if batch.is_empty() {
            info!("Batch {} planned empty; nothing to do", batch.batch_uid);
            return Ok(batch.batch_uid);
        }
        self.submit_batch(batch).await
    }

    /// Plan and submit removal of the given subtrees.
    pub async fn delete_subtree(
        &self,
        device_uid: DeviceUid,
        uid_list: Vec<Uid>,
    ) -> Result<Uid, ActionError> {
        let cacheman = &self.context.cacheman;
        let mut sn_roots = Vec::with_capacity(uid_list.len());
        for uid in uid_list {
            let node = cacheman.get_node(device_uid, uid).await?;
            sn_roots.push(SpidNodePair::from_node(node));
        }
        let batch = self.context.planner.plan_delete_subtrees(sn_roots).await?;
        if batch.is_empty() {
            return Ok(batch.batch_uid);
        }
        self.submit_batch(batch).await
    }

    /// Mark a subtree for rescan by its external producer.
    pub async fn refresh_subtree(&self, spid: &Spid) -> Result<(), ActionError> {
        self.context.cacheman.refresh_subtree(spid).await?;
        Ok(())
    }

    pub fn pause_op_execution(&self) {
        self.context.executor.pause_op_execution();
    }

    pub fn resume_op_execution(&self) {
        self.context.executor.resume_op_execution();
    }

    /// Persist the batch, insert it into the op graph, and wake the
    /// executor. A graph rejection archives the whole batch as failed.
    async fn submit_batch(&self, batch: Batch) -> Result<Uid, ActionError> {
        let batch_uid = batch.batch_uid;
        let ops: Vec<Arc<UserOp>> = batch.op_list.into_iter().map(Arc::new).collect();

        self.context.ledger.insert_pending_batch(&ops).await?;

        match self.context.op_graph.enqueue_batch(&ops).await {
            Ok(result) => {
                for discarded in &result.discarded {
                    self.context
                        .ledger
                        .archive(discarded, OpStatus::CompletedNoOp, None)
                        .await?;
                }
                if !result.discarded.is_empty() {
                    warn!(
                        "Batch {}: {} duplicate ops discarded at enqueue",
                        batch_uid,
                        result.discarded.len()
                    );
                }
            }
            Err(e) => {
                error!("Batch {} rejected by op graph: {}", batch_uid, e);
                self.context
                    .ledger
                    .archive_failed_batch(&ops, &e.to_string())
                    .await?;
                self.context.events.emit(Event::BatchFailed {
                    batch_uid,
                    msg: "Batch rejected".to_string(),
                    secondary_msg: e.to_string(),
                });
                return Err(e.into());
            }
        }

        self.context.executor.notify();
        info!("Batch {} submitted ({} ops)", batch_uid, ops.len());
        Ok(batch_uid)
    }

    async fn parent_of(&self, sn: &SpidNodePair) -> Result<SpidNodePair, ActionError> {
        let parent_uid = sn.node.parent_uids().first().copied().ok_or_else(|| {
            ActionError::Cache(CacheError::NodeNotPresent {
                device_uid: sn.spid.device_uid,
                node_uid: sn.spid.node_uid,
            })
        })?;
        let parent = self
            .context
            .cacheman
            .get_node(sn.spid.device_uid, parent_uid)
            .await?;
        let parent_path = sn
            .spid
            .parent_path()
            .map(str::to_owned)
            .unwrap_or_else(|| parent.first_path().to_string());
        Ok(SpidNodePair::new(
            Spid::new(sn.spid.device_uid, parent.uid(), parent_path),
            parent,
        ))
    }
}
