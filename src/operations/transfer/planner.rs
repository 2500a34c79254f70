//! The transfer planner
//!
//! Turns a drag-and-drop gesture plus a conflict policy into a batch of
//! primitive ops, pre-building destination nodes for everything that does not
//! exist yet. The planner only reads the caches; nothing is persisted or
//! executed here. A batch that fails validation is rejected wholesale.

use super::meta::{children_by_name, PlanError, SkipCondition, TransferMeta};
use crate::cache::CacheManager;
use crate::content::ContentMetaStore;
use crate::domain::node::{GDriveFileNode, GDriveFolderNode, LocalDirNode, LocalFileNode};
use crate::domain::{
    Batch, DirConflictPolicy, DragOperation, FileConflictPolicy, Node, NodeBase, OpType,
    ReplaceDirWithFilePolicy, SpidNodePair, SrcNodeMovePolicy, TreeId, TreeType, Uid,
    UidGenerator, UserOp,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

pub struct TransferPlanner {
    cacheman: Arc<CacheManager>,
    content: Arc<ContentMetaStore>,
    uid_gen: Arc<UidGenerator>,
    highlight_dropped: bool,
}

impl TransferPlanner {
    pub fn new(
        cacheman: Arc<CacheManager>,
        content: Arc<ContentMetaStore>,
        uid_gen: Arc<UidGenerator>,
        highlight_dropped: bool,
    ) -> Self {
        Self {
            cacheman,
            content,
            uid_gen,
            highlight_dropped,
        }
    }

    /// Plan a drag-and-drop of `sn_src_list` into `sn_dst_parent`.
    pub async fn drag_and_drop(
        &self,
        sn_src_list: Vec<SpidNodePair>,
        sn_dst_parent: SpidNodePair,
        drag_op: DragOperation,
        dir_conflict_policy: DirConflictPolicy,
        file_conflict_policy: FileConflictPolicy,
        select_in_tree_id: Option<TreeId>,
    ) -> Result<Batch, PlanError> {
        if !sn_dst_parent.node.is_dir() {
            return Err(PlanError::InvalidBatch(format!(
                "destination parent is not a directory: {}",
                sn_dst_parent.spid
            )));
        }

        let dst_children = self.cacheman.child_list(&sn_dst_parent.spid).await?;
        let meta = TransferMeta::new(
            drag_op,
            dir_conflict_policy,
            file_conflict_policy,
            sn_dst_parent.clone(),
            children_by_name(dst_children),
        );

        let batch_uid = self.uid_gen.next_uid();
        let mut build = PlanBuild {
            planner: self,
            meta,
            batch_uid,
            ops: Vec::new(),
        };
        debug!(
            "Planning batch {}: {} source nodes, {}",
            batch_uid,
            sn_src_list.len(),
            drag_op
        );

        for sn_src in &sn_src_list {
            let conflicts = build
                .meta
                .dst_existing_by_name
                .get(sn_src.node.name())
                .cloned()
                .unwrap_or_default();
            if conflicts.is_empty() {
                build.handle_no_conflicts(sn_src, None).await?;
            } else if sn_src.node.is_dir() {
                build.handle_dir_conflict(sn_src, conflicts).await?;
            } else {
                build.handle_file_conflict(sn_src, conflicts).await?;
            }
        }

        let ops = build.ops;
        self.validate_batch(&ops).await?;

        let mut to_select_in_ui = Vec::new();
        if self.highlight_dropped {
            let parent_uid = sn_dst_parent.node.uid();
            let parent_path = &sn_dst_parent.spid.path;
            let mut seen = HashSet::new();
            for op in &ops {
                if let Some(dst) = &op.dst {
                    if dst.node.parent_uids().contains(&parent_uid)
                        && seen.insert(dst.node.uid())
                    {
                        let path = join_path(parent_path, dst.node.name());
                        let spid = self
                            .cacheman
                            .make_spid(dst.spid.device_uid, dst.node.uid(), &path)
                            .await?;
                        to_select_in_ui.push(spid.guid());
                    }
                }
            }
        }

        info!("Planned batch {} with {} ops", batch_uid, ops.len());
        Ok(Batch {
            batch_uid,
            op_list: ops,
            to_select_in_ui,
            select_in_tree_id,
            select_ts: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Plan removal of whole subtrees, breadth-first, one RM per node.
    pub async fn plan_delete_subtrees(
        &self,
        sn_roots: Vec<SpidNodePair>,
    ) -> Result<Batch, PlanError> {
        let batch_uid = self.uid_gen.next_uid();
        let mut ops = Vec::new();
        for sn_root in &sn_roots {
            let subtree = if sn_root.node.is_dir() {
                self.cacheman.subtree_bfs_sn(&sn_root.spid).await?
            } else {
                vec![sn_root.clone()]
            };
            for sn in subtree {
                ops.push(UserOp::new(
                    self.uid_gen.next_uid(),
                    batch_uid,
                    OpType::Rm,
                    sn,
                    None,
                ));
            }
        }
        self.validate_batch(&ops).await?;
        Ok(Batch {
            batch_uid,
            op_list: ops,
            to_select_in_ui: Vec::new(),
            select_in_tree_id: None,
            select_ts: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Batch-seal validation. Every op must reference nodes that exist in the
    /// caches or are created earlier in the same batch, and nothing may act
    /// on a node already scheduled for RM.
    async fn validate_batch(&self, ops: &[UserOp]) -> Result<(), PlanError> {
        let mut created: HashSet<(crate::domain::DeviceUid, Uid)> = HashSet::new();
        let mut removed: HashSet<(crate::domain::DeviceUid, Uid)> = HashSet::new();

        for op in ops {
            let src_key = (op.src.spid.device_uid, op.src.spid.node_uid);

            if op.op_type.is_create_type() {
                // The created artifact is the dst side (or the src node for
                // MKDIR); its parent must exist or be created earlier.
                let created_sn = op.dst.as_ref().unwrap_or(&op.src);
                let created_key = (created_sn.spid.device_uid, created_sn.spid.node_uid);
                for parent_uid in created_sn.node.parent_uids() {
                    let parent_key = (created_sn.spid.device_uid, *parent_uid);
                    if created.contains(&parent_key) {
                        continue;
                    }
                    if self
                        .cacheman
                        .get_node_opt(parent_key.0, parent_key.1)
                        .await?
                        .is_none()
                    {
                        return Err(PlanError::InvalidBatch(format!(
                            "parent {} of created node is neither cached nor created earlier in batch ({})",
                            parent_uid, op
                        )));
                    }
                }
                created.insert(created_key);
            }

            // Src side of every op except pure creates must exist in cache.
            let src_is_new = op.op_type == OpType::Mkdir;
            if !src_is_new
                && !created.contains(&src_key)
                && self
                    .cacheman
                    .get_node_opt(src_key.0, src_key.1)
                    .await?
                    .is_none()
            {
                return Err(PlanError::InvalidBatch(format!(
                    "src node {} not present in cache for {}",
                    op.src.spid, op
                )));
            }

            // Nothing may target a node an earlier op already removes.
            if !op.op_type.is_create_type() {
                let dst_key = op
                    .dst
                    .as_ref()
                    .map(|d| (d.spid.device_uid, d.spid.node_uid));
                if removed.contains(&src_key) || dst_key.map(|k| removed.contains(&k)).unwrap_or(false)
                {
                    return Err(PlanError::InvalidBatch(format!(
                        "op {} targets a node already scheduled for RM",
                        op
                    )));
                }
            }

            if op.op_type.is_remove_type() {
                removed.insert(src_key);
            }
        }
        Ok(())
    }

    async fn is_same_content(
        &self,
        sn_src: &SpidNodePair,
        sn_dst: &SpidNodePair,
    ) -> Result<bool, PlanError> {
        if sn_src.node.is_dir() != sn_dst.node.is_dir() {
            return Ok(false);
        }
        let (Some(src_content), Some(dst_content)) =
            (sn_src.node.content_uid(), sn_dst.node.content_uid())
        else {
            return Ok(false);
        };
        // Interned: identical UID means identical triple.
        if src_content == dst_content {
            return Ok(true);
        }
        let (Some(src_meta), Some(dst_meta)) = (
            self.content.get(src_content).await,
            self.content.get(dst_content).await,
        ) else {
            return Ok(false);
        };
        Ok(src_meta.is_signature_equal(&dst_meta))
    }

    async fn evaluate_skip(
        &self,
        condition: SkipCondition,
        sn_src: &SpidNodePair,
        sn_dst: &SpidNodePair,
    ) -> Result<bool, PlanError> {
        match condition {
            SkipCondition::Never => Ok(false),
            SkipCondition::SameContent => self.is_same_content(sn_src, sn_dst).await,
            SkipCondition::SameContentAndNotOlder => {
                if sn_src.node.is_dir() != sn_dst.node.is_dir() {
                    return Ok(false);
                }
                let src_ts = sn_src.node.modify_ts().unwrap_or(0);
                let dst_ts = sn_dst.node.modify_ts().unwrap_or(0);
                if src_ts == 0 || dst_ts == 0 {
                    return Err(PlanError::InvalidBatch(format!(
                        "cannot compare modification times for {} vs {}",
                        sn_src.spid, sn_dst.spid
                    )));
                }
                Ok(self.is_same_content(sn_src, sn_dst).await? && src_ts <= dst_ts)
            }
        }
    }
}

/// Mutable state while one batch is being assembled.
struct PlanBuild<'a> {
    planner: &'a TransferPlanner,
    meta: TransferMeta,
    batch_uid: Uid,
    ops: Vec<UserOp>,
}

impl<'a> PlanBuild<'a> {
    fn add_op(&mut self, op_type: OpType, src: SpidNodePair, dst: Option<SpidNodePair>) {
        let op = UserOp::new(
            self.planner.uid_gen.next_uid(),
            self.batch_uid,
            op_type,
            src,
            dst,
        );
        self.ops.push(op);
    }

    /// The START/FINISH pair of a directory copy or move: two ops sharing the
    /// same src and dst nodes.
    fn add_compound_op(&mut self, src: SpidNodePair, dst: SpidNodePair) {
        self.add_op(self.meta.op_type_dir_start, src.clone(), Some(dst.clone()));
        self.add_op(self.meta.op_type_dir_finish, src, Some(dst));
    }

    /// COPY or MOVE of a source whose name has no conflict at the
    /// destination (possibly after a rename).
    async fn handle_no_conflicts(
        &mut self,
        sn_src: &SpidNodePair,
        name_new_dst: Option<&str>,
    ) -> Result<(), PlanError> {
        if sn_src.node.is_dir() {
            let orig_parent_path = sn_src
                .spid
                .parent_path()
                .unwrap_or_default()
                .to_string();
            let new_parent_path = self.meta.sn_dst_parent.spid.path.clone();

            let subtree = self.planner.cacheman.subtree_bfs_sn(&sn_src.spid).await?;
            debug!(
                "Unpacking src subtree of {} nodes rooted at {}",
                subtree.len(),
                sn_src.spid
            );

            // Original UID -> migrated destination UID, so each descendant
            // can name its migrated parent.
            let mut migrated: HashMap<Uid, Uid> = HashMap::new();
            for sn_descendant in &subtree {
                let dst_path = change_base_path(
                    &sn_descendant.spid.path,
                    &orig_parent_path,
                    &new_parent_path,
                    name_new_dst,
                );
                let dst_parent_uid = sn_descendant
                    .node
                    .parent_uids()
                    .iter()
                    .find_map(|p| migrated.get(p).copied())
                    .unwrap_or_else(|| self.meta.sn_dst_parent.node.uid());

                let sn_dst = self
                    .migrate_node(sn_descendant, &dst_path, dst_parent_uid)
                    .await?;
                migrated.insert(sn_descendant.node.uid(), sn_dst.node.uid());

                if sn_descendant.node.is_dir() {
                    self.add_compound_op(sn_descendant.clone(), sn_dst);
                } else {
                    self.add_op(
                        self.meta.op_type_file,
                        sn_descendant.clone(),
                        Some(sn_dst),
                    );
                }
            }
        } else {
            let name = name_new_dst.unwrap_or(sn_src.node.name());
            let dst_path = join_path(&self.meta.sn_dst_parent.spid.path, name);
            let sn_dst = self
                .migrate_node(sn_src, &dst_path, self.meta.sn_dst_parent.node.uid())
                .await?;
            self.add_op(self.meta.op_type_file, sn_src.clone(), Some(sn_dst));
        }
        Ok(())
    }

    async fn handle_dir_conflict(
        &mut self,
        sn_src: &SpidNodePair,
        conflicts: Vec<SpidNodePair>,
    ) -> Result<(), PlanError> {
        let name = sn_src.node.name().to_string();
        debug!(
            "Dir {:?} has {} conflicts; policy {}",
            name,
            conflicts.len(),
            self.meta.dir_conflict_policy
        );
        match self.meta.dir_conflict_policy {
            DirConflictPolicy::Skip => Ok(()),
            DirConflictPolicy::Replace => {
                if conflicts.len() > 1 {
                    return Err(PlanError::AmbiguousConflict {
                        name,
                        count: conflicts.len(),
                    });
                }
                self.handle_dir_replace(sn_src, conflicts.into_iter().next().unwrap())
                    .await
            }
            DirConflictPolicy::Rename => self.handle_rename(sn_src, SkipCondition::Never).await,
            DirConflictPolicy::Merge => {
                if conflicts.len() > 1 {
                    return Err(PlanError::AmbiguousConflict {
                        name,
                        count: conflicts.len(),
                    });
                }
                self.handle_dir_merge(sn_src, conflicts.into_iter().next().unwrap())
                    .await
            }
            DirConflictPolicy::Prompt => Err(PlanError::NotImplemented(
                "PROMPT dir conflict policy".into(),
            )),
        }
    }

    async fn handle_file_conflict(
        &mut self,
        sn_src: &SpidNodePair,
        conflicts: Vec<SpidNodePair>,
    ) -> Result<(), PlanError> {
        let name = sn_src.node.name().to_string();
        debug!(
            "File {:?} has {} conflicts; policy {}",
            name,
            conflicts.len(),
            self.meta.file_conflict_policy
        );
        let unique = |conflicts: Vec<SpidNodePair>| -> Result<SpidNodePair, PlanError> {
            if conflicts.len() > 1 {
                Err(PlanError::AmbiguousConflict {
                    name: name.clone(),
                    count: conflicts.len(),
                })
            } else {
                Ok(conflicts.into_iter().next().unwrap())
            }
        };
        match self.meta.file_conflict_policy {
            FileConflictPolicy::Skip => Ok(()),
            FileConflictPolicy::ReplaceAlways => {
                let dst = unique(conflicts)?;
                self.handle_replace_with_file(sn_src, dst, SkipCondition::Never)
                    .await
            }
            FileConflictPolicy::ReplaceIfOlderAndDifferent => {
                let dst = unique(conflicts)?;
                self.handle_replace_with_file(sn_src, dst, SkipCondition::SameContentAndNotOlder)
                    .await
            }
            FileConflictPolicy::RenameAlways => {
                self.handle_rename(sn_src, SkipCondition::Never).await
            }
            FileConflictPolicy::RenameIfOlderAndDifferent => {
                self.handle_rename(sn_src, SkipCondition::SameContentAndNotOlder)
                    .await
            }
            FileConflictPolicy::RenameIfDifferent => {
                self.handle_rename(sn_src, SkipCondition::SameContent).await
            }
            FileConflictPolicy::Prompt => Err(PlanError::NotImplemented(
                "PROMPT file conflict policy".into(),
            )),
        }
    }

    /// REPLACE policy: walk src and dst in lockstep rather than deleting the
    /// whole destination tree, so unchanged files cost nothing extra.
    async fn handle_dir_replace(
        &mut self,
        sn_src: &SpidNodePair,
        sn_dst_conflicting: SpidNodePair,
    ) -> Result<(), PlanError> {
        debug!("Replacing {} with dir {}", sn_dst_conflicting.spid, sn_src.spid);

        let mut queue: VecDeque<(SpidNodePair, SpidNodePair)> = VecDeque::new();
        queue.push_back((sn_src.clone(), sn_dst_conflicting));

        while let Some((sn_dir_src, sn_dst_existing)) = queue.pop_front() {
            if sn_dst_existing.node.is_file() {
                // Replacing a file with a directory: remove, then transfer
                // the subtree as though the conflict never existed.
                self.add_op(OpType::Rm, sn_dst_existing, None);
                self.handle_no_conflicts(&sn_dir_src, None).await?;
                continue;
            }

            let mut dst_children =
                children_by_name(self.planner.cacheman.child_list(&sn_dst_existing.spid).await?);

            for sn_src_child in self.planner.cacheman.child_list(&sn_dir_src.spid).await? {
                let conflicts = dst_children
                    .remove(sn_src_child.node.name())
                    .unwrap_or_default();
                if conflicts.is_empty() {
                    self.handle_no_conflicts(&sn_src_child, None).await?;
                } else if conflicts.len() > 1 {
                    // Same-name pileups are too rare to optimize: delete them
                    // all, then transfer fresh.
                    for sn_dst_child in conflicts {
                        self.add_rm_subtree(&sn_dst_child).await?;
                    }
                    self.handle_no_conflicts(&sn_src_child, None).await?;
                } else {
                    let sn_dst_child = conflicts.into_iter().next().unwrap();
                    match (sn_src_child.node.is_dir(), sn_dst_child.node.is_dir()) {
                        (true, true) => queue.push_back((sn_src_child, sn_dst_child)),
                        (true, false) => {
                            self.add_op(OpType::Rm, sn_dst_child, None);
                            self.handle_no_conflicts(&sn_src_child, None).await?;
                        }
                        (false, _) => {
                            self.handle_replace_with_file(
                                &sn_src_child,
                                sn_dst_child,
                                SkipCondition::Never,
                            )
                            .await?;
                        }
                    }
                }
            }

            // Destination children with no source counterpart are deleted.
            for (_, remaining) in dst_children {
                for sn_dst_child in remaining {
                    self.add_rm_subtree(&sn_dst_child).await?;
                }
            }
        }
        Ok(())
    }

    /// MERGE policy: like REPLACE but the existing destination directory is
    /// kept (START/FINISH lands on it) and unmatched children survive.
    async fn handle_dir_merge(
        &mut self,
        sn_src: &SpidNodePair,
        sn_dst_conflicting: SpidNodePair,
    ) -> Result<(), PlanError> {
        debug!("Merging {} with dir {}", sn_dst_conflicting.spid, sn_src.spid);

        let mut queue: VecDeque<(SpidNodePair, SpidNodePair)> = VecDeque::new();
        queue.push_back((sn_src.clone(), sn_dst_conflicting));

        while let Some((sn_dir_src, sn_dst_existing)) = queue.pop_front() {
            if sn_dst_existing.node.is_file() {
                return Err(PlanError::InvalidBatch(format!(
                    "cannot merge: {} of a directory onto a file {}",
                    self.meta.drag_op, sn_dst_existing.spid
                )));
            }

            self.add_compound_op(sn_dir_src.clone(), sn_dst_existing.clone());

            let mut dst_children =
                children_by_name(self.planner.cacheman.child_list(&sn_dst_existing.spid).await?);

            for sn_src_child in self.planner.cacheman.child_list(&sn_dir_src.spid).await? {
                let conflicts = dst_children
                    .remove(sn_src_child.node.name())
                    .unwrap_or_default();
                if conflicts.is_empty() {
                    self.handle_no_conflicts(&sn_src_child, None).await?;
                } else if conflicts.len() > 1 {
                    return Err(PlanError::AmbiguousConflict {
                        name: sn_src_child.node.name().to_string(),
                        count: conflicts.len(),
                    });
                } else {
                    let sn_dst_child = conflicts.into_iter().next().unwrap();
                    if sn_src_child.node.is_dir() {
                        queue.push_back((sn_src_child, sn_dst_child));
                    } else {
                        self.handle_replace_with_file(
                            &sn_src_child,
                            sn_dst_child,
                            SkipCondition::Never,
                        )
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// One RM per node of the subtree, breadth-first.
    async fn add_rm_subtree(&mut self, sn_root: &SpidNodePair) -> Result<(), PlanError> {
        if sn_root.node.is_dir() {
            let subtree = self.planner.cacheman.subtree_bfs_sn(&sn_root.spid).await?;
            for sn in subtree {
                self.add_op(OpType::Rm, sn, None);
            }
        } else {
            self.add_op(OpType::Rm, sn_root.clone(), None);
        }
        Ok(())
    }

    /// Replace a single conflicting destination with the source file,
    /// honoring the skip condition and the dir-replacement policy.
    async fn handle_replace_with_file(
        &mut self,
        sn_src_file: &SpidNodePair,
        sn_dst_conflicting: SpidNodePair,
        skip_condition: SkipCondition,
    ) -> Result<(), PlanError> {
        if self
            .execute_skip_condition(sn_src_file, &sn_dst_conflicting, skip_condition)
            .await?
        {
            return Ok(());
        }

        if sn_dst_conflicting.node.is_dir() {
            match self.meta.replace_dir_with_file_policy {
                ReplaceDirWithFilePolicy::Fail => Err(PlanError::InvalidBatch(format!(
                    "cannot replace a directory with a file: {}",
                    sn_dst_conflicting.spid
                ))),
                ReplaceDirWithFilePolicy::Prompt => Err(PlanError::NotImplemented(
                    "PROMPT replace-dir-with-file policy".into(),
                )),
                ReplaceDirWithFilePolicy::FollowFilePolicyForDir => {
                    // The skip condition was already evaluated; proceed.
                    self.add_rm_subtree(&sn_dst_conflicting).await?;
                    self.handle_no_conflicts(sn_src_file, None).await
                }
            }
        } else {
            self.add_op(
                self.meta.op_type_file_replace,
                sn_src_file.clone(),
                Some(sn_dst_conflicting),
            );
            Ok(())
        }
    }

    /// COPY or MOVE where the target is renamed until no conflict remains.
    /// The skip condition, if it matches any conflicting node along the way,
    /// aborts the whole transfer of this source.
    async fn handle_rename(
        &mut self,
        sn_src: &SpidNodePair,
        skip_condition: SkipCondition,
    ) -> Result<(), PlanError> {
        let mut name = sn_src.node.name().to_string();

        loop {
            let conflicts = self
                .meta
                .dst_existing_by_name
                .get(&name)
                .cloned()
                .unwrap_or_default();
            if conflicts.is_empty() {
                break;
            }
            for sn_dst_conflicting in &conflicts {
                if self
                    .execute_skip_condition(sn_src, sn_dst_conflicting, skip_condition)
                    .await?
                {
                    return Ok(());
                }
            }
            name = increment_name(&name);
            debug!("Incremented destination name to {:?}", name);
        }

        debug!("Renaming {:?} to {:?}", sn_src.node.name(), name);
        self.handle_no_conflicts(sn_src, Some(&name)).await
    }

    /// Evaluate the skip condition. On a skip under MOVE, the src-node move
    /// policy decides whether the source is still deleted.
    async fn execute_skip_condition(
        &mut self,
        sn_src: &SpidNodePair,
        sn_dst_conflicting: &SpidNodePair,
        skip_condition: SkipCondition,
    ) -> Result<bool, PlanError> {
        if skip_condition == SkipCondition::Never {
            return Ok(false);
        }
        if !self
            .planner
            .evaluate_skip(skip_condition, sn_src, sn_dst_conflicting)
            .await?
        {
            return Ok(false);
        }

        if self.meta.drag_op == DragOperation::Move {
            match self.meta.src_node_move_policy {
                SrcNodeMovePolicy::DeleteSrcIfNotSkipped => {
                    debug!(
                        "Skipping MV of {}: matched skip condition",
                        sn_src.spid
                    );
                }
                SrcNodeMovePolicy::DeleteSrcAlways => {
                    debug!(
                        "Adding RM for src {} despite skip, per move policy",
                        sn_src.spid
                    );
                    self.add_op(OpType::Rm, sn_src.clone(), None);
                }
            }
        } else {
            debug!("Skipping {}: matched skip condition", sn_src.spid);
        }
        Ok(true)
    }

    /// Pre-build the destination node a transfer will create: same flavor as
    /// the destination tree, fresh UID, not yet live.
    async fn migrate_node(
        &mut self,
        sn_src: &SpidNodePair,
        dst_path: &str,
        dst_parent_uid: Uid,
    ) -> Result<SpidNodePair, PlanError> {
        let dst_device_uid = self.meta.sn_dst_parent.spid.device_uid;
        let dst_store = self
            .planner
            .cacheman
            .get_store_for_device_uid(dst_device_uid)
            .await?;
        let dst_tree_type = dst_store.tree_type();

        let name = dst_path
            .rsplit('/')
            .next()
            .unwrap_or(sn_src.node.name())
            .to_string();

        let uid = match dst_tree_type {
            // A local path determines its UID for the life of the cache.
            TreeType::LocalDisk => {
                self.planner
                    .cacheman
                    .make_spid(dst_device_uid, Uid(0), dst_path)
                    .await?
                    .path_uid
                    .unwrap_or_else(|| self.planner.uid_gen.next_uid())
            }
            _ => self.planner.uid_gen.next_uid(),
        };

        let mut base = NodeBase::new(uid, dst_device_uid, name, dst_path);
        base.parent_uids = vec![dst_parent_uid];
        base.is_live = false;

        let node = match (dst_tree_type, sn_src.node.is_dir()) {
            (TreeType::GDrive, true) => Node::GDriveFolder(GDriveFolderNode {
                base,
                goog_id: None,
                all_children_fetched: true,
                sync_ts: 0,
                dir_stats: None,
            }),
            (TreeType::GDrive, false) => Node::GDriveFile(GDriveFileNode {
                base,
                goog_id: None,
                content_uid: sn_src.node.content_uid().unwrap_or(Uid(0)),
                times: file_times_of(&sn_src.node),
            }),
            (_, true) => Node::LocalDir(LocalDirNode {
                base,
                sync_ts: 0,
                all_children_fetched: true,
                dir_stats: None,
            }),
            (_, false) => Node::LocalFile(LocalFileNode {
                base,
                content_uid: sn_src.node.content_uid().unwrap_or(Uid(0)),
                times: file_times_of(&sn_src.node),
            }),
        };

        let spid = self
            .planner
            .cacheman
            .make_spid(dst_device_uid, uid, dst_path)
            .await?;
        Ok(SpidNodePair::new(spid, node))
    }
}

fn file_times_of(node: &Node) -> crate::domain::node::FileTimes {
    match node {
        Node::LocalFile(n) => n.times,
        Node::GDriveFile(n) => n.times,
        _ => crate::domain::node::FileTimes::default(),
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Rebase `orig_target_path` from `orig_base_path` onto `new_base_path`,
/// optionally renaming the first (subtree-root) component.
fn change_base_path(
    orig_target_path: &str,
    orig_base_path: &str,
    new_base_path: &str,
    new_root_name: Option<&str>,
) -> String {
    let rel = orig_target_path
        .strip_prefix(orig_base_path)
        .unwrap_or(orig_target_path)
        .trim_start_matches('/');

    let rel = match new_root_name {
        Some(new_name) => match rel.split_once('/') {
            Some((_, rest)) => format!("{}/{}", new_name, rest),
            None => new_name.to_string(),
        },
        None => rel.to_string(),
    };
    join_path(new_base_path, &rel)
}

/// Bump a trailing copy number: `"pic"` -> `"pic 2"`, `"pic 2"` -> `"pic 3"`.
pub fn increment_name(node_name: &str) -> String {
    if let Some(idx) = node_name.rfind(' ') {
        let (prefix, suffix) = node_name.split_at(idx);
        let suffix = &suffix[1..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(number) = suffix.parse::<u64>() {
                return format!("{} {}", prefix.trim_end(), number + 1);
            }
        }
    }
    format!("{} 2", node_name.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_appends_two_first() {
        assert_eq!(increment_name("photo"), "photo 2");
        assert_eq!(increment_name("photo "), "photo 2");
    }

    #[test]
    fn increment_bumps_existing_number() {
        assert_eq!(increment_name("photo 2"), "photo 3");
        assert_eq!(increment_name("photo 99"), "photo 100");
    }

    #[test]
    fn increment_ignores_non_numeric_suffix() {
        assert_eq!(increment_name("photo v2final"), "photo v2final 2");
    }

    #[test]
    fn change_base_path_substitutes_subtree_root() {
        assert_eq!(
            change_base_path("/l/art/modern/m1.jpg", "/l", "/r", None),
            "/r/art/modern/m1.jpg"
        );
        assert_eq!(
            change_base_path("/l/art/modern/m1.jpg", "/l", "/r", Some("art 2")),
            "/r/art 2/modern/m1.jpg"
        );
        assert_eq!(change_base_path("/l/art", "/l", "/r", Some("art 2")), "/r/art 2");
    }
}
