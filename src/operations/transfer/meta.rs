//! Per-invocation planning context

use crate::cache::CacheError;
use crate::domain::{
    DirConflictPolicy, DragOperation, FileConflictPolicy, OpType, ReplaceDirWithFilePolicy,
    SpidNodePair, SrcNodeMovePolicy,
};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Found {count} destination items named {name:?}; cannot determine which to use")]
    AmbiguousConflict { name: String, count: usize },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Everything fixed for the duration of one drag-and-drop plan: the op
/// flavors implied by the drag operation, the policies, the destination
/// parent, and its children indexed by name.
pub struct TransferMeta {
    pub drag_op: DragOperation,
    pub dir_conflict_policy: DirConflictPolicy,
    pub file_conflict_policy: FileConflictPolicy,
    pub src_node_move_policy: SrcNodeMovePolicy,
    pub replace_dir_with_file_policy: ReplaceDirWithFilePolicy,

    pub op_type_file: OpType,
    pub op_type_file_replace: OpType,
    pub op_type_dir_start: OpType,
    pub op_type_dir_finish: OpType,

    pub sn_dst_parent: SpidNodePair,
    /// Children of the destination parent keyed by name. A name can bind
    /// several nodes; policies that need a unique match must check.
    pub dst_existing_by_name: HashMap<String, Vec<SpidNodePair>>,
}

impl TransferMeta {
    pub fn new(
        drag_op: DragOperation,
        dir_conflict_policy: DirConflictPolicy,
        file_conflict_policy: FileConflictPolicy,
        sn_dst_parent: SpidNodePair,
        dst_existing_by_name: HashMap<String, Vec<SpidNodePair>>,
    ) -> Self {
        let (op_type_file, op_type_file_replace, op_type_dir_start, op_type_dir_finish) =
            match drag_op {
                DragOperation::Move => (
                    OpType::Mv,
                    OpType::MvOnto,
                    OpType::StartDirMv,
                    OpType::FinishDirMv,
                ),
                DragOperation::Copy => (
                    OpType::Cp,
                    OpType::CpOnto,
                    OpType::StartDirCp,
                    OpType::FinishDirCp,
                ),
            };
        Self {
            drag_op,
            dir_conflict_policy,
            file_conflict_policy,
            src_node_move_policy: SrcNodeMovePolicy::default(),
            replace_dir_with_file_policy: ReplaceDirWithFilePolicy::default(),
            op_type_file,
            op_type_file_replace,
            op_type_dir_start,
            op_type_dir_finish,
            sn_dst_parent,
            dst_existing_by_name,
        }
    }
}

/// Skip conditions consulted before replacing or renaming over a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCondition {
    /// Never skip.
    Never,
    /// Skip when src and dst have equal content signatures.
    SameContent,
    /// Skip when signatures are equal and src is not newer than dst.
    SameContentAndNotOlder,
}

/// Index a child list by node name, preserving duplicates.
pub fn children_by_name(children: Vec<SpidNodePair>) -> HashMap<String, Vec<SpidNodePair>> {
    let mut map: HashMap<String, Vec<SpidNodePair>> = HashMap::new();
    for sn in children {
        map.entry(sn.node.name().to_string()).or_default().push(sn);
    }
    map
}
