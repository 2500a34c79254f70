//! Primitive user operations and batches
//!
//! A `UserOp` is the unit of work the planner emits, the op graph orders, the
//! ledger persists, and the executor runs. Two-sided ops (CP/MV and their
//! ONTO variants, plus the START/FINISH dir pairs) carry both a source and a
//! pre-built destination node.

use super::identifier::{Guid, TreeId, Uid};
use super::node::SpidNodePair;
use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntEnum, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum OpType {
    Cp = 1,
    /// File overwrites an existing file.
    CpOnto = 2,
    Mv = 3,
    MvOnto = 4,
    /// Begin/end pair for a directory copy, so descendant ordering can be
    /// expressed in the op graph.
    StartDirCp = 5,
    FinishDirCp = 6,
    StartDirMv = 7,
    FinishDirMv = 8,
    Rm = 9,
    Mkdir = 10,
}

impl OpType {
    pub fn has_dst(&self) -> bool {
        matches!(
            self,
            OpType::Cp
                | OpType::CpOnto
                | OpType::Mv
                | OpType::MvOnto
                | OpType::StartDirCp
                | OpType::FinishDirCp
                | OpType::StartDirMv
                | OpType::FinishDirMv
        )
    }

    /// Ops that bring a node into existence on the destination side.
    pub fn is_create_type(&self) -> bool {
        matches!(
            self,
            OpType::Mkdir
                | OpType::Cp
                | OpType::Mv
                | OpType::StartDirCp
                | OpType::StartDirMv
        )
    }

    pub fn is_remove_type(&self) -> bool {
        matches!(self, OpType::Rm)
    }

    pub fn is_start_dir(&self) -> bool {
        matches!(self, OpType::StartDirCp | OpType::StartDirMv)
    }

    pub fn is_finish_dir(&self) -> bool {
        matches!(self, OpType::FinishDirCp | OpType::FinishDirMv)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntEnum, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum OpStatus {
    Pending = 1,
    StoppedOnError = 2,
    CompletedOk = 3,
    /// Completed without touching the backing store, e.g. a duplicate RM
    /// discarded at enqueue or a skip decided at execution time.
    CompletedNoOp = 4,
}

impl OpStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, OpStatus::CompletedOk | OpStatus::CompletedNoOp)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOp {
    pub op_uid: Uid,
    pub batch_uid: Uid,
    pub op_type: OpType,
    pub status: OpStatus,
    pub src: SpidNodePair,
    pub dst: Option<SpidNodePair>,
    /// Epoch milliseconds at planning time.
    pub create_ts: i64,
}

impl UserOp {
    pub fn new(op_uid: Uid, batch_uid: Uid, op_type: OpType, src: SpidNodePair, dst: Option<SpidNodePair>) -> Self {
        debug_assert_eq!(op_type.has_dst(), dst.is_some());
        Self {
            op_uid,
            batch_uid,
            op_type,
            status: OpStatus::Pending,
            src,
            dst,
            create_ts: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn has_dst(&self) -> bool {
        self.dst.is_some()
    }
}

impl fmt::Display for UserOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dst {
            Some(dst) => write!(
                f,
                "{}(op={} batch={} src={} dst={})",
                self.op_type, self.op_uid, self.batch_uid, self.src.spid, dst.spid
            ),
            None => write!(
                f,
                "{}(op={} batch={} src={})",
                self.op_type, self.op_uid, self.batch_uid, self.src.spid
            ),
        }
    }
}

/// Everything one planner invocation produced. Applied atomically to the
/// ledger; op_list is sorted ascending by op_uid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_uid: Uid,
    pub op_list: Vec<UserOp>,
    /// GUIDs the UI should select once the batch lands, with the tree they
    /// live in and the drop timestamp.
    pub to_select_in_ui: Vec<Guid>,
    pub select_in_tree_id: Option<TreeId>,
    pub select_ts: i64,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.op_list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.op_list.len()
    }
}
