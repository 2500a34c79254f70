//! Operation dependency graph
//!
//! Accepts batches of ops in insertion order and hands them out one at a time
//! once they are safe to run. Guarantees: at most one checked-out op per
//! affected node; an op waits for pending ops on its target and its target's
//! parents; a directory RM waits for every descendant RM; the finish half of
//! a directory copy waits for every descendant op; a two-sided op runs only
//! when both its halves are at the front of their queues.

use super::graph_node::{OgArena, OgNodeId, OgSide, ROOT_NODE_ID};
use crate::domain::{DeviceUid, Uid, UserOp};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OpGraphError {
    #[error("Invalid op sequence: {0}")]
    InvalidOpSequence(String),

    #[error("Op graph inconsistency: {0}")]
    Internal(String),
}

/// Outcome of one batch enqueue.
#[derive(Debug, Default)]
pub struct EnqueueResult {
    pub inserted: Vec<Arc<UserOp>>,
    /// Duplicate RMs dropped at insert; already covered by pending ops.
    pub discarded: Vec<Arc<UserOp>>,
}

#[derive(Default)]
struct GraphState {
    arena: OgArena,
    /// FIFO of pending graph nodes per affected (device, node).
    node_queues: HashMap<(DeviceUid, Uid), VecDeque<OgNodeId>>,
    /// Ops handed out by `try_get` and not yet popped, keyed by op UID.
    checked_out: HashMap<Uid, Arc<UserOp>>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            arena: OgArena::new(),
            node_queues: HashMap::new(),
            checked_out: HashMap::new(),
        }
    }

    fn queue_back(&self, key: &(DeviceUid, Uid)) -> Option<OgNodeId> {
        self.node_queues.get(key).and_then(|q| q.back()).copied()
    }

    fn queue_front(&self, key: &(DeviceUid, Uid)) -> Option<OgNodeId> {
        self.node_queues.get(key).and_then(|q| q.front()).copied()
    }
}

pub struct OpGraph {
    state: Mutex<GraphState>,
    cv_can_get: Notify,
    shutdown: AtomicBool,
}

impl Default for OpGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl OpGraph {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GraphState::new()),
            cv_can_get: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Unblock all `get_next_op` callers permanently.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cv_can_get.notify_waiters();
    }

    /// Insert a whole batch atomically with respect to `try_get`: a consumer
    /// never observes a half-inserted batch. Ops must be sorted ascending by
    /// op UID. On any rule violation the graph is left untouched.
    pub async fn enqueue_batch(
        &self,
        ops: &[Arc<UserOp>],
    ) -> Result<EnqueueResult, OpGraphError> {
        if ops.is_empty() {
            return Err(OpGraphError::InvalidOpSequence("batch has no ops".into()));
        }
        let mut last_uid = Uid(0);
        for op in ops {
            if op.op_uid < last_uid {
                return Err(OpGraphError::InvalidOpSequence(format!(
                    "batch items are out of order ({} < {})",
                    op.op_uid, last_uid
                )));
            }
            last_uid = op.op_uid;
        }

        let mut state = self.state.lock().await;

        // Build against a scratch copy so a mid-batch rejection cannot leave
        // a half-inserted batch behind.
        let mut scratch = GraphState {
            arena: state.arena.clone(),
            node_queues: state.node_queues.clone(),
            checked_out: state.checked_out.clone(),
        };

        let mut result = EnqueueResult::default();
        for op in ops {
            let src_id = scratch.arena.insert(op.clone(), OgSide::Src);
            if enqueue_single(&mut scratch, src_id)? {
                result.inserted.push(op.clone());
            } else {
                scratch.arena.remove(src_id);
                result.discarded.push(op.clone());
                debug!("Discarded duplicate RM: {}", op);
                continue;
            }
            if op.has_dst() {
                let dst_id = scratch.arena.insert(op.clone(), OgSide::Dst);
                if !enqueue_single(&mut scratch, dst_id)? {
                    return Err(OpGraphError::Internal(format!(
                        "dst graph node discarded for {}",
                        op
                    )));
                }
            }
        }

        *state = scratch;
        info!(
            "Enqueued batch {}: {} inserted, {} discarded",
            ops[0].batch_uid,
            result.inserted.len(),
            result.discarded.len()
        );
        drop(state);

        self.cv_can_get.notify_waiters();
        Ok(result)
    }

    /// Non-blocking: the first ready, not-yet-checked-out op in insertion
    /// order, or None.
    pub async fn try_get(&self) -> Option<Arc<UserOp>> {
        let mut state = self.state.lock().await;
        try_get_locked(&mut state)
    }

    /// Blocking variant; returns None only after `shutdown`.
    pub async fn get_next_op(&self) -> Option<Arc<UserOp>> {
        loop {
            // Register for wakeups before inspecting state, so a notify
            // landing between the check and the await is not lost.
            let mut notified = std::pin::pin!(self.cv_can_get.notified());
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            {
                let mut state = self.state.lock().await;
                if let Some(op) = try_get_locked(&mut state) {
                    return Some(op);
                }
            }
            notified.await;
        }
    }

    /// Commit a completed op: remove its graph nodes, pop its queues, and
    /// promote any orphaned children to ready.
    pub async fn pop(&self, op: &UserOp) -> Result<(), OpGraphError> {
        let mut state = self.state.lock().await;

        if state.checked_out.remove(&op.op_uid).is_none() {
            return Err(OpGraphError::Internal(format!(
                "completed op was not checked out: {}",
                op
            )));
        }

        let src_key = (op.src.spid.device_uid, op.src.spid.node_uid);
        pop_side(&mut state, &src_key, op)?;

        if let Some(dst) = &op.dst {
            let dst_key = (dst.spid.device_uid, dst.spid.node_uid);
            pop_side(&mut state, &dst_key, op)?;
        }

        debug!("Popped op {}", op);
        drop(state);

        self.cv_can_get.notify_waiters();
        Ok(())
    }

    /// The newest pending op affecting `(device_uid, node_uid)`, if any.
    pub async fn last_pending_op_for(
        &self,
        device_uid: DeviceUid,
        node_uid: Uid,
    ) -> Option<Arc<UserOp>> {
        let state = self.state.lock().await;
        state
            .queue_back(&(device_uid, node_uid))
            .and_then(|id| state.arena.get(id))
            .and_then(|n| n.op.clone())
    }

    pub async fn pending_op_count(&self) -> usize {
        let state = self.state.lock().await;
        let mut uids = std::collections::HashSet::new();
        for queue in state.node_queues.values() {
            for id in queue {
                if let Some(node) = state.arena.get(*id) {
                    uids.insert(node.op_uid());
                }
            }
        }
        uids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.arena.is_empty()
    }
}

fn try_get_locked(state: &mut GraphState) -> Option<Arc<UserOp>> {
    for node_id in state.arena.root_children() {
        let Some(node) = state.arena.get(node_id) else {
            continue;
        };
        let Some(op) = node.op.clone() else {
            continue;
        };

        if op.has_dst() {
            // Both halves must be at the front of their queues and directly
            // below root before the op may run.
            let other_key = if node.is_dst() {
                (op.src.spid.device_uid, op.src.spid.node_uid)
            } else {
                match op.dst.as_ref() {
                    Some(dst) => (dst.spid.device_uid, dst.spid.node_uid),
                    None => continue,
                }
            };
            let Some(other_id) = state.queue_front(&other_key) else {
                warn!("No queue entry for the other side of {}", op);
                continue;
            };
            let Some(other) = state.arena.get(other_id) else {
                continue;
            };
            if other.op_uid() != op.op_uid {
                continue;
            }
            if !state.arena.is_child_of_root(other_id) {
                continue;
            }
        }

        if !state.checked_out.contains_key(&op.op_uid) {
            state.checked_out.insert(op.op_uid, op.clone());
            return Some(op);
        }
    }
    None
}

fn pop_side(
    state: &mut GraphState,
    key: &(DeviceUid, Uid),
    op: &UserOp,
) -> Result<(), OpGraphError> {
    let queue = state
        .node_queues
        .get_mut(key)
        .ok_or_else(|| OpGraphError::Internal(format!("no queue for target of {}", op)))?;

    let node_id = queue
        .pop_front()
        .ok_or_else(|| OpGraphError::Internal(format!("empty queue for target of {}", op)))?;
    if queue.is_empty() {
        state.node_queues.remove(key);
    }

    let popped_uid = state
        .arena
        .get(node_id)
        .map(|n| n.op_uid())
        .ok_or_else(|| OpGraphError::Internal("popped node missing from arena".into()))?;
    if popped_uid != op.op_uid {
        return Err(OpGraphError::Internal(format!(
            "completed op {} does not match queue head (op {})",
            op.op_uid, popped_uid
        )));
    }
    if !state.arena.is_child_of_root(node_id) {
        return Err(OpGraphError::Internal(format!(
            "graph node for completed op {} is not a child of root",
            op.op_uid
        )));
    }

    state.arena.unlink_child(ROOT_NODE_ID, node_id);

    let children: Vec<OgNodeId> = state
        .arena
        .get(node_id)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    for child in children {
        state.arena.unlink_child(node_id, child);
        let orphaned = state
            .arena
            .get(child)
            .map(|c| c.parents.is_empty())
            .unwrap_or(false);
        if orphaned {
            state.arena.link_child(ROOT_NODE_ID, child);
        }
    }
    state.arena.remove(node_id);
    Ok(())
}

/// Enqueue one graph node under the ordering rules. Returns false if the
/// node was discarded as a duplicate RM.
fn enqueue_single(state: &mut GraphState, node_id: OgNodeId) -> Result<bool, OpGraphError> {
    let (target_key, parent_uids, is_rm, is_transfer_src) = {
        let node = state
            .arena
            .get(node_id)
            .ok_or_else(|| OpGraphError::Internal("enqueue of unknown node".into()))?;
        let target = node.target();
        let has_dst = node.op.as_ref().map(|op| op.has_dst()).unwrap_or(false);
        (
            node.target_key(),
            target.node.parent_uids().to_vec(),
            node.is_remove_type(),
            !node.is_dst() && has_dst,
        )
    };
    let device_uid = target_key.0;
    let last_target = state.queue_back(&target_key);

    // A transfer cannot read from a node that a pending op removes.
    if is_transfer_src {
        if let Some(last_id) = last_target {
            let last_is_rm = state
                .arena
                .get(last_id)
                .map(|n| n.is_remove_type())
                .unwrap_or(false);
            if last_is_rm {
                return Err(OpGraphError::InvalidOpSequence(format!(
                    "cannot transfer from node {}: it is scheduled for removal",
                    target_key.1
                )));
            }
        }
    }

    if is_rm {
        // Ops already pending against children of the target act as parents
        // of this RM: children must be removed before their parent.
        let child_ops = find_pending_ops_on_children_of(state, &target_key)?;
        if !child_ops.is_empty() {
            let mut existing_child_count = 0;
            for child_op_id in &child_ops {
                let first_child = state
                    .arena
                    .get(*child_op_id)
                    .and_then(|n| n.children.first().copied());
                match first_child {
                    Some(existing) => {
                        let existing_node = state.arena.get(existing).ok_or_else(|| {
                            OpGraphError::Internal("dangling child edge".into())
                        })?;
                        if !existing_node.is_remove_type() {
                            return Err(OpGraphError::InvalidOpSequence(format!(
                                "RM of node {} conflicts with pending non-RM descendant op",
                                target_key.1
                            )));
                        }
                        if existing_node.target_key() != target_key {
                            return Err(OpGraphError::Internal(format!(
                                "unexpected child under pending descendant op (target {})",
                                existing_node.target_key().1
                            )));
                        }
                        existing_child_count += 1;
                    }
                    None => {
                        state.arena.link_child(*child_op_id, node_id);
                    }
                }
            }
            if existing_child_count != 0 && existing_child_count != child_ops.len() {
                return Err(OpGraphError::Internal(format!(
                    "only {} of {} descendant RMs already have the parent RM attached",
                    existing_child_count,
                    child_ops.len()
                )));
            }
            if existing_child_count > 0 {
                // Every descendant already waits on an equivalent RM.
                return Ok(false);
            }
        } else if let Some(last_id) = last_target {
            let last = state
                .arena
                .get(last_id)
                .ok_or_else(|| OpGraphError::Internal("dangling queue entry".into()))?;
            if last.is_remove_type() {
                return Ok(false);
            }
            if !last.children.is_empty() {
                return Err(OpGraphError::InvalidOpSequence(format!(
                    "cannot RM node {}: pending ops exist on its descendants",
                    target_key.1
                )));
            }
            state.arena.link_child(last_id, node_id);
        } else {
            state.arena.link_child(ROOT_NODE_ID, node_id);
        }

        // A pending RM of the parent dir must run after this RM.
        for parent_uid in &parent_uids {
            let parent_key = (device_uid, *parent_uid);
            if let Some(last_parent_id) = state.queue_back(&parent_key) {
                let parent_is_rm = state
                    .arena
                    .get(last_parent_id)
                    .map(|n| n.is_remove_type())
                    .unwrap_or(false);
                if parent_is_rm {
                    state.arena.link_child(node_id, last_parent_id);
                }
            }
        }
    } else {
        // Attach below the deeper of: the last pending op on the target, the
        // last pending op on any of the target's parents. A finish-dir node
        // sitting at a parent's queue back is skipped over so that this node
        // runs before it; the finish is relinked below this node instead.
        let mut attach_candidates: Vec<OgNodeId> = Vec::new();
        let mut finish_to_sink: Vec<OgNodeId> = Vec::new();

        if let Some(last_id) = last_target {
            attach_candidates.push(last_id);
        }
        for parent_uid in &parent_uids {
            let parent_key = (device_uid, *parent_uid);
            let Some(queue) = state.node_queues.get(&parent_key) else {
                continue;
            };
            let mut candidate = None;
            for id in queue.iter().rev() {
                let is_finish_back = state
                    .arena
                    .get(*id)
                    .map(|n| n.is_finish_dir())
                    .unwrap_or(false);
                if is_finish_back {
                    finish_to_sink.push(*id);
                    continue;
                }
                candidate = Some(*id);
                break;
            }
            if let Some(id) = candidate {
                attach_candidates.push(id);
            }
        }

        match attach_candidates
            .iter()
            .max_by_key(|id| state.arena.level(**id))
        {
            Some(deepest) => state.arena.link_child(*deepest, node_id),
            None => state.arena.link_child(ROOT_NODE_ID, node_id),
        }

        for finish_id in finish_to_sink {
            state.arena.link_child(node_id, finish_id);
        }
    }

    state
        .node_queues
        .entry(target_key)
        .or_default()
        .push_back(node_id);
    Ok(true)
}

/// Queue-back graph nodes whose target is a direct child of `parent_key`'s
/// node. They must all be RM type; a pending non-RM op under a node being
/// removed is a sequencing error.
fn find_pending_ops_on_children_of(
    state: &GraphState,
    parent_key: &(DeviceUid, Uid),
) -> Result<Vec<OgNodeId>, OpGraphError> {
    let mut result = Vec::new();
    for (key, queue) in &state.node_queues {
        if key.0 != parent_key.0 {
            continue;
        }
        let Some(back_id) = queue.back() else {
            continue;
        };
        let Some(back) = state.arena.get(*back_id) else {
            continue;
        };
        if back.target().node.parent_uids().contains(&parent_key.1) {
            if !back.is_remove_type() {
                return Err(OpGraphError::InvalidOpSequence(format!(
                    "pending non-RM op on child {} of node {} being removed",
                    key.1, parent_key.1
                )));
            }
            result.push(*back_id);
        }
    }
    Ok(result)
}
