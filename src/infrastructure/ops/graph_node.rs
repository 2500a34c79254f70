//! Graph node arena for the op dependency graph
//!
//! Every op materializes as one graph node (src-only ops like RM) or two
//! (src + dst). Nodes refer to each other by arena id; the sentinel root is
//! id 0 and its children are the currently-ready ops.

use crate::domain::{DeviceUid, SpidNodePair, Uid, UserOp};
use std::collections::HashMap;
use std::sync::Arc;

pub type OgNodeId = u64;
pub const ROOT_NODE_ID: OgNodeId = 0;

/// Which half of an op a graph node represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OgSide {
    Src,
    Dst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OgKind {
    Root,
    /// Source side of a non-remove op.
    Src,
    /// Destination side of a two-sided op.
    Dst,
    /// An RM op (always src-only).
    Rm,
}

#[derive(Debug, Clone)]
pub struct OgNode {
    pub id: OgNodeId,
    pub kind: OgKind,
    pub op: Option<Arc<UserOp>>,
    pub parents: Vec<OgNodeId>,
    pub children: Vec<OgNodeId>,
}

impl OgNode {
    pub fn root() -> Self {
        Self {
            id: ROOT_NODE_ID,
            kind: OgKind::Root,
            op: None,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn for_op(id: OgNodeId, op: Arc<UserOp>, side: OgSide) -> Self {
        let kind = match side {
            OgSide::Dst => OgKind::Dst,
            OgSide::Src if op.op_type.is_remove_type() => OgKind::Rm,
            OgSide::Src => OgKind::Src,
        };
        Self {
            id,
            kind,
            op: Some(op),
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn is_remove_type(&self) -> bool {
        self.kind == OgKind::Rm
    }

    pub fn is_dst(&self) -> bool {
        self.kind == OgKind::Dst
    }

    /// True for the finish half of a directory copy/move pair, which must
    /// sink below every descendant op.
    pub fn is_finish_dir(&self) -> bool {
        self.op
            .as_ref()
            .map(|op| op.op_type.is_finish_dir())
            .unwrap_or(false)
    }

    /// The node this graph node operates on.
    pub fn target(&self) -> &SpidNodePair {
        let op = self.op.as_ref().expect("root node has no target");
        match self.kind {
            OgKind::Dst => op.dst.as_ref().expect("dst graph node without dst"),
            _ => &op.src,
        }
    }

    pub fn target_key(&self) -> (DeviceUid, Uid) {
        let target = self.target();
        (target.spid.device_uid, target.spid.node_uid)
    }

    pub fn op_uid(&self) -> Uid {
        self.op.as_ref().map(|op| op.op_uid).unwrap_or(Uid(0))
    }
}

/// Arena of graph nodes. Link/unlink primitives keep parent and child edge
/// lists mirrored.
#[derive(Clone, Default)]
pub struct OgArena {
    nodes: HashMap<OgNodeId, OgNode>,
    next_id: OgNodeId,
}

impl OgArena {
    pub fn new() -> Self {
        let mut arena = Self {
            nodes: HashMap::new(),
            next_id: 1,
        };
        arena.nodes.insert(ROOT_NODE_ID, OgNode::root());
        arena
    }

    pub fn insert(&mut self, op: Arc<UserOp>, side: OgSide) -> OgNodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, OgNode::for_op(id, op, side));
        id
    }

    pub fn get(&self, id: OgNodeId) -> Option<&OgNode> {
        self.nodes.get(&id)
    }

    pub fn remove(&mut self, id: OgNodeId) -> Option<OgNode> {
        self.nodes.remove(&id)
    }

    pub fn link_child(&mut self, parent: OgNodeId, child: OgNodeId) {
        // A node hangs off the root only while nothing orders it; gaining a
        // real parent evicts the root edge so the node stops looking ready.
        if parent != ROOT_NODE_ID && self.is_child_of_root(child) {
            self.unlink_child(ROOT_NODE_ID, child);
        }
        if let Some(p) = self.nodes.get_mut(&parent) {
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            if !c.parents.contains(&parent) {
                c.parents.push(parent);
            }
        }
    }

    pub fn unlink_child(&mut self, parent: OgNodeId, child: OgNodeId) {
        if let Some(p) = self.nodes.get_mut(&parent) {
            p.children.retain(|c| *c != child);
        }
        if let Some(c) = self.nodes.get_mut(&child) {
            c.parents.retain(|p| *p != parent);
        }
    }

    pub fn is_child_of_root(&self, id: OgNodeId) -> bool {
        self.nodes
            .get(&id)
            .map(|n| n.parents.contains(&ROOT_NODE_ID))
            .unwrap_or(false)
    }

    pub fn root_children(&self) -> Vec<OgNodeId> {
        self.nodes
            .get(&ROOT_NODE_ID)
            .map(|r| r.children.clone())
            .unwrap_or_default()
    }

    /// Depth of `id` below the root: root is 0, a ready node is 1.
    pub fn level(&self, id: OgNodeId) -> usize {
        if id == ROOT_NODE_ID {
            return 0;
        }
        let Some(node) = self.nodes.get(&id) else {
            return 0;
        };
        1 + node
            .parents
            .iter()
            .map(|p| self.level(*p))
            .max()
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        // The root is always present.
        self.nodes.len() <= 1
    }
}
