//! The node model shared by every tree store
//!
//! A `Node` is one entry of a device tree: a local file or directory, a
//! GDrive file or folder, or one of the synthetic grouping nodes used by
//! mixed views. Nodes never hold pointers to each other; parents are recorded
//! as UIDs and navigation goes through the owning tree store's reverse index.

use super::dir_stats::DirStats;
use super::identifier::{DeviceUid, Spid, TreeType, Uid};
use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trash state as reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntEnum, Default)]
#[repr(i32)]
pub enum TrashStatus {
    #[default]
    NotTrashed = 0,
    ExplicitlyTrashed = 1,
    /// Trashed because an ancestor was trashed.
    ImplicitlyTrashed = 2,
}

impl TrashStatus {
    pub fn is_trashed(&self) -> bool {
        !matches!(self, TrashStatus::NotTrashed)
    }
}

/// Persisted discriminator for node rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntEnum)]
#[repr(i32)]
pub enum ObjType {
    LocalFile = 1,
    LocalDir = 2,
    GDriveFile = 3,
    GDriveFolder = 4,
    Category = 5,
    Root = 6,
    Container = 7,
    NonexistentDir = 8,
}

/// Attributes common to every node variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBase {
    pub uid: Uid,
    pub device_uid: DeviceUid,
    /// Exactly one entry for local non-root nodes; one or more for GDrive.
    /// Empty means the node is a root of its tree store.
    pub parent_uids: Vec<Uid>,
    pub name: String,
    /// One absolute path per parent, kept in the same order as `parent_uids`.
    pub path_list: Vec<String>,
    pub trashed: TrashStatus,
    pub is_shared: bool,
    pub icon_id: Option<i32>,
    /// False for destination nodes pre-built by the planner which do not yet
    /// exist in the backing store.
    pub is_live: bool,
}

impl NodeBase {
    pub fn new(uid: Uid, device_uid: DeviceUid, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            uid,
            device_uid,
            parent_uids: Vec::new(),
            name: name.into(),
            path_list: vec![path.into()],
            trashed: TrashStatus::NotTrashed,
            is_shared: false,
            icon_id: None,
            is_live: true,
        }
    }
}

/// Content timestamps carried by file nodes, epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileTimes {
    pub create_ts: i64,
    pub modify_ts: i64,
    pub change_ts: i64,
    pub sync_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFileNode {
    pub base: NodeBase,
    /// Interned (size, md5, sha256) reference.
    pub content_uid: Uid,
    pub times: FileTimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDirNode {
    pub base: NodeBase,
    pub sync_ts: i64,
    pub all_children_fetched: bool,
    pub dir_stats: Option<DirStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GDriveFileNode {
    pub base: NodeBase,
    /// The remote's opaque id. Absent until the first sync of a planner-built
    /// destination node completes.
    pub goog_id: Option<String>,
    pub content_uid: Uid,
    pub times: FileTimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GDriveFolderNode {
    pub base: NodeBase,
    pub goog_id: Option<String>,
    pub all_children_fetched: bool,
    pub sync_ts: i64,
    pub dir_stats: Option<DirStats>,
}

/// Synthetic nodes used by mixed/category views; they have no backing
/// artifact and are never the target of an op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerNode {
    pub base: NodeBase,
    pub dir_stats: Option<DirStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    LocalFile(LocalFileNode),
    LocalDir(LocalDirNode),
    GDriveFile(GDriveFileNode),
    GDriveFolder(GDriveFolderNode),
    Category(ContainerNode),
    Root(ContainerNode),
    Container(ContainerNode),
    NonexistentDir(ContainerNode),
}

impl Node {
    pub fn base(&self) -> &NodeBase {
        match self {
            Node::LocalFile(n) => &n.base,
            Node::LocalDir(n) => &n.base,
            Node::GDriveFile(n) => &n.base,
            Node::GDriveFolder(n) => &n.base,
            Node::Category(n) | Node::Root(n) | Node::Container(n) | Node::NonexistentDir(n) => {
                &n.base
            }
        }
    }

    pub fn base_mut(&mut self) -> &mut NodeBase {
        match self {
            Node::LocalFile(n) => &mut n.base,
            Node::LocalDir(n) => &mut n.base,
            Node::GDriveFile(n) => &mut n.base,
            Node::GDriveFolder(n) => &mut n.base,
            Node::Category(n) | Node::Root(n) | Node::Container(n) | Node::NonexistentDir(n) => {
                &mut n.base
            }
        }
    }

    pub fn uid(&self) -> Uid {
        self.base().uid
    }

    pub fn device_uid(&self) -> DeviceUid {
        self.base().device_uid
    }

    pub fn name(&self) -> &str {
        &self.base().name
    }

    pub fn parent_uids(&self) -> &[Uid] {
        &self.base().parent_uids
    }

    pub fn path_list(&self) -> &[String] {
        &self.base().path_list
    }

    /// The first (stable-order) path of this node.
    pub fn first_path(&self) -> &str {
        self.base().path_list.first().map(String::as_str).unwrap_or("")
    }

    pub fn trashed(&self) -> TrashStatus {
        self.base().trashed
    }

    pub fn is_live(&self) -> bool {
        self.base().is_live
    }

    pub fn set_is_live(&mut self, live: bool) {
        self.base_mut().is_live = live;
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::LocalFile(_) | Node::GDriveFile(_))
    }

    pub fn is_dir(&self) -> bool {
        !self.is_file()
    }

    pub fn is_parent_of(&self, other: &Node) -> bool {
        self.device_uid() == other.device_uid() && other.parent_uids().contains(&self.uid())
    }

    pub fn tree_type(&self) -> TreeType {
        match self {
            Node::LocalFile(_) | Node::LocalDir(_) => TreeType::LocalDisk,
            Node::GDriveFile(_) | Node::GDriveFolder(_) => TreeType::GDrive,
            _ => TreeType::Mixed,
        }
    }

    pub fn obj_type(&self) -> ObjType {
        match self {
            Node::LocalFile(_) => ObjType::LocalFile,
            Node::LocalDir(_) => ObjType::LocalDir,
            Node::GDriveFile(_) => ObjType::GDriveFile,
            Node::GDriveFolder(_) => ObjType::GDriveFolder,
            Node::Category(_) => ObjType::Category,
            Node::Root(_) => ObjType::Root,
            Node::Container(_) => ObjType::Container,
            Node::NonexistentDir(_) => ObjType::NonexistentDir,
        }
    }

    pub fn content_uid(&self) -> Option<Uid> {
        match self {
            Node::LocalFile(n) => Some(n.content_uid),
            Node::GDriveFile(n) => Some(n.content_uid),
            _ => None,
        }
    }

    pub fn modify_ts(&self) -> Option<i64> {
        match self {
            Node::LocalFile(n) => Some(n.times.modify_ts),
            Node::GDriveFile(n) => Some(n.times.modify_ts),
            _ => None,
        }
    }

    pub fn goog_id(&self) -> Option<&str> {
        match self {
            Node::GDriveFile(n) => n.goog_id.as_deref(),
            Node::GDriveFolder(n) => n.goog_id.as_deref(),
            _ => None,
        }
    }

    pub fn set_goog_id(&mut self, goog_id: String) {
        match self {
            Node::GDriveFile(n) => n.goog_id = Some(goog_id),
            Node::GDriveFolder(n) => n.goog_id = Some(goog_id),
            _ => {}
        }
    }

    pub fn all_children_fetched(&self) -> bool {
        match self {
            Node::LocalDir(n) => n.all_children_fetched,
            Node::GDriveFolder(n) => n.all_children_fetched,
            _ => false,
        }
    }

    pub fn dir_stats(&self) -> Option<&DirStats> {
        match self {
            Node::LocalDir(n) => n.dir_stats.as_ref(),
            Node::GDriveFolder(n) => n.dir_stats.as_ref(),
            Node::Category(n) | Node::Root(n) | Node::Container(n) | Node::NonexistentDir(n) => {
                n.dir_stats.as_ref()
            }
            _ => None,
        }
    }

    pub fn set_dir_stats(&mut self, stats: DirStats) {
        match self {
            Node::LocalDir(n) => n.dir_stats = Some(stats),
            Node::GDriveFolder(n) => n.dir_stats = Some(stats),
            Node::Category(n) | Node::Root(n) | Node::Container(n) | Node::NonexistentDir(n) => {
                n.dir_stats = Some(stats)
            }
            _ => {}
        }
    }

    /// A `Spid` addressing this node via its first path.
    pub fn spid(&self) -> Spid {
        Spid::new(self.device_uid(), self.uid(), self.first_path())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(uid={} dev={} name={:?} live={})",
            self.obj_type(),
            self.uid(),
            self.device_uid(),
            self.name(),
            self.is_live()
        )
    }
}

/// A node paired with the single path it was reached through.
///
/// This is the currency of the planner and the op pipeline: the same node can
/// appear in different pairs when reached via different parents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpidNodePair {
    pub spid: Spid,
    pub node: Node,
}

impl SpidNodePair {
    pub fn new(spid: Spid, node: Node) -> Self {
        Self { spid, node }
    }

    /// Pair a node with its first path.
    pub fn from_node(node: Node) -> Self {
        Self {
            spid: node.spid(),
            node,
        }
    }
}

impl fmt::Display for SpidNodePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.spid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(uid: u64, parent: u64, name: &str, path: &str) -> Node {
        let mut base = NodeBase::new(Uid(uid), DeviceUid(2), name, path);
        base.parent_uids = vec![Uid(parent)];
        Node::LocalFile(LocalFileNode {
            base,
            content_uid: Uid(900),
            times: FileTimes::default(),
        })
    }

    #[test]
    fn parenthood_requires_same_device() {
        let mut dir_base = NodeBase::new(Uid(10), DeviceUid(2), "pics", "/pics");
        dir_base.parent_uids = vec![];
        let dir = Node::LocalDir(LocalDirNode {
            base: dir_base,
            sync_ts: 0,
            all_children_fetched: true,
            dir_stats: None,
        });
        let child = file(11, 10, "a.jpg", "/pics/a.jpg");
        assert!(dir.is_parent_of(&child));

        let mut foreign = child.clone();
        foreign.base_mut().device_uid = DeviceUid(3);
        assert!(!dir.is_parent_of(&foreign));
    }

    #[test]
    fn obj_type_matches_variant() {
        let node = file(11, 10, "a.jpg", "/pics/a.jpg");
        assert_eq!(node.obj_type(), ObjType::LocalFile);
        assert!(node.is_file());
        assert!(!node.is_dir());
    }
}
