//! Node and device identifiers
//!
//! Every node in the engine is addressed by a `Uid` that is unique within the
//! process and stable for the life of the node, plus a `DeviceUid` selecting
//! which tree store owns it. Paths are bound to UIDs through the persisted
//! path map (see `identity::UidRegistry`); once a path has a UID it keeps it.

use int_enum::IntEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Reserved "no node" value. Never allocated.
pub const NULL_UID: Uid = Uid(0);

/// UIDs below this are reserved for well-known singletons (super-root, device
/// roots). The generator starts here unless the persisted maps contain higher
/// values.
pub const FIRST_DYNAMIC_UID: u64 = 100;

/// Stable identifier for a single node within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(pub u64);

impl Uid {
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Uid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of the device (backing store) a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceUid(pub u64);

impl fmt::Display for DeviceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeviceUid {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Which kind of backing tree a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntEnum)]
#[repr(i32)]
pub enum TreeType {
    /// The synthetic super-root that parents all real device roots.
    Mixed = 1,
    LocalDisk = 2,
    GDrive = 3,
}

impl fmt::Display for TreeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeType::Mixed => "mixed",
            TreeType::LocalDisk => "local_disk",
            TreeType::GDrive => "gdrive",
        };
        write!(f, "{}", s)
    }
}

/// Monotonic UID source for the whole process.
///
/// Seeded above the highest UID found in the persisted maps so that restart
/// never reuses an identifier.
#[derive(Debug)]
pub struct UidGenerator {
    next: AtomicU64,
}

impl UidGenerator {
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first.max(FIRST_DYNAMIC_UID)),
        }
    }

    pub fn next_uid(&self) -> Uid {
        Uid(self.next.fetch_add(1, Ordering::SeqCst))
    }

    /// Raise the floor so future UIDs are allocated above `seen`.
    pub fn ensure_next_uid_greater_than(&self, seen: u64) {
        let mut current = self.next.load(Ordering::SeqCst);
        while current <= seen {
            match self.next.compare_exchange(
                current,
                seen + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Single-path node identifier.
///
/// A node may be reachable through several paths (GDrive multi-parenting);
/// a `Spid` pins down exactly one of them. Local nodes additionally carry the
/// `path_uid` assigned by the persisted path map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spid {
    pub device_uid: DeviceUid,
    pub node_uid: Uid,
    pub path: String,
    pub path_uid: Option<Uid>,
}

impl Spid {
    pub fn new(device_uid: DeviceUid, node_uid: Uid, path: impl Into<String>) -> Self {
        Self {
            device_uid,
            node_uid,
            path: path.into(),
            path_uid: None,
        }
    }

    pub fn with_path_uid(mut self, path_uid: Uid) -> Self {
        self.path_uid = Some(path_uid);
        self
    }

    pub fn parent_path(&self) -> Option<&str> {
        Path::new(&self.path)
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
    }

    pub fn file_name(&self) -> Option<&str> {
        Path::new(&self.path).file_name().and_then(|n| n.to_str())
    }

    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// True if `self.path` equals or descends from `ancestor_path`.
    pub fn is_path_in_subtree(&self, ancestor_path: &str) -> bool {
        path_is_in_subtree(&self.path, ancestor_path)
    }

    /// The UI-facing composite key for this node as reached via this path.
    pub fn guid(&self) -> Guid {
        match self.path_uid {
            Some(path_uid) => Guid(format!(
                "{}:{}:{}",
                self.device_uid, self.node_uid, path_uid
            )),
            // GDrive nodes have no path UID; the path itself disambiguates
            // the same node reached through different parents.
            None => Guid(format!("{}:{}:{}", self.device_uid, self.node_uid, self.path)),
        }
    }
}

impl fmt::Display for Spid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.device_uid, self.node_uid, self.path)
    }
}

/// Prefix containment respecting path component boundaries.
pub fn path_is_in_subtree(path: &str, ancestor_path: &str) -> bool {
    if path == ancestor_path {
        return true;
    }
    if let Some(rest) = path.strip_prefix(ancestor_path) {
        return ancestor_path.ends_with('/') || rest.starts_with('/');
    }
    false
}

/// UI-facing node key. Composes device, node and parent context so that the
/// same node reached through different parents yields distinct values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guid(pub String);

impl Guid {
    /// Recover the (device_uid, node_uid) prefix. The trailing parent-context
    /// segment is opaque to lookups.
    pub fn parse(&self) -> Option<(DeviceUid, Uid)> {
        let mut parts = self.0.splitn(3, ':');
        let device = parts.next()?.parse::<u64>().ok()?;
        let node = parts.next()?.parse::<u64>().ok()?;
        Some((DeviceUid(device), Uid(node)))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one UI tree panel (left/right diff view etc).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeId(pub String);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_generator_is_monotonic() {
        let generator = UidGenerator::new(0);
        let a = generator.next_uid();
        let b = generator.next_uid();
        assert!(a.0 >= FIRST_DYNAMIC_UID);
        assert!(b.0 > a.0);
    }

    #[test]
    fn uid_generator_floor_can_be_raised() {
        let generator = UidGenerator::new(0);
        generator.ensure_next_uid_greater_than(5000);
        assert!(generator.next_uid().0 > 5000);
    }

    #[test]
    fn subtree_path_matching_respects_component_boundaries() {
        assert!(path_is_in_subtree("/a/b/c", "/a/b"));
        assert!(path_is_in_subtree("/a/b", "/a/b"));
        assert!(!path_is_in_subtree("/a/bc", "/a/b"));
    }

    #[test]
    fn guid_round_trips_device_and_node() {
        let spid = Spid::new(DeviceUid(2), Uid(42), "/tmp/x").with_path_uid(Uid(7));
        let guid = spid.guid();
        assert_eq!(guid.parse(), Some((DeviceUid(2), Uid(42))));
    }

    #[test]
    fn same_node_different_parents_yields_distinct_guids() {
        let a = Spid::new(DeviceUid(3), Uid(42), "/drive/a/file");
        let b = Spid::new(DeviceUid(3), Uid(42), "/drive/b/file");
        assert_ne!(a.guid(), b.guid());
    }
}
