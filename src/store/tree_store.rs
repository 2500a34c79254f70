//! Per-device tree store
//!
//! Owns the in-memory parent/child graph for one device and writes every
//! mutation through to the covering on-disk subtree index inside the same
//! critical section. All mutation goes through a single non-reentrant lock;
//! the lock is never held across network I/O.

use super::index::SubtreeIndex;
use crate::domain::{DeviceUid, DirStats, Node, SpidNodePair, TreeType, Uid};
use crate::infrastructure::events::{Event, EventBus};
use sea_orm::DbErr;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum TreeStoreError {
    #[error("Node not present in tree store: uid={0}")]
    NodeNotPresent(Uid),

    #[error("goog_id mismatch while merging uid={uid}: {existing:?} != {incoming:?}")]
    GoogIdMismatch {
        uid: Uid,
        existing: String,
        incoming: String,
    },

    #[error("Directory uid={0} still has children")]
    DirNotEmpty(Uid),

    #[error("Cache write error: {0}")]
    CacheWrite(#[from] DbErr),
}

struct StoreState {
    by_uid: HashMap<Uid, Node>,
    /// parent uid -> ordered child uids. Order is insertion order, which is
    /// stable for GDrive multi-parent rows.
    parent_to_children: HashMap<Uid, Vec<Uid>>,
    /// (subtree root path, index) pairs, routed by longest-prefix match.
    indexes: Vec<(String, Arc<SubtreeIndex>)>,
}

pub struct TreeStore {
    device_uid: DeviceUid,
    tree_type: TreeType,
    events: Arc<EventBus>,
    state: Mutex<StoreState>,
}

impl TreeStore {
    pub fn new(device_uid: DeviceUid, tree_type: TreeType, events: Arc<EventBus>) -> Self {
        Self {
            device_uid,
            tree_type,
            events,
            state: Mutex::new(StoreState {
                by_uid: HashMap::new(),
                parent_to_children: HashMap::new(),
                indexes: Vec::new(),
            }),
        }
    }

    pub fn device_uid(&self) -> DeviceUid {
        self.device_uid
    }

    pub fn tree_type(&self) -> TreeType {
        self.tree_type
    }

    /// Attach the disk index covering `subtree_root_path` and pull its rows
    /// into memory. Loading is silent: no per-node signals are emitted for
    /// state that was already persisted.
    pub async fn attach_index(
        &self,
        subtree_root_path: String,
        index: Arc<SubtreeIndex>,
    ) -> Result<usize, TreeStoreError> {
        let nodes = index.load_all().await?;
        let mut state = self.state.lock().await;
        let count = nodes.len();
        for node in nodes {
            let uid = node.uid();
            state.by_uid.insert(uid, node);
        }
        // Rebuild the reverse index for everything we just swallowed.
        let links: Vec<(Uid, Uid)> = state
            .by_uid
            .values()
            .flat_map(|n| n.parent_uids().iter().map(|p| (*p, n.uid())).collect::<Vec<_>>())
            .collect();
        for (parent, child) in links {
            let children = state.parent_to_children.entry(parent).or_default();
            if !children.contains(&child) {
                children.push(child);
            }
        }
        state.indexes.push((subtree_root_path, index));
        // Most specific prefix first.
        state.indexes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(count)
    }

    /// Insert `node`, or merge it with the stored version of the same UID.
    ///
    /// Merge rules: parent list becomes the union, goog_id must match,
    /// `all_children_fetched` is monotone-OR, everything else is overwritten
    /// by the incoming version. A name or parent change rewrites the path
    /// list of the node and its whole subtree. Emits NODE_UPSERTED once.
    pub async fn upsert(&self, mut node: Node) -> Result<Node, TreeStoreError> {
        let mut state = self.state.lock().await;
        let uid = node.uid();

        let paths_dirty;
        if let Some(existing) = state.by_uid.get(&uid) {
            paths_dirty = existing.name() != node.name()
                || existing.parent_uids() != node.parent_uids();
            merge_into(existing, &mut node)?;
        } else {
            paths_dirty = !node.parent_uids().is_empty();
        }

        // Refresh the reverse index.
        let old_parents: Vec<Uid> = state
            .by_uid
            .get(&uid)
            .map(|n| n.parent_uids().to_vec())
            .unwrap_or_default();
        for removed_parent in old_parents.iter().filter(|p| !node.parent_uids().contains(p)) {
            if let Some(children) = state.parent_to_children.get_mut(removed_parent) {
                children.retain(|c| *c != uid);
            }
        }
        for parent in node.parent_uids().to_vec() {
            let children = state.parent_to_children.entry(parent).or_default();
            if !children.contains(&uid) {
                children.push(uid);
            }
        }

        state.by_uid.insert(uid, node.clone());

        let mut touched = vec![uid];
        if paths_dirty {
            touched = recompute_paths(&mut state, uid);
        }

        // Write-through, inside the same critical section as the memory
        // mutation. A failed disk write surfaces as a cache-write error but
        // the memory store is not rolled back; the next save re-syncs.
        for touched_uid in &touched {
            if let Some(n) = state.by_uid.get(touched_uid).cloned() {
                write_through_upsert(&state, &n).await?;
            }
        }

        let merged = state.by_uid.get(&uid).cloned().unwrap_or(node);
        // Emitted under the lock so observers see signals in mutation order.
        self.events.emit(Event::NodeUpserted {
            sn: SpidNodePair::from_node(merged.clone()),
        });
        Ok(merged)
    }

    /// Remove the node with `uid`.
    ///
    /// A directory that still has children fails when
    /// `fail_if_children_present` is set; otherwise the children are unlinked
    /// and may become roots of this store. Emits NODE_REMOVED once.
    pub async fn remove(
        &self,
        uid: Uid,
        fail_if_children_present: bool,
    ) -> Result<Node, TreeStoreError> {
        let mut state = self.state.lock().await;
        let node = state
            .by_uid
            .get(&uid)
            .cloned()
            .ok_or(TreeStoreError::NodeNotPresent(uid))?;

        let child_uids: Vec<Uid> = state
            .parent_to_children
            .get(&uid)
            .cloned()
            .unwrap_or_default();
        if !child_uids.is_empty() {
            if fail_if_children_present {
                return Err(TreeStoreError::DirNotEmpty(uid));
            }
            for child_uid in &child_uids {
                if let Some(child) = state.by_uid.get_mut(child_uid) {
                    child.base_mut().parent_uids.retain(|p| *p != uid);
                    if child.parent_uids().is_empty() {
                        debug!("Node {} became a root after unlink from {}", child_uid, uid);
                    }
                }
            }
        }
        state.parent_to_children.remove(&uid);

        for parent in node.parent_uids().to_vec() {
            if let Some(children) = state.parent_to_children.get_mut(&parent) {
                children.retain(|c| *c != uid);
            }
        }
        state.by_uid.remove(&uid);

        write_through_remove(&state, &node).await?;
        self.events.emit(Event::NodeRemoved {
            sn: SpidNodePair::from_node(node.clone()),
        });
        Ok(node)
    }

    pub async fn get(&self, uid: Uid) -> Option<Node> {
        self.state.lock().await.by_uid.get(&uid).cloned()
    }

    pub async fn children_of(&self, uid: Uid) -> Vec<Node> {
        let state = self.state.lock().await;
        state
            .parent_to_children
            .get(&uid)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|c| state.by_uid.get(c).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn parents_of(&self, uid: Uid) -> Vec<Node> {
        let state = self.state.lock().await;
        state
            .by_uid
            .get(&uid)
            .map(|node| {
                node.parent_uids()
                    .iter()
                    .filter_map(|p| state.by_uid.get(p).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The whole subtree under `uid`, breadth-first, root included.
    pub async fn subtree_bfs(&self, uid: Uid) -> Vec<Node> {
        let state = self.state.lock().await;
        let mut result = Vec::new();
        let mut queue = VecDeque::new();
        if state.by_uid.contains_key(&uid) {
            queue.push_back(uid);
        }
        while let Some(current) = queue.pop_front() {
            if let Some(node) = state.by_uid.get(&current) {
                result.push(node.clone());
            }
            if let Some(children) = state.parent_to_children.get(&current) {
                queue.extend(children.iter().copied());
            }
        }
        result
    }

    /// Children of `parent_uid` matching `name`. The back-end permits
    /// duplicate names, so this returns every match in stored order.
    pub async fn get_for_name_and_parent(&self, name: &str, parent_uid: Uid) -> Vec<Node> {
        let state = self.state.lock().await;
        state
            .parent_to_children
            .get(&parent_uid)
            .map(|children| {
                children
                    .iter()
                    .filter_map(|c| state.by_uid.get(c))
                    .filter(|n| n.name() == name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Nodes with no (known) parent in this store.
    pub async fn roots(&self) -> Vec<Node> {
        let state = self.state.lock().await;
        state
            .by_uid
            .values()
            .filter(|n| {
                n.parent_uids().is_empty()
                    || n.parent_uids().iter().all(|p| !state.by_uid.contains_key(p))
            })
            .cloned()
            .collect()
    }

    pub async fn node_count(&self) -> usize {
        self.state.lock().await.by_uid.len()
    }

    /// Recursive aggregates for the subtree under `uid`.
    pub async fn compute_dir_stats(&self, uid: Uid) -> Result<DirStats, TreeStoreError> {
        let subtree = self.subtree_bfs(uid).await;
        if subtree.is_empty() {
            return Err(TreeStoreError::NodeNotPresent(uid));
        }
        let mut stats = DirStats::default();
        for node in subtree.iter().skip(1) {
            let trashed = node.trashed().is_trashed();
            if node.is_dir() {
                stats.add_dir(trashed);
            } else {
                stats.add_file(0, trashed);
            }
        }
        Ok(stats)
    }

    /// Like `compute_dir_stats` but sizes files through the content-meta
    /// lookup the caller provides (the store itself does not hold triples).
    pub async fn compute_dir_stats_with_sizes<F>(
        &self,
        uid: Uid,
        size_of: F,
    ) -> Result<DirStats, TreeStoreError>
    where
        F: Fn(&Node) -> u64,
    {
        let subtree = self.subtree_bfs(uid).await;
        if subtree.is_empty() {
            return Err(TreeStoreError::NodeNotPresent(uid));
        }
        let mut stats = DirStats::default();
        for node in subtree.iter().skip(1) {
            let trashed = node.trashed().is_trashed();
            if node.is_dir() {
                stats.add_dir(trashed);
            } else {
                stats.add_file(size_of(node), trashed);
            }
        }
        Ok(stats)
    }
}

/// Apply the merge rules of `upsert` onto `incoming`, reading the stored
/// version. goog_id conflicts abort the merge.
fn merge_into(existing: &Node, incoming: &mut Node) -> Result<(), TreeStoreError> {
    let existing_goog = existing.goog_id().map(str::to_owned);
    let incoming_goog = incoming.goog_id().map(str::to_owned);
    match (existing_goog, incoming_goog) {
        (Some(old), Some(new)) if old != new => {
            return Err(TreeStoreError::GoogIdMismatch {
                uid: existing.uid(),
                existing: old,
                incoming: new,
            });
        }
        (Some(old), None) => incoming.set_goog_id(old),
        _ => {}
    }

    // Parent list: union, existing order first.
    let mut parents = existing.parent_uids().to_vec();
    for p in incoming.parent_uids() {
        if !parents.contains(p) {
            parents.push(*p);
        }
    }
    incoming.base_mut().parent_uids = parents;

    // all_children_fetched is monotone.
    if existing.all_children_fetched() && !incoming.all_children_fetched() {
        match incoming {
            Node::LocalDir(n) => n.all_children_fetched = true,
            Node::GDriveFolder(n) => n.all_children_fetched = true,
            _ => {}
        }
    }
    Ok(())
}

/// Rewrite `path_list` for `uid` and all its descendants, breadth-first.
/// Returns every UID whose paths were recomputed.
fn recompute_paths(state: &mut StoreState, uid: Uid) -> Vec<Uid> {
    let mut touched = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(uid);

    while let Some(current) = queue.pop_front() {
        let Some(node) = state.by_uid.get(&current) else {
            continue;
        };
        let name = node.name().to_string();
        let parent_uids = node.parent_uids().to_vec();

        if !parent_uids.is_empty() {
            let mut new_paths = Vec::new();
            for parent_uid in &parent_uids {
                if let Some(parent) = state.by_uid.get(parent_uid) {
                    for parent_path in parent.path_list() {
                        let sep = if parent_path.ends_with('/') { "" } else { "/" };
                        new_paths.push(format!("{}{}{}", parent_path, sep, name));
                    }
                }
            }
            if !new_paths.is_empty() {
                if let Some(node) = state.by_uid.get_mut(&current) {
                    node.base_mut().path_list = new_paths;
                }
            }
        }
        touched.push(current);

        if let Some(children) = state.parent_to_children.get(&current) {
            queue.extend(children.iter().copied());
        }
    }
    touched
}

async fn write_through_upsert(state: &StoreState, node: &Node) -> Result<(), DbErr> {
    if let Some(index) = covering_index(state, node.first_path()) {
        index.upsert_node(node).await?;
    } else if !state.indexes.is_empty() {
        warn!("No covering index for {}; skipping disk write", node);
    }
    Ok(())
}

async fn write_through_remove(state: &StoreState, node: &Node) -> Result<(), DbErr> {
    if let Some(index) = covering_index(state, node.first_path()) {
        index.remove_node(node).await?;
    }
    Ok(())
}

fn covering_index(state: &StoreState, path: &str) -> Option<Arc<SubtreeIndex>> {
    state
        .indexes
        .iter()
        .find(|(root, _)| crate::domain::identifier::path_is_in_subtree(path, root))
        .map(|(_, index)| index.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::{FileTimes, LocalDirNode, LocalFileNode};
    use crate::domain::NodeBase;

    fn store() -> TreeStore {
        TreeStore::new(DeviceUid(2), TreeType::LocalDisk, Arc::new(EventBus::default()))
    }

    fn dir(uid: u64, parent: Option<u64>, name: &str, path: &str) -> Node {
        let mut base = NodeBase::new(Uid(uid), DeviceUid(2), name, path);
        base.parent_uids = parent.map(|p| vec![Uid(p)]).unwrap_or_default();
        Node::LocalDir(LocalDirNode {
            base,
            sync_ts: 0,
            all_children_fetched: true,
            dir_stats: None,
        })
    }

    fn file(uid: u64, parent: u64, name: &str, path: &str) -> Node {
        let mut base = NodeBase::new(Uid(uid), DeviceUid(2), name, path);
        base.parent_uids = vec![Uid(parent)];
        Node::LocalFile(LocalFileNode {
            base,
            content_uid: Uid(900),
            times: FileTimes::default(),
        })
    }

    #[tokio::test]
    async fn upsert_then_lookup_and_children() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(file(11, 10, "a.jpg", "/art/a.jpg")).await.unwrap();
        store.upsert(file(12, 10, "b.jpg", "/art/b.jpg")).await.unwrap();

        assert_eq!(store.get(Uid(11)).await.unwrap().name(), "a.jpg");
        let children = store.children_of(Uid(10)).await;
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].uid(), Uid(11));
        assert_eq!(children[1].uid(), Uid(12));

        let parents = store.parents_of(Uid(11)).await;
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].uid(), Uid(10));
    }

    #[tokio::test]
    async fn upsert_emits_node_upserted_once() {
        let events = Arc::new(EventBus::default());
        let store = TreeStore::new(DeviceUid(2), TreeType::LocalDisk, events.clone());
        let mut rx = events.subscribe();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();

        match rx.try_recv().unwrap() {
            Event::NodeUpserted { sn } => assert_eq!(sn.node.uid(), Uid(10)),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn rename_rewrites_descendant_paths() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(dir(20, Some(10), "modern", "/art/modern")).await.unwrap();
        store
            .upsert(file(21, 20, "m1.jpg", "/art/modern/m1.jpg"))
            .await
            .unwrap();

        let mut renamed = dir(10, None, "artwork", "/artwork");
        renamed.base_mut().path_list = vec!["/artwork".to_string()];
        store.upsert(renamed).await.unwrap();

        assert_eq!(store.get(Uid(20)).await.unwrap().first_path(), "/artwork/modern");
        assert_eq!(
            store.get(Uid(21)).await.unwrap().first_path(),
            "/artwork/modern/m1.jpg"
        );
    }

    #[tokio::test]
    async fn merge_unions_parents_and_keeps_goog_id() {
        use crate::domain::node::GDriveFolderNode;
        let store = TreeStore::new(DeviceUid(3), TreeType::GDrive, Arc::new(EventBus::default()));

        let mut base = NodeBase::new(Uid(30), DeviceUid(3), "shared", "/drive/a/shared");
        base.parent_uids = vec![Uid(1)];
        store
            .upsert(Node::GDriveFolder(GDriveFolderNode {
                base,
                goog_id: Some("g1".into()),
                all_children_fetched: true,
                sync_ts: 0,
                dir_stats: None,
            }))
            .await
            .unwrap();

        let mut base = NodeBase::new(Uid(30), DeviceUid(3), "shared", "/drive/b/shared");
        base.parent_uids = vec![Uid(2)];
        let merged = store
            .upsert(Node::GDriveFolder(GDriveFolderNode {
                base,
                goog_id: None,
                all_children_fetched: false,
                sync_ts: 0,
                dir_stats: None,
            }))
            .await
            .unwrap();

        assert_eq!(merged.parent_uids(), &[Uid(1), Uid(2)]);
        assert_eq!(merged.goog_id(), Some("g1"));
        assert!(merged.all_children_fetched());
    }

    #[tokio::test]
    async fn merge_rejects_goog_id_conflict() {
        use crate::domain::node::GDriveFolderNode;
        let store = TreeStore::new(DeviceUid(3), TreeType::GDrive, Arc::new(EventBus::default()));

        let base = NodeBase::new(Uid(30), DeviceUid(3), "x", "/drive/x");
        store
            .upsert(Node::GDriveFolder(GDriveFolderNode {
                base: base.clone(),
                goog_id: Some("g1".into()),
                all_children_fetched: false,
                sync_ts: 0,
                dir_stats: None,
            }))
            .await
            .unwrap();

        let result = store
            .upsert(Node::GDriveFolder(GDriveFolderNode {
                base,
                goog_id: Some("g2".into()),
                all_children_fetched: false,
                sync_ts: 0,
                dir_stats: None,
            }))
            .await;
        assert!(matches!(result, Err(TreeStoreError::GoogIdMismatch { .. })));
    }

    #[tokio::test]
    async fn remove_dir_with_children_honors_flag() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(file(11, 10, "a.jpg", "/art/a.jpg")).await.unwrap();

        assert!(matches!(
            store.remove(Uid(10), true).await,
            Err(TreeStoreError::DirNotEmpty(_))
        ));

        store.remove(Uid(10), false).await.unwrap();
        assert!(store.get(Uid(10)).await.is_none());
        // The orphan stays, now a root.
        let orphan = store.get(Uid(11)).await.unwrap();
        assert!(orphan.parent_uids().is_empty());
    }

    #[tokio::test]
    async fn subtree_bfs_visits_root_first() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(dir(20, Some(10), "modern", "/art/modern")).await.unwrap();
        store
            .upsert(file(21, 20, "m1.jpg", "/art/modern/m1.jpg"))
            .await
            .unwrap();

        let bfs = store.subtree_bfs(Uid(10)).await;
        let uids: Vec<Uid> = bfs.iter().map(|n| n.uid()).collect();
        assert_eq!(uids, vec![Uid(10), Uid(20), Uid(21)]);
    }

    #[tokio::test]
    async fn name_lookup_returns_all_duplicates() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(file(11, 10, "dup", "/art/dup")).await.unwrap();
        store.upsert(file(12, 10, "dup", "/art/dup")).await.unwrap();
        assert_eq!(store.get_for_name_and_parent("dup", Uid(10)).await.len(), 2);
        assert!(store.get_for_name_and_parent("nope", Uid(10)).await.is_empty());
    }

    #[tokio::test]
    async fn dir_stats_counts_subtree() {
        let store = store();
        store.upsert(dir(10, None, "art", "/art")).await.unwrap();
        store.upsert(dir(20, Some(10), "modern", "/art/modern")).await.unwrap();
        store.upsert(file(21, 20, "a", "/art/modern/a")).await.unwrap();
        store.upsert(file(22, 20, "b", "/art/modern/b")).await.unwrap();

        let stats = store
            .compute_dir_stats_with_sizes(Uid(10), |_| 100)
            .await
            .unwrap();
        assert_eq!(stats.dir_count, 1);
        assert_eq!(stats.file_count, 2);
        assert_eq!(stats.size_bytes, 200);
    }
}
