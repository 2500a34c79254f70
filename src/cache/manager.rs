//! Cache manager
//!
//! The routing facade over the registry and the per-device tree stores.
//! Everything above this layer (planner, op graph, commands, actions)
//! addresses nodes through the manager rather than touching stores directly.

use super::registry::{CacheError, CacheRegistry, PersistedCacheInfo};
use crate::domain::{DeviceUid, Guid, Node, Spid, SpidNodePair, TreeType, Uid};
use crate::identity::UidRegistry;
use crate::infrastructure::events::{Event, EventBus};
use crate::store::{SubtreeIndex, TreeStore};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct CacheManager {
    registry: CacheRegistry,
    uid_registry: Arc<UidRegistry>,
    events: Arc<EventBus>,
    stores: RwLock<HashMap<DeviceUid, Arc<TreeStore>>>,
    load_timeout: Duration,
}

impl CacheManager {
    pub fn new(
        registry: CacheRegistry,
        uid_registry: Arc<UidRegistry>,
        events: Arc<EventBus>,
        load_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            uid_registry,
            events,
            stores: RwLock::new(HashMap::new()),
            load_timeout,
        }
    }

    /// Instantiate one tree store per known device and read the catalog.
    pub async fn startup(&self, devices: &[(DeviceUid, TreeType)]) -> Result<(), CacheError> {
        let mut stores = self.stores.write().await;
        let mut tree_types = HashMap::new();
        for (device_uid, tree_type) in devices {
            stores
                .entry(*device_uid)
                .or_insert_with(|| Arc::new(TreeStore::new(*device_uid, *tree_type, self.events.clone())));
            tree_types.insert(*device_uid, *tree_type);
        }
        drop(stores);

        self.registry.load(&tree_types).await?;
        info!("Cache manager started with {} device stores", devices.len());
        Ok(())
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub async fn get_store_for_device_uid(
        &self,
        device_uid: DeviceUid,
    ) -> Result<Arc<TreeStore>, CacheError> {
        self.stores
            .read()
            .await
            .get(&device_uid)
            .cloned()
            .ok_or_else(|| CacheError::CacheNotFound(format!("device {}", device_uid)))
    }

    /// Find or create the cache entry covering `spid`.
    pub async fn cache_info_for_subtree(
        &self,
        spid: &Spid,
        create_if_missing: bool,
    ) -> Result<Arc<PersistedCacheInfo>, CacheError> {
        let store = self.get_store_for_device_uid(spid.device_uid).await?;
        self.registry
            .cache_info_for_subtree(spid, store.tree_type(), create_if_missing)
            .await
    }

    /// Load one cache's tree contents into its store, opening the index file
    /// on demand. Idempotent; repeated calls are no-ops once loaded.
    pub async fn load_cache(&self, info: &Arc<PersistedCacheInfo>) -> Result<(), CacheError> {
        if info.is_loaded() {
            return Ok(());
        }
        let store = self
            .get_store_for_device_uid(info.subtree_root.device_uid)
            .await?;
        let index = SubtreeIndex::open(
            &self.registry.cache_file_path(info),
            info.subtree_root.device_uid,
            info.tree_type,
        )
        .await
        .map_err(crate::store::TreeStoreError::from)?;
        let count = store
            .attach_index(info.subtree_root.path.clone(), Arc::new(index))
            .await?;
        info.mark_loaded();
        debug!(
            "Loaded cache {} ({} nodes)",
            info.cache_location, count
        );
        Ok(())
    }

    /// Ensure the caches covering `nodes` are loaded, deduplicating by cache
    /// location. Nodes not covered by any registered cache are skipped (their
    /// state lives in memory only until a display tree registers them). Each
    /// required load runs as its own task.
    pub async fn ensure_caches_loaded_for_nodes(
        self: &Arc<Self>,
        nodes: &[SpidNodePair],
    ) -> Result<(), CacheError> {
        let mut seen = HashSet::new();
        let mut required = Vec::new();
        for sn in nodes {
            let info = match self.cache_info_for_subtree(&sn.spid, false).await {
                Ok(info) => info,
                Err(CacheError::CacheNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if seen.insert(info.cache_location.clone()) && !info.is_loaded() {
                required.push(info);
            }
        }

        let mut handles = Vec::new();
        for info in required {
            let manager = self.clone();
            handles.push(tokio::spawn(async move { manager.load_cache(&info).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|e| CacheError::CacheNotLoaded(e.to_string()))??;
        }
        Ok(())
    }

    /// Block until `info` reports loaded, up to the configured timeout.
    pub async fn wait_until_loaded(
        &self,
        info: &Arc<PersistedCacheInfo>,
    ) -> Result<(), CacheError> {
        if info.is_loaded() {
            return Ok(());
        }
        let mut rx = info.subscribe_loaded();
        let waited = tokio::time::timeout(self.load_timeout, async {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            return Err(CacheError::TimedOut(info.cache_location.clone()));
        }
        Ok(())
    }

    /// Mark the cache covering `spid` as due for rescan. The actual rescan is
    /// delivered later by an external producer via `apply_subtree_changes`.
    pub async fn refresh_subtree(&self, spid: &Spid) -> Result<(), CacheError> {
        let info = self.cache_info_for_subtree(spid, false).await?;
        info.needs_refresh.store(true, Ordering::SeqCst);
        info!("Subtree {} marked for refresh", spid);
        Ok(())
    }

    // ---- Node queries ----------------------------------------------------

    pub async fn get_node(&self, device_uid: DeviceUid, uid: Uid) -> Result<Node, CacheError> {
        self.get_node_opt(device_uid, uid)
            .await?
            .ok_or(CacheError::NodeNotPresent {
                device_uid,
                node_uid: uid,
            })
    }

    pub async fn get_node_opt(
        &self,
        device_uid: DeviceUid,
        uid: Uid,
    ) -> Result<Option<Node>, CacheError> {
        let store = self.get_store_for_device_uid(device_uid).await?;
        Ok(store.get(uid).await)
    }

    pub async fn node_for_guid(&self, guid: &Guid) -> Result<SpidNodePair, CacheError> {
        let (device_uid, node_uid) = guid.parse().ok_or_else(|| {
            CacheError::CacheNotFound(format!("unparseable GUID {}", guid))
        })?;
        let node = self.get_node(device_uid, node_uid).await?;
        Ok(SpidNodePair::from_node(node))
    }

    /// Children of `parent`, paired with paths derived from the parent spid.
    pub async fn child_list(&self, parent: &Spid) -> Result<Vec<SpidNodePair>, CacheError> {
        let store = self.get_store_for_device_uid(parent.device_uid).await?;
        let children = store.children_of(parent.node_uid).await;
        let mut result = Vec::with_capacity(children.len());
        for child in children {
            let path = join_path(&parent.path, child.name());
            result.push(SpidNodePair::new(
                Spid::new(parent.device_uid, child.uid(), path),
                child,
            ));
        }
        Ok(result)
    }

    /// The subtree under `root`, breadth-first, each node paired with its
    /// path inside `root`'s subtree.
    pub async fn subtree_bfs_sn(&self, root: &Spid) -> Result<Vec<SpidNodePair>, CacheError> {
        let store = self.get_store_for_device_uid(root.device_uid).await?;
        let nodes = store.subtree_bfs(root.node_uid).await;
        if nodes.is_empty() {
            return Err(CacheError::NodeNotPresent {
                device_uid: root.device_uid,
                node_uid: root.node_uid,
            });
        }
        let mut result = Vec::with_capacity(nodes.len());
        for node in nodes {
            let path = node
                .path_list()
                .iter()
                .find(|p| crate::domain::identifier::path_is_in_subtree(p, &root.path))
                .cloned()
                .unwrap_or_else(|| node.first_path().to_string());
            result.push(SpidNodePair::new(
                Spid::new(root.device_uid, node.uid(), path),
                node,
            ));
        }
        Ok(result)
    }

    /// Build a `Spid`, binding a path UID for local nodes.
    pub async fn make_spid(
        &self,
        device_uid: DeviceUid,
        node_uid: Uid,
        full_path: &str,
    ) -> Result<Spid, CacheError> {
        let store = self.get_store_for_device_uid(device_uid).await?;
        let mut spid = Spid::new(device_uid, node_uid, full_path);
        if store.tree_type() == TreeType::LocalDisk {
            let path_uid = self
                .uid_registry
                .uid_for_path(full_path, Some(node_uid))
                .await?;
            spid = spid.with_path_uid(path_uid);
        }
        Ok(spid)
    }

    /// Apply a scanner or change-log delivery to the owning store and emit
    /// one SUBTREE_NODES_CHANGED for the whole delivery.
    pub async fn apply_subtree_changes(
        &self,
        root_spid: &Spid,
        upserted: Vec<Node>,
        removed: Vec<Uid>,
    ) -> Result<(), CacheError> {
        let store = self.get_store_for_device_uid(root_spid.device_uid).await?;
        let mut upserted_sns = Vec::with_capacity(upserted.len());
        for node in upserted {
            let merged = store.upsert(node).await?;
            upserted_sns.push(SpidNodePair::from_node(merged));
        }
        let mut removed_sns = Vec::with_capacity(removed.len());
        for uid in removed {
            match store.remove(uid, false).await {
                Ok(node) => removed_sns.push(SpidNodePair::from_node(node)),
                Err(crate::store::TreeStoreError::NodeNotPresent(_)) => {
                    warn!("Delivery removed unknown node {}", uid);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Ok(info) = self.cache_info_for_subtree(root_spid, false).await {
            info.sync_ts
                .store(chrono::Utc::now().timestamp_millis(), Ordering::SeqCst);
            info.needs_refresh.store(false, Ordering::SeqCst);
        }

        self.events.emit(Event::SubtreeNodesChanged {
            root_spid: root_spid.clone(),
            upserted: upserted_sns,
            removed: removed_sns,
        });
        Ok(())
    }

    /// Total pending bookkeeping for shutdown: flush the catalog.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.registry.save_all_to_disk().await
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, name)
    } else {
        format!("{}/{}", parent, name)
    }
}
