//! Catalog of per-subtree caches
//!
//! One `PersistedCacheInfo` per cached subtree root, persisted in the
//! registry database and pruned/consolidated at startup. The registry only
//! answers "which cache covers this path"; actually loading tree contents is
//! the cache manager's job.

use crate::domain::identifier::path_is_in_subtree;
use crate::domain::{DeviceUid, Spid, TreeType, Uid};
use crate::infrastructure::database::entities::cache_entry;
use crate::infrastructure::database::Database;
use crate::store::{gdrive_index_file_name, local_index_file_name};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("No cache registered for subtree: {0}")]
    CacheNotFound(String),

    #[error("Cache registered but not loaded: {0}")]
    CacheNotLoaded(String),

    #[error("Node not present: device={device_uid} uid={node_uid}")]
    NodeNotPresent { device_uid: DeviceUid, node_uid: Uid },

    #[error("Timed out waiting for cache load: {0}")]
    TimedOut(String),

    #[error("Tree store error: {0}")]
    Store(#[from] crate::store::TreeStoreError),

    #[error(transparent)]
    Identity(#[from] crate::identity::IdentityError),

    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

/// One cached subtree. Load state is runtime-only; the rest round-trips
/// through the catalog table.
pub struct PersistedCacheInfo {
    pub cache_location: String,
    pub subtree_root: Spid,
    pub tree_type: TreeType,
    pub sync_ts: std::sync::atomic::AtomicI64,
    pub is_complete: AtomicBool,
    /// Set when the backing file was found stale or missing; a rescan is due.
    pub needs_refresh: AtomicBool,
    loaded_tx: watch::Sender<bool>,
}

impl PersistedCacheInfo {
    pub fn new(cache_location: String, subtree_root: Spid, tree_type: TreeType) -> Self {
        let (loaded_tx, _) = watch::channel(false);
        Self {
            cache_location,
            subtree_root,
            tree_type,
            sync_ts: std::sync::atomic::AtomicI64::new(0),
            is_complete: AtomicBool::new(false),
            needs_refresh: AtomicBool::new(false),
            loaded_tx,
        }
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded_tx.borrow()
    }

    pub fn mark_loaded(&self) {
        let _ = self.loaded_tx.send(true);
    }

    pub fn subscribe_loaded(&self) -> watch::Receiver<bool> {
        self.loaded_tx.subscribe()
    }
}

pub struct CacheRegistry {
    db: Arc<Database>,
    data_dir: PathBuf,
    state: RwLock<HashMap<DeviceUid, BTreeMap<String, Arc<PersistedCacheInfo>>>>,
}

impl CacheRegistry {
    pub fn new(db: Arc<Database>, data_dir: PathBuf) -> Self {
        Self {
            db,
            data_dir,
            state: RwLock::new(HashMap::new()),
        }
    }

    /// Read the catalog, drop entries whose cache file is missing, and
    /// consolidate overlapping local caches. Rewrites the catalog if anything
    /// was dropped.
    pub async fn load(
        &self,
        tree_type_for_device: &HashMap<DeviceUid, TreeType>,
    ) -> Result<(), CacheError> {
        self.db.ensure_table(cache_entry::Entity).await?;

        let rows = cache_entry::Entity::find().all(self.db.conn()).await?;
        let mut dropped_any = false;
        let mut state = self.state.write().await;

        for row in rows {
            let device_uid = DeviceUid(row.device_uid as u64);
            let cache_file = self.data_dir.join(&row.cache_location);
            if !cache_file.exists() {
                warn!(
                    "Dropping cache entry {:?}: file missing",
                    row.cache_location
                );
                dropped_any = true;
                continue;
            }
            let tree_type = tree_type_for_device
                .get(&device_uid)
                .copied()
                .unwrap_or(TreeType::LocalDisk);
            let info = Arc::new(PersistedCacheInfo::new(
                row.cache_location,
                Spid::new(device_uid, Uid(row.node_uid as u64), row.subtree_root_path),
                tree_type,
            ));
            info.sync_ts.store(row.sync_ts, Ordering::SeqCst);
            info.is_complete.store(row.is_complete, Ordering::SeqCst);
            state
                .entry(device_uid)
                .or_default()
                .insert(info.subtree_root.path.clone(), info);
        }

        // Consolidate: if one local cache's subtree is a prefix of another's,
        // only the newer of the pair survives and must be refreshed.
        for (_, by_path) in state.iter_mut() {
            let paths: Vec<String> = by_path.keys().cloned().collect();
            let mut to_drop = Vec::new();
            for a in &paths {
                for b in &paths {
                    if a != b && path_is_in_subtree(b, a) {
                        // a is an ancestor of b: one of them goes.
                        let newer_is_a = by_path[a].sync_ts.load(Ordering::SeqCst)
                            >= by_path[b].sync_ts.load(Ordering::SeqCst);
                        let (keep, drop) = if newer_is_a { (a, b) } else { (b, a) };
                        by_path[keep].needs_refresh.store(true, Ordering::SeqCst);
                        to_drop.push(drop.clone());
                    }
                }
            }
            for path in to_drop {
                if by_path.remove(&path).is_some() {
                    info!("Consolidated overlapping cache entry for {:?}", path);
                    dropped_any = true;
                }
            }
        }

        let count: usize = state.values().map(|m| m.len()).sum();
        info!("Cache registry loaded with {} entries", count);
        drop(state);

        if dropped_any {
            self.save_all_to_disk().await?;
        }
        Ok(())
    }

    /// Find or create the cache entry covering `spid`'s subtree.
    pub async fn cache_info_for_subtree(
        &self,
        spid: &Spid,
        tree_type: TreeType,
        create_if_missing: bool,
    ) -> Result<Arc<PersistedCacheInfo>, CacheError> {
        if let Some(existing) = self
            .existing_cache_for_path(spid.device_uid, &spid.path)
            .await
        {
            return Ok(existing);
        }
        if !create_if_missing {
            return Err(CacheError::CacheNotFound(spid.to_string()));
        }

        let cache_location = match tree_type {
            TreeType::GDrive => gdrive_index_file_name(spid.device_uid),
            _ => local_index_file_name(spid.device_uid, &spid.path),
        };
        let info = Arc::new(PersistedCacheInfo::new(
            cache_location.clone(),
            spid.clone(),
            tree_type,
        ));

        cache_entry::ActiveModel {
            cache_location: Set(cache_location),
            device_uid: Set(spid.device_uid.0 as i64),
            node_uid: Set(spid.node_uid.0 as i64),
            subtree_root_path: Set(spid.path.clone()),
            sync_ts: Set(0),
            is_complete: Set(false),
        }
        .insert(self.db.conn())
        .await?;

        self.state
            .write()
            .await
            .entry(spid.device_uid)
            .or_default()
            .insert(spid.path.clone(), info.clone());
        debug!("Created cache entry for {}", spid);
        Ok(info)
    }

    /// The most specific registered cache whose subtree contains `path`.
    pub async fn existing_cache_for_path(
        &self,
        device_uid: DeviceUid,
        path: &str,
    ) -> Option<Arc<PersistedCacheInfo>> {
        let state = self.state.read().await;
        let by_path = state.get(&device_uid)?;
        by_path
            .iter()
            .rev()
            .find(|(root, _)| path_is_in_subtree(path, root))
            .map(|(_, info)| info.clone())
    }

    pub async fn all_infos(&self) -> Vec<Arc<PersistedCacheInfo>> {
        self.state
            .read()
            .await
            .values()
            .flat_map(|m| m.values().cloned())
            .collect()
    }

    /// Overwrite the catalog with the current in-memory set.
    pub async fn save_all_to_disk(&self) -> Result<(), CacheError> {
        cache_entry::Entity::delete_many()
            .exec(self.db.conn())
            .await?;
        for info in self.all_infos().await {
            cache_entry::ActiveModel {
                cache_location: Set(info.cache_location.clone()),
                device_uid: Set(info.subtree_root.device_uid.0 as i64),
                node_uid: Set(info.subtree_root.node_uid.0 as i64),
                subtree_root_path: Set(info.subtree_root.path.clone()),
                sync_ts: Set(info.sync_ts.load(Ordering::SeqCst)),
                is_complete: Set(info.is_complete.load(Ordering::SeqCst)),
            }
            .insert(self.db.conn())
            .await?;
        }
        Ok(())
    }

    pub fn cache_file_path(&self, info: &PersistedCacheInfo) -> PathBuf {
        self.data_dir.join(&info.cache_location)
    }
}
