//! The identifier layer
//!
//! Binds absolute paths and GDrive goog-ids to process-stable UIDs. Both maps
//! are loaded eagerly at startup so UID allocation never races with a scan,
//! and every new binding is persisted before it is handed out.

use crate::domain::{DeviceUid, Uid, UidGenerator};
use crate::infrastructure::database::entities::{uid_goog_id, uid_path};
use crate::infrastructure::database::Database;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identifier table is corrupt: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

#[derive(Default)]
struct IdentityMaps {
    path_to_uid: HashMap<String, Uid>,
    uid_to_path: HashMap<Uid, String>,
    goog_to_uid: HashMap<(DeviceUid, String), Uid>,
    uid_to_goog: HashMap<Uid, (DeviceUid, String)>,
}

impl IdentityMaps {
    fn uid_in_use(&self, uid: Uid) -> bool {
        self.uid_to_path.contains_key(&uid) || self.uid_to_goog.contains_key(&uid)
    }
}

/// Process-wide UID registry. Once a path has a UID it keeps it for the life
/// of the cache; a renamed node keeps its UID while the old path may later
/// bind a new node.
pub struct UidRegistry {
    db: Arc<Database>,
    generator: Arc<UidGenerator>,
    maps: RwLock<IdentityMaps>,
}

impl UidRegistry {
    pub fn new(db: Arc<Database>, generator: Arc<UidGenerator>) -> Self {
        Self {
            db,
            generator,
            maps: RwLock::new(IdentityMaps::default()),
        }
    }

    /// Eager startup load. A corrupt table aborts the process start.
    pub async fn load(&self) -> Result<(), IdentityError> {
        self.db.ensure_table(uid_path::Entity).await?;
        self.db.ensure_table(uid_goog_id::Entity).await?;

        let mut maps = self.maps.write().await;

        for row in uid_path::Entity::find().all(self.db.conn()).await? {
            let uid = Uid(row.uid as u64);
            if maps.uid_to_path.insert(uid, row.full_path.clone()).is_some() {
                return Err(IdentityError::Corrupt(format!(
                    "Duplicate UID in uid_path_map: {}",
                    uid
                )));
            }
            if maps.path_to_uid.insert(row.full_path, uid).is_some() {
                return Err(IdentityError::Corrupt(format!(
                    "Duplicate path bound to multiple UIDs (near UID {})",
                    uid
                )));
            }
            self.generator.ensure_next_uid_greater_than(uid.0);
        }

        for row in uid_goog_id::Entity::find().all(self.db.conn()).await? {
            let uid = Uid(row.uid as u64);
            let device_uid = DeviceUid(row.device_uid as u64);
            let key = (device_uid, row.goog_id.clone());
            if maps.goog_to_uid.insert(key, uid).is_some() {
                return Err(IdentityError::Corrupt(format!(
                    "Duplicate goog_id binding for device {}",
                    device_uid
                )));
            }
            maps.uid_to_goog.insert(uid, (device_uid, row.goog_id));
            self.generator.ensure_next_uid_greater_than(uid.0);
        }

        info!(
            "Loaded {} path bindings, {} goog-id bindings",
            maps.path_to_uid.len(),
            maps.goog_to_uid.len()
        );
        Ok(())
    }

    /// Return the UID bound to `full_path`, allocating and persisting a fresh
    /// binding on first sight. `suggestion` is honored only when the path is
    /// unseen and the suggested UID is not in use.
    pub async fn uid_for_path(
        &self,
        full_path: &str,
        suggestion: Option<Uid>,
    ) -> Result<Uid, IdentityError> {
        {
            let maps = self.maps.read().await;
            if let Some(uid) = maps.path_to_uid.get(full_path) {
                return Ok(*uid);
            }
        }

        let mut maps = self.maps.write().await;
        // Re-check under the write lock; another caller may have bound it.
        if let Some(uid) = maps.path_to_uid.get(full_path) {
            return Ok(*uid);
        }

        let uid = match suggestion {
            Some(s) if !s.is_null() && !maps.uid_in_use(s) => {
                self.generator.ensure_next_uid_greater_than(s.0);
                s
            }
            _ => self.generator.next_uid(),
        };

        uid_path::ActiveModel {
            uid: Set(uid.0 as i64),
            full_path: Set(full_path.to_string()),
        }
        .insert(self.db.conn())
        .await?;

        maps.path_to_uid.insert(full_path.to_string(), uid);
        maps.uid_to_path.insert(uid, full_path.to_string());
        debug!("Bound path {:?} to UID {}", full_path, uid);
        Ok(uid)
    }

    pub async fn path_for_uid(&self, uid: Uid) -> Option<String> {
        self.maps.read().await.uid_to_path.get(&uid).cloned()
    }

    /// Return the UID bound to `goog_id` within `device_uid`, allocating a
    /// fresh binding on first sight.
    pub async fn uid_for_goog_id(
        &self,
        device_uid: DeviceUid,
        goog_id: &str,
        suggestion: Option<Uid>,
    ) -> Result<Uid, IdentityError> {
        let key = (device_uid, goog_id.to_string());
        {
            let maps = self.maps.read().await;
            if let Some(uid) = maps.goog_to_uid.get(&key) {
                return Ok(*uid);
            }
        }

        let mut maps = self.maps.write().await;
        if let Some(uid) = maps.goog_to_uid.get(&key) {
            return Ok(*uid);
        }

        let uid = match suggestion {
            Some(s) if !s.is_null() && !maps.uid_in_use(s) => {
                self.generator.ensure_next_uid_greater_than(s.0);
                s
            }
            _ => self.generator.next_uid(),
        };

        uid_goog_id::ActiveModel {
            uid: Set(uid.0 as i64),
            device_uid: Set(device_uid.0 as i64),
            goog_id: Set(goog_id.to_string()),
        }
        .insert(self.db.conn())
        .await?;

        maps.goog_to_uid.insert(key.clone(), uid);
        maps.uid_to_goog.insert(uid, key);
        debug!("Bound goog_id {:?} to UID {} on device {}", goog_id, uid, device_uid);
        Ok(uid)
    }

    pub async fn goog_id_for_uid(&self, uid: Uid) -> Option<String> {
        self.maps
            .read()
            .await
            .uid_to_goog
            .get(&uid)
            .map(|(_, goog_id)| goog_id.clone())
    }
}
