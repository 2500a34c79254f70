//! Device manager

use super::{
    GDRIVE_DEVICE_UID, LOCAL_DISK_DEVICE_UID, SUPER_ROOT_DEVICE_UID, SUPER_ROOT_LONG_ID,
};
use crate::domain::{DeviceUid, TreeType};
use crate::infrastructure::database::entities::device;
use crate::infrastructure::database::Database;
use crate::infrastructure::events::{Event, EventBus};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Database error: {0}")]
    Db(#[from] sea_orm::DbErr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_uid: DeviceUid,
    pub long_device_id: String,
    pub tree_type: TreeType,
    pub friendly_name: String,
}

pub struct DeviceManager {
    db: Arc<Database>,
    events: Arc<EventBus>,
    devices: RwLock<Vec<DeviceInfo>>,
}

impl DeviceManager {
    pub fn new(db: Arc<Database>, events: Arc<EventBus>) -> Self {
        Self {
            db,
            events,
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Read the device table and make sure the three singleton devices exist.
    pub async fn load(&self) -> Result<(), DeviceError> {
        self.db.ensure_table(device::Entity).await?;

        let mut devices = Vec::new();
        for row in device::Entity::find().all(self.db.conn()).await? {
            devices.push(DeviceInfo {
                device_uid: DeviceUid(row.device_uid as u64),
                long_device_id: row.long_device_id,
                tree_type: TreeType::try_from(row.tree_type).unwrap_or(TreeType::LocalDisk),
                friendly_name: row.friendly_name,
            });
        }
        *self.devices.write().await = devices;

        self.ensure_device(
            SUPER_ROOT_DEVICE_UID,
            SUPER_ROOT_LONG_ID.to_string(),
            TreeType::Mixed,
            "Super Root",
        )
        .await?;
        self.ensure_device(
            LOCAL_DISK_DEVICE_UID,
            Uuid::new_v4().to_string(),
            TreeType::LocalDisk,
            "Local Disk",
        )
        .await?;
        self.ensure_device(
            GDRIVE_DEVICE_UID,
            Uuid::new_v4().to_string(),
            TreeType::GDrive,
            "Google Drive",
        )
        .await?;

        let count = self.devices.read().await.len();
        info!("Device manager loaded {} devices", count);
        Ok(())
    }

    async fn ensure_device(
        &self,
        device_uid: DeviceUid,
        long_device_id: String,
        tree_type: TreeType,
        friendly_name: &str,
    ) -> Result<(), DeviceError> {
        {
            let devices = self.devices.read().await;
            if devices.iter().any(|d| d.device_uid == device_uid) {
                return Ok(());
            }
        }

        let info = DeviceInfo {
            device_uid,
            long_device_id,
            tree_type,
            friendly_name: friendly_name.to_string(),
        };
        device::ActiveModel {
            device_uid: Set(device_uid.0 as i64),
            long_device_id: Set(info.long_device_id.clone()),
            tree_type: Set(i32::from(tree_type)),
            friendly_name: Set(info.friendly_name.clone()),
        }
        .insert(self.db.conn())
        .await?;

        self.devices.write().await.push(info.clone());
        self.events.emit(Event::DeviceUpserted {
            device_uid,
            friendly_name: info.friendly_name,
        });
        Ok(())
    }

    /// Register (or return) a device by its long id, e.g. a second GDrive
    /// account.
    pub async fn upsert_device(
        &self,
        long_device_id: &str,
        tree_type: TreeType,
        friendly_name: &str,
    ) -> Result<DeviceUid, DeviceError> {
        {
            let devices = self.devices.read().await;
            if let Some(existing) = devices.iter().find(|d| d.long_device_id == long_device_id) {
                return Ok(existing.device_uid);
            }
        }
        let next_uid = {
            let devices = self.devices.read().await;
            DeviceUid(devices.iter().map(|d| d.device_uid.0).max().unwrap_or(0) + 1)
        };
        self.ensure_device(next_uid, long_device_id.to_string(), tree_type, friendly_name)
            .await?;
        Ok(next_uid)
    }

    pub async fn list(&self) -> Vec<DeviceInfo> {
        self.devices.read().await.clone()
    }

    pub async fn tree_type_of(&self, device_uid: DeviceUid) -> Option<TreeType> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.device_uid == device_uid)
            .map(|d| d.tree_type)
    }
}
