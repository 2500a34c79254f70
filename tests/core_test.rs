//! Whole-engine wiring: startup, singleton devices, and shutdown.

mod common;

use common::MockDrive;
use std::sync::Arc;
use tandem_core::device::{GDRIVE_DEVICE_UID, LOCAL_DISK_DEVICE_UID, SUPER_ROOT_DEVICE_UID};
use tandem_core::domain::TreeType;
use tandem_core::infrastructure::exec::EngineSummaryState;
use tempfile::TempDir;

#[tokio::test]
async fn core_starts_with_singleton_devices_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let core = tandem_core::Core::new_with_config(
        dir.path().to_path_buf(),
        Arc::new(MockDrive::default()),
    )
    .await
    .unwrap();

    let devices = core.context.devices.list().await;
    let by_uid = |uid| devices.iter().find(|d| d.device_uid == uid).unwrap();
    assert_eq!(by_uid(SUPER_ROOT_DEVICE_UID).tree_type, TreeType::Mixed);
    assert_eq!(by_uid(LOCAL_DISK_DEVICE_UID).tree_type, TreeType::LocalDisk);
    assert_eq!(by_uid(GDRIVE_DEVICE_UID).tree_type, TreeType::GDrive);

    // Each singleton device has a tree store.
    for device in &devices {
        core.context
            .cacheman
            .get_store_for_device_uid(device.device_uid)
            .await
            .unwrap();
    }

    assert_eq!(
        core.context.executor.summary_state().await,
        EngineSummaryState::Green
    );
    assert!(core.context.executor.is_op_execution_enabled());

    core.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_start_reuses_persisted_devices() {
    let dir = TempDir::new().unwrap();
    let first_long_id = {
        let core = tandem_core::Core::new_with_config(
            dir.path().to_path_buf(),
            Arc::new(MockDrive::default()),
        )
        .await
        .unwrap();
        let id = core
            .context
            .devices
            .list()
            .await
            .iter()
            .find(|d| d.device_uid == LOCAL_DISK_DEVICE_UID)
            .unwrap()
            .long_device_id
            .clone();
        core.shutdown().await.unwrap();
        id
    };

    let core = tandem_core::Core::new_with_config(
        dir.path().to_path_buf(),
        Arc::new(MockDrive::default()),
    )
    .await
    .unwrap();
    let devices = core.context.devices.list().await;
    assert_eq!(devices.len(), 3);
    let local = devices
        .iter()
        .find(|d| d.device_uid == LOCAL_DISK_DEVICE_UID)
        .unwrap();
    assert_eq!(local.long_device_id, first_long_id);
    core.shutdown().await.unwrap();
}
