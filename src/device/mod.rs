//! Device registry
//!
//! Every tree store belongs to a device row persisted in the registry
//! database. Three devices always exist: the synthetic super-root, this
//! machine's local disk, and the primary Google Drive account.

mod manager;

pub use manager::{DeviceInfo, DeviceManager};

use crate::domain::DeviceUid;

/// Synthetic device parenting all real device roots in mixed views.
pub const SUPER_ROOT_DEVICE_UID: DeviceUid = DeviceUid(1);
/// This machine's local disk.
pub const LOCAL_DISK_DEVICE_UID: DeviceUid = DeviceUid(2);
/// The primary Google Drive account.
pub const GDRIVE_DEVICE_UID: DeviceUid = DeviceUid(3);

pub const SUPER_ROOT_LONG_ID: &str = "super_root";
