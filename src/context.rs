//! Shared context handed to components that sit above the managers

use crate::cache::CacheManager;
use crate::content::ContentMetaStore;
use crate::device::DeviceManager;
use crate::identity::UidRegistry;
use crate::infrastructure::events::EventBus;
use crate::infrastructure::exec::CentralExecutor;
use crate::infrastructure::ops::{OpGraph, OpLedger};
use crate::operations::transfer::TransferPlanner;
use std::sync::Arc;

/// Bundle of the engine's long-lived managers.
pub struct CoreContext {
    pub events: Arc<EventBus>,
    pub devices: Arc<DeviceManager>,
    pub uid_registry: Arc<UidRegistry>,
    pub content: Arc<ContentMetaStore>,
    pub cacheman: Arc<CacheManager>,
    pub planner: Arc<TransferPlanner>,
    pub op_graph: Arc<OpGraph>,
    pub ledger: Arc<OpLedger>,
    pub executor: Arc<CentralExecutor>,
}
