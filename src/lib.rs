//! tandem-core
//!
//! A bidirectional file-synchronization engine reconciling trees across a
//! local filesystem and Google Drive through a user-driven diff/merge
//! workflow. The UI sends gestures; the planner turns them into batches of
//! primitive ops; the op graph orders them; the central executor runs them
//! against the back-ends while the tree caches stay write-through
//! consistent.

pub mod cache;
pub mod config;
pub mod content;
pub mod context;
pub mod device;
pub mod domain;
pub mod identity;
pub mod infrastructure;
pub mod operations;
pub mod services;
pub mod store;

use crate::cache::{CacheManager, CacheRegistry};
use crate::config::AppConfig;
use crate::content::ContentMetaStore;
use crate::context::CoreContext;
use crate::device::DeviceManager;
use crate::domain::{UidGenerator, UserOp};
use crate::identity::UidRegistry;
use crate::infrastructure::actions::ActionManager;
use crate::infrastructure::database::Database;
use crate::infrastructure::events::{Event, EventBus};
use crate::infrastructure::exec::{CentralExecutor, CommandExecutor, ExecPriority, Task};
use crate::infrastructure::ops::{OpGraph, OpLedger};
use crate::operations::transfer::TransferPlanner;
use crate::services::DriveClient;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Install the global tracing subscriber. Safe to call more than once; only
/// the first installation wins.
pub fn init_logging(filter: &str) {
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

/// The assembled engine.
pub struct Core {
    pub config: Arc<RwLock<AppConfig>>,
    pub context: Arc<CoreContext>,
    pub actions: Arc<ActionManager>,
}

impl Core {
    /// Initialize with the default data directory.
    pub async fn new(drive: Arc<dyn DriveClient>) -> Result<Self> {
        let data_dir = config::default_data_dir()?;
        Self::new_with_config(data_dir, drive).await
    }

    /// Initialize the whole engine under `data_dir`.
    pub async fn new_with_config(data_dir: PathBuf, drive: Arc<dyn DriveClient>) -> Result<Self> {
        info!("Initializing tandem core at {:?}", data_dir);

        // 1. Load or create app config
        let config = AppConfig::load_or_create(&data_dir)?;
        init_logging(&config.log_filter);

        // 2. Create event bus
        let events = Arc::new(EventBus::default());

        // 3. Open the registry database and eagerly load the process-wide
        // identity state, in order: path map, goog-id map, content meta.
        let registry_db = Arc::new(Database::open(&config.registry_db_path()).await?);
        let uid_gen = Arc::new(UidGenerator::new(0));
        let uid_registry = Arc::new(UidRegistry::new(registry_db.clone(), uid_gen.clone()));
        uid_registry.load().await?;
        let content = Arc::new(ContentMetaStore::new(registry_db.clone(), uid_gen.clone()));
        content.load().await?;

        // 4. Device registry (ensures the singleton devices)
        let devices = Arc::new(DeviceManager::new(registry_db.clone(), events.clone()));
        devices.load().await?;

        // 5. Cache registry + one tree store per device
        let cache_registry = CacheRegistry::new(registry_db.clone(), data_dir.clone());
        let cacheman = Arc::new(CacheManager::new(
            cache_registry,
            uid_registry.clone(),
            events.clone(),
            Duration::from_secs(config.cache_load_timeout_sec),
        ));
        let device_list: Vec<_> = devices
            .list()
            .await
            .into_iter()
            .map(|d| (d.device_uid, d.tree_type))
            .collect();
        cacheman.startup(&device_list).await?;

        // 6. Op pipeline: ledger, graph, rehydration of pending ops
        let ops_db = Arc::new(Database::open(&config.ops_db_path()).await?);
        let ledger = Arc::new(OpLedger::new(ops_db));
        ledger.load().await?;
        let op_graph = Arc::new(OpGraph::new());
        rehydrate_pending_ops(&ledger, &op_graph, &events).await?;

        // 7. Executor
        let commands = Arc::new(CommandExecutor::new(cacheman.clone(), drive));
        let executor = Arc::new(CentralExecutor::new(
            config.max_concurrent_user_op_tasks,
            config.max_concurrent_non_user_op_tasks,
            Duration::from_secs(config.task_time_warning_threshold_sec),
            config.enable_op_execution,
            op_graph.clone(),
            ledger.clone(),
            commands,
            events.clone(),
        ));
        executor.start();

        // 8. Planner, shared context, gesture surface
        let planner = Arc::new(TransferPlanner::new(
            cacheman.clone(),
            content.clone(),
            uid_gen.clone(),
            config.highlight_dropped_nodes_after_drag,
        ));
        let context = Arc::new(CoreContext {
            events: events.clone(),
            devices,
            uid_registry,
            content,
            cacheman: cacheman.clone(),
            planner,
            op_graph,
            ledger,
            executor: executor.clone(),
        });
        let actions = Arc::new(ActionManager::new(context.clone()));

        // 9. Kick off background loads for every registered cache
        for info in cacheman.registry().all_infos().await {
            let cacheman = cacheman.clone();
            executor
                .submit(Task::new(
                    ExecPriority::P6BackgroundCacheLoad,
                    format!("load cache {}", info.cache_location),
                    move || {
                        Box::pin(async move {
                            cacheman.load_cache(&info).await?;
                            Ok(())
                        })
                    },
                ))
                .await;
        }

        info!("Core initialized");
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            context,
            actions,
        })
    }

    /// Shut down gracefully: stop scheduling, unblock op-graph waiters, and
    /// flush the cache catalog. In-flight commands run to completion.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down tandem core");
        self.context.executor.shutdown();
        self.context.op_graph.shutdown();
        if let Err(e) = self.context.cacheman.shutdown().await {
            warn!("Failed to flush cache catalog: {}", e);
        }
        self.config.read().await.save()?;
        info!("Shutdown complete");
        Ok(())
    }
}

/// Re-read pending ops from the ledger and rebuild the op graph, batch by
/// batch in op-UID order. A batch the graph now rejects is archived as
/// failed rather than aborting startup.
async fn rehydrate_pending_ops(
    ledger: &Arc<OpLedger>,
    op_graph: &Arc<OpGraph>,
    events: &Arc<EventBus>,
) -> Result<()> {
    let pending = ledger.get_all_pending_ops().await?;
    if pending.is_empty() {
        return Ok(());
    }
    info!("Rehydrating {} pending ops", pending.len());

    let mut batches: Vec<Vec<Arc<UserOp>>> = Vec::new();
    for op in pending {
        let op = Arc::new(op);
        match batches.last_mut() {
            Some(batch) if batch[0].batch_uid == op.batch_uid => batch.push(op),
            _ => batches.push(vec![op]),
        }
    }

    for batch in batches {
        let batch_uid = batch[0].batch_uid;
        match op_graph.enqueue_batch(&batch).await {
            Ok(result) => {
                if !result.discarded.is_empty() {
                    warn!(
                        "Rehydrated batch {}: {} ops discarded",
                        batch_uid,
                        result.discarded.len()
                    );
                    for op in &result.discarded {
                        ledger
                            .archive(op, crate::domain::OpStatus::CompletedNoOp, None)
                            .await?;
                    }
                }
            }
            Err(e) => {
                error!("Rehydrated batch {} rejected: {}", batch_uid, e);
                ledger.archive_failed_batch(&batch, &e.to_string()).await?;
                events.emit(Event::BatchFailed {
                    batch_uid,
                    msg: "Pending batch could not be restored".to_string(),
                    secondary_msg: e.to_string(),
                });
            }
        }
    }
    Ok(())
}
