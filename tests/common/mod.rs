//! Shared test rig: the whole op pipeline wired over a temp directory, with
//! an in-memory Drive double standing in for the real client.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tandem_core::cache::{CacheManager, CacheRegistry};
use tandem_core::content::ContentMetaStore;
use tandem_core::device::{GDRIVE_DEVICE_UID, LOCAL_DISK_DEVICE_UID};
use tandem_core::domain::node::{FileTimes, LocalDirNode, LocalFileNode};
use tandem_core::domain::{
    Batch, DeviceUid, Node, NodeBase, SpidNodePair, TreeType, Uid, UidGenerator, UserOp,
};
use tandem_core::context::CoreContext;
use tandem_core::device::DeviceManager;
use tandem_core::identity::UidRegistry;
use tandem_core::infrastructure::actions::ActionManager;
use tandem_core::infrastructure::database::Database;
use tandem_core::infrastructure::events::EventBus;
use tandem_core::infrastructure::exec::{CentralExecutor, CommandExecutor};
use tandem_core::infrastructure::ops::{OpGraph, OpLedger};
use tandem_core::operations::transfer::TransferPlanner;
use tandem_core::services::{DriveClient, DriveError, DriveNodeMeta};
use tempfile::TempDir;

pub const LOCAL_DEVICE: DeviceUid = LOCAL_DISK_DEVICE_UID;
pub const GDRIVE_DEVICE: DeviceUid = GDRIVE_DEVICE_UID;

#[derive(Debug, Clone)]
pub struct MockDriveNode {
    pub name: String,
    pub parent: String,
    pub data: Vec<u8>,
    pub is_folder: bool,
}

#[derive(Default)]
struct MockDriveState {
    next_id: u64,
    nodes: HashMap<String, MockDriveNode>,
}

/// In-memory Drive double. Every mutation is recorded so tests can assert
/// the remote side without any HTTP.
#[derive(Default)]
pub struct MockDrive {
    state: Mutex<MockDriveState>,
}

impl MockDrive {
    pub fn node(&self, goog_id: &str) -> Option<MockDriveNode> {
        self.state.lock().unwrap().nodes.get(goog_id).cloned()
    }

    pub fn node_count(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn find_by_name(&self, name: &str) -> Option<(String, MockDriveNode)> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|(_, n)| n.name == name)
            .map(|(id, n)| (id.clone(), n.clone()))
    }

    fn alloc_id(state: &mut MockDriveState) -> String {
        state.next_id += 1;
        format!("goog{:06}", state.next_id)
    }
}

#[async_trait]
impl DriveClient for MockDrive {
    async fn create_folder(
        &self,
        name: &str,
        parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError> {
        let mut state = self.state.lock().unwrap();
        let goog_id = Self::alloc_id(&mut state);
        state.nodes.insert(
            goog_id.clone(),
            MockDriveNode {
                name: name.to_string(),
                parent: parent_goog_id.to_string(),
                data: Vec::new(),
                is_folder: true,
            },
        );
        Ok(DriveNodeMeta {
            goog_id,
            name: name.to_string(),
            size_bytes: None,
            md5: None,
            create_ts: 1,
            modify_ts: 1,
        })
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        name: &str,
        parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError> {
        let data = tokio::fs::read(local_path).await?;
        let mut state = self.state.lock().unwrap();
        let goog_id = Self::alloc_id(&mut state);
        let size = data.len() as u64;
        state.nodes.insert(
            goog_id.clone(),
            MockDriveNode {
                name: name.to_string(),
                parent: parent_goog_id.to_string(),
                data,
                is_folder: false,
            },
        );
        Ok(DriveNodeMeta {
            goog_id,
            name: name.to_string(),
            size_bytes: Some(size),
            md5: None,
            create_ts: 1,
            modify_ts: 1,
        })
    }

    async fn update_file_content(
        &self,
        goog_id: &str,
        local_path: &Path,
    ) -> Result<DriveNodeMeta, DriveError> {
        let data = tokio::fs::read(local_path).await?;
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(goog_id)
            .ok_or_else(|| DriveError::NotFound(goog_id.to_string()))?;
        node.data = data;
        let size = node.data.len() as u64;
        let name = node.name.clone();
        Ok(DriveNodeMeta {
            goog_id: goog_id.to_string(),
            name,
            size_bytes: Some(size),
            md5: None,
            create_ts: 1,
            modify_ts: 2,
        })
    }

    async fn download_file(&self, goog_id: &str, local_path: &Path) -> Result<(), DriveError> {
        let data = {
            let state = self.state.lock().unwrap();
            state
                .nodes
                .get(goog_id)
                .ok_or_else(|| DriveError::NotFound(goog_id.to_string()))?
                .data
                .clone()
        };
        tokio::fs::write(local_path, data).await?;
        Ok(())
    }

    async fn copy_file(
        &self,
        goog_id: &str,
        new_name: &str,
        dst_parent_goog_id: &str,
    ) -> Result<DriveNodeMeta, DriveError> {
        let mut state = self.state.lock().unwrap();
        let data = state
            .nodes
            .get(goog_id)
            .ok_or_else(|| DriveError::NotFound(goog_id.to_string()))?
            .data
            .clone();
        let new_id = Self::alloc_id(&mut state);
        let size = data.len() as u64;
        state.nodes.insert(
            new_id.clone(),
            MockDriveNode {
                name: new_name.to_string(),
                parent: dst_parent_goog_id.to_string(),
                data,
                is_folder: false,
            },
        );
        Ok(DriveNodeMeta {
            goog_id: new_id,
            name: new_name.to_string(),
            size_bytes: Some(size),
            md5: None,
            create_ts: 1,
            modify_ts: 1,
        })
    }

    async fn move_node(
        &self,
        goog_id: &str,
        _from_parent_goog_id: &str,
        to_parent_goog_id: &str,
        new_name: Option<&str>,
    ) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(goog_id)
            .ok_or_else(|| DriveError::NotFound(goog_id.to_string()))?;
        node.parent = to_parent_goog_id.to_string();
        if let Some(name) = new_name {
            node.name = name.to_string();
        }
        Ok(())
    }

    async fn trash_node(&self, goog_id: &str) -> Result<(), DriveError> {
        let mut state = self.state.lock().unwrap();
        state
            .nodes
            .remove(goog_id)
            .ok_or_else(|| DriveError::NotFound(goog_id.to_string()))?;
        Ok(())
    }
}

/// Everything wired, executor running.
pub struct Rig {
    pub events: Arc<EventBus>,
    pub uid_gen: Arc<UidGenerator>,
    pub uid_registry: Arc<UidRegistry>,
    pub content: Arc<ContentMetaStore>,
    pub cacheman: Arc<CacheManager>,
    pub planner: Arc<TransferPlanner>,
    pub graph: Arc<OpGraph>,
    pub ledger: Arc<OpLedger>,
    pub executor: Arc<CentralExecutor>,
    pub drive: Arc<MockDrive>,
    pub actions: Arc<ActionManager>,
    pub local_root: PathBuf,
}

impl Rig {
    pub async fn new(dir: &TempDir) -> Rig {
        Self::new_with_highlight(dir, false).await
    }

    pub async fn new_with_highlight(dir: &TempDir, highlight: bool) -> Rig {
        let data_dir = dir.path().to_path_buf();
        let events = Arc::new(EventBus::default());
        let registry_db = Arc::new(Database::open(&data_dir.join("registry.db")).await.unwrap());

        let uid_gen = Arc::new(UidGenerator::new(0));
        let uid_registry = Arc::new(UidRegistry::new(registry_db.clone(), uid_gen.clone()));
        uid_registry.load().await.unwrap();
        let content = Arc::new(ContentMetaStore::new(registry_db.clone(), uid_gen.clone()));
        content.load().await.unwrap();

        let cache_registry = CacheRegistry::new(registry_db.clone(), data_dir.clone());
        let cacheman = Arc::new(CacheManager::new(
            cache_registry,
            uid_registry.clone(),
            events.clone(),
            Duration::from_secs(5),
        ));
        cacheman
            .startup(&[
                (LOCAL_DEVICE, TreeType::LocalDisk),
                (GDRIVE_DEVICE, TreeType::GDrive),
            ])
            .await
            .unwrap();

        let ops_db = Arc::new(Database::open(&data_dir.join("ops.db")).await.unwrap());
        let ledger = Arc::new(OpLedger::new(ops_db));
        ledger.load().await.unwrap();
        let graph = Arc::new(OpGraph::new());

        let drive = Arc::new(MockDrive::default());
        let commands = Arc::new(CommandExecutor::new(cacheman.clone(), drive.clone()));
        let executor = Arc::new(CentralExecutor::new(
            1,
            2,
            Duration::from_secs(60),
            true,
            graph.clone(),
            ledger.clone(),
            commands,
            events.clone(),
        ));
        executor.start();

        let planner = Arc::new(TransferPlanner::new(
            cacheman.clone(),
            content.clone(),
            uid_gen.clone(),
            highlight,
        ));

        let devices = Arc::new(DeviceManager::new(registry_db.clone(), events.clone()));
        devices.load().await.unwrap();

        let context = Arc::new(CoreContext {
            events: events.clone(),
            devices,
            uid_registry: uid_registry.clone(),
            content: content.clone(),
            cacheman: cacheman.clone(),
            planner: planner.clone(),
            op_graph: graph.clone(),
            ledger: ledger.clone(),
            executor: executor.clone(),
        });
        let actions = Arc::new(ActionManager::new(context));

        let local_root = data_dir.join("localfs");
        std::fs::create_dir_all(&local_root).unwrap();

        Rig {
            events,
            uid_gen,
            uid_registry,
            content,
            cacheman,
            planner,
            graph,
            ledger,
            executor,
            drive,
            actions,
            local_root,
        }
    }

    pub fn local_path(&self, rel: &str) -> String {
        self.local_root
            .join(rel.trim_start_matches('/'))
            .to_string_lossy()
            .to_string()
    }

    /// Seed a local directory: on disk and in the cache.
    pub async fn add_local_dir(&self, parent_uid: Option<Uid>, rel: &str) -> SpidNodePair {
        let full_path = self.local_path(rel);
        tokio::fs::create_dir_all(&full_path).await.unwrap();

        let uid = self.uid_registry.uid_for_path(&full_path, None).await.unwrap();
        let mut base = NodeBase::new(
            uid,
            LOCAL_DEVICE,
            Path::new(&full_path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            full_path.clone(),
        );
        base.parent_uids = parent_uid.map(|p| vec![p]).unwrap_or_default();
        let node = Node::LocalDir(LocalDirNode {
            base,
            sync_ts: 1,
            all_children_fetched: true,
            dir_stats: None,
        });
        let store = self
            .cacheman
            .get_store_for_device_uid(LOCAL_DEVICE)
            .await
            .unwrap();
        let merged = store.upsert(node).await.unwrap();
        SpidNodePair::from_node(merged)
    }

    /// Seed a local file: on disk and in the cache, with interned content.
    pub async fn add_local_file(
        &self,
        parent_uid: Uid,
        rel: &str,
        contents: &[u8],
        md5: &str,
        modify_ts: i64,
    ) -> SpidNodePair {
        let full_path = self.local_path(rel);
        if let Some(parent) = Path::new(&full_path).parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&full_path, contents).await.unwrap();

        let uid = self.uid_registry.uid_for_path(&full_path, None).await.unwrap();
        let content_uid = self
            .content
            .get_or_create(contents.len() as u64, Some(md5.to_string()), None)
            .await
            .unwrap();

        let mut base = NodeBase::new(
            uid,
            LOCAL_DEVICE,
            Path::new(&full_path)
                .file_name()
                .unwrap()
                .to_string_lossy()
                .to_string(),
            full_path.clone(),
        );
        base.parent_uids = vec![parent_uid];
        let node = Node::LocalFile(LocalFileNode {
            base,
            content_uid,
            times: FileTimes {
                create_ts: modify_ts,
                modify_ts,
                change_ts: modify_ts,
                sync_ts: modify_ts,
            },
        });
        let store = self
            .cacheman
            .get_store_for_device_uid(LOCAL_DEVICE)
            .await
            .unwrap();
        let merged = store.upsert(node).await.unwrap();
        SpidNodePair::from_node(merged)
    }

    /// Persist and enqueue a planned batch, then wake the executor; the same
    /// path the action manager takes.
    pub async fn submit_batch(&self, batch: Batch) -> Vec<Arc<UserOp>> {
        let ops: Vec<Arc<UserOp>> = batch.op_list.into_iter().map(Arc::new).collect();
        self.ledger.insert_pending_batch(&ops).await.unwrap();
        let result = self.graph.enqueue_batch(&ops).await.unwrap();
        for discarded in &result.discarded {
            self.ledger
                .archive(discarded, tandem_core::domain::OpStatus::CompletedNoOp, None)
                .await
                .unwrap();
        }
        self.executor.notify();
        ops
    }

    /// Poll until `expected` ops have been archived, or panic after 10s.
    pub async fn wait_for_completed(&self, expected: u64) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        loop {
            let completed = self.ledger.completed_op_count().await.unwrap();
            if completed >= expected {
                return;
            }
            if std::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for {} completed ops (have {})",
                    expected, completed
                );
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
