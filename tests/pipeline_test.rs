//! End-to-end pipeline runs: plan -> persist -> enqueue -> execute, against
//! a real temp filesystem and the in-memory Drive double.

mod common;

use common::{Rig, GDRIVE_DEVICE};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::domain::node::GDriveFolderNode;
use tandem_core::domain::{
    DirConflictPolicy, DragOperation, FileConflictPolicy, Node, NodeBase, OpStatus, SpidNodePair,
    UserOp,
};
use tandem_core::infrastructure::events::Event;
use tempfile::TempDir;

#[tokio::test]
async fn single_file_copy_executes_end_to_end() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    let right = rig.add_local_dir(None, "R").await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"payload-bytes", "md5x", 900)
        .await;

    let mut events = rig.events.subscribe();

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();
    let batch_uid = batch.batch_uid;
    let ops = rig.submit_batch(batch).await;
    rig.wait_for_completed(1).await;

    // The file landed with identical content.
    let dst_path = rig.local_path("R/A.jpg");
    let copied = tokio::fs::read(&dst_path).await.unwrap();
    assert_eq!(copied, b"payload-bytes");

    // One COMPLETED_OK CP row in the ledger.
    let completed = rig.ledger.completed_ops_for_batch(batch_uid).await.unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, i32::from(OpStatus::CompletedOk));
    assert_eq!(rig.ledger.pending_op_count().await.unwrap(), 0);

    // The destination node went live in the cache and NODE_UPSERTED fired.
    let dst_uid = ops[0].dst.as_ref().unwrap().node.uid();
    let dst_node = rig
        .cacheman
        .get_node(ops[0].dst.as_ref().unwrap().spid.device_uid, dst_uid)
        .await
        .unwrap();
    assert!(dst_node.is_live());

    let mut upserted_count = 0;
    while let Ok(event) = events.try_recv() {
        if let Event::NodeUpserted { sn } = event {
            if sn.node.uid() == dst_uid {
                upserted_count += 1;
            }
        }
    }
    assert_eq!(upserted_count, 1);
}

#[tokio::test]
async fn directory_tree_copy_mirrors_subtree() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    let right = rig.add_local_dir(None, "R").await;
    let art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    let modern = rig.add_local_dir(Some(art.node.uid()), "L/Art/Modern").await;
    for i in 0..3 {
        rig.add_local_file(art.node.uid(), &format!("L/Art/a{}.dat", i), b"aaaa", &format!("a{}", i), 1)
            .await;
    }
    for i in 0..2 {
        rig.add_local_file(
            modern.node.uid(),
            &format!("L/Art/Modern/m{}.dat", i),
            b"mm",
            &format!("m{}", i),
            1,
        )
        .await;
    }

    let batch = rig
        .planner
        .drag_and_drop(
            vec![art],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();
    assert_eq!(batch.op_list.len(), 9);
    let ops = rig.submit_batch(batch).await;
    rig.wait_for_completed(9).await;

    for rel in [
        "R/Art/a0.dat",
        "R/Art/a1.dat",
        "R/Art/a2.dat",
        "R/Art/Modern/m0.dat",
        "R/Art/Modern/m1.dat",
    ] {
        assert!(
            tokio::fs::try_exists(rig.local_path(rel)).await.unwrap(),
            "missing {}",
            rel
        );
    }

    // Recursive stats on the new destination subtree: 5 files, 1 dir.
    let dst_art_uid = ops
        .iter()
        .find(|op| op.op_type.is_start_dir() && op.src.node.name() == "Art")
        .and_then(|op| op.dst.as_ref())
        .map(|d| d.node.uid())
        .unwrap();
    let store = rig
        .cacheman
        .get_store_for_device_uid(common::LOCAL_DEVICE)
        .await
        .unwrap();
    let stats = store.compute_dir_stats(dst_art_uid).await.unwrap();
    assert_eq!(stats.file_count, 5);
    assert_eq!(stats.dir_count, 1);
}

#[tokio::test]
async fn failed_command_blocks_batch_and_reports() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    let right = rig.add_local_dir(None, "R").await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"x", "md5x", 900)
        .await;

    // Sabotage: the backing file disappears between planning and execution.
    tokio::fs::remove_file(rig.local_path("L/A.jpg")).await.unwrap();

    let mut events = rig.events.subscribe();
    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();
    let batch_uid = batch.batch_uid;
    rig.submit_batch(batch).await;

    // BATCH_FAILED is emitted and the op stays pending, stopped on error.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut saw_batch_failed = false;
    while std::time::Instant::now() < deadline && !saw_batch_failed {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(Event::BatchFailed { batch_uid: b, .. })) if b == batch_uid => {
                saw_batch_failed = true;
            }
            _ => {}
        }
    }
    assert!(saw_batch_failed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.ledger.completed_op_count().await.unwrap(), 0);
    let pending = rig.ledger.get_all_pending_ops().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, OpStatus::StoppedOnError);
    assert!(!tokio::fs::try_exists(rig.local_path("R/A.jpg")).await.unwrap());
}

#[tokio::test]
async fn pending_ops_resume_after_restart() {
    let dir = TempDir::new().unwrap();
    let expected: Vec<(String, Vec<u8>)> = (0..4)
        .map(|i| (format!("R/f{}.dat", i), format!("data-{}", i).into_bytes()))
        .collect();

    // Session one: plan and persist, then "crash" before any execution.
    {
        let rig = Rig::new(&dir).await;
        let left = rig.add_local_dir(None, "L").await;
        let right = rig.add_local_dir(None, "R").await;
        for i in 0..4 {
            rig.add_local_file(
                left.node.uid(),
                &format!("L/f{}.dat", i),
                format!("data-{}", i).as_bytes(),
                &format!("md5-{}", i),
                1000,
            )
            .await;
        }
        let sources: Vec<SpidNodePair> = rig
            .cacheman
            .child_list(&left.spid)
            .await
            .unwrap()
            .into_iter()
            .filter(|sn| sn.node.is_file())
            .collect();
        let batch = rig
            .planner
            .drag_and_drop(
                sources,
                right,
                DragOperation::Copy,
                DirConflictPolicy::Merge,
                FileConflictPolicy::ReplaceAlways,
                None,
            )
            .await
            .unwrap();
        rig.ledger
            .insert_pending_batch(&batch.op_list.iter().cloned().map(Arc::new).collect::<Vec<_>>())
            .await
            .unwrap();
        rig.executor.shutdown();
    }

    // Session two: rehydrate from the ledger, re-seed the caches the way a
    // startup scan would, and resume.
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    rig.add_local_dir(None, "R").await;
    for i in 0..4 {
        rig.add_local_file(
            left.node.uid(),
            &format!("L/f{}.dat", i),
            format!("data-{}", i).as_bytes(),
            &format!("md5-{}", i),
            1000,
        )
        .await;
    }

    let pending: Vec<Arc<UserOp>> = rig
        .ledger
        .get_all_pending_ops()
        .await
        .unwrap()
        .into_iter()
        .map(Arc::new)
        .collect();
    assert_eq!(pending.len(), 4);
    rig.graph.enqueue_batch(&pending).await.unwrap();
    rig.executor.notify();
    rig.wait_for_completed(4).await;

    for (rel, data) in &expected {
        let copied = tokio::fs::read(rig.local_path(rel)).await.unwrap();
        assert_eq!(&copied, data);
    }
    assert_eq!(rig.ledger.pending_op_count().await.unwrap(), 0);
}

#[tokio::test]
async fn upload_to_gdrive_goes_through_drive_client() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"remote-bound", "md5x", 900)
        .await;

    // Seed a Drive folder that already has a remote identity.
    let store = rig.cacheman.get_store_for_device_uid(GDRIVE_DEVICE).await.unwrap();
    let folder_uid = rig.uid_gen.next_uid();
    let base = NodeBase::new(folder_uid, GDRIVE_DEVICE, "My Drive", "/gdrive/My Drive");
    let folder = store
        .upsert(Node::GDriveFolder(GDriveFolderNode {
            base,
            goog_id: Some("root001".to_string()),
            all_children_fetched: true,
            sync_ts: 1,
            dir_stats: None,
        }))
        .await
        .unwrap();

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            SpidNodePair::from_node(folder),
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();
    let ops = rig.submit_batch(batch).await;
    rig.wait_for_completed(1).await;

    let (goog_id, remote) = rig.drive.find_by_name("A.jpg").unwrap();
    assert_eq!(remote.data, b"remote-bound");
    assert_eq!(remote.parent, "root001");

    // The cached destination node got its remote identity.
    let dst_uid = ops[0].dst.as_ref().unwrap().node.uid();
    let dst_node = rig.cacheman.get_node(GDRIVE_DEVICE, dst_uid).await.unwrap();
    assert_eq!(dst_node.goog_id(), Some(goog_id.as_str()));
    assert!(dst_node.is_live());
}

#[tokio::test]
async fn mkdir_op_creates_the_directory_and_goes_live() {
    use tandem_core::domain::node::LocalDirNode;
    use tandem_core::domain::Batch;

    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let root = rig.add_local_dir(None, "R").await;

    let new_path = rig.local_path("R/NewFolder");
    let uid = rig.uid_registry.uid_for_path(&new_path, None).await.unwrap();
    let mut base = NodeBase::new(uid, common::LOCAL_DEVICE, "NewFolder", new_path.clone());
    base.parent_uids = vec![root.node.uid()];
    base.is_live = false;
    let node = Node::LocalDir(LocalDirNode {
        base,
        sync_ts: 0,
        all_children_fetched: true,
        dir_stats: None,
    });

    let batch_uid = rig.uid_gen.next_uid();
    let op = UserOp::new(
        rig.uid_gen.next_uid(),
        batch_uid,
        tandem_core::domain::OpType::Mkdir,
        SpidNodePair::from_node(node),
        None,
    );
    rig.submit_batch(Batch {
        batch_uid,
        op_list: vec![op],
        to_select_in_ui: Vec::new(),
        select_in_tree_id: None,
        select_ts: 0,
    })
    .await;
    rig.wait_for_completed(1).await;

    assert!(tokio::fs::try_exists(&new_path).await.unwrap());
    let cached = rig.cacheman.get_node(common::LOCAL_DEVICE, uid).await.unwrap();
    assert!(cached.is_live());
    assert!(cached.is_dir());
}

#[tokio::test]
async fn pause_holds_ops_until_resume() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let left = rig.add_local_dir(None, "L").await;
    let right = rig.add_local_dir(None, "R").await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"x", "md5x", 900)
        .await;

    let mut events = rig.events.subscribe();
    rig.executor.pause_op_execution();

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();
    rig.submit_batch(batch).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(rig.ledger.completed_op_count().await.unwrap(), 0);

    rig.executor.resume_op_execution();
    rig.wait_for_completed(1).await;
    assert!(tokio::fs::try_exists(rig.local_path("R/A.jpg")).await.unwrap());

    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::OpExecutionPlayStateChanged { is_enabled } = event {
            states.push(is_enabled);
        }
    }
    assert_eq!(states, vec![false, true]);
}
