//! Transfer planner scenarios: conflict policies, rename loops, and batch
//! validation against seeded caches.

mod common;

use common::{Rig, LOCAL_DEVICE};
use pretty_assertions::assert_eq;
use tandem_core::domain::node::LocalDirNode;
use tandem_core::domain::{
    DirConflictPolicy, DragOperation, FileConflictPolicy, Node, NodeBase, OpType, SpidNodePair,
};
use tandem_core::operations::transfer::PlanError;
use tempfile::TempDir;

async fn seed_two_roots(rig: &Rig) -> (SpidNodePair, SpidNodePair) {
    let left = rig.add_local_dir(None, "L").await;
    let right = rig.add_local_dir(None, "R").await;
    (left, right)
}

#[tokio::test]
async fn single_file_copy_plans_one_cp() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"x".repeat(100).as_slice(), "md5x", 900)
        .await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src.clone()],
            right.clone(),
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();

    assert_eq!(batch.op_list.len(), 1);
    let op = &batch.op_list[0];
    assert_eq!(op.op_type, OpType::Cp);
    assert_eq!(op.src.spid.node_uid, src.node.uid());

    let dst = op.dst.as_ref().unwrap();
    assert_eq!(dst.spid.path, rig.local_path("R/A.jpg"));
    assert!(!dst.node.is_live());
    assert_ne!(dst.node.uid(), src.node.uid());
    assert_eq!(dst.node.parent_uids(), &[right.node.uid()]);
    // Content identity travels with the planned destination.
    assert_eq!(dst.node.content_uid(), src.node.content_uid());
}

#[tokio::test]
async fn directory_tree_copy_emits_start_finish_pairs() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;

    let art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    let modern = rig.add_local_dir(Some(art.node.uid()), "L/Art/Modern").await;
    for (i, parent) in [(1i64, &art), (2, &art), (3, &art), (4, &modern), (5, &modern)] {
        let rel = if parent.node.uid() == art.node.uid() {
            format!("L/Art/f{}.jpg", i)
        } else {
            format!("L/Art/Modern/f{}.jpg", i)
        };
        rig.add_local_file(parent.node.uid(), &rel, b"data", &format!("md5-{}", i), 1000 + i)
            .await;
    }

    let batch = rig
        .planner
        .drag_and_drop(
            vec![art.clone()],
            right.clone(),
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();

    let count = |t: OpType| batch.op_list.iter().filter(|op| op.op_type == t).count();
    assert_eq!(count(OpType::StartDirCp), 2);
    assert_eq!(count(OpType::FinishDirCp), 2);
    assert_eq!(count(OpType::Cp), 5);
    assert_eq!(batch.op_list.len(), 9);

    // Destination paths are rebased under the drop target.
    let dst_paths: Vec<String> = batch
        .op_list
        .iter()
        .filter_map(|op| op.dst.as_ref().map(|d| d.spid.path.clone()))
        .collect();
    assert!(dst_paths.contains(&rig.local_path("R/Art")));
    assert!(dst_paths.contains(&rig.local_path("R/Art/Modern/f4.jpg")));
}

#[tokio::test]
async fn replace_if_older_and_different_skips_same_content() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"same", "md5x", 900)
        .await;
    // Destination already holds the same content, newer.
    rig.add_local_file(right.node.uid(), "R/A.jpg", b"same", "md5x", 1000)
        .await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceIfOlderAndDifferent,
            None,
        )
        .await
        .unwrap();

    assert!(batch.op_list.is_empty());
}

#[tokio::test]
async fn replace_always_emits_cp_onto_existing_node() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"new", "md5new", 2000)
        .await;
    let existing = rig
        .add_local_file(right.node.uid(), "R/A.jpg", b"old", "md5old", 1000)
        .await;

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

    assert_eq!(batch.op_list.len(), 1);
    let op = &batch.op_list[0];
    assert_eq!(op.op_type, OpType::CpOnto);
    assert_eq!(op.dst.as_ref().unwrap().node.uid(), existing.node.uid());
}

#[tokio::test]
async fn replace_policy_walks_trees_in_lockstep() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;

    // Source: Art { a.jpg (new content), new.txt }
    let src_art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    rig.add_local_file(src_art.node.uid(), "L/Art/a.jpg", b"fresh", "md5new", 2000)
        .await;
    rig.add_local_file(src_art.node.uid(), "L/Art/new.txt", b"n", "md5n", 2000)
        .await;

    // Destination: Art { a.jpg (old content), stale.txt }
    let dst_art = rig.add_local_dir(Some(right.node.uid()), "R/Art").await;
    let dst_a = rig
        .add_local_file(dst_art.node.uid(), "R/Art/a.jpg", b"old", "md5old", 1000)
        .await;
    let stale = rig
        .add_local_file(dst_art.node.uid(), "R/Art/stale.txt", b"s", "md5s", 1000)
        .await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src_art],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Replace,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();

    // Matched file replaces in place, the new file copies in, the unmatched
    // destination child is deleted. The matched directory itself survives.
    let count = |t: OpType| batch.op_list.iter().filter(|op| op.op_type == t).count();
    assert_eq!(count(OpType::CpOnto), 1);
    assert_eq!(count(OpType::Cp), 1);
    assert_eq!(count(OpType::Rm), 1);
    assert_eq!(count(OpType::StartDirCp), 0);
    assert_eq!(batch.op_list.len(), 3);

    let onto = batch.op_list.iter().find(|op| op.op_type == OpType::CpOnto).unwrap();
    assert_eq!(onto.dst.as_ref().unwrap().node.uid(), dst_a.node.uid());
    let rm = batch.op_list.iter().find(|op| op.op_type == OpType::Rm).unwrap();
    assert_eq!(rm.src.node.uid(), stale.node.uid());
}

#[tokio::test]
async fn merge_policy_keeps_unmatched_destination_children() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;

    let src_art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    rig.add_local_file(src_art.node.uid(), "L/Art/a.jpg", b"fresh", "md5new", 2000)
        .await;
    rig.add_local_file(src_art.node.uid(), "L/Art/new.txt", b"n", "md5n", 2000)
        .await;

    let dst_art = rig.add_local_dir(Some(right.node.uid()), "R/Art").await;
    rig.add_local_file(dst_art.node.uid(), "R/Art/a.jpg", b"old", "md5old", 1000)
        .await;
    rig.add_local_file(dst_art.node.uid(), "R/Art/stale.txt", b"s", "md5s", 1000)
        .await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src_art.clone()],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();

    // START/FINISH land on the existing destination directory; nothing is
    // deleted.
    let count = |t: OpType| batch.op_list.iter().filter(|op| op.op_type == t).count();
    assert_eq!(count(OpType::StartDirCp), 1);
    assert_eq!(count(OpType::FinishDirCp), 1);
    assert_eq!(count(OpType::CpOnto), 1);
    assert_eq!(count(OpType::Cp), 1);
    assert_eq!(count(OpType::Rm), 0);

    let start = batch
        .op_list
        .iter()
        .find(|op| op.op_type == OpType::StartDirCp)
        .unwrap();
    assert_eq!(start.src.node.uid(), src_art.node.uid());
    assert_eq!(start.dst.as_ref().unwrap().node.uid(), dst_art.node.uid());
}

#[tokio::test]
async fn ambiguous_merge_is_rejected() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;

    let src_modern = rig.add_local_dir(Some(left.node.uid()), "L/Modern").await;

    // Two distinct destination dirs sharing one name. The filesystem cannot
    // produce this, but GDrive can, and the cache model permits it.
    let store = rig.cacheman.get_store_for_device_uid(LOCAL_DEVICE).await.unwrap();
    for _ in 0..2 {
        let uid = rig.uid_gen.next_uid();
        let mut base = NodeBase::new(uid, LOCAL_DEVICE, "Modern", rig.local_path("R/Modern"));
        base.parent_uids = vec![right.node.uid()];
        store
            .upsert(Node::LocalDir(LocalDirNode {
                base,
                sync_ts: 1,
                all_children_fetched: true,
                dir_stats: None,
            }))
            .await
            .unwrap();
    }

    let result = rig
        .planner
        .drag_and_drop(
            vec![src_modern],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await;

    assert!(matches!(result, Err(PlanError::AmbiguousConflict { count: 2, .. })));
    // Nothing was persisted anywhere.
    assert_eq!(rig.ledger.pending_op_count().await.unwrap(), 0);
}

#[tokio::test]
async fn rename_always_finds_free_name() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"new", "md5new", 2000)
        .await;
    rig.add_local_file(right.node.uid(), "R/A.jpg", b"a", "m1", 1000).await;
    rig.add_local_file(right.node.uid(), "R/A.jpg 2", b"b", "m2", 1000).await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![src],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Merge,
            FileConflictPolicy::RenameAlways,
            None,
        )
        .await
        .unwrap();

    assert_eq!(batch.op_list.len(), 1);
    let dst = batch.op_list[0].dst.as_ref().unwrap();
    assert_eq!(dst.node.name(), "A.jpg 3");
    assert_eq!(dst.spid.path, rig.local_path("R/A.jpg 3"));
}

#[tokio::test]
async fn move_emits_mv_and_dir_mv_pairs() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    rig.add_local_file(art.node.uid(), "L/Art/a.jpg", b"a", "m1", 1000).await;

    let batch = rig
        .planner
        .drag_and_drop(
            vec![art],
            right,
            DragOperation::Move,
            DirConflictPolicy::Merge,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await
        .unwrap();

    let types: Vec<OpType> = batch.op_list.iter().map(|op| op.op_type).collect();
    assert_eq!(types, vec![OpType::StartDirMv, OpType::FinishDirMv, OpType::Mv]);
}

#[tokio::test]
async fn prompt_policies_are_not_implemented() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src_dir = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    rig.add_local_dir(Some(right.node.uid()), "R/Art").await;

    let result = rig
        .planner
        .drag_and_drop(
            vec![src_dir],
            right,
            DragOperation::Copy,
            DirConflictPolicy::Prompt,
            FileConflictPolicy::ReplaceAlways,
            None,
        )
        .await;
    assert!(matches!(result, Err(PlanError::NotImplemented(_))));
}

#[tokio::test]
async fn planning_twice_is_idempotent_modulo_uids() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new(&dir).await;
    let (left, right) = seed_two_roots(&rig).await;
    let art = rig.add_local_dir(Some(left.node.uid()), "L/Art").await;
    rig.add_local_file(art.node.uid(), "L/Art/a.jpg", b"a", "m1", 1000).await;
    rig.add_local_file(art.node.uid(), "L/Art/b.jpg", b"b", "m2", 1000).await;

    let plan = || async {
        rig.planner
            .drag_and_drop(
                vec![art.clone()],
                right.clone(),
                DragOperation::Copy,
                DirConflictPolicy::Merge,
                FileConflictPolicy::ReplaceAlways,
                None,
            )
            .await
            .unwrap()
    };
    let first = plan().await;
    let second = plan().await;

    let shape = |batch: &tandem_core::domain::Batch| -> Vec<(OpType, String, Option<String>)> {
        batch
            .op_list
            .iter()
            .map(|op| {
                (
                    op.op_type,
                    op.src.spid.path.clone(),
                    op.dst.as_ref().map(|d| d.spid.path.clone()),
                )
            })
            .collect()
    };
    assert_eq!(shape(&first), shape(&second));
}

#[tokio::test]
async fn dropped_nodes_are_hinted_for_ui_selection() {
    let dir = TempDir::new().unwrap();
    let rig = Rig::new_with_highlight(&dir, true).await;
    let (left, right) = seed_two_roots(&rig).await;
    let src = rig
        .add_local_file(left.node.uid(), "L/A.jpg", b"x", "m1", 1000)
        .await;

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

    assert_eq!(batch.to_select_in_ui.len(), 1);
    let dst = batch.op_list[0].dst.as_ref().unwrap();
    let parsed = batch.to_select_in_ui[0].parse().unwrap();
    assert_eq!(parsed, (LOCAL_DEVICE, dst.node.uid()));
}
