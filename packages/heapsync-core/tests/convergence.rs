mod common;

use std::collections::BTreeSet;

use heapsync_core::{Heap, HeapBuilder, NodeId, NodeType, Result, Update};
use proptest::prelude::*;

fn assert_mirrored(source: &Heap, replica: &Heap) {
    assert_eq!(replica.pretty_print(), source.pretty_print());
    assert_eq!(replica.copy_updates(), source.copy_updates());
    assert_eq!(
        replica.live_ids().collect::<Vec<_>>(),
        source.live_ids().collect::<Vec<_>>()
    );
}

fn add_goal(heap: &mut Heap, goals: NodeId, scorer: &str, minutes: i64) -> Result<NodeId> {
    let goal = heap.list_mut(goals)?.push(NodeType::Object)?;
    let scorer_id = heap.map_mut(goal)?.ensure_field("scorer", NodeType::Scalar)?;
    heap.scalar_mut(scorer_id)?.set(scorer)?;
    let minutes_id = heap.map_mut(goal)?.ensure_field("minutes", NodeType::Scalar)?;
    heap.scalar_mut(minutes_id)?.set(minutes)?;
    Ok(goal)
}

#[test]
fn football_scores_replicate_step_by_step() {
    let src = HeapBuilder::new("src").build_shared().unwrap();
    let target = HeapBuilder::new("target")
        .source(&src, false)
        .build_shared()
        .unwrap();

    let root = src
        .borrow_mut()
        .update(|heap| heap.ensure_root(NodeType::Object))
        .unwrap();
    assert_mirrored(&src.borrow(), &target.borrow());

    let goals = src
        .borrow_mut()
        .update(|heap| {
            let away = heap.map_mut(root)?.ensure_field("away", NodeType::Scalar)?;
            heap.scalar_mut(away)?.set(0)?;
            let home = heap.map_mut(root)?.ensure_field("home", NodeType::Scalar)?;
            heap.scalar_mut(home)?.set(1)?;
            let goals = heap.map_mut(root)?.ensure_field("goals", NodeType::List)?;
            add_goal(heap, goals, "Rooney", 34)?;
            Ok(goals)
        })
        .unwrap();
    assert_mirrored(&src.borrow(), &target.borrow());
    assert_eq!(
        target.borrow().pretty_print(),
        concat!(
            "{\n  away: 0\n  goals: [{\n      minutes: 34\n",
            "      scorer: \"Rooney\"\n    }]\n  home: 1\n}",
        )
    );

    src.borrow_mut()
        .update(|heap| heap.list_mut(goals)?.clear(false))
        .unwrap();
    assert_mirrored(&src.borrow(), &target.borrow());
    assert_eq!(target.borrow().node(goals).unwrap().size(), 0);

    src.borrow_mut()
        .update(|heap| heap.map_mut(root)?.clear(false))
        .unwrap();
    assert_mirrored(&src.borrow(), &target.borrow());
    assert_eq!(target.borrow().pretty_print(), "{}");
    assert_eq!(target.borrow().len(), 1);
}

#[test]
fn clearing_a_list_emits_one_removal_with_the_whole_subtree() {
    let mut heap = Heap::new("src");
    let goals = heap
        .update(|heap| {
            let root = heap.ensure_root(NodeType::Object)?;
            let goals = heap.map_mut(root)?.ensure_field("goals", NodeType::List)?;
            add_goal(heap, goals, "Rooney", 34)?;
            Ok(goals)
        })
        .unwrap();

    heap.begin_update().unwrap();
    heap.list_mut(goals).unwrap().clear(false).unwrap();
    let block = heap.end_update().unwrap();

    let expected: BTreeSet<NodeId> = [NodeId(2), NodeId(3), NodeId(4)].into_iter().collect();
    assert_eq!(
        block.updates(),
        &[Update::RemoveChildren {
            id: goals,
            deallocated_ids: expected,
        }]
    );
}

#[test]
fn replicas_chain_through_intermediate_heaps() {
    let src = HeapBuilder::new("src").build_shared().unwrap();
    let middle = HeapBuilder::new("middle")
        .immutable()
        .source(&src, false)
        .build_shared()
        .unwrap();
    let leaf = HeapBuilder::new("leaf")
        .immutable()
        .source(&middle, false)
        .build_shared()
        .unwrap();

    src.borrow_mut()
        .update(|heap| {
            let root = heap.ensure_root(NodeType::Object)?;
            let goals = heap.map_mut(root)?.ensure_field("goals", NodeType::List)?;
            add_goal(heap, goals, "Best", 12)?;
            add_goal(heap, goals, "Law", 80)?;
            heap.list_mut(goals)?.remove_index(0)
        })
        .unwrap();

    assert_mirrored(&src.borrow(), &middle.borrow());
    assert_mirrored(&src.borrow(), &leaf.borrow());
}

#[test]
fn terminate_propagates_and_stays_in_snapshots() {
    let src = HeapBuilder::new("src").build_shared().unwrap();
    let target = HeapBuilder::new("target")
        .source(&src, false)
        .build_shared()
        .unwrap();
    src.borrow_mut()
        .update(|heap| {
            heap.ensure_root(NodeType::Map)?;
            heap.terminate_heap()
        })
        .unwrap();

    assert!(target.borrow().is_terminated());
    assert_eq!(
        src.borrow().copy_updates().last(),
        Some(&Update::TerminateHeap)
    );
    assert_mirrored(&src.borrow(), &target.borrow());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge_under_random_transactions(
        early in common::transactions(6, 12),
        late in common::transactions(6, 12),
    ) {
        let src = HeapBuilder::new("src").build_shared().unwrap();
        let live = HeapBuilder::new("live").immutable().source(&src, false).build_shared().unwrap();
        let chained = HeapBuilder::new("chained").source(&live, false).build_shared().unwrap();

        common::run_transactions(&mut src.borrow_mut(), &early).unwrap();
        prop_assert_eq!(common::fingerprint(&live.borrow()), common::fingerprint(&src.borrow()));

        let late_joiner = HeapBuilder::new("late").source(&src, true).build_shared().unwrap();
        common::run_transactions(&mut src.borrow_mut(), &late).unwrap();

        let expected = common::fingerprint(&src.borrow());
        prop_assert_eq!(common::fingerprint(&live.borrow()), expected.clone());
        prop_assert_eq!(common::fingerprint(&chained.borrow()), expected.clone());
        prop_assert_eq!(common::fingerprint(&late_joiner.borrow()), expected);
        prop_assert_eq!(late_joiner.borrow().len(), src.borrow().len());
    }
}
