//! Replication and diff throughput.
//!
//! Run with: cargo bench -p heapsync-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use heapsync_core::{Heap, HeapBuilder, HeapDiff, NodeId, NodeType, Result};

fn fill_list(heap: &mut Heap, count: usize) -> Result<NodeId> {
    heap.update(|heap| {
        let root = heap.ensure_root(NodeType::Object)?;
        let list = heap.map_mut(root)?.ensure_field("items", NodeType::List)?;
        for i in 0..count {
            let item = heap.list_mut(list)?.push(NodeType::Scalar)?;
            heap.scalar_mut(item)?.set(i as i64)?;
        }
        Ok(list)
    })
}

fn bench_replication(c: &mut Criterion) {
    let mut group = c.benchmark_group("replication");
    for count in [100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("push_then_clear", count), &count, |b, &count| {
            b.iter(|| {
                let src = HeapBuilder::new("src").build_shared().unwrap();
                let replica = HeapBuilder::new("replica")
                    .immutable()
                    .source(&src, false)
                    .build_shared()
                    .unwrap();
                let list = fill_list(&mut src.borrow_mut(), count).unwrap();
                src.borrow_mut()
                    .update(|heap| heap.list_mut(list)?.clear(false))
                    .unwrap();
                black_box(replica.borrow().len())
            });
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff");
    for count in [100usize, 500, 2_000] {
        let mut from = Heap::new("from");
        let list = fill_list(&mut from, count).unwrap();
        let mut to = Heap::new("to");
        fill_list(&mut to, count).unwrap();
        to.update(|heap| {
            let mut items = heap.list_mut(list)?;
            for i in (0..count).step_by(7).rev() {
                items.remove_index(i)?;
            }
            for i in (0..count / 2).step_by(11) {
                items.insert_at(i, NodeType::Scalar)?;
            }
            Ok(())
        })
        .unwrap();

        group.bench_with_input(BenchmarkId::new("edited_list", count), &count, |b, _| {
            b.iter(|| black_box(HeapDiff::between(&to, &from).unwrap().len()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_replication, bench_diff);
criterion_main!(benches);
