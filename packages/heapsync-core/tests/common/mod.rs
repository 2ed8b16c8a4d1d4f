#![allow(dead_code)]

use heapsync_core::{Heap, NodeId, NodeType, Result, ScalarValue};
use proptest::prelude::*;

/// One randomly chosen local edit, interpreted against whatever node `pick` lands on.
#[derive(Clone, Debug)]
pub struct Edit {
    pub op: u8,
    pub pick: usize,
    pub arg: usize,
    pub value: i64,
}

pub fn edit() -> impl Strategy<Value = Edit> {
    (any::<u8>(), any::<usize>(), 0usize..8, -3i64..12).prop_map(|(op, pick, arg, value)| Edit {
        op,
        pick,
        arg,
        value,
    })
}

/// Up to `max_tx` transactions of up to `max_edits` edits each.
pub fn transactions(max_tx: usize, max_edits: usize) -> impl Strategy<Value = Vec<Vec<Edit>>> {
    prop::collection::vec(prop::collection::vec(edit(), 1..=max_edits), 1..=max_tx)
}

fn child_type(value: i64) -> NodeType {
    match value.rem_euclid(4) {
        0 => NodeType::List,
        1 => NodeType::Map,
        2 => NodeType::Object,
        _ => NodeType::Scalar,
    }
}

fn scalar(value: i64) -> ScalarValue {
    match value.rem_euclid(3) {
        0 => ScalarValue::Int(value),
        1 => ScalarValue::String(format!("s{value}")),
        _ => ScalarValue::Null,
    }
}

/// Apply `edit` to `heap`, which must have an open transaction and an OBJECT root.
pub fn apply_edit(heap: &mut Heap, edit: &Edit) -> Result<()> {
    let live: Vec<NodeId> = heap.live_ids().collect();
    let target = live[edit.pick % live.len()];
    match heap.node(target)?.node_type() {
        NodeType::Scalar => {
            heap.scalar_mut(target)?.set(scalar(edit.value))?;
        }
        NodeType::List => {
            let mut list = heap.list_mut(target)?;
            let size = list.size()?;
            match edit.op % 8 {
                0..=2 => {
                    list.insert_at(edit.arg % (size + 1), child_type(edit.value))?;
                }
                3 | 4 => {
                    list.push(child_type(edit.value))?;
                }
                5 | 6 if size > 0 => list.remove_index(edit.arg % size)?,
                7 => list.clear(false)?,
                _ => {}
            }
        }
        NodeType::Map | NodeType::Object => {
            let name = format!("f{}", edit.arg % 5);
            let mut map = heap.map_mut(target)?;
            match edit.op % 8 {
                0..=4 => {
                    map.ensure_field(&name, child_type(edit.value))?;
                }
                5 | 6 => {
                    map.remove_field(&name)?;
                }
                _ => map.clear(false)?,
            }
        }
    }
    Ok(())
}

/// Run each batch of edits as one transaction on `heap`.
pub fn run_transactions(heap: &mut Heap, txs: &[Vec<Edit>]) -> Result<()> {
    for tx in txs {
        heap.update(|heap| {
            heap.ensure_root(NodeType::Object)?;
            for edit in tx {
                apply_edit(heap, edit)?;
            }
            Ok(())
        })?;
    }
    Ok(())
}

/// Structural fingerprint: the delta stream that rebuilds the tree, ids included.
pub fn fingerprint(heap: &Heap) -> Vec<heapsync_core::Update> {
    heap.copy_updates()
}
