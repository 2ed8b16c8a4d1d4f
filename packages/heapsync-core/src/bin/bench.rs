use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use heapsync_core::{HeapBuilder, HeapDiff, NodeType, UpdateBlock};

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    replicas: usize,
    diff_updates: usize,
    wire_bytes: usize,
}

fn main() -> heapsync_core::Result<()> {
    let mut count: u64 = 1_000;
    let mut replicas: usize = 2;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--replicas=") {
            replicas = val.parse().unwrap_or(replicas);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        }
    }

    let src = HeapBuilder::new("bench-src").build_shared()?;
    let mut upstream = src.clone();
    let mut chain = Vec::with_capacity(replicas);
    for i in 0..replicas {
        let replica = HeapBuilder::new(format!("bench-replica-{i}"))
            .immutable()
            .source(&upstream, false)
            .build_shared()?;
        upstream = replica.clone();
        chain.push(replica);
    }

    let start = Instant::now();
    let mut wire_bytes = 0;
    let list = src.borrow_mut().update(|heap| {
        let root = heap.ensure_root(NodeType::Object)?;
        heap.map_mut(root)?.ensure_field("items", NodeType::List)
    })?;
    for i in 0..count {
        let block = {
            let mut heap = src.borrow_mut();
            heap.begin_update()?;
            let item = heap.list_mut(list)?.insert_at(0, NodeType::Scalar)?;
            heap.scalar_mut(item)?.set(i as i64)?;
            heap.end_update()?
        };
        wire_bytes += block.to_json()?.len();
    }
    let clear: UpdateBlock = {
        let mut heap = src.borrow_mut();
        heap.begin_update()?;
        heap.list_mut(list)?.clear(false)?;
        heap.end_update()?
    };
    wire_bytes += clear.to_json()?.len();

    let empty = HeapBuilder::new("bench-empty").build()?;
    let diff_updates = HeapDiff::between(&src.borrow(), &empty)?.len();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let workload = format!("insert-front-clear-{count}");
    let output = Output {
        implementation: "heapsync-core",
        workload: workload.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name: workload,
        total_ops: count * 2 + 1,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            (count as f64 * 2.0 + 1.0) / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra {
            count,
            replicas: chain.len(),
            diff_updates,
            wire_bytes,
        },
        source_file: out_file.as_ref().map(|p| p.display().to_string()),
    };

    let json = serde_json::to_string_pretty(&output).expect("serialize");
    if let Some(path) = out_file {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdirs");
        }
        fs::write(&path, &json).expect("write output");
    }
    println!("{}", json);
    Ok(())
}
