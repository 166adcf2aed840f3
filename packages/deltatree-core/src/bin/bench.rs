use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use deltatree_core::{
    Delta, LoadOutcome, NodeId, PushChannel, Result, SessionConfig, VersionedItem, WatchSession,
};

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    storage: &'static str,
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
    buffered: u64,
    replayed: usize,
}

struct NullChannel;

impl PushChannel for NullChannel {
    fn subscribe(&mut self, _topic_prefix: &str) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&mut self, _topic_prefix: &str) {}
}

fn main() {
    let mut count: u64 = 200;
    let mut out_file: Option<PathBuf> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            count = val.parse().unwrap_or(count);
        } else if let Some(val) = arg.strip_prefix("--out=") {
            out_file = Some(PathBuf::from(val));
        }
    }

    let root = NodeId(0);
    let mut session = WatchSession::new(SessionConfig::default(), NullChannel);

    let start = Instant::now();
    let ticket = session.start(Some(root)).expect("start watch");
    // Half the stream races the snapshot and is buffered, the other half arrives live.
    let buffered = count / 2;
    for n in 1..=buffered {
        session.on_delta(Delta::update(NodeId(n), 2).with_attribute("name", n.to_string()));
    }
    let snapshot: Vec<VersionedItem> = std::iter::once(VersionedItem::new(root, None, 1))
        .chain((1..=count).map(|n| VersionedItem::new(NodeId(n), Some(root), 1)))
        .collect();
    let outcome = session
        .complete_fetch(ticket, Ok(snapshot))
        .expect("load snapshot");
    for n in (buffered + 1)..=count {
        session.on_delta(Delta::move_to(NodeId(n), NodeId(n - buffered), 2));
    }
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    let replayed = match outcome {
        LoadOutcome::Loaded(summary) => summary.replayed,
        LoadOutcome::Discarded => 0,
    };
    let output = Output {
        implementation: "deltatree-core",
        storage: "memory",
        workload: format!("resync-live-{}", count),
        timestamp: chrono::Utc::now().to_rfc3339(),
        name: format!("resync-live-{}", count),
        total_ops: count * 2,
        duration_ms,
        ops_per_sec: if duration_ms > 0.0 {
            (count as f64 * 2.0) / duration_ms * 1000.0
        } else {
            f64::INFINITY
        },
        extra: Extra {
            count,
            buffered,
            replayed,
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
}
