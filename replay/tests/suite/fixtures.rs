use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sessionwire_replay::{ReplayGate, ReplayManager, SnapshotDir, StreamSettings};

/// NDJSON log of `count` events with ids `1..=count`.
pub fn tick_log(count: usize) -> String {
    (1..=count)
        .map(|i| {
            let line = json!({"sequenceId": i.to_string(), "kind": "tick", "payload": {"i": i}});
            format!("{line}\n")
        })
        .collect()
}

pub fn write_run(dir: &Path, run_id: &str, log: &str) {
    let snapshots = SnapshotDir::new(dir);
    std::fs::write(snapshots.events_path(run_id), log).unwrap();
    std::fs::write(
        snapshots.report_path(run_id),
        json!({"runId": run_id, "verdict": "ok"}).to_string(),
    )
    .unwrap();
}

pub fn manager(dir: &Path) -> Arc<ReplayManager> {
    Arc::new(ReplayManager::new(SnapshotDir::new(dir), ReplayGate::Enabled))
}

/// Unpaced streaming for tests that only care about content.
pub fn unpaced(batch_size: usize) -> StreamSettings {
    StreamSettings {
        batch_size,
        active_pause: Duration::ZERO,
        idle_pause: Duration::ZERO,
    }
}
