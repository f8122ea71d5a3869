use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use sessionwire_protocol::{ErrorKind, RunRequest};
use sessionwire_quota::{QuotaGuard, QuotaLimits};
use sessionwire_replay::{AppState, ReplayGate, ReplayManager, SnapshotDir, StreamSettings};
use sessionwire_transport_client::{SubmitOptions, Target, TransportClient};
use tokio_util::sync::CancellationToken;

use super::client;

fn write_run(dir: &Path, run_id: &str, events: usize) {
    let snapshots = SnapshotDir::new(dir);
    let log: String = (1..=events)
        .map(|i| format!("{}\n", json!({"sequenceId": i.to_string(), "kind": "node", "payload": {"i": i}})))
        .collect();
    std::fs::write(snapshots.events_path(run_id), log).unwrap();
    std::fs::write(snapshots.report_path(run_id), r#"{"summary":"recorded"}"#).unwrap();
}

async fn replay_server(dir: &Path) -> (TransportClient, CancellationToken) {
    let manager = Arc::new(ReplayManager::new(SnapshotDir::new(dir), ReplayGate::Enabled));
    let quota = Arc::new(QuotaGuard::new(QuotaLimits {
        requests_per_minute: 60,
        daily_token_cap: 100_000,
    }));
    let state = AppState::new(manager, quota).with_stream_settings(StreamSettings {
        batch_size: 2,
        active_pause: Duration::from_millis(5),
        idle_pause: Duration::from_millis(5),
    });
    let app = sessionwire_replay::router(state, 64 * 1024);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    tokio::spawn(sessionwire_replay::serve(listener, app, shutdown.clone()));

    (client(&format!("http://{addr}"), Target::Replay), shutdown)
}

#[tokio::test]
async fn replayed_run_streams_like_a_live_one() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "golden", 5);
    let (client, shutdown) = replay_server(dir.path()).await;

    let accepted = client
        .run_sync(&RunRequest::replay("golden"), &SubmitOptions::default())
        .await
        .unwrap();
    assert_eq!(Some(5), accepted.total_events);

    let frames: Vec<_> = client
        .follow("golden", CancellationToken::new())
        .map(Result::unwrap)
        .collect()
        .await;
    let ids: Vec<_> = frames.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(vec!["1", "2", "3", "4", "5", "5"], ids);
    assert_eq!("complete", frames[5].event);
    assert_eq!(json!({"i": 2}), frames[1].payload());

    assert_eq!(
        json!({"summary": "recorded"}),
        client.fetch_report("golden").await.unwrap()
    );
    assert!(client.cancel("golden").await);

    shutdown.cancel();
}

#[tokio::test]
async fn duplicate_replay_start_is_bad_input() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "twice", 1);
    let (client, shutdown) = replay_server(dir.path()).await;

    client
        .run_sync(&RunRequest::replay("twice"), &SubmitOptions::default())
        .await
        .unwrap();
    let err = client
        .run_sync(&RunRequest::replay("twice"), &SubmitOptions::default())
        .await
        .unwrap_err();

    assert_eq!(ErrorKind::BadInput, err.kind);
    assert_eq!(Some("runId".to_string()), err.field);

    shutdown.cancel();
}

#[tokio::test]
async fn cancelled_replay_ends_with_cancelled_marker() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "stop", 3);
    let (client, shutdown) = replay_server(dir.path()).await;

    client
        .run_sync(&RunRequest::replay("stop"), &SubmitOptions::default())
        .await
        .unwrap();
    assert!(client.cancel("stop").await);

    let frames: Vec<_> = client
        .follow("stop", CancellationToken::new())
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(1, frames.len());
    assert_eq!("cancelled", frames[0].event);

    shutdown.cancel();
}
