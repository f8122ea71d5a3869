use std::time::Duration;

use pretty_assertions::assert_eq;
use sessionwire_protocol::CancelAck;
use sessionwire_replay::snapshot::DEFAULT_MAX_EVENTS;
use sessionwire_replay::{DisabledReason, ReplayError, ReplayGate, ReplayManager, SnapshotDir};

use super::fixtures::{manager, tick_log, write_run};

fn ids(batch: &sessionwire_replay::NextBatch) -> Vec<&str> {
    batch
        .events
        .iter()
        .map(|e| e.sequence_id.as_str())
        .collect()
}

#[tokio::test]
async fn start_reports_counts_and_sources() {
    let dir = tempfile::tempdir().unwrap();
    let log = format!("{}garbage line\n", tick_log(5));
    write_run(dir.path(), "run-1", &log);
    let manager = manager(dir.path());

    let accepted = manager.start("run-1").await.unwrap();

    assert_eq!("run-1", accepted.run_id);
    assert_eq!(Some(5), accepted.total_events);
    assert_eq!(1, accepted.skipped_events);
    assert_eq!(2, accepted.source_refs.len());
    assert!(accepted.source_refs[0].ends_with("run-1.events.ndjson"));
}

#[tokio::test]
async fn start_rejects_duplicates_unknown_and_empty_runs() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "run-1", &tick_log(2));
    write_run(dir.path(), "blank", "\n\n");
    let manager = manager(dir.path());

    manager.start("run-1").await.unwrap();
    assert!(matches!(
        manager.start("run-1").await,
        Err(ReplayError::AlreadyExists(_))
    ));
    assert!(matches!(
        manager.start("missing").await,
        Err(ReplayError::NotFound(_))
    ));
    assert!(matches!(
        manager.start("blank").await,
        Err(ReplayError::EmptyLog(_))
    ));
    assert!(matches!(
        manager.start("../run-1").await,
        Err(ReplayError::InvalidRunId(_))
    ));
}

#[tokio::test]
async fn disabled_manager_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "run-1", &tick_log(2));
    let manager = ReplayManager::new(
        SnapshotDir::new(dir.path()),
        ReplayGate::Disabled(DisabledReason::Production),
    );

    assert!(matches!(
        manager.start("run-1").await,
        Err(ReplayError::Disabled)
    ));
}

#[tokio::test]
async fn batches_preserve_recorded_order() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let mut delivered = Vec::new();
    loop {
        let batch = manager.next("r", 2, None).await.unwrap();
        delivered.extend(ids(&batch).into_iter().map(str::to_string));
        if batch.completed {
            assert!(!batch.cancelled);
            break;
        }
    }

    assert_eq!(vec!["1", "2", "3", "4", "5"], delivered);
}

#[tokio::test]
async fn five_event_log_ending_in_done_completes_in_one_batch() {
    let dir = tempfile::tempdir().unwrap();
    let log = format!(
        "{}{}\n",
        tick_log(4),
        serde_json::json!({"sequenceId": "5", "kind": "done", "payload": {"ok": true}})
    );
    write_run(dir.path(), "happy", &log);
    let manager = manager(dir.path());
    manager.start("happy").await.unwrap();

    let batch = manager.next("happy", 5, None).await.unwrap();

    assert_eq!(vec!["1", "2", "3", "4", "5"], ids(&batch));
    assert_eq!("done", batch.events[4].kind);
    assert!(batch.completed);
    assert!(!batch.cancelled);
    assert!(!batch.truncated);
}

#[tokio::test]
async fn resume_applies_only_once() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let first = manager.next("r", 2, None).await.unwrap();
    assert_eq!(vec!["1", "2"], ids(&first));

    let resumed = manager.next("r", 2, Some("1")).await.unwrap();
    assert_eq!(vec!["2", "3"], ids(&resumed));

    let ignored = manager.next("r", 2, Some("1")).await.unwrap();
    assert_eq!(vec!["4", "5"], ids(&ignored));
    assert!(ignored.completed);

    let session = manager.session("r").await.unwrap();
    assert!(session.resumed_once);
    assert_eq!(5, session.cursor);
}

#[tokio::test]
async fn resume_from_unknown_id_restarts_from_the_top() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(3));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();
    manager.next("r", 3, None).await.unwrap();

    let batch = manager.next("r", 3, Some("nope")).await.unwrap();
    assert_eq!(vec!["1", "2", "3"], ids(&batch));
}

#[tokio::test]
async fn next_on_unknown_session_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());
    assert!(matches!(
        manager.next("ghost", 5, None).await,
        Err(ReplayError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn cancel_is_idempotent_and_stops_delivery() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();
    manager.next("r", 1, None).await.unwrap();

    let token = manager.cancellation("r").await.unwrap();
    assert_eq!(CancelAck::acknowledged(), manager.cancel("r").await);
    assert_eq!(CancelAck::acknowledged(), manager.cancel("r").await);
    assert_eq!(CancelAck::acknowledged(), manager.cancel("never-started").await);
    assert!(token.is_cancelled());

    let batch = manager.next("r", 5, None).await.unwrap();
    assert!(batch.cancelled);
    assert!(!batch.completed);
    assert!(batch.events.is_empty());
    assert_eq!(1, manager.session("r").await.unwrap().cursor);
}

#[tokio::test]
async fn report_is_read_from_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(1));
    let manager = manager(dir.path());

    let report = manager.report("r").await.unwrap();
    assert_eq!("ok", report["verdict"]);
    assert!(matches!(
        manager.report("other").await,
        Err(ReplayError::NotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn sweep_evicts_only_idle_terminal_sessions() {
    let dir = tempfile::tempdir().unwrap();
    for run in ["done", "cancelled", "active"] {
        write_run(dir.path(), run, &tick_log(3));
    }
    let manager = manager(dir.path());
    for run in ["done", "cancelled", "active"] {
        manager.start(run).await.unwrap();
    }
    manager.next("done", 10, None).await.unwrap();
    manager.cancel("cancelled").await;
    manager.next("active", 1, None).await.unwrap();

    assert_eq!(0, manager.sweep().await);

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(2, manager.sweep().await);

    assert!(!manager.contains("done").await);
    assert!(!manager.contains("cancelled").await);
    assert!(manager.contains("active").await);
}

#[tokio::test]
async fn oversized_log_is_capped_at_the_limit() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "big", &tick_log(DEFAULT_MAX_EVENTS + 25));
    let manager = manager(dir.path());

    let accepted = manager.start("big").await.unwrap();
    assert_eq!(Some(DEFAULT_MAX_EVENTS), accepted.total_events);

    let batch = manager.next("big", DEFAULT_MAX_EVENTS * 2, None).await.unwrap();
    assert!(batch.completed);
    assert!(batch.truncated);
    assert_eq!(DEFAULT_MAX_EVENTS, batch.events.len());
    let last = &batch.events[DEFAULT_MAX_EVENTS - 1];
    assert_eq!("error", last.kind);
    assert_eq!("LIMIT_EXCEEDED", last.payload["kind"]);
    assert_eq!(10_000, last.payload["max"]);
}
