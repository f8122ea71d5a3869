use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use pretty_assertions::assert_eq;
use sessionwire_protocol::StreamFrame;
use sessionwire_replay::snapshot::DEFAULT_MAX_EVENTS;
use sessionwire_replay::{
    ReplayGate, ReplayManager, ReplaySession, ReplayStreamer, SnapshotDir, StreamSettings,
};
use sessionwire_utils_kv_store::{InMemoryStore, KeyValueStore};
use tokio::time::Instant;

use super::fixtures::{manager, tick_log, unpaced, write_run};

async fn collect(streamer: ReplayStreamer) -> Vec<StreamFrame> {
    streamer.into_stream().collect().await
}

#[tokio::test]
async fn happy_replay_ends_with_complete_marker() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let streamer = ReplayStreamer::open(Arc::clone(&manager), "r", unpaced(2), None).await;
    let frames = collect(streamer).await;

    let ids: Vec<_> = frames.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(vec!["1", "2", "3", "4", "5", "5"], ids);
    assert_eq!("complete", frames[5].event);
    assert!(frames[5].is_terminal());
    assert_eq!("{\"i\":3}", frames[2].data);
    assert!(manager.session("r").await.unwrap().is_completed());
}

#[tokio::test]
async fn stream_resumes_after_last_event_id() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let streamer =
        ReplayStreamer::open(Arc::clone(&manager), "r", unpaced(10), Some("3".to_string())).await;
    let frames = collect(streamer).await;

    let ids: Vec<_> = frames.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(vec!["4", "5", "5"], ids);
}

#[tokio::test(start_paused = true)]
async fn pacing_pauses_between_batches() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(5));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let settings = StreamSettings {
        batch_size: 2,
        ..StreamSettings::default()
    };
    let started = Instant::now();
    let frames = collect(ReplayStreamer::open(Arc::clone(&manager), "r", settings, None).await).await;

    assert_eq!(6, frames.len());
    // Three batches: two pauses of 100ms, none after the completing batch.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn cancellation_cuts_the_pause_short() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(4));
    let manager = manager(dir.path());
    manager.start("r").await.unwrap();

    let settings = StreamSettings {
        batch_size: 1,
        active_pause: Duration::from_secs(10),
        idle_pause: Duration::from_secs(10),
    };
    let mut streamer = ReplayStreamer::open(Arc::clone(&manager), "r", settings, None).await;
    let first = streamer.next_frame().await.unwrap();
    assert_eq!("1", first.id);

    manager.cancel("r").await;
    let started = Instant::now();
    let marker = streamer.next_frame().await.unwrap();

    assert_eq!(StreamFrame::new("1", "cancelled", "{}"), marker);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(None, streamer.next_frame().await);
}

#[tokio::test]
async fn evicted_session_reads_as_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "r", &tick_log(4));
    let store: Arc<InMemoryStore<ReplaySession>> = Arc::new(InMemoryStore::new());
    let manager = Arc::new(
        ReplayManager::new(SnapshotDir::new(dir.path()), ReplayGate::Enabled)
            .with_store(store.clone()),
    );
    manager.start("r").await.unwrap();

    let mut streamer = ReplayStreamer::open(Arc::clone(&manager), "r", unpaced(2), None).await;
    assert_eq!("1", streamer.next_frame().await.unwrap().id);

    assert!(store.delete("r").await);

    // Frames already fetched are still delivered.
    assert_eq!("2", streamer.next_frame().await.unwrap().id);
    let marker = streamer.next_frame().await.unwrap();
    assert_eq!("cancelled", marker.event);
    assert_eq!("2", marker.id);
    assert_eq!(None, streamer.next_frame().await);
}

#[tokio::test]
async fn hard_cap_error_is_the_last_delivered_frame() {
    let dir = tempfile::tempdir().unwrap();
    write_run(dir.path(), "big", &tick_log(DEFAULT_MAX_EVENTS + 1));
    let manager = manager(dir.path());
    manager.start("big").await.unwrap();

    let frames = collect(ReplayStreamer::open(Arc::clone(&manager), "big", unpaced(500), None).await).await;

    assert_eq!(DEFAULT_MAX_EVENTS, frames.len());
    let last = frames.last().unwrap();
    assert_eq!("error", last.event);
    assert_eq!("LIMIT_EXCEEDED", last.payload()["kind"]);
    assert!(frames[..DEFAULT_MAX_EVENTS - 1]
        .iter()
        .all(|frame| frame.event == "tick"));
}
