//! Ingestion watcher driving real pyramid builds.

use std::sync::Arc;
use std::time::Duration;

use slide_tiler::error::WatchError;
use slide_tiler::ingest::{ChannelEventSource, IngestEvent, NotifyEventSource, WatchSettings, Watcher};

use super::test_utils::*;

const SLIDE_COLOR: [u8; 3] = [120, 60, 200];
const SETTLE: Duration = Duration::from_millis(100);
const BUILD_TIMEOUT: Duration = Duration::from_secs(10);

fn watcher(ws: &Workspace) -> Watcher {
    let builder = builder(raster_library(), &ws.output, |c| c);
    Watcher::new(WatchSettings::new(&ws.slides), Arc::new(builder))
}

#[tokio::test]
async fn test_startup_scan_builds_pending_slides() {
    let ws = Workspace::new();
    ws.write_slide("a.pending", 300, 300, SLIDE_COLOR);
    ws.write_slide("b.pending", 600, 600, SLIDE_COLOR);
    ws.write_slide("done", 300, 300, SLIDE_COLOR);
    std::fs::create_dir(ws.slides.join("nested.pending")).unwrap();

    let watcher = watcher(&ws);
    assert_eq!(watcher.scan_once().await.unwrap(), 2);

    let stats = watcher.shutdown().await;
    assert_eq!(stats.built, 2);
    assert_eq!(stats.failed, 0);

    assert!(ws.slides.join("a").exists());
    assert!(ws.slides.join("b").exists());
    assert!(!ws.slides.join("a.pending").exists());
    assert!(ws.archive("a", 0).exists());
    assert!(ws.archive("b", 1).exists());
    assert!(!ws.archive("done", 0).exists());
}

#[tokio::test]
async fn test_scan_of_missing_directory_fails() {
    let ws = Workspace::new();
    let builder = builder(raster_library(), &ws.output, |c| c);
    let watcher = Watcher::new(
        WatchSettings::new(ws.slides.join("missing")),
        Arc::new(builder),
    );

    let result = watcher.scan_once().await;
    assert!(matches!(result, Err(WatchError::Scan { .. })));
    watcher.shutdown().await;
}

#[tokio::test]
async fn test_created_events_are_deduplicated() {
    let ws = Workspace::new();
    let watcher = watcher(&ws);
    let (tx, mut source) = ChannelEventSource::new();

    let driver = async {
        tokio::time::sleep(SETTLE).await;
        let path = ws.write_slide("a.pending", 300, 300, SLIDE_COLOR);
        tx.send(IngestEvent::Created(path.clone())).unwrap();
        tx.send(IngestEvent::Created(path)).unwrap();
        tx.send(IngestEvent::Created(ws.slides.join("notes.txt"))).unwrap();

        let done = ws.slides.join("a");
        assert!(wait_for(BUILD_TIMEOUT, || done.exists()).await);
        drop(tx);
    };

    let (result, ()) = tokio::join!(watcher.watch_forever(&mut source), driver);
    let err = result.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, WatchError::SubscriptionLost { .. }));

    let stats = watcher.shutdown().await;
    assert_eq!(stats.built, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_rescan_picks_up_missed_slides() {
    let ws = Workspace::new();
    let watcher = watcher(&ws);
    let (tx, mut source) = ChannelEventSource::new();

    let driver = async {
        tokio::time::sleep(SETTLE).await;
        ws.write_slide("missed.pending", 300, 300, SLIDE_COLOR);
        tx.send(IngestEvent::Rescan).unwrap();

        let done = ws.slides.join("missed");
        assert!(wait_for(BUILD_TIMEOUT, || done.exists()).await);
        drop(tx);
    };

    let (result, ()) = tokio::join!(watcher.watch_forever(&mut source), driver);
    assert!(result.is_err());

    let stats = watcher.shutdown().await;
    assert_eq!(stats.built, 1);
    assert!(ws.archive("missed", 0).exists());
}

#[tokio::test]
async fn test_corrupt_slide_does_not_stop_the_queue() {
    let ws = Workspace::new();
    let bad = ws.write_garbage("a-bad.pending");
    ws.write_slide("b-good.pending", 300, 300, SLIDE_COLOR);

    let watcher = watcher(&ws);
    assert_eq!(watcher.scan_once().await.unwrap(), 2);

    let stats = watcher.shutdown().await;
    assert_eq!(stats.built, 1);
    assert_eq!(stats.failed, 1);

    // Left pending for a later retry
    assert!(bad.exists());
    assert!(ws.slides.join("b-good").exists());
}

#[tokio::test]
async fn test_notify_source_end_to_end() {
    let ws = Workspace::new();
    let watcher = watcher(&ws);
    let mut source = NotifyEventSource::subscribe(&ws.slides).unwrap();

    let driver = async {
        tokio::time::sleep(SETTLE).await;
        // Uploads land under a temporary name and are renamed once complete
        let tmp = ws.write_slide("up.tmp", 300, 300, SLIDE_COLOR);
        std::fs::rename(&tmp, ws.slides.join("up.pending")).unwrap();

        let done = ws.slides.join("up");
        wait_for(BUILD_TIMEOUT, || done.exists()).await
    };

    tokio::select! {
        result = watcher.watch_forever(&mut source) => panic!("watcher stopped: {:?}", result),
        done = driver => assert!(done, "slide was never built"),
    }

    let stats = watcher.shutdown().await;
    assert_eq!(stats.built, 1);
    assert!(ws.archive("up", 0).exists());
}
