//! Integration tests for the coordinator daemon.
//!
//! These drive a full engine (store, tiers, daemon) through its public
//! handle, with a fetcher that records calls and lets the test decide when
//! and how each fetch completes:
//! - deduplication of fetches across viewers
//! - cancellation when interest goes away
//! - retry backoff and abandonment (paused Tokio clock)
//! - startup scan of an existing disk cache
//!
//! Run with: `cargo test --test coordinator_integration`

use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use tilecache::cache::{CacheAreas, TierConfig, TileOrigin};
use tilecache::coordinator::{CoordinatorHandle, RetryPolicy, ViewerEvent, ViewerId};
use tilecache::fetcher::{FetchReporter, Fetcher};
use tilecache::{TileCacheApp, TileCacheConfig, TileFormat, TileId};

// ============================================================================
// Helper Functions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchCall {
    Request(TileId),
    Cancel(TileId),
}

/// Fetcher that forwards every call to the test.
struct ChannelFetcher {
    calls: mpsc::UnboundedSender<FetchCall>,
}

impl Fetcher for ChannelFetcher {
    fn request(&mut self, id: &TileId) {
        let _ = self.calls.send(FetchCall::Request(id.clone()));
    }

    fn cancel(&mut self, id: &TileId) {
        let _ = self.calls.send(FetchCall::Cancel(id.clone()));
    }
}

struct Harness {
    app: TileCacheApp,
    handle: CoordinatorHandle,
    reporter: FetchReporter,
    calls: mpsc::UnboundedReceiver<FetchCall>,
}

impl Harness {
    async fn start(config: TileCacheConfig) -> Self {
        let (tx, calls) = mpsc::unbounded_channel();
        let app = TileCacheApp::start(config, move |_reporter| Ok(ChannelFetcher { calls: tx }))
            .await
            .expect("engine should start");
        let handle = app.handle();
        let reporter = handle.reporter();
        Self {
            app,
            handle,
            reporter,
            calls,
        }
    }

    async fn viewer(&self) -> (ViewerId, mpsc::UnboundedReceiver<ViewerEvent>) {
        self.handle.register_viewer().await.unwrap()
    }

    async fn show(&self, viewer: ViewerId, tiles: &[&TileId]) -> Vec<TileId> {
        let tiles: HashSet<TileId> = tiles.iter().map(|id| (*id).clone()).collect();
        self.handle
            .set_visible_tiles(viewer, tiles)
            .await
            .unwrap()
            .into_iter()
            .map(|tile| tile.id)
            .collect()
    }

    /// Wait until every command posted so far has been applied.
    async fn settle(&self) {
        self.handle.stats().await.unwrap();
    }

    /// Calls already issued, without waiting.
    fn issued(&mut self) -> Vec<FetchCall> {
        let mut calls = Vec::new();
        while let Ok(call) = self.calls.try_recv() {
            calls.push(call);
        }
        calls
    }
}

fn test_config(root: &Path) -> TileCacheConfig {
    TileCacheConfig::new(root)
        .with_disk(TierConfig::new(4 * 1024 * 1024))
        .with_memory(TierConfig::new(4 * 1024 * 1024))
        .with_upload(TierConfig::new(4 * 1024 * 1024))
}

fn tile(x: i32) -> TileId {
    TileId::new("osm", 1, 10, x, 7)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn requests(calls: &[FetchCall]) -> Vec<TileId> {
    let mut ids: Vec<TileId> = calls
        .iter()
        .filter_map(|call| match call {
            FetchCall::Request(id) => Some(id.clone()),
            FetchCall::Cancel(_) => None,
        })
        .collect();
    ids.sort();
    ids
}

// ============================================================================
// Integration Tests
// ============================================================================

/// Two viewers with overlapping sets trigger one fetch per distinct tile.
#[tokio::test]
async fn test_overlapping_viewers_share_fetches() {
    let temp = tempfile::tempdir().unwrap();
    let mut harness = Harness::start(test_config(temp.path())).await;
    let (t1, t2, t3) = (tile(1), tile(2), tile(3));

    let (a, _events_a) = harness.viewer().await;
    let (b, _events_b) = harness.viewer().await;
    assert!(harness.show(a, &[&t1, &t2]).await.is_empty());
    assert!(harness.show(b, &[&t2, &t3]).await.is_empty());

    let calls = harness.issued();
    assert_eq!(requests(&calls), vec![t1, t2, t3]);
    assert_eq!(calls.len(), 3);

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.pending_fetches, 3);
    assert_eq!(stats.coordinator.requests, 3);

    harness.app.shutdown().await;
}

/// Dropping a tile cancels its fetch only once nobody else wants it.
#[tokio::test]
async fn test_cancel_only_unwanted_tiles() {
    let temp = tempfile::tempdir().unwrap();
    let mut harness = Harness::start(test_config(temp.path())).await;
    let (t1, t2, t3) = (tile(1), tile(2), tile(3));

    let (a, _events_a) = harness.viewer().await;
    let (b, _events_b) = harness.viewer().await;
    harness.show(a, &[&t1, &t2]).await;
    harness.show(b, &[&t2, &t3]).await;
    harness.issued();

    harness.show(a, &[]).await;
    assert_eq!(harness.issued(), vec![FetchCall::Cancel(t1.clone())]);

    // The late completion for T1 is still cached, but nobody is told.
    harness.reporter.fetched(t1.clone(), png(2, 2), TileFormat::png());
    harness.settle().await;
    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.coordinator.late_completions, 1);
    assert_eq!(stats.cache.memory.entry_count, 1);

    // Removing B cancels what it alone was waiting for.
    harness.handle.remove_viewer(b).unwrap();
    harness.settle().await;
    let mut cancelled = harness.issued();
    cancelled.sort_by_key(|call| format!("{call:?}"));
    assert_eq!(
        cancelled,
        vec![FetchCall::Cancel(t2.clone()), FetchCall::Cancel(t3.clone())]
    );

    harness.app.shutdown().await;
}

/// Completions reach every interested viewer and land in every tier.
#[tokio::test]
async fn test_completion_notifies_all_interested_viewers() {
    let temp = tempfile::tempdir().unwrap();
    let mut harness = Harness::start(test_config(temp.path())).await;
    let t2 = tile(2);

    let (a, mut events_a) = harness.viewer().await;
    let (b, mut events_b) = harness.viewer().await;
    harness.show(a, &[&t2]).await;
    harness.show(b, &[&t2]).await;
    assert_eq!(requests(&harness.issued()), vec![t2.clone()]);

    harness.reporter.fetched(t2.clone(), png(4, 4), TileFormat::png());

    for events in [&mut events_a, &mut events_b] {
        match events.recv().await.unwrap() {
            ViewerEvent::TileReady(ready) => {
                assert_eq!(ready.id, t2);
                assert_eq!(ready.origin, TileOrigin::Network);
                assert_eq!((ready.image.width(), ready.image.height()), (4, 4));
                assert!(ready.upload.is_some());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert!(temp.path().join("osm-1-10-2-7.png").exists());
    assert_eq!(harness.app.handoff().len(), 1);

    // A third viewer gets it straight from the cache.
    let (c, _events_c) = harness.viewer().await;
    assert_eq!(harness.show(c, &[&t2]).await, vec![t2.clone()]);
    assert!(harness.issued().is_empty());

    harness.app.shutdown().await;
}

/// Five failures abandon the tile; asking again starts from scratch.
#[tokio::test(start_paused = true)]
async fn test_retry_backoff_then_abandon() {
    let temp = tempfile::tempdir().unwrap();
    let config = test_config(temp.path()).with_retry(RetryPolicy::default());
    let mut harness = Harness::start(config).await;
    let t4 = tile(4);

    let (a, mut events_a) = harness.viewer().await;
    let (b, mut events_b) = harness.viewer().await;
    harness.show(a, &[&t4]).await;
    harness.show(b, &[&t4]).await;
    assert_eq!(harness.issued(), vec![FetchCall::Request(t4.clone())]);

    // Waits after failures 1..=4 are 1s, 2s, 4s and 8s.
    for expected_secs in [1, 2, 4, 8] {
        let failed_at = Instant::now();
        harness.reporter.failed(t4.clone(), "connection reset");
        let call = harness.calls.recv().await.unwrap();
        assert_eq!(call, FetchCall::Request(t4.clone()));
        assert_eq!(failed_at.elapsed(), Duration::from_secs(expected_secs));
    }

    harness.reporter.failed(t4.clone(), "connection reset");
    for events in [&mut events_a, &mut events_b] {
        match events.recv().await.unwrap() {
            ViewerEvent::TileFailed { id, message } => {
                assert_eq!(id, t4);
                assert_eq!(message, "connection reset");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.coordinator.requests, 5);
    assert_eq!(stats.coordinator.retries, 4);
    assert_eq!(stats.coordinator.abandoned, 1);
    assert_eq!(stats.pending_fetches, 0);

    // Nothing more is attempted on its own.
    let idle = tokio::time::timeout(Duration::from_secs(60), harness.calls.recv()).await;
    assert!(idle.is_err());

    // Asking again issues a fresh fetch whose first retry is back to 1s.
    harness.show(a, &[&t4]).await;
    assert_eq!(harness.issued(), vec![FetchCall::Request(t4.clone())]);
    let failed_at = Instant::now();
    harness.reporter.failed(t4.clone(), "connection reset");
    assert_eq!(
        harness.calls.recv().await.unwrap(),
        FetchCall::Request(t4.clone())
    );
    assert_eq!(failed_at.elapsed(), Duration::from_secs(1));

    harness.app.shutdown().await;
}

/// Losing interest during a backoff wait cancels the retry.
#[tokio::test(start_paused = true)]
async fn test_losing_interest_cancels_retry() {
    let temp = tempfile::tempdir().unwrap();
    let mut harness = Harness::start(test_config(temp.path())).await;
    let t5 = tile(5);

    let (a, _events) = harness.viewer().await;
    harness.show(a, &[&t5]).await;
    harness.issued();

    harness.reporter.failed(t5.clone(), "timeout");
    harness.settle().await;
    harness.show(a, &[]).await;

    // No cancel goes to the fetcher (nothing is in flight) and no retry fires.
    let idle = tokio::time::timeout(Duration::from_secs(30), harness.calls.recv()).await;
    assert!(idle.is_err());

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.pending_fetches, 0);
    assert_eq!(stats.coordinator.retries, 0);
    assert_eq!(stats.coordinator.cancellations, 1);

    harness.app.shutdown().await;
}

/// A payload that does not decode counts as a failed attempt.
#[tokio::test(start_paused = true)]
async fn test_corrupt_payload_is_retried() {
    let temp = tempfile::tempdir().unwrap();
    let mut harness = Harness::start(test_config(temp.path())).await;
    let t6 = tile(6);

    let (a, mut events) = harness.viewer().await;
    harness.show(a, &[&t6]).await;
    harness.issued();

    harness
        .reporter
        .fetched(t6.clone(), b"not an image".to_vec(), TileFormat::png());
    assert_eq!(
        harness.calls.recv().await.unwrap(),
        FetchCall::Request(t6.clone())
    );
    assert!(!temp.path().join("osm-1-10-6-7.png").exists());

    harness.reporter.fetched(t6.clone(), png(2, 2), TileFormat::png());
    assert!(matches!(
        events.recv().await.unwrap(),
        ViewerEvent::TileReady(ready) if ready.id == t6
    ));

    harness.app.shutdown().await;
}

/// Startup indexes valid tile files and ignores everything else.
#[tokio::test]
async fn test_startup_scan_of_existing_cache() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("p-1-3-4-5.png"), png(2, 2)).unwrap();
    std::fs::write(temp.path().join("garbage.txt"), b"hello").unwrap();

    let config = test_config(temp.path()).with_cache_areas(CacheAreas::DISK | CacheAreas::MEMORY);
    let mut harness = Harness::start(config).await;

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.cache.disk.entry_count, 1);
    assert!(temp.path().join("garbage.txt").exists());

    let id = TileId::new("p", 1, 3, 4, 5);
    let (a, _events) = harness.viewer().await;
    assert_eq!(harness.show(a, &[&id]).await, vec![id.clone()]);
    assert!(harness.issued().is_empty());

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.coordinator.cache_hits, 1);
    assert_eq!(stats.cache.memory.entry_count, 1);
    assert_eq!(stats.cache.upload.entry_count, 0);

    harness.app.shutdown().await;
}

/// A schema change purges tile files on startup.
#[tokio::test]
async fn test_schema_change_purges_disk_cache() {
    let temp = tempfile::tempdir().unwrap();
    std::fs::write(temp.path().join("SCHEMA_VERSION"), "0").unwrap();
    std::fs::write(temp.path().join("p-1-3-4-5.png"), png(2, 2)).unwrap();

    let harness = Harness::start(test_config(temp.path())).await;

    let stats = harness.handle.stats().await.unwrap();
    assert_eq!(stats.cache.disk.entry_count, 0);
    assert!(!temp.path().join("p-1-3-4-5.png").exists());
    assert_eq!(
        std::fs::read_to_string(temp.path().join("SCHEMA_VERSION"))
            .unwrap()
            .trim(),
        "1"
    );

    harness.app.shutdown().await;
}
