//! Engine bootstrap implementation.
//!
//! `TileCacheApp` performs the startup sequence in a fixed order so the
//! coordinator never sees a half-built cache:
//!
//! 1. Open the disk store (schema check, writability probe)
//! 2. Scan it and register every tile file with the disk tier
//! 3. Build the fetcher around the coordinator's reporter
//! 4. Spawn the coordinator daemon

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error::AppError;
use crate::cache::{HandoffQueue, TileCaches};
use crate::config::{format_size, TileCacheConfig};
use crate::coordinator::{
    command_channel, ChannelViewerSink, CoordinatorDaemon, CoordinatorHandle, FetchCoordinator,
};
use crate::fetcher::{FetchError, FetchReporter, Fetcher};
use crate::store::TileStore;

/// A running engine.
///
/// # Example
///
/// ```ignore
/// use tilecache::app::TileCacheApp;
/// use tilecache::config::TileCacheConfig;
/// use tilecache::fetcher::{HttpFetcher, UrlTemplate};
///
/// let template = UrlTemplate::parse("https://tiles.example.com/{z}/{x}/{y}.png")?;
/// let app = TileCacheApp::start(TileCacheConfig::default(), |reporter| {
///     HttpFetcher::new(template, TileFormat::png(), reporter)
/// })
/// .await?;
///
/// let handle = app.handle();
/// let (viewer, mut events) = handle.register_viewer().await?;
///
/// // Later: graceful shutdown
/// app.shutdown().await;
/// ```
pub struct TileCacheApp {
    handle: CoordinatorHandle,
    handoff: HandoffQueue,
    shutdown: CancellationToken,
    daemon: JoinHandle<()>,
    config: TileCacheConfig,
}

impl TileCacheApp {
    /// Start the engine.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration
    /// * `build_fetcher` - Builds the fetcher from the reporter it must post
    ///   results through
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a Tokio runtime, if the disk scan
    /// task fails, or if `build_fetcher` fails. A disk cache that cannot be
    /// created or written is not an error; the disk tier runs read-only or
    /// empty.
    pub async fn start<F, B>(config: TileCacheConfig, build_fetcher: B) -> Result<Self, AppError>
    where
        F: Fetcher + 'static,
        B: FnOnce(FetchReporter) -> Result<F, FetchError>,
    {
        let runtime = Handle::try_current().map_err(|_| AppError::NoRuntime)?;
        info!(
            cache_root = %config.cache_root.display(),
            disk = %format_size(config.disk.max_cost),
            memory = %format_size(config.memory.max_cost),
            upload = %format_size(config.upload.max_cost),
            areas = %config.cache_areas,
            "Starting tile cache engine"
        );

        // 1 + 2. Store I/O runs off the async workers.
        let root = config.cache_root.clone();
        let schema_version = config.schema_version;
        let (store, report) = runtime
            .spawn_blocking(move || {
                let store = TileStore::open(root, schema_version);
                let report = store.scan();
                (store, report)
            })
            .await
            .map_err(|e| AppError::DiskCache(e.to_string()))?;

        let mut caches = TileCaches::new(
            Some(store),
            config.disk.clone(),
            config.memory.clone(),
            config.upload.clone(),
        );
        let loaded = caches.load_scan(report);
        info!(tiles = loaded, "Disk tier loaded");
        let handoff = caches.handoff();

        // 3. Fetcher.
        let (handle, inbox) = command_channel();
        let fetcher = build_fetcher(handle.reporter())?;

        // 4. Coordinator daemon.
        let coordinator =
            FetchCoordinator::new(caches, config.retry, fetcher, ChannelViewerSink::new())
                .with_default_areas(config.cache_areas);
        let shutdown = CancellationToken::new();
        let daemon = runtime.spawn(CoordinatorDaemon::new(coordinator, inbox).run(shutdown.clone()));

        info!("Tile cache engine started");
        Ok(Self {
            handle,
            handoff,
            shutdown,
            daemon,
            config,
        })
    }

    /// Posting surface for viewers.
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// Upload hand-off queue for the render side.
    pub fn handoff(&self) -> HandoffQueue {
        self.handoff.clone()
    }

    pub fn config(&self) -> &TileCacheConfig {
        &self.config
    }

    /// Stop the coordinator and wait for it to exit.
    ///
    /// Fetches still in flight are dropped along with the fetcher.
    pub async fn shutdown(self) {
        info!("Shutting down tile cache engine");
        self.shutdown.cancel();
        if let Err(e) = self.daemon.await {
            warn!(error = %e, "Coordinator daemon did not stop cleanly");
        }
        info!("Tile cache engine shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheAreas, TierConfig};
    use crate::coordinator::{CoordinatorError, ViewerEvent};
    use crate::store::{TileStore, SCHEMA_VERSION};
    use crate::tile::{png_bytes, TileFormat, TileId};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Fetcher that serves a fixed PNG for every request through the reporter.
    struct InstantFetcher {
        reporter: FetchReporter,
        requested: Arc<Mutex<Vec<TileId>>>,
    }

    impl Fetcher for InstantFetcher {
        fn request(&mut self, id: &TileId) {
            self.requested.lock().unwrap().push(id.clone());
            self.reporter
                .fetched(id.clone(), png_bytes(2, 2), TileFormat::png());
        }

        fn cancel(&mut self, _id: &TileId) {}
    }

    fn config(root: &std::path::Path) -> TileCacheConfig {
        TileCacheConfig::new(root)
            .with_disk(TierConfig::new(1024 * 1024))
            .with_memory(TierConfig::new(1024 * 1024))
            .with_upload(TierConfig::new(1024 * 1024))
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let temp = tempdir().unwrap();
        let requested = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&requested);

        let app = TileCacheApp::start(config(temp.path()), move |reporter| {
            Ok(InstantFetcher {
                reporter,
                requested: log,
            })
        })
        .await
        .unwrap();

        assert!(temp.path().join("SCHEMA_VERSION").exists());
        let handle = app.handle();
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.viewers, 0);
        assert_eq!(stats.cache.disk.entry_count, 0);

        app.shutdown().await;
        assert!(requested.lock().unwrap().is_empty());
        assert_eq!(handle.stats().await, Err(CoordinatorError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_fetch_through_engine_populates_all_areas() {
        let temp = tempdir().unwrap();
        let app = TileCacheApp::start(config(temp.path()), |reporter| {
            Ok(InstantFetcher {
                reporter,
                requested: Arc::default(),
            })
        })
        .await
        .unwrap();

        let handle = app.handle();
        let (viewer, mut events) = handle.register_viewer().await.unwrap();
        let id = TileId::new("osm", 0, 3, 1, 2);
        let cached = handle
            .set_visible_tiles(viewer, HashSet::from([id.clone()]))
            .await
            .unwrap();
        assert!(cached.is_empty());

        match events.recv().await.unwrap() {
            ViewerEvent::TileReady(tile) => assert_eq!(tile.id, id),
            other => panic!("unexpected event: {other:?}"),
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.cache.disk.entry_count, 1);
        assert_eq!(stats.cache.memory.entry_count, 1);
        assert_eq!(stats.cache.upload.entry_count, 1);
        assert_eq!(app.handoff().len(), 1);
        assert!(temp.path().join("osm-0-3-1-2.png").exists());

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_loads_existing_disk_tiles() {
        let temp = tempdir().unwrap();
        let id = TileId::new("osm", 0, 4, 5, 6);
        let store = TileStore::open(temp.path(), SCHEMA_VERSION);
        store.write(&id, &TileFormat::png(), &png_bytes(2, 2)).unwrap();

        let app = TileCacheApp::start(
            config(temp.path()).with_cache_areas(CacheAreas::DISK),
            |reporter| {
                Ok(InstantFetcher {
                    reporter,
                    requested: Arc::default(),
                })
            },
        )
        .await
        .unwrap();

        let stats = app.handle().stats().await.unwrap();
        assert_eq!(stats.cache.disk.entry_count, 1);
        assert_eq!(app.config().cache_areas, CacheAreas::DISK);

        app.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_disk_hit_on_multi_thread_runtime() {
        let temp = tempdir().unwrap();
        let id = TileId::new("osm", 0, 4, 5, 6);
        let store = TileStore::open(temp.path(), SCHEMA_VERSION);
        store.write(&id, &TileFormat::png(), &png_bytes(2, 2)).unwrap();

        let app = TileCacheApp::start(config(temp.path()), |reporter| {
            Ok(InstantFetcher {
                reporter,
                requested: Arc::default(),
            })
        })
        .await
        .unwrap();

        let handle = app.handle();
        let (viewer, _events) = handle.register_viewer().await.unwrap();
        let cached = handle
            .set_visible_tiles(viewer, HashSet::from([id.clone()]))
            .await
            .unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].image.width(), 2);

        app.shutdown().await;
    }

    #[tokio::test]
    async fn test_fetcher_build_error_is_reported() {
        let temp = tempdir().unwrap();
        let result = TileCacheApp::start::<InstantFetcher, _>(config(temp.path()), |_| {
            Err(FetchError::InvalidTemplate("{nope}".to_string()))
        })
        .await;
        assert!(matches!(result, Err(AppError::Fetcher(_))));
    }
}
