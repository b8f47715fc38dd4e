//! Coordinator daemon and its command queue.
//!
//! The [`CoordinatorDaemon`] is the single task that owns the
//! [`FetchCoordinator`]. Everything else talks to it by posting [`Command`]s
//! through a [`CoordinatorHandle`]:
//!
//! ```text
//!   viewers ──┐                         ┌──► Fetcher::request / cancel
//!             ├──► Command queue ──► CoordinatorDaemon
//!   fetcher ──┘     (FIFO)              └──► viewer event channels
//!   (FetchReporter)                           (ViewerEvent)
//! ```
//!
//! Commands are applied strictly in arrival order, so a cancel posted before
//! a completion always wins. Retry deadlines are handled in the same loop:
//! the daemon sleeps until the earliest deadline whenever the queue is idle.
//!
//! # Example
//!
//! ```ignore
//! let (handle, inbox) = command_channel();
//! let coordinator = FetchCoordinator::new(caches, policy, fetcher, ChannelViewerSink::new());
//! let shutdown = CancellationToken::new();
//! tokio::spawn(CoordinatorDaemon::new(coordinator, inbox).run(shutdown.clone()));
//!
//! let (viewer, mut events) = handle.register_viewer().await?;
//! let cached = handle.set_visible_tiles(viewer, tiles).await?;
//! while let Some(event) = events.recv().await { /* ... */ }
//! ```

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::engine::{CoordinatorStats, FetchCoordinator};
use super::viewer::{ViewerEvent, ViewerId, ViewerSink};
use crate::cache::{CacheStats, CachedTile};
use crate::fetcher::{FetchReporter, Fetcher};
use crate::tile::{TileFormat, TileId};

/// Errors from talking to the coordinator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The daemon has stopped.
    #[error("Coordinator is shutting down")]
    ShuttingDown,
}

/// A request for the coordinator task.
#[derive(Debug)]
pub enum Command {
    RegisterViewer {
        reply: oneshot::Sender<(ViewerId, mpsc::UnboundedReceiver<ViewerEvent>)>,
    },
    SetVisibleTiles {
        viewer: ViewerId,
        tiles: HashSet<TileId>,
        reply: Option<oneshot::Sender<Vec<CachedTile>>>,
    },
    RemoveViewer {
        viewer: ViewerId,
    },
    Fetched {
        id: TileId,
        bytes: Bytes,
        format: TileFormat,
    },
    Failed {
        id: TileId,
        message: String,
    },
    Invalidate {
        id: TileId,
    },
    Stats {
        reply: oneshot::Sender<EngineStats>,
    },
}

/// Snapshot of the whole engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub coordinator: CoordinatorStats,
    pub cache: CacheStats,
    pub pending_fetches: usize,
    pub viewers: usize,
}

/// Create the command queue.
pub fn command_channel() -> (CoordinatorHandle, CommandInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CoordinatorHandle { tx }, CommandInbox { rx })
}

/// Receiving end of the command queue, consumed by the daemon.
#[derive(Debug)]
pub struct CommandInbox {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandInbox {
    pub(crate) async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }
}

/// Cloneable posting surface for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl CoordinatorHandle {
    fn post(&self, command: Command) -> Result<(), CoordinatorError> {
        self.tx
            .send(command)
            .map_err(|_| CoordinatorError::ShuttingDown)
    }

    /// Register a viewer and get its event stream.
    pub async fn register_viewer(
        &self,
    ) -> Result<(ViewerId, mpsc::UnboundedReceiver<ViewerEvent>), CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::RegisterViewer { reply })?;
        rx.await.map_err(|_| CoordinatorError::ShuttingDown)
    }

    /// Replace a viewer's visible set and wait for the tiles already cached.
    pub async fn set_visible_tiles(
        &self,
        viewer: ViewerId,
        tiles: HashSet<TileId>,
    ) -> Result<Vec<CachedTile>, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::SetVisibleTiles {
            viewer,
            tiles,
            reply: Some(reply),
        })?;
        rx.await.map_err(|_| CoordinatorError::ShuttingDown)
    }

    /// Replace a viewer's visible set without waiting.
    ///
    /// Tiles already cached are delivered as [`ViewerEvent::TileReady`].
    pub fn post_visible_tiles(
        &self,
        viewer: ViewerId,
        tiles: HashSet<TileId>,
    ) -> Result<(), CoordinatorError> {
        self.post(Command::SetVisibleTiles {
            viewer,
            tiles,
            reply: None,
        })
    }

    pub fn remove_viewer(&self, viewer: ViewerId) -> Result<(), CoordinatorError> {
        self.post(Command::RemoveViewer { viewer })
    }

    pub fn invalidate(&self, id: TileId) -> Result<(), CoordinatorError> {
        self.post(Command::Invalidate { id })
    }

    pub async fn stats(&self) -> Result<EngineStats, CoordinatorError> {
        let (reply, rx) = oneshot::channel();
        self.post(Command::Stats { reply })?;
        rx.await.map_err(|_| CoordinatorError::ShuttingDown)
    }

    /// Reporter for fetchers to post results with.
    pub fn reporter(&self) -> FetchReporter {
        FetchReporter::new(self.tx.clone())
    }

    /// Whether the daemon has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// [`ViewerSink`] that forwards events to per-viewer channels.
#[derive(Debug, Default)]
pub struct ChannelViewerSink {
    senders: HashMap<ViewerId, mpsc::UnboundedSender<ViewerEvent>>,
}

impl ChannelViewerSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `viewer`'s events to `sender`.
    pub fn attach(&mut self, viewer: ViewerId, sender: mpsc::UnboundedSender<ViewerEvent>) {
        self.senders.insert(viewer, sender);
    }

    fn send(&mut self, viewer: ViewerId, event: ViewerEvent) {
        if let Some(sender) = self.senders.get(&viewer) {
            if sender.send(event).is_err() {
                debug!(%viewer, "Viewer event receiver dropped");
                self.senders.remove(&viewer);
            }
        }
    }
}

impl ViewerSink for ChannelViewerSink {
    fn tile_ready(&mut self, viewer: ViewerId, tile: &CachedTile) {
        self.send(viewer, ViewerEvent::TileReady(tile.clone()));
    }

    fn tile_failed(&mut self, viewer: ViewerId, id: &TileId, message: &str) {
        self.send(
            viewer,
            ViewerEvent::TileFailed {
                id: id.clone(),
                message: message.to_string(),
            },
        );
    }

    fn viewer_removed(&mut self, viewer: ViewerId) {
        self.senders.remove(&viewer);
    }
}

/// The coordinator task.
pub struct CoordinatorDaemon<F: Fetcher> {
    coordinator: FetchCoordinator<F, ChannelViewerSink>,
    inbox: CommandInbox,
}

impl<F: Fetcher> CoordinatorDaemon<F> {
    pub fn new(coordinator: FetchCoordinator<F, ChannelViewerSink>, inbox: CommandInbox) -> Self {
        Self { coordinator, inbox }
    }

    /// Run until `shutdown` is cancelled or every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Coordinator daemon starting");

        loop {
            let deadline = self.coordinator.next_retry_deadline();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Coordinator daemon shutting down");
                    break;
                }

                command = self.inbox.recv() => {
                    match command {
                        Some(command) => run_blocking(|| self.handle(command)),
                        None => {
                            info!("All coordinator handles dropped");
                            break;
                        }
                    }
                }

                _ = wait_until(deadline) => {
                    self.coordinator.fire_due_retries(now());
                }
            }
        }

        let stats = self.coordinator.stats();
        info!(
            requests = stats.requests,
            completed = stats.completed,
            abandoned = stats.abandoned,
            cache_hits = stats.cache_hits,
            "Coordinator daemon stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        let now = now();
        match command {
            Command::RegisterViewer { reply } => {
                let viewer = self.coordinator.register_viewer();
                let (tx, rx) = mpsc::unbounded_channel();
                self.coordinator.sink_mut().attach(viewer, tx);
                if reply.send((viewer, rx)).is_err() {
                    debug!(%viewer, "Viewer registration abandoned by caller");
                    self.coordinator.remove_viewer(viewer, now);
                }
            }
            Command::SetVisibleTiles {
                viewer,
                tiles,
                reply,
            } => {
                let cached = self.coordinator.set_visible_tiles(viewer, tiles, now);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(cached);
                    }
                    None => {
                        for tile in &cached {
                            self.coordinator.sink_mut().tile_ready(viewer, tile);
                        }
                    }
                }
            }
            Command::RemoveViewer { viewer } => {
                self.coordinator.remove_viewer(viewer, now);
            }
            Command::Fetched { id, bytes, format } => {
                self.coordinator.on_fetched(id, &bytes, &format, now);
            }
            Command::Failed { id, message } => {
                self.coordinator.on_error(id, &message, now);
            }
            Command::Invalidate { id } => {
                self.coordinator.invalidate(&id);
            }
            Command::Stats { reply } => {
                let _ = reply.send(EngineStats {
                    coordinator: self.coordinator.stats().clone(),
                    cache: self.coordinator.caches().stats(),
                    pending_fetches: self.coordinator.pending_count(),
                    viewers: self.coordinator.viewer_count(),
                });
            }
        }
    }
}

/// Run a command's synchronous work (disk reads and writes, decoding).
///
/// On a multi-thread runtime the worker is handed over with
/// [`block_in_place`](tokio::task::block_in_place) so other tasks keep
/// running; a current-thread runtime has no worker to hand over.
fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// Current time on the Tokio clock, so paused-time tests drive retries.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}
