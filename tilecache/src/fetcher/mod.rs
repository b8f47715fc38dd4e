//! Fetcher interface.
//!
//! A [`Fetcher`] turns tile ids into payload bytes. The coordinator calls
//! [`Fetcher::request`] and [`Fetcher::cancel`] from its own task; both must
//! return immediately. Results come back later through a [`FetchReporter`],
//! which posts them onto the coordinator's command queue rather than calling
//! into the coordinator directly.
//!
//! [`HttpFetcher`] is the bundled implementation: an HTTP GET per tile with
//! the URL built from a template.

mod http;

pub use http::{
    BoxFuture, HttpClient, HttpFetcher, ReqwestClient, UrlTemplate, DEFAULT_REQUEST_TIMEOUT_SECS,
};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use crate::coordinator::Command;
use crate::tile::{TileFormat, TileId};

/// Errors from fetching a tile.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The fetcher was created outside a Tokio runtime.
    #[error("No Tokio runtime available to run downloads")]
    NoRuntime,

    #[error("Invalid URL template: {0}")]
    InvalidTemplate(String),
}

/// Source of tile payloads.
pub trait Fetcher: Send {
    /// Start fetching `id`. Must not block.
    fn request(&mut self, id: &TileId);

    /// Stop fetching `id` if possible. A completion may still be reported.
    fn cancel(&mut self, id: &TileId);
}

/// Posts fetch results back to the coordinator.
///
/// Cheap to clone; one per in-flight download is fine.
#[derive(Debug, Clone)]
pub struct FetchReporter {
    tx: mpsc::UnboundedSender<Command>,
}

impl FetchReporter {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Command>) -> Self {
        Self { tx }
    }

    /// Report a successful fetch.
    pub fn fetched(&self, id: TileId, bytes: impl Into<Bytes>, format: TileFormat) {
        let command = Command::Fetched {
            id,
            bytes: bytes.into(),
            format,
        };
        if self.tx.send(command).is_err() {
            trace!("Coordinator gone, dropping fetch result");
        }
    }

    /// Report a failed fetch.
    pub fn failed(&self, id: TileId, message: impl Into<String>) {
        let command = Command::Failed {
            id,
            message: message.into(),
        };
        if self.tx.send(command).is_err() {
            trace!("Coordinator gone, dropping fetch error");
        }
    }

    /// Whether the coordinator has stopped listening.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
