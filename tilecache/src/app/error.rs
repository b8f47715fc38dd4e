//! Application error types.

use thiserror::Error;

use crate::config::ConfigFileError;
use crate::fetcher::FetchError;

/// Errors that can occur while starting the engine.
#[derive(Debug, Error)]
pub enum AppError {
    /// `start` was called outside a Tokio runtime.
    #[error("No Tokio runtime available to run the coordinator")]
    NoRuntime,

    /// The fetcher could not be built.
    #[error("Failed to create fetcher: {0}")]
    Fetcher(#[from] FetchError),

    /// The configuration file could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigFileError),

    /// Opening or scanning the disk cache panicked or was cancelled.
    #[error("Failed to open disk cache: {0}")]
    DiskCache(String),
}
