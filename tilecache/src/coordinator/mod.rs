//! Fetch coordination.
//!
//! This module decides what gets fetched, when, and who hears about it:
//!
//! - [`InterestMap`]: which viewers see which tiles
//! - [`RetryScheduler`]: backoff deadlines for failed fetches
//! - [`FetchCoordinator`]: the state machine tying interest, caches, retries
//!   and the fetcher together
//! - [`CoordinatorDaemon`] / [`CoordinatorHandle`]: the task that owns the
//!   coordinator and the cross-thread handle that feeds it

mod daemon;
mod engine;
mod interest;
mod retry;
mod viewer;

pub use daemon::{
    command_channel, ChannelViewerSink, Command, CommandInbox, CoordinatorDaemon,
    CoordinatorError, CoordinatorHandle, EngineStats,
};
pub use engine::{CoordinatorStats, FetchCoordinator, CORRUPT_PAYLOAD};
pub use interest::{InterestDelta, InterestMap};
pub use retry::{
    FailureOutcome, FetchState, PendingFetch, RetryPolicy, RetryScheduler,
    DEFAULT_MAX_RETRY_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY_MS,
};
pub use viewer::{ViewerEvent, ViewerId, ViewerSink};
