//! Hand-off of upload-ready images to a render thread.
//!
//! The coordinator task owns the upload tier, but GPU resources can only be
//! created and freed on the render thread. Inserts into the upload tier push
//! [`Handoff::Upload`] and departures push [`Handoff::Release`]; the render
//! side calls [`HandoffQueue::drain`] at its own synchronization point (once
//! per frame, typically) and applies them in order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::policy::Weighted;
use crate::tile::{DecodedImage, TileId};

/// Opaque handle naming one upload-tier resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadHandle(u64);

impl UploadHandle {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Payload of the upload tier.
#[derive(Debug, Clone)]
pub struct UploadResource {
    pub handle: UploadHandle,
    pub image: Arc<DecodedImage>,
}

impl Weighted for UploadResource {
    fn weight(&self) -> u64 {
        self.image.byte_size()
    }
}

/// One instruction for the render side.
#[derive(Debug, Clone)]
pub enum Handoff {
    /// Create a resource for `image` and associate it with `handle`.
    Upload {
        id: TileId,
        handle: UploadHandle,
        image: Arc<DecodedImage>,
    },
    /// Free the resource behind `handle`.
    Release { id: TileId, handle: UploadHandle },
}

impl Handoff {
    pub fn handle(&self) -> UploadHandle {
        match self {
            Handoff::Upload { handle, .. } | Handoff::Release { handle, .. } => *handle,
        }
    }
}

/// Shared FIFO of [`Handoff`] instructions.
///
/// Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct HandoffQueue {
    inner: Arc<Mutex<VecDeque<Handoff>>>,
}

impl HandoffQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, handoff: Handoff) {
        self.inner.lock().push_back(handoff);
    }

    /// Take every pending instruction, oldest first.
    pub fn drain(&self) -> Vec<Handoff> {
        self.inner.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
