//! Ingestion queue for raw transcript fragments.
//!
//! Producers push serialized fragments; the merger drains everything queued
//! so far in one atomic step. Draining is pop-all: a push racing with a drain
//! lands either in that drain or in the next one, never in neither.

mod decode;

pub use decode::{decode_batch, DecodeFailure, DecodedBatch};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use utter_transcript::Fragment;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue closed")]
    Closed,
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// Ordered queue of serialized fragments.
pub trait FragmentQueue: Send + Sync {
    type Error: std::error::Error + From<serde_json::Error> + Send + Sync + 'static;

    /// Append one serialized fragment.
    fn push(&self, raw: String) -> std::result::Result<(), Self::Error>;

    /// Remove and return everything queued, oldest first.
    fn drain(&self) -> std::result::Result<Vec<String>, Self::Error>;

    /// Number of queued entries.
    fn len(&self) -> std::result::Result<usize, Self::Error>;

    fn is_empty(&self) -> std::result::Result<bool, Self::Error> {
        Ok(self.len()? == 0)
    }

    /// Serialize and append a fragment.
    fn push_fragment(&self, fragment: &Fragment) -> std::result::Result<(), Self::Error> {
        let raw = fragment.to_json()?;
        self.push(raw)
    }
}

/// Process-local queue.
#[derive(Default)]
pub struct InMemoryQueue {
    entries: Mutex<VecDeque<String>>,
    closed: AtomicBool,
    pushed: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject further pushes. Already queued entries can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Total number of entries ever accepted.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

impl FragmentQueue for InMemoryQueue {
    type Error = QueueError;

    fn push(&self, raw: String) -> Result<()> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.entries.lock().unwrap().push_back(raw);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn drain(&self) -> Result<Vec<String>> {
        let drained = std::mem::take(&mut *self.entries.lock().unwrap());
        if !drained.is_empty() {
            tracing::trace!(count = drained.len(), "drained in-memory queue");
        }
        Ok(drained.into())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap().len())
    }
}
