//! # Audio Ingest Queue
//!
//! The writing half of a session's audio channel. The transport worker pushes
//! chunks in arrival order; the recognition collaborator drains the other end.
//!
//! ## Behavior:
//! - Pushing never waits. A full queue drops the chunk and reports it.
//! - Closing is idempotent. The sender is dropped on the first close, which
//!   lets the collaborator observe end-of-stream.
//! - After close every push is rejected with [`PushError::Closed`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The collaborator is not keeping up
    Full,
    /// The session is closed or the collaborator went away
    Closed,
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Full => write!(f, "audio queue is full"),
            PushError::Closed => write!(f, "audio stream is closed"),
        }
    }
}

/// Counters exposed for logging when a session ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub chunks: u64,
    pub bytes: u64,
    pub dropped: u64,
}

pub struct AudioIngest {
    sender: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    chunks: AtomicU64,
    bytes: AtomicU64,
    dropped: AtomicU64,
}

impl AudioIngest {
    pub fn new(sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
            chunks: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, chunk: Vec<u8>) -> Result<(), PushError> {
        let len = chunk.len() as u64;
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(PushError::Closed);
        };

        match sender.try_send(chunk) {
            Ok(()) => {
                self.chunks.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Full)
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Closed)
            }
        }
    }

    /// Returns `true` only for the call that actually closed the queue.
    pub fn close(&self) -> bool {
        self.sender.lock().take().is_some()
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            chunks: self.chunks.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
