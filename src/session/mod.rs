//! # Pipeline Sessions
//!
//! A session binds one connection's audio stream to one recognition adapter,
//! one orchestrator worker and a fixed language pair. Sessions are created on
//! the first audio chunk and owned by the [`SessionRegistry`].
//!
//! ## Session Lifecycle:
//! 1. **Reserved**: a creation cell is inserted for the connection id
//! 2. **Active**: the recognizer is streaming, audio chunks are accepted
//! 3. **Closed**: stopped explicitly, by the recognizer, or on disconnect

pub mod registry;

pub use registry::SessionRegistry;

use crate::pipeline::LanguagePair;
use crate::recognition::{AdapterState, CloseReason, RecognitionAdapter};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Session {
    connection_id: String,
    languages: LanguagePair,
    adapter: Arc<RecognitionAdapter>,
    /// Cancels the orchestrator worker and any in-flight stage call
    cancel: CancellationToken,
    closed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(connection_id: impl Into<String>, languages: LanguagePair, adapter: Arc<RecognitionAdapter>) -> Self {
        Self {
            connection_id: connection_id.into(),
            languages,
            adapter,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn languages(&self) -> &LanguagePair {
        &self.languages
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> AdapterState {
        self.adapter.state()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Feed one audio chunk. Ignored once the session is closed.
    pub fn write_audio(&self, chunk: Vec<u8>) -> bool {
        self.adapter.write(chunk)
    }

    /// Close the recognizer and cancel pending pipeline work. Safe to repeat;
    /// returns `true` only for the first call, whoever closed the recognizer.
    pub fn shutdown(&self, reason: CloseReason) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        self.adapter.close(reason);
        self.cancel.cancel();
        first
    }
}
