//! # Recognition Adapter
//!
//! Wraps one recognizer stream for one session.
//!
//! ## State Machine:
//! ```text
//! Uninitialized ──activate──► Active ──close──► Closed
//!       └────────────────close──────────────────┘
//! ```
//! `close` is reached three ways: an explicit stop from the registry, a
//! cancellation reported by the collaborator, or a session-stopped
//! notification. All three take the same path and only the first one releases
//! anything: the ingest queue is closed and the collaborator's shutdown token
//! is cancelled exactly once. Writes after that are ignored.
//!
//! When the collaborator ends the stream, the terminal hook handed to
//! `activate` runs straight from the event pump. It does not wait for the
//! orchestrator to work through utterances still queued ahead of it.

use super::{CloseReason, RecognizerEvent, RecognizerLink, SessionEvent, SpeechRecognizer, Utterance};
use crate::audio::{AudioIngest, PushError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Uninitialized,
    Active,
    Closed,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterState::Uninitialized => "uninitialized",
            AdapterState::Active => "active",
            AdapterState::Closed => "closed",
        }
    }
}

/// Runs once when the collaborator cancels or stops the stream.
pub type TerminalHook = Box<dyn FnOnce(CloseReason) + Send + 'static>;

struct Inner {
    state: AdapterState,
    ingest: Option<Arc<AudioIngest>>,
    shutdown: Option<CancellationToken>,
    on_terminal: Option<TerminalHook>,
}

pub struct RecognitionAdapter {
    connection_id: String,
    min_utterance_chars: usize,
    inner: Mutex<Inner>,
}

impl RecognitionAdapter {
    pub fn new(connection_id: impl Into<String>, min_utterance_chars: usize) -> Arc<Self> {
        Arc::new(Self {
            connection_id: connection_id.into(),
            min_utterance_chars,
            inner: Mutex::new(Inner {
                state: AdapterState::Uninitialized,
                ingest: None,
                shutdown: None,
                on_terminal: None,
            }),
        })
    }

    pub fn state(&self) -> AdapterState {
        self.inner.lock().state
    }

    /// Start the collaborator stream and begin publishing events.
    ///
    /// Recognized phrases that pass the length threshold are forwarded to
    /// `events` in the order the collaborator reports them. A terminal event
    /// closes the adapter, runs `on_terminal` and is forwarded once. An
    /// explicit `close` never runs `on_terminal`.
    pub async fn activate(
        self: &Arc<Self>,
        recognizer: &dyn SpeechRecognizer,
        language: &str,
        events: mpsc::Sender<SessionEvent>,
        on_terminal: TerminalHook,
    ) -> anyhow::Result<()> {
        let state = self.state();
        if state != AdapterState::Uninitialized {
            anyhow::bail!("recognition adapter is already {}", state.as_str());
        }

        let RecognizerLink {
            audio,
            events: raw_events,
            shutdown,
        } = recognizer.start(language).await?;

        {
            let mut inner = self.inner.lock();
            if inner.state != AdapterState::Uninitialized {
                shutdown.cancel();
                anyhow::bail!("recognition adapter became {} while starting", inner.state.as_str());
            }
            inner.state = AdapterState::Active;
            inner.ingest = Some(Arc::new(AudioIngest::new(audio)));
            inner.shutdown = Some(shutdown);
            inner.on_terminal = Some(on_terminal);
        }

        info!(
            connection_id = %self.connection_id,
            recognizer = recognizer.name(),
            language,
            "Recognition stream started"
        );

        tokio::spawn(Arc::clone(self).pump(raw_events, events));
        Ok(())
    }

    /// Append a chunk to the continuous stream. Returns `false` when the chunk
    /// was not accepted (adapter not active, queue full or closed).
    pub fn write(&self, chunk: Vec<u8>) -> bool {
        let ingest = {
            let inner = self.inner.lock();
            if inner.state != AdapterState::Active {
                return false;
            }
            inner.ingest.clone()
        };

        let Some(ingest) = ingest else {
            return false;
        };

        match ingest.push(chunk) {
            Ok(()) => true,
            Err(PushError::Full) => {
                warn!(connection_id = %self.connection_id, "Audio queue full, dropping chunk");
                false
            }
            Err(PushError::Closed) => {
                warn!(connection_id = %self.connection_id, "Audio stream closed, dropping chunk");
                false
            }
        }
    }

    /// Tear the stream down. Only the first call does anything and returns `true`.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.release(&reason).is_some()
    }

    /// Close and hand back the terminal hook. `None` if already closed.
    fn release(&self, reason: &CloseReason) -> Option<Option<TerminalHook>> {
        let (ingest, shutdown, on_terminal) = {
            let mut inner = self.inner.lock();
            if inner.state == AdapterState::Closed {
                return None;
            }
            inner.state = AdapterState::Closed;
            (inner.ingest.take(), inner.shutdown.take(), inner.on_terminal.take())
        };

        let stats = ingest.map(|ingest| {
            ingest.close();
            ingest.stats()
        });
        if let Some(token) = shutdown {
            token.cancel();
        }

        let stats = stats.unwrap_or_default();
        info!(
            connection_id = %self.connection_id,
            reason = reason.as_str(),
            chunks = stats.chunks,
            bytes = stats.bytes,
            dropped = stats.dropped,
            "Recognition stream closed"
        );
        if let CloseReason::Canceled(detail) = reason {
            warn!(connection_id = %self.connection_id, detail = %detail, "Recognizer canceled the stream");
        }

        Some(on_terminal)
    }

    async fn pump(self: Arc<Self>, mut raw: mpsc::Receiver<RecognizerEvent>, events: mpsc::Sender<SessionEvent>) {
        while let Some(event) = raw.recv().await {
            if self.state() == AdapterState::Closed {
                break;
            }

            match event {
                RecognizerEvent::Recognized(text) => {
                    let Some(utterance) = Utterance::parse(&text, self.min_utterance_chars) else {
                        debug!(connection_id = %self.connection_id, "Discarding short utterance");
                        continue;
                    };

                    debug!(
                        connection_id = %self.connection_id,
                        chars = utterance.text().chars().count(),
                        "Utterance recognized"
                    );
                    match events.try_send(SessionEvent::UtteranceRecognized(utterance)) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(connection_id = %self.connection_id, "Pipeline backlog full, dropping utterance");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!(connection_id = %self.connection_id, "Orchestrator gone, stopping event pump");
                            break;
                        }
                    }
                }
                RecognizerEvent::Canceled(reason) => {
                    self.finish(CloseReason::Canceled(reason.clone()), SessionEvent::Canceled(reason), &events)
                        .await;
                    return;
                }
                RecognizerEvent::SessionStopped => {
                    self.finish(CloseReason::SessionStopped, SessionEvent::SessionStopped, &events)
                        .await;
                    return;
                }
            }
        }

        if self.state() != AdapterState::Closed {
            let reason = "recognizer event stream ended".to_string();
            self.finish(CloseReason::Canceled(reason.clone()), SessionEvent::Canceled(reason), &events)
                .await;
        }
    }

    async fn finish(&self, reason: CloseReason, event: SessionEvent, events: &mpsc::Sender<SessionEvent>) {
        let Some(on_terminal) = self.release(&reason) else {
            return;
        };
        if let Some(on_terminal) = on_terminal {
            on_terminal(reason);
        }
        // The worker may already have stopped after the hook cancelled it.
        let _ = events.try_send(event);
    }
}
