//! # Streaming Speech Recognition
//!
//! A recognition collaborator turns a continuous audio stream into recognized
//! phrases. Where one phrase ends and the next begins is decided by the
//! collaborator, never by how the transport chunked the audio.
//!
//! ## Key Components:
//! - **SpeechRecognizer**: the collaborator seam (Azure in production, stubs in tests)
//! - **RecognitionAdapter**: owns one recognizer stream per session, filters
//!   utterances and converges every way of stopping onto a single teardown
//! - **SessionEvent**: the typed events the adapter publishes to the orchestrator
//!
//! ## Event Flow:
//! ```text
//! audio chunks ─► AudioIngest ─► collaborator ─► RecognizerEvent ─► adapter pump ─► SessionEvent
//! ```

pub mod adapter;
pub mod azure;

pub use adapter::{AdapterState, RecognitionAdapter, TerminalHook};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raw notifications produced by a recognition collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// A phrase boundary was reached; the text is untrimmed and may be empty
    Recognized(String),
    /// Fatal error or cancellation reported by the service; terminal
    Canceled(String),
    /// The service ended the recognition session normally; terminal
    SessionStopped,
}

/// Why a session's recognition ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `end_audio_stream`, disconnect or process shutdown
    Stopped,
    Canceled(String),
    SessionStopped,
}

impl CloseReason {
    pub fn as_str(&self) -> &str {
        match self {
            CloseReason::Stopped => "stopped",
            CloseReason::Canceled(_) => "canceled",
            CloseReason::SessionStopped => "session_stopped",
        }
    }
}

/// Typed events published by the adapter onto the session's event queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    UtteranceRecognized(Utterance),
    Canceled(String),
    SessionStopped,
}

/// A running recognizer stream.
///
/// Dropping `audio` signals end of audio. Cancelling `shutdown` releases the
/// upstream connection; the collaborator closes `events` once it has let go.
pub struct RecognizerLink {
    pub audio: mpsc::Sender<Vec<u8>>,
    pub events: mpsc::Receiver<RecognizerEvent>,
    pub shutdown: CancellationToken,
}

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    fn name(&self) -> &str;

    /// Open a continuous recognition stream for `language`.
    async fn start(&self, language: &str) -> anyhow::Result<RecognizerLink>;
}

/// One recognized unit of speech, already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    text: String,
}

impl Utterance {
    /// Accept `raw` only if it holds at least `min_chars` non-whitespace characters.
    pub fn parse(raw: &str, min_chars: usize) -> Option<Self> {
        let trimmed = raw.trim();
        let significant = trimmed.chars().filter(|c| !c.is_whitespace()).count();
        if significant < min_chars {
            return None;
        }

        Some(Self {
            text: trimmed.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utterance_threshold() {
        assert!(Utterance::parse("", 2).is_none());
        assert!(Utterance::parse("   ", 2).is_none());
        assert!(Utterance::parse(" a ", 2).is_none());
        assert!(Utterance::parse("a \n", 2).is_none());

        let utterance = Utterance::parse("  ok  ", 2).unwrap();
        assert_eq!(utterance.text(), "ok");
    }

    #[test]
    fn test_utterance_counts_characters_not_bytes() {
        assert!(Utterance::parse("é", 2).is_none());
        assert_eq!(Utterance::parse("你好", 2).unwrap().text(), "你好");
    }

    #[test]
    fn test_close_reason_names() {
        assert_eq!(CloseReason::Stopped.as_str(), "stopped");
        assert_eq!(CloseReason::Canceled("boom".to_string()).as_str(), "canceled");
        assert_eq!(CloseReason::SessionStopped.as_str(), "session_stopped");
    }
}
