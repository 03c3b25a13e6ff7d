//! # Translation Pipeline
//!
//! Everything that happens to a recognized utterance before it reaches the
//! other participant:
//!
//! ```text
//! Utterance ─► TranslationStage ─► SynthesisStage ─► TranslationResult ─► TranslationSink
//! ```
//!
//! ## Key Components:
//! - **translation**: `Translator` seam, prompt contract, fallback policy and timeout
//! - **gemini**: production translator backed by the Gemini `generateContent` API
//! - **synthesis**: `Synthesizer` seam, voice selection and timeout
//! - **azure_tts**: production synthesizer backed by Azure text-to-speech
//! - **voices**: the static language → voice map
//! - **orchestrator**: per-session worker that runs one utterance at a time

pub mod azure_tts;
pub mod gemini;
pub mod orchestrator;
pub mod synthesis;
pub mod translation;
pub mod voices;

pub use orchestrator::PipelineOrchestrator;

use serde::Serialize;

/// Source and target language of a session, fixed when the session is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguagePair {
    pub source: String,
    pub target: String,
}

impl LanguagePair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Outcome of one utterance, delivered exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationResult {
    pub original: String,
    pub translated: String,
    /// Encoded speech, absent when synthesis failed or was skipped
    pub audio: Option<Vec<u8>>,
    pub target_language: String,
    /// The translated text is a fallback, not a real translation
    pub degraded: bool,
}

/// Where a session's results go. Implemented by the room delivery in the
/// transport layer and by channel sinks in tests.
pub trait TranslationSink: Send + Sync {
    fn deliver(&self, result: TranslationResult);
}
