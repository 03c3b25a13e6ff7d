//! # Synthesis Stage
//!
//! Picks the voice for the target language, calls the synthesizer under a
//! timeout and reports failure explicitly. The orchestrator decides what a
//! failure means for the result (text-only delivery).
//!
//! ## Output Format:
//! Always 16kHz mono MP3 at 32 kbit/s. Mobile players decode it everywhere,
//! which is why it is fixed rather than configurable.

use super::voices;
use crate::config::PipelineConfig;
use crate::error::StageError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub const OUTPUT_FORMAT: &str = "audio-16khz-32kbitrate-mono-mp3";

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    /// Render `text` with the given voice. Must release every engine resource
    /// before returning, on success and on failure.
    async fn synthesize(&self, text: &str, voice: &str, language: &str) -> Result<Vec<u8>, StageError>;
}

pub struct SynthesisStage {
    synthesizer: Arc<dyn Synthesizer>,
    timeout: Duration,
}

impl SynthesisStage {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, config: &PipelineConfig) -> Self {
        Self {
            synthesizer,
            timeout: config.synthesis_timeout(),
        }
    }

    pub async fn run(&self, text: &str, language: &str) -> Result<Vec<u8>, StageError> {
        let voice = voices::voice_for(language);
        let started = Instant::now();

        let audio = tokio::time::timeout(self.timeout, self.synthesizer.synthesize(text, voice, language))
            .await
            .map_err(|_| StageError::Timeout {
                stage: "synthesis",
                after_ms: self.timeout.as_millis() as u64,
            })??;

        if audio.is_empty() {
            return Err(StageError::EmptyResponse);
        }

        debug!(
            synthesizer = self.synthesizer.name(),
            voice,
            bytes = audio.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesis completed"
        );
        Ok(audio)
    }
}
