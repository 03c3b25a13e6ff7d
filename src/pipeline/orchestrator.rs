//! # Pipeline Orchestrator
//!
//! One worker task per session consumes the session's event queue and runs
//! each utterance through translation and synthesis before touching the next
//! one. Results therefore reach the peer in recognition order.
//!
//! ## Partial Failure Handling:
//! - Translation fails: the fallback text is delivered, no audio (unless
//!   `synthesize_fallback` is enabled)
//! - Synthesis fails: the translated text is delivered without audio
//! - Session cancelled mid-flight: the in-progress result is discarded and
//!   counted as dropped, never delivered
//!
//! ## Terminal Events:
//! `Canceled` and `SessionStopped` end the worker. Retiring the session is
//! not its job: the recognition adapter reports those directly to the
//! registry, which cancels this worker through the session token.

use super::synthesis::{SynthesisStage, Synthesizer};
use super::translation::{TranslationStage, Translator};
use super::{LanguagePair, TranslationResult, TranslationSink};
use crate::config::PipelineConfig;
use crate::recognition::{SessionEvent, Utterance};
use crate::state::PipelineMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-session data the worker needs.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub connection_id: String,
    pub languages: LanguagePair,
    pub cancel: CancellationToken,
}

pub struct PipelineOrchestrator {
    translation: TranslationStage,
    synthesis: SynthesisStage,
    synthesize_fallback: bool,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineOrchestrator {
    pub fn new(
        translator: Arc<dyn Translator>,
        synthesizer: Arc<dyn Synthesizer>,
        config: &PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            translation: TranslationStage::new(translator, config),
            synthesis: SynthesisStage::new(synthesizer, config),
            synthesize_fallback: config.synthesize_fallback,
            metrics,
        }
    }

    /// Translate and synthesize one utterance. Never fails.
    pub async fn process(&self, utterance: &Utterance, languages: &LanguagePair) -> TranslationResult {
        let translation = self.translation.run(utterance.text(), languages).await;
        if translation.degraded {
            self.metrics.translation_degraded();
        }

        let audio = if translation.degraded && !self.synthesize_fallback {
            None
        } else {
            match self.synthesis.run(&translation.text, &languages.target).await {
                Ok(audio) => Some(audio),
                Err(err) => {
                    warn!(error = %err, target = %languages.target, "Synthesis failed, delivering text only");
                    self.metrics.synthesis_failed();
                    None
                }
            }
        };

        self.metrics.utterance_processed();
        TranslationResult {
            original: utterance.text().to_string(),
            translated: translation.text,
            audio,
            target_language: languages.target.clone(),
            degraded: translation.degraded,
        }
    }

    /// Start the session worker. It runs until the session token is
    /// cancelled, a terminal event arrives or the event queue closes.
    pub fn spawn(
        self: &Arc<Self>,
        context: SessionContext,
        events: mpsc::Receiver<SessionEvent>,
        sink: Arc<dyn TranslationSink>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(context, events, sink))
    }

    async fn run(
        self: Arc<Self>,
        context: SessionContext,
        mut events: mpsc::Receiver<SessionEvent>,
        sink: Arc<dyn TranslationSink>,
    ) {
        let cancel = &context.cancel;

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Some(SessionEvent::UtteranceRecognized(utterance)) => {
                    let started = Instant::now();
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.process(&utterance, &context.languages) => Some(result),
                    };

                    match result {
                        Some(result) if !cancel.is_cancelled() => {
                            info!(
                                connection_id = %context.connection_id,
                                source = %context.languages.source,
                                target = %context.languages.target,
                                degraded = result.degraded,
                                has_audio = result.audio.is_some(),
                                elapsed_ms = started.elapsed().as_millis() as u64,
                                "Delivering translation"
                            );
                            self.metrics.result_delivered();
                            sink.deliver(result);
                        }
                        _ => {
                            debug!(connection_id = %context.connection_id, "Session closed mid-flight, dropping result");
                            self.metrics.result_dropped();
                            break;
                        }
                    }
                }
                Some(SessionEvent::Canceled(reason)) => {
                    debug!(connection_id = %context.connection_id, reason = %reason, "Recognizer canceled, worker stopping");
                    break;
                }
                Some(SessionEvent::SessionStopped) | None => break,
            }
        }

        events.close();
        while let Ok(event) = events.try_recv() {
            if matches!(event, SessionEvent::UtteranceRecognized(_)) {
                self.metrics.result_dropped();
            }
        }

        debug!(connection_id = %context.connection_id, "Pipeline worker finished");
    }
}
