//! # Translation Stage
//!
//! Calls the language model once per utterance, bounded by a timeout, and
//! never fails: any error is logged and replaced by the configured fallback.
//!
//! ## Fallback Policies:
//! - **EchoOriginal** (default): the peer reads the untranslated utterance
//! - **Sentinel**: the peer reads a fixed marker such as "translation error"
//!
//! The same policy applies to every failure kind, so repeated failures always
//! look the same to the peer.

use super::LanguagePair;
use crate::config::{FallbackPolicy, PipelineConfig};
use crate::error::StageError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, StageError>;
}

/// Interpreter prompt sent to the language model.
pub fn build_prompt(text: &str, source: &str, target: &str) -> String {
    format!(
        "You are a professional interpreter. Translate the following text from {source} to {target}. \
         Translate naturally, the way a native {target} speaker would say it, not word for word. \
         Return only the translated text, with no explanations, notes, quotes or any additional commentary.\n\n\
         Text ({source}): {text}"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOutcome {
    pub text: String,
    pub degraded: bool,
}

pub struct TranslationStage {
    translator: Arc<dyn Translator>,
    timeout: Duration,
    policy: FallbackPolicy,
    sentinel: String,
}

impl TranslationStage {
    pub fn new(translator: Arc<dyn Translator>, config: &PipelineConfig) -> Self {
        Self {
            translator,
            timeout: config.translation_timeout(),
            policy: config.fallback_policy,
            sentinel: config.fallback_sentinel.clone(),
        }
    }

    pub async fn run(&self, text: &str, languages: &LanguagePair) -> TranslationOutcome {
        let started = Instant::now();

        match self.attempt(text, languages).await {
            Ok(translated) => {
                debug!(
                    translator = self.translator.name(),
                    source = %languages.source,
                    target = %languages.target,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Translation completed"
                );
                TranslationOutcome {
                    text: translated,
                    degraded: false,
                }
            }
            Err(err) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match &err {
                    StageError::Blocked { reason, details } => warn!(
                        translator = self.translator.name(),
                        reason = %reason,
                        details = details.as_deref().unwrap_or("none"),
                        elapsed_ms,
                        "Translation blocked by safety filter"
                    ),
                    other => warn!(
                        translator = self.translator.name(),
                        error = %other,
                        elapsed_ms,
                        "Translation failed"
                    ),
                }

                TranslationOutcome {
                    text: self.fallback_text(text),
                    degraded: true,
                }
            }
        }
    }

    async fn attempt(&self, text: &str, languages: &LanguagePair) -> Result<String, StageError> {
        let call = self.translator.translate(text, &languages.source, &languages.target);
        let translated = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StageError::Timeout {
                stage: "translation",
                after_ms: self.timeout.as_millis() as u64,
            })??;

        let trimmed = translated.trim();
        if trimmed.is_empty() {
            return Err(StageError::EmptyResponse);
        }

        Ok(trimmed.to_string())
    }

    pub fn fallback_text(&self, original: &str) -> String {
        match self.policy {
            FallbackPolicy::EchoOriginal => original.to_string(),
            FallbackPolicy::Sentinel => self.sentinel.clone(),
        }
    }
}
