//! # Session Registry
//!
//! Maps connection ids to live sessions. The map is only mutated by
//! `ensure_session`, `destroy_session` and the recognizer-driven `retire`.
//!
//! ## Closing the creation race:
//! Two chunks for a brand-new connection can arrive back to back, and creating
//! a session awaits the recognizer handshake. So `ensure_session` first
//! reserves the id under the map lock by inserting a `OnceCell`, before any
//! await. Every caller for that id then awaits the same cell, and only one of
//! them runs the initializer. At most one recognizer is ever started per id.
//!
//! ## Failed creation:
//! When creation fails (missing credentials, recognizer refused) the
//! initializer replaces the slot with a `Failed` marker before it returns, so
//! callers waiting on the same cell see the marker and never retry. Later
//! chunks for that connection are dropped quietly until `destroy_session`
//! clears the marker.
//!
//! ## Recognizer-driven teardown:
//! The adapter's terminal hook calls `retire` as soon as the recognizer
//! cancels or stops. The slot is removed and the session token cancelled right
//! away, so the next chunk starts a fresh session and nothing still in flight
//! is delivered.

use super::Session;
use crate::config::PipelineConfig;
use crate::error::RegistryError;
use crate::pipeline::orchestrator::SessionContext;
use crate::pipeline::{LanguagePair, PipelineOrchestrator, TranslationSink};
use crate::recognition::{CloseReason, RecognitionAdapter, SpeechRecognizer, TerminalHook};
use crate::state::PipelineMetrics;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, error, info};

enum Slot {
    Reserved(Arc<OnceCell<Arc<Session>>>),
    Failed,
}

/// Snapshot of one live session for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub connection_id: String,
    pub source_language: String,
    pub target_language: String,
    pub state: &'static str,
    pub created_at: String,
}

pub struct SessionRegistry {
    slots: Mutex<HashMap<String, Slot>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    orchestrator: Arc<PipelineOrchestrator>,
    pipeline: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
}

impl SessionRegistry {
    pub fn new(
        recognizer: Option<Arc<dyn SpeechRecognizer>>,
        orchestrator: Arc<PipelineOrchestrator>,
        pipeline: PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            recognizer,
            orchestrator,
            pipeline,
            metrics,
        }
    }

    /// Return the connection's session, creating it if absent.
    ///
    /// `languages` and `sink` only matter for the call that creates the
    /// session; later calls get the existing session unchanged.
    pub async fn ensure_session(
        self: &Arc<Self>,
        connection_id: &str,
        languages: LanguagePair,
        sink: Arc<dyn TranslationSink>,
    ) -> Result<Arc<Session>, RegistryError> {
        let cell = {
            let mut slots = self.slots.lock();
            match slots.get(connection_id) {
                Some(Slot::Failed) => return Err(RegistryError::PreviouslyFailed),
                Some(Slot::Reserved(cell)) => cell.clone(),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    slots.insert(connection_id.to_string(), Slot::Reserved(cell.clone()));
                    cell
                }
            }
        };

        let session = cell
            .get_or_try_init(|| async {
                let opened = self.open_session(connection_id, &cell, languages, sink).await;
                if opened.is_err() {
                    self.mark_failed(connection_id, &cell);
                }
                opened
            })
            .await?
            .clone();

        if self.holds(connection_id, &cell) {
            Ok(session)
        } else {
            // Destroyed or retired while the recognizer was starting.
            if session.shutdown(CloseReason::Stopped) {
                self.metrics.session_closed();
            }
            Err(RegistryError::Closed)
        }
    }

    fn mark_failed(&self, connection_id: &str, cell: &Arc<OnceCell<Arc<Session>>>) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(connection_id), Some(Slot::Reserved(current)) if Arc::ptr_eq(current, cell)) {
            slots.insert(connection_id.to_string(), Slot::Failed);
        }
    }

    async fn open_session(
        self: &Arc<Self>,
        connection_id: &str,
        cell: &Arc<OnceCell<Arc<Session>>>,
        languages: LanguagePair,
        sink: Arc<dyn TranslationSink>,
    ) -> Result<Arc<Session>, RegistryError> {
        // A waiter can end up here after the first initializer failed.
        if !self.holds(connection_id, cell) {
            return Err(RegistryError::PreviouslyFailed);
        }

        let Some(recognizer) = self.recognizer.clone() else {
            error!(connection_id, "Cannot create session: speech credentials are missing");
            return Err(RegistryError::MissingCredentials);
        };

        let (events_tx, events_rx) = mpsc::channel(self.pipeline.event_queue_capacity);
        let adapter = RecognitionAdapter::new(connection_id, self.pipeline.min_utterance_chars);

        let registry = Arc::downgrade(self);
        let slot = Arc::downgrade(cell);
        let id = connection_id.to_string();
        let on_terminal: TerminalHook = Box::new(move |reason| {
            if let (Some(registry), Some(cell)) = (registry.upgrade(), slot.upgrade()) {
                registry.retire(&id, &cell, reason);
            }
        });

        if let Err(e) = adapter
            .activate(recognizer.as_ref(), &languages.source, events_tx, on_terminal)
            .await
        {
            error!(connection_id, error = %e, "Cannot create session: recognizer failed to start");
            return Err(RegistryError::Recognizer(e.to_string()));
        }

        let session = Arc::new(Session::new(connection_id, languages.clone(), adapter));
        let context = SessionContext {
            connection_id: connection_id.to_string(),
            languages: languages.clone(),
            cancel: session.cancellation(),
        };

        self.orchestrator.spawn(context, events_rx, sink);

        self.metrics.session_opened();
        info!(
            connection_id,
            source = %languages.source,
            target = %languages.target,
            "Session created"
        );
        Ok(session)
    }

    fn holds(&self, connection_id: &str, cell: &Arc<OnceCell<Arc<Session>>>) -> bool {
        matches!(
            self.slots.lock().get(connection_id),
            Some(Slot::Reserved(current)) if Arc::ptr_eq(current, cell)
        )
    }

    pub fn get_session(&self, connection_id: &str) -> Option<Arc<Session>> {
        match self.slots.lock().get(connection_id) {
            Some(Slot::Reserved(cell)) => cell.get().cloned(),
            _ => None,
        }
    }

    /// Tear down the connection's session and clear any failure marker.
    /// Returns `true` if a live session was closed. Safe on unknown ids.
    pub fn destroy_session(&self, connection_id: &str) -> bool {
        let removed = self.slots.lock().remove(connection_id);

        let Some(Slot::Reserved(cell)) = removed else {
            return false;
        };
        let Some(session) = cell.get().cloned() else {
            debug!(connection_id, "Session destroyed before it finished starting");
            return false;
        };

        let closed = session.shutdown(CloseReason::Stopped);
        if closed {
            self.metrics.session_closed();
            info!(connection_id, "Session destroyed");
        }
        closed
    }

    /// Remove the session held in `cell` after its recognizer ended, unless
    /// the connection already moved on to a different slot.
    fn retire(&self, connection_id: &str, cell: &Arc<OnceCell<Arc<Session>>>, reason: CloseReason) {
        let removed = {
            let mut slots = self.slots.lock();
            let current = matches!(
                slots.get(connection_id),
                Some(Slot::Reserved(live)) if Arc::ptr_eq(live, cell)
            );
            if current {
                slots.remove(connection_id);
            }
            current
        };

        if !removed {
            debug!(connection_id, "Ignoring recognizer end for a replaced session");
            return;
        }

        // Still starting: ensure_session sees the slot gone and closes it.
        let Some(session) = cell.get() else {
            return;
        };

        if session.shutdown(reason.clone()) {
            self.metrics.session_closed();
            info!(connection_id, reason = reason.as_str(), "Session retired by recognizer");
        }
    }

    /// Close every session. Used on process shutdown.
    pub fn shutdown_all(&self) -> usize {
        let ids: Vec<String> = self.slots.lock().keys().cloned().collect();
        ids.iter().filter(|id| self.destroy_session(id)).count()
    }

    pub fn active_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Reserved(cell) if cell.initialized()))
            .count()
    }

    pub fn has_session(&self, connection_id: &str) -> bool {
        self.get_session(connection_id).is_some()
    }

    pub fn summaries(&self) -> Vec<SessionSummary> {
        let sessions: Vec<Arc<Session>> = self
            .slots
            .lock()
            .values()
            .filter_map(|slot| match slot {
                Slot::Reserved(cell) => cell.get().cloned(),
                Slot::Failed => None,
            })
            .collect();

        sessions
            .iter()
            .map(|session| SessionSummary {
                connection_id: session.connection_id().to_string(),
                source_language: session.languages().source.clone(),
                target_language: session.languages().target.clone(),
                state: session.state().as_str(),
                created_at: session.created_at().to_rfc3339(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::{AdapterState, RecognizerEvent};
    use crate::testing::{pipeline_config, settle, CannedTranslator, ChannelSink, RecordingSynthesizer, ScriptedRecognizer};
    use std::time::Duration;

    fn registry(recognizer: Option<Arc<ScriptedRecognizer>>) -> (Arc<SessionRegistry>, Arc<PipelineMetrics>) {
        registry_with(recognizer, CannedTranslator::ok("Hola mundo"))
    }

    fn registry_with(
        recognizer: Option<Arc<ScriptedRecognizer>>,
        translator: Arc<CannedTranslator>,
    ) -> (Arc<SessionRegistry>, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::default());
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            translator,
            RecordingSynthesizer::ok(vec![1, 2]),
            &pipeline_config(),
            metrics.clone(),
        ));
        let recognizer = recognizer.map(|r| r as Arc<dyn SpeechRecognizer>);
        let registry = SessionRegistry::new(recognizer, orchestrator, pipeline_config(), metrics.clone());
        (Arc::new(registry), metrics)
    }

    fn pair() -> LanguagePair {
        LanguagePair::new("en-US", "es-ES")
    }

    #[tokio::test]
    async fn test_ensure_session_is_idempotent() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        let first = registry.ensure_session("conn-1", pair(), sink.clone()).await.unwrap();
        let second = registry
            .ensure_session("conn-1", LanguagePair::new("fr-FR", "zh-CN"), sink)
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.languages(), &pair());
        assert_eq!(recognizer.starts(), 1);
        assert_eq!(recognizer.languages(), vec!["en-US".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_first_chunks_start_one_recognizer() {
        let recognizer = ScriptedRecognizer::slow(Duration::from_millis(50));
        let (registry, metrics) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        let a = tokio::spawn({
            let registry = registry.clone();
            let sink = sink.clone();
            async move { registry.ensure_session("conn-1", pair(), sink).await }
        });
        let b = tokio::spawn({
            let registry = registry.clone();
            let sink = sink.clone();
            async move { registry.ensure_session("conn-1", pair(), sink).await }
        });

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(recognizer.starts(), 1);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(metrics.snapshot().sessions_opened, 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_marks_failed() {
        let (registry, _) = registry(None);
        let (sink, _results) = ChannelSink::new();

        let first = registry.ensure_session("conn-1", pair(), sink.clone()).await;
        assert_eq!(first.err(), Some(RegistryError::MissingCredentials));

        let second = registry.ensure_session("conn-1", pair(), sink.clone()).await;
        assert_eq!(second.err(), Some(RegistryError::PreviouslyFailed));
        assert!(registry.get_session("conn-1").is_none());

        assert!(!registry.destroy_session("conn-1"));
        let third = registry.ensure_session("conn-1", pair(), sink).await;
        assert_eq!(third.err(), Some(RegistryError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_recognizer_start_failure_is_contained() {
        let recognizer = ScriptedRecognizer::failing();
        let (registry, _) = registry(Some(recognizer));
        let (sink, _results) = ChannelSink::new();

        let result = registry.ensure_session("conn-1", pair(), sink).await;
        assert!(matches!(result, Err(RegistryError::Recognizer(_))));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, metrics) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        let session = registry.ensure_session("conn-1", pair(), sink).await.unwrap();
        assert!(registry.destroy_session("conn-1"));
        assert!(!registry.destroy_session("conn-1"));
        assert!(!registry.destroy_session("never-existed"));

        settle().await;
        assert_eq!(session.state(), AdapterState::Closed);
        assert!(!session.write_audio(vec![1]));
        assert_eq!(recognizer.released(), 1);
        assert_eq!(metrics.snapshot().sessions_closed, 1);
    }

    #[tokio::test]
    async fn test_destroy_racing_cancellation_releases_once() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, metrics) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        registry.ensure_session("conn-1", pair(), sink).await.unwrap();
        recognizer.emit(0, RecognizerEvent::Canceled("network".to_string())).await;
        registry.destroy_session("conn-1");
        settle().await;
        registry.destroy_session("conn-1");

        assert_eq!(recognizer.released(), 1);
        assert_eq!(metrics.snapshot().sessions_closed, 1);
        assert!(registry.get_session("conn-1").is_none());
    }

    #[tokio::test]
    async fn test_recognizer_cancellation_retires_session() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        registry.ensure_session("conn-1", pair(), sink.clone()).await.unwrap();
        recognizer.emit(0, RecognizerEvent::SessionStopped).await;
        settle().await;

        assert!(!registry.has_session("conn-1"));

        // The next chunk starts a fresh session.
        let fresh = registry.ensure_session("conn-1", pair(), sink).await.unwrap();
        assert_eq!(fresh.state(), AdapterState::Active);
        assert_eq!(recognizer.starts(), 2);
    }

    #[tokio::test]
    async fn test_stale_retire_does_not_remove_newer_session() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        registry.ensure_session("conn-1", pair(), sink.clone()).await.unwrap();
        registry.destroy_session("conn-1");
        let new = registry.ensure_session("conn-1", pair(), sink).await.unwrap();

        let old_cell = Arc::new(OnceCell::new());
        registry.retire("conn-1", &old_cell, CloseReason::SessionStopped);
        let current = registry.get_session("conn-1").unwrap();
        assert!(Arc::ptr_eq(&current, &new));
        assert_eq!(new.state(), AdapterState::Active);
    }

    #[tokio::test]
    async fn test_destroy_during_creation_closes_new_session() {
        let recognizer = ScriptedRecognizer::slow(Duration::from_millis(50));
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        let pending = tokio::spawn({
            let registry = registry.clone();
            async move { registry.ensure_session("conn-1", pair(), sink).await }
        });
        settle().await;
        assert!(!registry.destroy_session("conn-1"));

        assert_eq!(pending.await.unwrap().err(), Some(RegistryError::Closed));
        settle().await;
        assert_eq!(recognizer.released(), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_audio_flows_to_recognizer_and_results_to_sink() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, mut results) = ChannelSink::new();

        let session = registry.ensure_session("conn-1", pair(), sink).await.unwrap();
        assert!(session.write_audio(vec![9, 9]));
        assert_eq!(recognizer.take_audio(0).recv().await, Some(vec![9, 9]));

        recognizer.emit(0, RecognizerEvent::Recognized("x".to_string())).await;
        recognizer.emit(0, RecognizerEvent::Recognized("Hello world".to_string())).await;

        let result = results.recv().await.unwrap();
        assert_eq!(result.original, "Hello world");
        assert_eq!(result.translated, "Hola mundo");
        assert_eq!(result.audio, Some(vec![1, 2]));
        assert!(results.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_all() {
        let recognizer = ScriptedRecognizer::new();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        registry.ensure_session("a", pair(), sink.clone()).await.unwrap();
        registry.ensure_session("b", pair(), sink).await.unwrap();
        assert_eq!(registry.summaries().len(), 2);

        assert_eq!(registry.shutdown_all(), 2);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_mid_translation_retires_immediately() {
        let recognizer = ScriptedRecognizer::new();
        let translator = CannedTranslator::ok("Hola").with_delay(Duration::from_millis(300));
        let (registry, metrics) = registry_with(Some(recognizer.clone()), translator);
        let (sink, mut results) = ChannelSink::new();

        let first = registry.ensure_session("conn-1", pair(), sink.clone()).await.unwrap();
        recognizer.emit(0, RecognizerEvent::Recognized("Hello world".to_string())).await;
        recognizer.emit(0, RecognizerEvent::Canceled("network".to_string())).await;
        settle().await;

        assert!(!registry.has_session("conn-1"));
        assert!(first.is_closed());
        assert_eq!(metrics.snapshot().sessions_closed, 1);

        let second = registry.ensure_session("conn-1", pair(), sink).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.write_audio(vec![1]));
        assert_eq!(recognizer.starts(), 2);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(results.try_recv().is_err());
        assert_eq!(metrics.snapshot().results_dropped, 1);
    }

    #[tokio::test]
    async fn test_failed_start_is_not_retried_by_waiters() {
        let recognizer = ScriptedRecognizer::failing();
        let (registry, _) = registry(Some(recognizer.clone()));
        let (sink, _results) = ChannelSink::new();

        let attempts: Vec<_> = (0..3)
            .map(|_| {
                let registry = registry.clone();
                let sink = sink.clone();
                tokio::spawn(async move { registry.ensure_session("conn-1", pair(), sink).await })
            })
            .collect();

        let mut errors = Vec::new();
        for attempt in attempts {
            errors.push(attempt.await.unwrap().err());
        }

        let started = errors.iter().filter(|e| matches!(e, Some(RegistryError::Recognizer(_)))).count();
        assert_eq!(started, 1);
        assert!(errors
            .iter()
            .all(|e| matches!(e, Some(RegistryError::Recognizer(_)) | Some(RegistryError::PreviouslyFailed))));
    }
}
