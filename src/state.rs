//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data<AppState>`.
//!
//! ## What lives here:
//! - **config**: the effective configuration, read-only after startup
//! - **metrics**: HTTP request counters collected by the metrics middleware
//! - **pipeline_metrics**: lock-free counters updated from session tasks
//! - **sessions**: the session registry (one pipeline session per connection)
//! - **rooms**: the room router pairing connections
//!
//! ## Arc Everywhere
//! `AppState` is cloned into every actix worker and every connection actor.
//! All fields are `Arc`s, so a clone is a handful of reference count bumps
//! and every clone sees the same registry and rooms.

use crate::config::AppConfig;
use crate::pipeline::azure_tts::AzureSynthesizer;
use crate::pipeline::gemini::GeminiTranslator;
use crate::pipeline::synthesis::Synthesizer;
use crate::pipeline::translation::Translator;
use crate::pipeline::PipelineOrchestrator;
use crate::recognition::azure::AzureRecognizer;
use crate::recognition::SpeechRecognizer;
use crate::rooms::RoomRouter;
use crate::session::SessionRegistry;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub pipeline_metrics: Arc<PipelineMetrics>,
    pub sessions: Arc<SessionRegistry>,
    pub rooms: Arc<RoomRouter>,
    pub start_time: Instant,
}

/// HTTP request metrics.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// The upstream services a session talks to.
pub struct Collaborators {
    /// `None` when speech credentials are missing; session creation then fails
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl Collaborators {
    /// Build the production collaborators from the loaded configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let credentials = &config.credentials;
        let speech = credentials.speech();

        let recognizer = speech.map(|(key, region)| {
            Arc::new(AzureRecognizer::new(key, region, config.pipeline.audio_queue_capacity)) as Arc<dyn SpeechRecognizer>
        });

        let translator = Arc::new(GeminiTranslator::new(
            &config.providers.llm_base_url,
            config.providers.llm_model.clone(),
            credentials.llm_api_key.clone(),
        ));

        let synthesizer = Arc::new(AzureSynthesizer::new(speech));

        Self {
            recognizer,
            translator,
            synthesizer,
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig, collaborators: Collaborators) -> Self {
        let pipeline_metrics = Arc::new(PipelineMetrics::default());

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            collaborators.translator,
            collaborators.synthesizer,
            &config.pipeline,
            pipeline_metrics.clone(),
        ));

        let sessions = Arc::new(SessionRegistry::new(
            collaborators.recognizer,
            orchestrator,
            config.pipeline.clone(),
            pipeline_metrics.clone(),
        ));

        let rooms = Arc::new(RoomRouter::new(config.languages.default_source.clone()));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            pipeline_metrics,
            sessions,
            rooms,
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

/// Counters updated from session tasks without taking a lock.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    utterances_processed: AtomicU64,
    translations_degraded: AtomicU64,
    synthesis_failures: AtomicU64,
    results_delivered: AtomicU64,
    results_dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineMetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub utterances_processed: u64,
    pub translations_degraded: u64,
    pub synthesis_failures: u64,
    pub results_delivered: u64,
    pub results_dropped: u64,
}

impl PipelineMetrics {
    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn utterance_processed(&self) {
        self.utterances_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn translation_degraded(&self) {
        self.translations_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn synthesis_failed(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_delivered(&self) {
        self.results_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn result_dropped(&self) {
        self.results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineMetricsSnapshot {
        PipelineMetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            utterances_processed: self.utterances_processed.load(Ordering::Relaxed),
            translations_degraded: self.translations_degraded.load(Ordering::Relaxed),
            synthesis_failures: self.synthesis_failures.load(Ordering::Relaxed),
            results_delivered: self.results_delivered.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
        }
    }
}
