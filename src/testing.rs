//! Stub collaborators shared by the unit tests.

use crate::config::{AppConfig, PipelineConfig};
use crate::error::StageError;
use crate::pipeline::synthesis::Synthesizer;
use crate::pipeline::translation::Translator;
use crate::pipeline::{TranslationResult, TranslationSink};
use crate::protocol::OutboundEvent;
use crate::recognition::{RecognizerEvent, RecognizerLink, SpeechRecognizer};
use crate::rooms::PeerSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn pipeline_config() -> PipelineConfig {
    AppConfig::default().pipeline
}

/// Give spawned tasks a chance to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

struct ScriptedStream {
    language: String,
    events: mpsc::Sender<RecognizerEvent>,
    audio: Option<mpsc::Receiver<Vec<u8>>>,
}

/// Recognizer whose events are pushed by the test.
#[derive(Default)]
pub struct ScriptedRecognizer {
    streams: Mutex<Vec<ScriptedStream>>,
    starts: AtomicUsize,
    released: Arc<AtomicUsize>,
    start_delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl ScriptedRecognizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        let recognizer = Self::default();
        *recognizer.start_delay.lock() = Some(delay);
        Arc::new(recognizer)
    }

    pub fn failing() -> Arc<Self> {
        let recognizer = Self::default();
        recognizer.fail.store(true, Ordering::SeqCst);
        Arc::new(recognizer)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Streams whose shutdown token has been cancelled.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn languages(&self) -> Vec<String> {
        self.streams.lock().iter().map(|s| s.language.clone()).collect()
    }

    pub fn take_audio(&self, index: usize) -> mpsc::Receiver<Vec<u8>> {
        self.streams.lock()[index].audio.take().expect("audio receiver already taken")
    }

    /// Push an event into stream `index`. Ignored once the adapter stopped listening.
    pub async fn emit(&self, index: usize, event: RecognizerEvent) {
        let sender = self.streams.lock()[index].events.clone();
        let _ = sender.send(event).await;
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self, language: &str) -> anyhow::Result<RecognizerLink> {
        let delay = *self.start_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted start failure");
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        let (audio_tx, audio_rx) = mpsc::channel(8);
        let (events_tx, events_rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();

        let released = self.released.clone();
        let watched = shutdown.clone();
        tokio::spawn(async move {
            watched.cancelled().await;
            released.fetch_add(1, Ordering::SeqCst);
        });

        self.streams.lock().push(ScriptedStream {
            language: language.to_string(),
            events: events_tx,
            audio: Some(audio_rx),
        });

        Ok(RecognizerLink {
            audio: audio_tx,
            events: events_rx,
            shutdown,
        })
    }
}

/// Translator returning a fixed answer, or echoing its input.
pub struct CannedTranslator {
    reply: Option<Result<String, StageError>>,
    delay: Mutex<Option<Duration>>,
    delays_by_text: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl CannedTranslator {
    fn with_reply(reply: Option<Result<String, StageError>>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay: Mutex::new(None),
            delays_by_text: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(text: &str) -> Arc<Self> {
        Self::with_reply(Some(Ok(text.to_string())))
    }

    pub fn failing(error: StageError) -> Arc<Self> {
        Self::with_reply(Some(Err(error)))
    }

    pub fn echo() -> Arc<Self> {
        Self::with_reply(None)
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn with_delay_for(self: Arc<Self>, text: &str, delay: Duration) -> Arc<Self> {
        self.delays_by_text.lock().insert(text.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Translator for CannedTranslator {
    fn name(&self) -> &str {
        "canned"
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, StageError> {
        self.calls
            .lock()
            .push((text.to_string(), source.to_string(), target.to_string()));

        let delay = self.delays_by_text.lock().get(text).copied().or(*self.delay.lock());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            Some(reply) => reply.clone(),
            None => Ok(text.to_string()),
        }
    }
}

/// Synthesizer that records the voice it was asked for.
pub struct RecordingSynthesizer {
    reply: Result<Vec<u8>, StageError>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl RecordingSynthesizer {
    fn with_reply(reply: Result<Vec<u8>, StageError>) -> Arc<Self> {
        Arc::new(Self {
            reply,
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(audio: Vec<u8>) -> Arc<Self> {
        Self::with_reply(Ok(audio))
    }

    pub fn failing(error: StageError) -> Arc<Self> {
        Self::with_reply(Err(error))
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        *self.delay.lock() = Some(delay);
        self
    }

    /// `(text, voice, language)` per call.
    pub fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for RecordingSynthesizer {
    fn name(&self) -> &str {
        "recording"
    }

    async fn synthesize(&self, text: &str, voice: &str, language: &str) -> Result<Vec<u8>, StageError> {
        self.calls
            .lock()
            .push((text.to_string(), voice.to_string(), language.to_string()));

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.reply.clone()
    }
}

/// Sink forwarding results into a channel the test reads from.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TranslationResult>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TranslationResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl TranslationSink for ChannelSink {
    fn deliver(&self, result: TranslationResult) {
        let _ = self.tx.send(result);
    }
}

/// Room member that keeps every event it was sent.
#[derive(Default)]
pub struct RecordingPeer {
    events: Mutex<Vec<OutboundEvent>>,
    gone: AtomicBool,
}

impl RecordingPeer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }

    pub fn disconnect(&self) {
        self.gone.store(true, Ordering::SeqCst);
    }
}

impl PeerSink for RecordingPeer {
    fn send(&self, event: OutboundEvent) -> bool {
        if self.gone.load(Ordering::SeqCst) {
            return false;
        }
        self.events.lock().push(event);
        true
    }
}
