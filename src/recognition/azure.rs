//! # Azure Speech Continuous Recognition
//!
//! Speaks the Speech service WebSocket protocol directly with
//! `tokio-tungstenite`.
//!
//! ## Protocol Summary:
//! - Connect to `wss://{region}.stt.speech.microsoft.com/...?language=xx-XX`
//!   with the subscription key header
//! - Send one `speech.config` text message
//! - Send audio as binary messages: a 2-byte big-endian header length, the
//!   text headers (`Path: audio`), then the payload. The first payload is
//!   prefixed with a WAV header. An empty payload marks end of audio.
//! - Receive text messages: `speech.phrase` carries final results,
//!   `turn.end` closes the current turn
//!
//! ## Turns:
//! The service may end a turn on its own, for example after a silence
//! timeout. While the client is still sending audio the driver opens a new
//! turn on the same socket: a fresh `X-RequestId`, another `speech.config`
//! and a new WAV header ahead of the next chunk. Only a `turn.end` after the
//! end-of-audio frame ends the session.
//!
//! Each started stream runs on its own task and reports through the
//! [`RecognizerLink`] channels.

use super::{RecognizerEvent, RecognizerLink, SpeechRecognizer};
use crate::audio::PcmFormat;
use anyhow::Context;
use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_QUEUE: usize = 32;

pub struct AzureRecognizer {
    key: String,
    region: String,
    audio_queue_capacity: usize,
    format: PcmFormat,
}

impl AzureRecognizer {
    pub fn new(key: impl Into<String>, region: impl Into<String>, audio_queue_capacity: usize) -> Self {
        Self {
            key: key.into(),
            region: region.into(),
            audio_queue_capacity,
            format: PcmFormat::SPEECH,
        }
    }

    fn endpoint(&self, language: &str) -> String {
        format!(
            "wss://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={}&format=simple",
            self.region, language
        )
    }
}

#[async_trait]
impl SpeechRecognizer for AzureRecognizer {
    fn name(&self) -> &str {
        "azure-speech"
    }

    async fn start(&self, language: &str) -> anyhow::Result<RecognizerLink> {
        let connection_id = request_id();
        let url = self.endpoint(language);
        debug!(url = %url, language, "Connecting to speech service");

        let mut request = url.into_client_request().context("invalid speech endpoint")?;
        let headers = request.headers_mut();
        headers.insert("Ocp-Apim-Subscription-Key", HeaderValue::from_str(&self.key)?);
        headers.insert("X-ConnectionId", HeaderValue::from_str(&connection_id)?);

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .context("speech service connection failed")?;

        let (audio_tx, audio_rx) = mpsc::channel(self.audio_queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let shutdown = CancellationToken::new();

        let (sink, stream) = socket.split();
        tokio::spawn(drive(sink, stream, self.format, audio_rx, events_tx, shutdown.clone()));

        Ok(RecognizerLink {
            audio: audio_tx,
            events: events_rx,
            shutdown,
        })
    }
}

/// One recognition turn: its request id and whether the WAV header went out.
struct Turn {
    request: String,
    header_sent: bool,
}

impl Turn {
    fn begin() -> Self {
        Self {
            request: request_id(),
            header_sent: false,
        }
    }

    fn frame(&mut self, format: PcmFormat, bytes: &[u8]) -> Vec<u8> {
        if self.header_sent {
            return audio_frame(&self.request, bytes);
        }
        self.header_sent = true;
        let mut payload = format.stream_header().to_vec();
        payload.extend_from_slice(bytes);
        audio_frame(&self.request, &payload)
    }
}

async fn drive<S, R>(
    mut sink: S,
    mut stream: R,
    format: PcmFormat,
    mut audio: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<RecognizerEvent>,
    shutdown: CancellationToken,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    R: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let mut turn = Turn::begin();

    if let Err(e) = sink.send(Message::Text(speech_config_message(&turn.request).into())).await {
        let _ = events.send(RecognizerEvent::Canceled(format!("speech.config failed: {}", e))).await;
        return;
    }

    let mut audio_open = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
            chunk = audio.recv(), if audio_open => {
                let frame = match chunk {
                    Some(bytes) => turn.frame(format, &bytes),
                    None => {
                        audio_open = false;
                        audio_frame(&turn.request, &[])
                    }
                };

                if let Err(e) = sink.send(Message::Binary(frame.into())).await {
                    let _ = events.send(RecognizerEvent::Canceled(format!("audio write failed: {}", e))).await;
                    break;
                }
            }
            message = stream.next() => {
                let signal = match message {
                    Some(Ok(Message::Text(text))) => match ServiceMessage::parse(&text) {
                        Some(message) => message.into_signal(),
                        None => {
                            debug!("Ignoring unparseable speech service message");
                            None
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("closed by service: {} {}", u16::from(f.code), f.reason))
                            .unwrap_or_else(|| "closed by service".to_string());
                        Some(ServiceSignal::Event(RecognizerEvent::Canceled(reason)))
                    }
                    Some(Ok(_)) => None,
                    Some(Err(e)) => Some(ServiceSignal::Event(RecognizerEvent::Canceled(format!("speech socket error: {}", e)))),
                    None => Some(ServiceSignal::Event(RecognizerEvent::Canceled("speech socket ended".to_string()))),
                };

                let event = match signal {
                    None => continue,
                    Some(ServiceSignal::TurnEnded) if audio_open => {
                        turn = Turn::begin();
                        debug!(request_id = %turn.request, "Service ended the turn, starting a new one");
                        if let Err(e) = sink.send(Message::Text(speech_config_message(&turn.request).into())).await {
                            let _ = events.send(RecognizerEvent::Canceled(format!("speech.config failed: {}", e))).await;
                            break;
                        }
                        continue;
                    }
                    Some(ServiceSignal::TurnEnded) => RecognizerEvent::SessionStopped,
                    Some(ServiceSignal::Event(event)) => event,
                };

                let terminal = !matches!(event, RecognizerEvent::Recognized(_));
                if events.send(event).await.is_err() || terminal {
                    break;
                }
            }
        }
    }

    info!(request_id = %turn.request, "Speech service stream finished");
}

/// 32 hex characters, the id format the service expects.
fn request_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn speech_config_message(request: &str) -> String {
    let body = serde_json::json!({
        "context": {
            "system": { "version": env!("CARGO_PKG_VERSION") },
            "os": { "platform": std::env::consts::OS, "name": "babel-relay", "version": "" },
            "audio": {
                "source": { "type": "Stream", "samplerate": 16000, "bitspersample": 16, "channelcount": 1 }
            }
        }
    });

    format!(
        "Path: speech.config\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: application/json\r\n\r\n{}",
        request,
        timestamp(),
        body
    )
}

/// Binary audio message: header length (u16, big-endian), headers, payload.
pub fn audio_frame(request: &str, payload: &[u8]) -> Vec<u8> {
    let headers = format!(
        "Path: audio\r\nX-RequestId: {}\r\nX-Timestamp: {}\r\nContent-Type: audio/x-wav\r\n",
        request,
        timestamp()
    );

    let mut frame = vec![0u8; 2];
    BigEndian::write_u16(&mut frame[0..2], headers.len() as u16);
    frame.extend_from_slice(headers.as_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// What a service message means for the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceSignal {
    Event(RecognizerEvent),
    /// The service closed the current turn. Terminal only once audio has ended.
    TurnEnded,
}

/// A text message from the service, split into its path and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceMessage {
    pub path: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PhraseBody {
    recognition_status: String,
    #[serde(default)]
    display_text: Option<String>,
}

impl ServiceMessage {
    pub fn parse(raw: &str) -> Option<Self> {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let path = head.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("path").then(|| value.trim().to_string())
        })?;

        Some(Self {
            path,
            body: body.to_string(),
        })
    }

    /// Map the message onto a stream signal, if it carries one.
    pub fn into_signal(self) -> Option<ServiceSignal> {
        match self.path.as_str() {
            "speech.phrase" => {
                let phrase: PhraseBody = match serde_json::from_str(&self.body) {
                    Ok(phrase) => phrase,
                    Err(e) => {
                        warn!(error = %e, "Malformed speech.phrase body");
                        return None;
                    }
                };

                let event = match phrase.recognition_status.as_str() {
                    "Success" => RecognizerEvent::Recognized(phrase.display_text.unwrap_or_default()),
                    "Error" => RecognizerEvent::Canceled("recognition error reported by service".to_string()),
                    other => {
                        debug!(status = other, "Phrase without recognized text");
                        return None;
                    }
                };
                Some(ServiceSignal::Event(event))
            }
            "turn.end" => Some(ServiceSignal::TurnEnded),
            _ => None,
        }
    }
}
