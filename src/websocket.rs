//! # WebSocket Relay Handler
//!
//! Each WebSocket connection on `/ws` is one participant, represented by a
//! `RelaySocket` actor with a fresh UUID as its connection id.
//!
//! ## Connection Flow:
//! 1. Client connects, receives `connected {connectionId}`
//! 2. Client sends `join_room`; the room router pairs it with the other participant
//! 3. Client streams `send_audio_chunk` (or binary frames)
//! 4. Translations of its speech are relayed to the other participant as `receive_translation`
//! 5. `end_audio_stream` or disconnect tears the session down
//!
//! ## Ordering:
//! The actor never awaits. Audio chunks and stop requests are queued to a
//! per-connection ingest worker that applies them strictly in arrival order,
//! so a stop can never overtake a chunk that is still waiting for its
//! session to be created.
//!
//! ## Heartbeat:
//! The server pings every 30 seconds and closes connections that have been
//! silent for 60 seconds.

use crate::config::LanguageDefaults;
use crate::error::RegistryError;
use crate::pipeline::{LanguagePair, TranslationResult, TranslationSink};
use crate::protocol::{decode_audio, InboundEvent, OutboundEvent, TranslationPayload};
use crate::rooms::{JoinOutcome, PeerSink, RoomRouter};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Work handed from the actor to the ingest worker.
#[derive(Debug)]
enum IngestCommand {
    Audio(AudioChunk),
    EndStream,
}

#[derive(Debug)]
struct AudioChunk {
    room_id: String,
    bytes: Vec<u8>,
    source_lang: Option<String>,
    target_lang: Option<String>,
}

/// Source: explicit > registered on join > default. Target: explicit > default.
/// Empty strings count as absent.
fn resolve_languages(
    source: Option<&str>,
    target: Option<&str>,
    registered: Option<&str>,
    defaults: &LanguageDefaults,
) -> LanguagePair {
    let source = present(source)
        .or(present(registered))
        .unwrap_or(defaults.default_source.as_str());
    let target = present(target).unwrap_or(defaults.default_target.as_str());

    LanguagePair::new(source, target)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Delivers a speaker's results to the rest of their room.
struct RoomDelivery {
    rooms: Arc<RoomRouter>,
    room_id: String,
    speaker: String,
}

impl TranslationSink for RoomDelivery {
    fn deliver(&self, result: TranslationResult) {
        let payload = TranslationPayload::from_result(&self.speaker, result);
        let delivered = self
            .rooms
            .relay(&self.room_id, &self.speaker, OutboundEvent::ReceiveTranslation(payload));

        if delivered == 0 {
            debug!(room_id = %self.room_id, connection_id = %self.speaker, "No peer in room to receive translation");
        }
    }
}

async fn ingest_worker(
    connection_id: String,
    state: AppState,
    mut commands: mpsc::UnboundedReceiver<IngestCommand>,
    closed: CancellationToken,
) {
    let defaults = state.get_config().languages;

    while let Some(command) = commands.recv().await {
        if closed.is_cancelled() {
            break;
        }

        match command {
            IngestCommand::Audio(chunk) => feed_chunk(&connection_id, &state, &defaults, chunk).await,
            IngestCommand::EndStream => {
                if state.sessions.destroy_session(&connection_id) {
                    info!(connection_id = %connection_id, "Audio stream ended by client");
                } else {
                    debug!(connection_id = %connection_id, "end_audio_stream without an active session");
                }
            }
        }
    }

    state.sessions.destroy_session(&connection_id);
    debug!(connection_id = %connection_id, "Ingest worker finished");
}

async fn feed_chunk(connection_id: &str, state: &AppState, defaults: &LanguageDefaults, chunk: AudioChunk) {
    let registered = state.rooms.language_of(connection_id);
    let languages = resolve_languages(
        chunk.source_lang.as_deref(),
        chunk.target_lang.as_deref(),
        registered.as_deref(),
        defaults,
    );

    let sink = Arc::new(RoomDelivery {
        rooms: state.rooms.clone(),
        room_id: chunk.room_id,
        speaker: connection_id.to_string(),
    });

    match state.sessions.ensure_session(connection_id, languages, sink).await {
        Ok(session) => {
            if !session.write_audio(chunk.bytes) {
                debug!(connection_id, state = session.state().as_str(), "Audio chunk not accepted by session");
            }
        }
        Err(RegistryError::PreviouslyFailed) | Err(RegistryError::Closed) => {
            debug!(connection_id, "Dropping audio chunk, no session for this connection");
        }
        Err(err) => {
            debug!(connection_id, error = %err, "Dropping audio chunk, session creation failed");
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct Deliver(OutboundEvent);

impl PeerSink for Addr<RelaySocket> {
    fn send(&self, event: OutboundEvent) -> bool {
        if !self.connected() {
            return false;
        }
        self.do_send(Deliver(event));
        true
    }
}

pub struct RelaySocket {
    connection_id: String,
    state: AppState,
    ingest: Option<mpsc::UnboundedSender<IngestCommand>>,
    closed: CancellationToken,
    last_heartbeat: Instant,
}

impl RelaySocket {
    pub fn new(state: AppState) -> Self {
        Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            state,
            ingest: None,
            closed: CancellationToken::new(),
            last_heartbeat: Instant::now(),
        }
    }

    fn send_event(&self, ctx: &mut ws::WebsocketContext<Self>, event: &OutboundEvent) {
        match serde_json::to_string(event) {
            Ok(json) => ctx.text(json),
            Err(e) => error!(connection_id = %self.connection_id, error = %e, "Failed to serialize outbound event"),
        }
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, code: &str, message: &str) {
        warn!(connection_id = %self.connection_id, code, message, "Client error");
        self.send_event(ctx, &OutboundEvent::error(code, message));
    }

    fn enqueue(&self, command: IngestCommand) -> bool {
        self.ingest.as_ref().is_some_and(|tx| tx.send(command).is_ok())
    }

    fn handle_event(&mut self, event: InboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            InboundEvent::JoinRoom { room_id, language } => {
                let sink: Arc<dyn PeerSink> = Arc::new(ctx.address());
                match self.state.rooms.join(&room_id, &self.connection_id, language, sink) {
                    JoinOutcome::Joined { .. } => {}
                    JoinOutcome::RoomFull => {
                        self.send_error(ctx, "room_full", &format!("Room {} already has two participants", room_id));
                    }
                }
            }
            InboundEvent::SendAudioChunk {
                room_id,
                audio_data,
                source_lang,
                target_lang,
            } => match decode_audio(&audio_data) {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    self.enqueue(IngestCommand::Audio(AudioChunk {
                        room_id,
                        bytes,
                        source_lang,
                        target_lang,
                    }));
                }
                Err(e) => self.send_error(ctx, "invalid_audio", &format!("audioData is not valid base64: {}", e)),
            },
            InboundEvent::EndAudioStream => {
                self.enqueue(IngestCommand::EndStream);
            }
        }
    }

    fn handle_binary(&mut self, bytes: Vec<u8>, ctx: &mut ws::WebsocketContext<Self>) {
        if bytes.is_empty() {
            return;
        }

        let Some(room_id) = self.state.rooms.room_of(&self.connection_id) else {
            self.send_error(ctx, "not_in_room", "Join a room before sending audio");
            return;
        };

        self.enqueue(IngestCommand::Audio(AudioChunk {
            room_id,
            bytes,
            source_lang: None,
            target_lang: None,
        }));
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.connection_id, "WebSocket connection started");

        let (tx, rx) = mpsc::unbounded_channel();
        self.ingest = Some(tx);
        tokio::spawn(ingest_worker(
            self.connection_id.clone(),
            self.state.clone(),
            rx,
            self.closed.clone(),
        ));

        self.send_event(
            ctx,
            &OutboundEvent::Connected {
                connection_id: self.connection_id.clone(),
            },
        );

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection_id = %act.connection_id, "WebSocket heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.closed.cancel();
        self.ingest.take();

        let room = self.state.rooms.leave(&self.connection_id);
        self.state.sessions.destroy_session(&self.connection_id);

        info!(
            connection_id = %self.connection_id,
            room_id = room.as_deref().unwrap_or("-"),
            "WebSocket connection stopped"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        if msg.is_ok() {
            self.last_heartbeat = Instant::now();
        }

        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<InboundEvent>(&text) {
                Ok(event) => self.handle_event(event, ctx),
                Err(err) => self.send_error(ctx, "invalid_message", &format!("Invalid message: {}", err)),
            },
            Ok(ws::Message::Binary(data)) => self.handle_binary(data.to_vec(), ctx),
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(connection_id = %self.connection_id, "WebSocket closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.connection_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.connection_id, "WebSocket protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Deliver> for RelaySocket {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        self.send_event(ctx, &msg.0);
    }
}

pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    debug!("New WebSocket connection request from: {:?}", req.connection_info().peer_addr());
    ws::start(RelaySocket::new(app_state.get_ref().clone()), &req, stream)
}
