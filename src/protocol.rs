//! # WebSocket Protocol
//!
//! JSON envelopes exchanged with clients over `/ws`.
//!
//! ## Envelope Format:
//! ```json
//! { "event": "send_audio_chunk", "data": { "roomId": "abc", "audioData": "UklGR..." } }
//! ```
//! Event names are snake_case, payload fields are camelCase. Events without a
//! payload (`end_audio_stream`) may omit `data` or send `null`.

use crate::pipeline::TranslationResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        #[serde(default)]
        language: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SendAudioChunk {
        room_id: String,
        /// Base64-encoded audio bytes
        audio_data: String,
        #[serde(default)]
        source_lang: Option<String>,
        #[serde(default)]
        target_lang: Option<String>,
    },
    EndAudioStream,
}

/// Messages sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    Connected { connection_id: String },
    #[serde(rename_all = "camelCase")]
    UserJoined { other_language: String },
    ReceiveTranslation(TranslationPayload),
    Error { code: String, message: String },
}

impl OutboundEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        OutboundEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// What the other participant receives for one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationPayload {
    /// Connection id of the speaker
    pub original_user: String,
    pub original_text: String,
    pub translation: String,
    /// Base64 of the encoded speech, `null` when synthesis failed
    pub audio_base64: Option<String>,
    pub translation_language: String,
}

impl TranslationPayload {
    pub fn from_result(speaker: &str, result: TranslationResult) -> Self {
        Self {
            original_user: speaker.to_string(),
            original_text: result.original,
            translation: result.translated,
            audio_base64: result.audio.map(|audio| STANDARD.encode(audio)),
            translation_language: result.target_language,
        }
    }
}

pub fn decode_audio(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_join_room() {
        let event: InboundEvent =
            serde_json::from_value(json!({"event": "join_room", "data": {"roomId": "r1", "language": "fr-FR"}})).unwrap();
        assert_eq!(
            event,
            InboundEvent::JoinRoom {
                room_id: "r1".to_string(),
                language: Some("fr-FR".to_string())
            }
        );

        let event: InboundEvent = serde_json::from_value(json!({"event": "join_room", "data": {"roomId": "r1"}})).unwrap();
        assert_eq!(event, InboundEvent::JoinRoom { room_id: "r1".to_string(), language: None });
    }

    #[test]
    fn test_parse_audio_chunk_with_optional_languages() {
        let event: InboundEvent = serde_json::from_value(json!({
            "event": "send_audio_chunk",
            "data": {"roomId": "r1", "audioData": "AQI=", "targetLang": "zh-CN"}
        }))
        .unwrap();

        assert_eq!(
            event,
            InboundEvent::SendAudioChunk {
                room_id: "r1".to_string(),
                audio_data: "AQI=".to_string(),
                source_lang: None,
                target_lang: Some("zh-CN".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_end_audio_stream() {
        let event: InboundEvent = serde_json::from_value(json!({"event": "end_audio_stream"})).unwrap();
        assert_eq!(event, InboundEvent::EndAudioStream);

        let event: InboundEvent = serde_json::from_value(json!({"event": "end_audio_stream", "data": null})).unwrap();
        assert_eq!(event, InboundEvent::EndAudioStream);
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_value::<InboundEvent>(json!({"event": "dance", "data": {}})).is_err());
    }

    #[test]
    fn test_translation_payload_encoding() {
        let result = TranslationResult {
            original: "Hello world".to_string(),
            translated: "Hola mundo".to_string(),
            audio: Some(vec![0x01, 0x02]),
            target_language: "es-ES".to_string(),
            degraded: false,
        };

        let event = OutboundEvent::ReceiveTranslation(TranslationPayload::from_result("conn-1", result));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "event": "receive_translation",
                "data": {
                    "originalUser": "conn-1",
                    "originalText": "Hello world",
                    "translation": "Hola mundo",
                    "audioBase64": "AQI=",
                    "translationLanguage": "es-ES"
                }
            })
        );
    }

    #[test]
    fn test_missing_audio_is_null() {
        let result = TranslationResult {
            original: "Hello world".to_string(),
            translated: "Hola mundo".to_string(),
            audio: None,
            target_language: "es-ES".to_string(),
            degraded: false,
        };

        let value = serde_json::to_value(TranslationPayload::from_result("conn-1", result)).unwrap();
        assert!(value["audioBase64"].is_null());
    }

    #[test]
    fn test_outbound_names() {
        let value = serde_json::to_value(OutboundEvent::UserJoined { other_language: "en-US".to_string() }).unwrap();
        assert_eq!(value, json!({"event": "user_joined", "data": {"otherLanguage": "en-US"}}));

        let value = serde_json::to_value(OutboundEvent::error("room_full", "Room r1 is full")).unwrap();
        assert_eq!(value["data"]["code"], "room_full");
    }

    #[test]
    fn test_decode_audio() {
        assert_eq!(decode_audio("AQI=").unwrap(), vec![1, 2]);
        assert!(decode_audio("not base64!").is_err());
    }
}
