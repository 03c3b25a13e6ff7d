//! Azure text-to-speech over the REST endpoint.
//!
//! The request body is SSML naming the voice and language; the response body
//! is the encoded audio. The HTTP response is consumed or dropped before
//! `synthesize` returns on every path, so no connection is held past a call.

use super::synthesis::{Synthesizer, OUTPUT_FORMAT};
use crate::error::StageError;
use async_trait::async_trait;
use tracing::debug;

pub struct AzureSynthesizer {
    /// Subscription key and region; `None` makes every call fail as unconfigured
    credentials: Option<(String, String)>,
    client: reqwest::Client,
}

impl AzureSynthesizer {
    pub fn new(credentials: Option<(&str, &str)>) -> Self {
        Self {
            credentials: credentials.map(|(key, region)| (key.to_string(), region.to_string())),
            client: reqwest::Client::new(),
        }
    }
}

fn endpoint(region: &str) -> String {
    format!("https://{}.tts.speech.microsoft.com/cognitiveservices/v1", region)
}

/// Escape the five XML special characters.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn build_ssml(text: &str, voice: &str, language: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{}'><voice name='{}'>{}</voice></speak>",
        escape_xml(language),
        escape_xml(voice),
        escape_xml(text)
    )
}

#[async_trait]
impl Synthesizer for AzureSynthesizer {
    fn name(&self) -> &str {
        "azure-tts"
    }

    async fn synthesize(&self, text: &str, voice: &str, language: &str) -> Result<Vec<u8>, StageError> {
        let (key, region) = self
            .credentials
            .as_ref()
            .ok_or(StageError::Unconfigured("AZURE_SPEECH_KEY"))?;

        debug!(voice, language, chars = text.chars().count(), "Requesting speech synthesis");

        let response = self
            .client
            .post(endpoint(region))
            .header("Ocp-Apim-Subscription-Key", key.as_str())
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "babel-relay")
            .body(build_ssml(text, voice, language))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StageError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
