//! Gemini translator.
//!
//! One non-streaming `generateContent` call per utterance. Safety refusals
//! come back as HTTP 200 with a block reason or a `SAFETY` finish reason, so
//! they are detected from the body rather than the status code.

use super::translation::{build_prompt, Translator};
use crate::error::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct GeminiTranslator {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GeminiTranslator {
    pub fn new(base_url: &str, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    category: String,
    probability: String,
}

fn describe_ratings(ratings: &[SafetyRating]) -> Option<String> {
    if ratings.is_empty() {
        return None;
    }

    Some(
        ratings
            .iter()
            .map(|r| format!("{}={}", r.category, r.probability))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

fn extract_translation(response: GenerateResponse) -> Result<String, StageError> {
    if let Some(feedback) = response.prompt_feedback {
        if let Some(reason) = feedback.block_reason {
            return Err(StageError::Blocked {
                reason,
                details: describe_ratings(&feedback.safety_ratings),
            });
        }
    }

    let candidate = response.candidates.into_iter().next().ok_or(StageError::EmptyResponse)?;
    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(StageError::Blocked {
            reason: "SAFETY".to_string(),
            details: describe_ratings(&candidate.safety_ratings),
        });
    }

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(StageError::EmptyResponse);
    }

    Ok(text)
}

#[async_trait]
impl Translator for GeminiTranslator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn translate(&self, text: &str, source: &str, target: &str) -> Result<String, StageError> {
        let api_key = self.api_key.as_deref().ok_or(StageError::Unconfigured("GEMINI_API_KEY"))?;

        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![RequestPart {
                    text: build_prompt(text, source, target),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.3 },
        };

        debug!(model = %self.model, source, target, "Requesting translation");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(&body)
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

        let parsed: GenerateResponse = response.json().await?;
        extract_translation(parsed)
    }
}
