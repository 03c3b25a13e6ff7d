//! # Configuration Management
//!
//! Loads the relay configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix (`APP_PIPELINE__TRANSLATION_TIMEOUT_MS=8000`)
//! - Deployment-platform variables (`HOST`, `PORT`) and provider secrets
//!   (`GEMINI_API_KEY`, `AZURE_SPEECH_KEY`, `AZURE_SPEECH_REGION`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Provider secret variables and `HOST`/`PORT`
//! 2. `APP_` prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Secrets never travel through the layered loader: they are read straight from
//! the environment after the rest of the configuration is built, and the
//! `Debug` output of [`Credentials`] redacts them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::time::Duration;

/// Main application configuration.
///
/// Split into logical groups so handlers and pipeline stages only need to look
/// at the section they care about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub languages: LanguageDefaults,
    pub pipeline: PipelineConfig,
    pub providers: ProvidersConfig,

    /// Upstream credentials, filled from the environment only.
    #[serde(default, skip_serializing)]
    pub credentials: Credentials,
}

/// Listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: accept connections on every interface (default, mobile clients connect over LAN)
/// - `host = "127.0.0.1"`: local development only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Language tags used when a client does not say which languages it speaks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDefaults {
    /// Source language for a chunk with no explicit or registered language
    pub default_source: String,
    /// Target language for a chunk with no explicit target
    pub default_target: String,
}

/// What the translation stage delivers when the language model call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Relay the untranslated utterance text
    EchoOriginal,
    /// Relay the fixed `fallback_sentinel` string
    Sentinel,
}

/// Per-session pipeline tuning.
///
/// ## Fields:
/// - `min_utterance_chars`: utterances with fewer non-whitespace characters are discarded
/// - `translation_timeout_ms` / `synthesis_timeout_ms`: upper bound on each upstream call
/// - `fallback_policy` / `fallback_sentinel`: degraded translation behavior
/// - `synthesize_fallback`: whether degraded text is still sent to speech synthesis
/// - `event_queue_capacity`: recognized utterances waiting for the orchestrator
/// - `audio_queue_capacity`: audio chunks waiting for the recognizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub min_utterance_chars: usize,
    pub translation_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    pub fallback_policy: FallbackPolicy,
    pub fallback_sentinel: String,
    pub synthesize_fallback: bool,
    pub event_queue_capacity: usize,
    pub audio_queue_capacity: usize,
}

impl PipelineConfig {
    pub fn translation_timeout(&self) -> Duration {
        Duration::from_millis(self.translation_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

/// Non-secret provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Language model used for translation (e.g., "gemini-2.5-flash")
    pub llm_model: String,
    /// Base URL of the generative language API
    pub llm_base_url: String,
}

/// Upstream secrets.
///
/// ## Availability rules:
/// - Missing `llm_api_key`: the process starts, translations degrade to the fallback policy
/// - Missing `speech_key` or `speech_region`: the process starts, no session can be created
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub llm_api_key: Option<String>,
    pub speech_key: Option<String>,
    pub speech_region: Option<String>,
}

impl Credentials {
    /// Overlay secrets from the provider environment variables.
    pub fn apply_env(&mut self) {
        if let Some(key) = non_empty_env("GEMINI_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Some(key) = non_empty_env("AZURE_SPEECH_KEY") {
            self.speech_key = Some(key);
        }
        if let Some(region) = non_empty_env("AZURE_SPEECH_REGION") {
            self.speech_region = Some(region);
        }
    }

    /// Speech key and region together, if both are present.
    pub fn speech(&self) -> Option<(&str, &str)> {
        match (self.speech_key.as_deref(), self.speech_region.as_deref()) {
            (Some(key), Some(region)) if !key.is_empty() && !region.is_empty() => Some((key, region)),
            _ => None,
        }
    }

    pub fn has_llm_key(&self) -> bool {
        self.llm_api_key.as_deref().is_some_and(|key| !key.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(value: &Option<String>) -> &'static str {
            if value.is_some() { "<redacted>" } else { "<unset>" }
        }

        f.debug_struct("Credentials")
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("speech_key", &redact(&self.speech_key))
            .field("speech_region", &self.speech_region)
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            languages: LanguageDefaults {
                default_source: "es-ES".to_string(),
                default_target: "en-US".to_string(),
            },
            pipeline: PipelineConfig {
                min_utterance_chars: 2,
                translation_timeout_ms: 10_000,
                synthesis_timeout_ms: 15_000,
                fallback_policy: FallbackPolicy::EchoOriginal,
                fallback_sentinel: "translation error".to_string(),
                synthesize_fallback: false,
                event_queue_capacity: 32,
                audio_queue_capacity: 256,
            },
            providers: ProvidersConfig {
                llm_model: "gemini-2.5-flash".to_string(),
                llm_base_url: "https://generativelanguage.googleapis.com".to_string(),
            },
            credentials: Credentials::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=8080`: override the listener port
    /// - `APP_PIPELINE__FALLBACK_POLICY=sentinel`: switch the translation fallback
    /// - `APP_LANGUAGES__DEFAULT_TARGET=fr-FR`: change the default target language
    /// - `PORT=8080`: special case for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.credentials.apply_env();
        Ok(config)
    }

    /// Reject configurations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.languages.default_source.trim().is_empty() || self.languages.default_target.trim().is_empty() {
            return Err(anyhow::anyhow!("Default languages must not be empty"));
        }

        let pipeline = &self.pipeline;
        if pipeline.min_utterance_chars == 0 {
            return Err(anyhow::anyhow!("Minimum utterance length must be greater than 0"));
        }

        if pipeline.translation_timeout_ms == 0 || pipeline.synthesis_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Stage timeouts must be greater than 0"));
        }

        if pipeline.event_queue_capacity == 0 || pipeline.audio_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Queue capacities must be greater than 0"));
        }

        Ok(())
    }

    /// Log which upstream credentials are missing. Never fails.
    pub fn report_missing_credentials(&self) {
        if !self.credentials.has_llm_key() {
            tracing::warn!("GEMINI_API_KEY is not set; translations will fall back to {:?}", self.pipeline.fallback_policy);
        }

        if self.credentials.speech().is_none() {
            tracing::warn!("AZURE_SPEECH_KEY / AZURE_SPEECH_REGION are not set; audio sessions cannot be created");
        }
    }
}
