//! # Error Handling
//!
//! Three families of errors live here:
//!
//! - **AppError**: returned by HTTP handlers and converted into JSON responses
//! - **StageError**: produced by the translation and synthesis stages; never
//!   fatal, the orchestrator turns it into a degraded result
//! - **RegistryError**: produced when a session cannot be created; logged and
//!   contained to the connection that triggered it
//!
//! ## Why hand-written enums:
//! Each variant carries exactly the context its log line needs, and `Display`
//! decides how it reads in the logs.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// HTTP-facing errors.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Converts errors into JSON responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "config_error",
///     "message": "Server port cannot be 0",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

/// Failure of a single translation or synthesis call.
///
/// Stage errors are recovered locally: translation falls back to the
/// configured policy, synthesis leaves the audio out of the result.
#[derive(Debug, Clone, PartialEq)]
pub enum StageError {
    /// The collaborator has no credentials to call its upstream service
    Unconfigured(&'static str),
    /// The call did not finish within the configured bound
    Timeout { stage: &'static str, after_ms: u64 },
    /// The upstream answered with a non-success status
    Http { status: u16, body: String },
    /// The language model refused the content
    Blocked { reason: String, details: Option<String> },
    /// The upstream answered successfully but with nothing usable
    EmptyResponse,
    /// Connection, TLS or decoding failure
    Transport(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Unconfigured(what) => write!(f, "{} is not configured", what),
            StageError::Timeout { stage, after_ms } => write!(f, "{} timed out after {}ms", stage, after_ms),
            StageError::Http { status, body } => write!(f, "upstream returned {}: {}", status, body),
            StageError::Blocked { reason, details } => match details {
                Some(details) => write!(f, "blocked by safety filter ({}): {}", reason, details),
                None => write!(f, "blocked by safety filter ({})", reason),
            },
            StageError::EmptyResponse => write!(f, "upstream returned an empty response"),
            StageError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl From<reqwest::Error> for StageError {
    fn from(err: reqwest::Error) -> Self {
        StageError::Transport(err.to_string())
    }
}

/// Why a session could not be created for a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// Speech key or region is missing from the environment
    MissingCredentials,
    /// An earlier creation attempt for this connection already failed
    PreviouslyFailed,
    /// The session was torn down while it was still being created
    Closed,
    /// The recognition collaborator refused to start
    Recognizer(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::MissingCredentials => {
                write!(f, "speech credentials are missing (AZURE_SPEECH_KEY / AZURE_SPEECH_REGION)")
            }
            RegistryError::PreviouslyFailed => write!(f, "session creation already failed for this connection"),
            RegistryError::Closed => write!(f, "session was closed during creation"),
            RegistryError::Recognizer(msg) => write!(f, "recognizer failed to start: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}
