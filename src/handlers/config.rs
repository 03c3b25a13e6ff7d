use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Effective configuration. Secrets are reported as configured or not, never echoed.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();
    let credentials = &config.credentials;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": serde_json::to_value(&config)?,
        "credentials": {
            "llm_api_key": credentials.has_llm_key(),
            "speech_key": credentials.speech_key.is_some(),
            "speech_region": credentials.speech_region
        }
    })))
}
