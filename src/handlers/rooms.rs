use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Room occupancy, with each member's registered language and whether it is streaming.
pub async fn list_rooms(state: web::Data<AppState>) -> HttpResponse {
    let rooms: Vec<serde_json::Value> = state
        .rooms
        .summaries()
        .into_iter()
        .map(|room| {
            let members: Vec<serde_json::Value> = room
                .members
                .iter()
                .map(|member| {
                    json!({
                        "connection_id": member.connection_id,
                        "language": member.language,
                        "has_session": state.sessions.has_session(&member.connection_id)
                    })
                })
                .collect();

            json!({
                "room_id": room.room_id,
                "members": members
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": rooms.len(),
        "rooms": rooms
    }))
}

pub async fn list_sessions(state: web::Data<AppState>) -> HttpResponse {
    let sessions = state.sessions.summaries();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "sessions": sessions
    }))
}
