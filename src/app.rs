use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::rooms::{ROOM_CAPACITY, normalize_room_id};
use crate::signaling_server::{SignalingState, websocket_handler};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub rooms: usize,
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room_id: String,
    pub occupants: usize,
    pub capacity: usize,
    pub full: bool,
}

pub fn router(state: SignalingState) -> Router {
    Router::new()
        .route("/webrtc", get(websocket_handler))
        .route("/api/health", get(health))
        .route("/api/rooms/:room_id", get(room_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<SignalingState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.get_active_sessions_count().await,
        rooms: state.get_room_count().await,
    })
}

async fn room_status(
    Path(room_id): Path<String>,
    State(state): State<SignalingState>,
) -> Response {
    // Look up the same trimmed id that join-room registers under.
    let normalized = normalize_room_id(&room_id).ok();
    let occupants = match &normalized {
        Some(id) => state.rooms.read().await.occupants(id).map(<[String]>::len),
        None => None,
    };

    match (normalized, occupants) {
        (Some(room_id), Some(occupants)) => Json(RoomResponse {
            room_id,
            occupants,
            capacity: ROOM_CAPACITY,
            full: occupants >= ROOM_CAPACITY,
        })
        .into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "room not found", "room_id": room_id })),
        )
            .into_response(),
    }
}
