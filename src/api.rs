//! HTTP surface: out-of-band room create/join/fetch used before a
//! persistent session exists, plus the liveness/readiness probes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::codes;
use crate::error::GameError;
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::types::{Room, RoomSettings};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    #[serde(alias = "displayName")]
    pub player_name: Option<String>,
    pub settings: Option<RoomSettings>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_code: Option<String>,
    #[serde(alias = "displayName")]
    pub player_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomTicket {
    pub room_id: String,
    pub room_code: String,
    pub player_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// POST /rooms/create
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateRoomRequest>,
) -> Response {
    let Some(name) = body.player_name else {
        return error_body(StatusCode::BAD_REQUEST, "playerName is required");
    };

    match state.service.create_room(&name, body.settings).await {
        Ok((room, player_id)) => Json(RoomTicket {
            room_id: room.id,
            room_code: room.code,
            player_id,
        })
        .into_response(),
        Err(err @ GameError::Validation(_)) => {
            error_body(StatusCode::BAD_REQUEST, err.to_string())
        }
        Err(err) => {
            tracing::error!("Room creation failed: {}", err);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// POST /rooms/join
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JoinRoomRequest>,
) -> Response {
    let Some(name) = body.player_name else {
        return error_body(StatusCode::BAD_REQUEST, "playerName is required");
    };
    let Some(code) = body.room_code else {
        return error_body(StatusCode::BAD_REQUEST, "roomCode is required");
    };
    let code = code.trim().to_uppercase();
    if !codes::is_valid_code(&code) {
        return error_body(StatusCode::BAD_REQUEST, "Invalid room code");
    }

    match state.service.join_room(&code, &name).await {
        Ok((room, player_id)) => {
            // Tell the sessions already in the room about the newcomer.
            let player = room.players[&player_id].clone();
            state
                .gateway
                .broadcast(&room.id, ServerMessage::PlayerJoined { player })
                .await;
            state
                .gateway
                .broadcast(&room.id, ServerMessage::RoomUpdate { room: room.clone() })
                .await;

            Json(RoomTicket {
                room_id: room.id,
                room_code: room.code,
                player_id,
            })
            .into_response()
        }
        Err(err @ GameError::Store(crate::store::StoreError::Unavailable(_))) => {
            tracing::error!("Join failed: {}", err);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        Err(err) => error_body(StatusCode::BAD_REQUEST, err.to_string()),
    }
}

#[derive(Debug, Serialize)]
pub struct RoomResponse {
    pub room: Room,
}

/// GET /rooms/{code} — bootstrap fetch before the session opens.
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let code = code.trim().to_uppercase();
    if !codes::is_valid_code(&code) {
        return error_body(StatusCode::NOT_FOUND, "Room not found");
    }

    match state.service.get_room_by_code(&code).await {
        Ok(room) => Json(RoomResponse { room }).into_response(),
        Err(GameError::Store(crate::store::StoreError::NotFound)) => {
            error_body(StatusCode::NOT_FOUND, "Room not found")
        }
        Err(err) => {
            tracing::error!("Room fetch failed: {}", err);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// GET /health — 200 while the KV store answers.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            tracing::warn!("Health check failed: {}", err);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// GET /ready — 200 only once the store finished initializing.
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    if state.is_ready() {
        StatusCode::OK.into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}
