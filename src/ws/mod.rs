pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::gateway::RoomEvent;
use crate::protocol::{ClientMessage, LeaveReason, ServerMessage};
use crate::state::AppState;
use crate::types::{PlayerId, RoomId};

/// The (room, player) pair a connection is bound to after `room:join`.
#[derive(Debug, Clone)]
pub struct Session {
    pub room_id: RoomId,
    pub player_id: PlayerId,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection: bind it to a room on `room:join`, then
/// interleave client commands with the room's event stream. Sends never
/// overlap because this loop is the only writer for the socket.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut session: Option<Session> = None;
    let mut events: Option<broadcast::Receiver<RoomEvent>> = None;

    loop {
        tokio::select! {
            event = async {
                match &mut events {
                    Some(rx) => rx.recv().await,
                    // Unbound connections only listen for commands.
                    None => std::future::pending().await,
                }
            } => {
                match event {
                    Ok(event) => {
                        let mine = match (&event.target, &session) {
                            (None, _) => true,
                            (Some(target), Some(session)) => *target == session.player_id,
                            (Some(_), None) => false,
                        };
                        if mine && send(&mut sender, &event.message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Connection lagged behind room events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        events = None;
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text);
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::JoinRoom { room_id, player_id }) => {
                                match handlers::handle_join(&state, &room_id, &player_id).await {
                                    Ok(room) => {
                                        events = Some(state.gateway.subscribe(&room_id).await);
                                        session = Some(Session { room_id: room_id.clone(), player_id });
                                        state
                                            .gateway
                                            .broadcast(&room_id, ServerMessage::RoomUpdate { room: room.clone() })
                                            .await;
                                        if send(&mut sender, &ServerMessage::RoomUpdate { room }).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        if send(&mut sender, &err).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                            Ok(ClientMessage::LeaveRoom) => {
                                if let Some(bound) = session.take() {
                                    handlers::handle_leave(&state, &bound, LeaveReason::Left).await;
                                }
                                events = None;
                            }
                            Ok(msg) => {
                                let reply = match &session {
                                    Some(session) => {
                                        handlers::handle_message(&state, session, msg).await
                                    }
                                    None => Some(ServerMessage::error(
                                        "PLAYER_NOT_IN_ROOM",
                                        "Join a room before sending game commands",
                                    )),
                                };
                                if let Some(reply) = reply {
                                    if send(&mut sender, &reply).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(err) => {
                                tracing::error!("Failed to parse client message: {}", err);
                                let reply = ServerMessage::error(
                                    "PARSE_ERROR",
                                    format!("Invalid message format: {}", err),
                                );
                                if send(&mut sender, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::error!("WebSocket error: {}", err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if let Some(session) = session {
        disconnect(&state, &session).await;
    }
}

async fn send(
    sender: &mut (impl SinkExt<Message> + Unpin),
    message: &ServerMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    sender.send(Message::Text(json.into())).await.map_err(|_| ())
}

/// Mark the player disconnected and tell the room. The seat stays
/// allocated; only the connection flag changes.
async fn disconnect(state: &AppState, session: &Session) {
    tracing::info!(
        room_id = %session.room_id,
        player_id = %session.player_id,
        "Session disconnected"
    );
    match state
        .service
        .update_connection(&session.room_id, &session.player_id, false)
        .await
    {
        Ok(room) => {
            state
                .gateway
                .broadcast(
                    &session.room_id,
                    ServerMessage::PlayerLeft {
                        player_id: session.player_id.clone(),
                        reason: LeaveReason::Disconnect,
                        new_host_id: None,
                    },
                )
                .await;
            state
                .gateway
                .broadcast(&session.room_id, ServerMessage::RoomUpdate { room })
                .await;
        }
        Err(err) => {
            // The room may have expired or been deleted already.
            tracing::debug!(
                room_id = %session.room_id,
                "Disconnect bookkeeping skipped: {}",
                err
            );
        }
    }
}
