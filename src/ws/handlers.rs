//! Command dispatch: validates authority, applies the operation through the
//! service and fans out the resulting notifications.

use super::Session;
use crate::error::{GameError, GameResult};
use crate::orchestrator;
use crate::protocol::{ClientMessage, LeaveReason, ServerMessage};
use crate::state::AppState;
use crate::types::{GamePhase, Room};
use std::sync::Arc;

/// Bind a connection to a room: the player must already hold a seat (issued
/// over HTTP) in that room. Returns the room for the initial snapshot.
pub async fn handle_join(
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &str,
) -> Result<Room, ServerMessage> {
    state
        .service
        .update_connection(room_id, player_id, true)
        .await
        .map_err(|err| to_error(&err, "JOIN_ROOM_FAILED"))
}

/// Remove a leaving (or kicked) player and tell the room, including the
/// new host when the seat that emptied was the host's.
pub async fn handle_leave(state: &Arc<AppState>, session: &Session, reason: LeaveReason) {
    match state
        .service
        .remove_player(&session.room_id, &session.player_id)
        .await
    {
        Ok((Some(room), new_host_id)) => {
            state
                .gateway
                .broadcast(
                    &session.room_id,
                    ServerMessage::PlayerLeft {
                        player_id: session.player_id.clone(),
                        reason,
                        new_host_id,
                    },
                )
                .await;
            state
                .gateway
                .broadcast(&session.room_id, ServerMessage::RoomUpdate { room })
                .await;
        }
        Ok((None, _)) => {
            // Last player out; the room is gone.
            state.gateway.drop_room(&session.room_id).await;
        }
        Err(err) => {
            tracing::debug!(
                room_id = %session.room_id,
                "Leave bookkeeping skipped: {}",
                err
            );
        }
    }
}

/// Handle one bound command. The return value is the unicast reply for the
/// calling connection; room-wide effects go through the gateway.
pub async fn handle_message(
    state: &Arc<AppState>,
    session: &Session,
    msg: ClientMessage,
) -> Option<ServerMessage> {
    let room_id = &session.room_id;
    let player_id = &session.player_id;

    match msg {
        // Handled at the socket level before a session exists.
        ClientMessage::JoinRoom { .. } | ClientMessage::LeaveRoom => None,

        ClientMessage::PlayerReady { is_ready } => {
            match state.service.set_ready(room_id, player_id, is_ready).await {
                Ok(room) => {
                    state
                        .gateway
                        .broadcast(
                            room_id,
                            ServerMessage::PlayerReadyChanged {
                                player_id: player_id.clone(),
                                is_ready,
                            },
                        )
                        .await;
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room })
                        .await;
                    None
                }
                Err(err) => Some(to_error(&err, "PLAYER_READY_FAILED")),
            }
        }

        ClientMessage::StartGame => {
            if let Some(denied) = require_host(state, room_id, player_id).await {
                return Some(denied);
            }
            match state.service.start_game(room_id, player_id).await {
                Ok(room) => {
                    let game = room.game.clone().expect("started game");
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::GameStarted { game })
                        .await;
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room })
                        .await;
                    None
                }
                Err(err) => Some(to_error(&err, "START_GAME_FAILED")),
            }
        }

        ClientMessage::SubmitPrompt { prompt } => {
            match state
                .service
                .submit_prompt(room_id, player_id, &prompt)
                .await
            {
                Ok((room, all_submitted)) => {
                    let round = room.current_round().expect("playing room has a round");
                    state
                        .gateway
                        .broadcast(
                            room_id,
                            ServerMessage::PromptSubmitted {
                                player_id: player_id.clone(),
                                submitted_count: round.prompts.len(),
                                total_players: room.players.len(),
                            },
                        )
                        .await;
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room: room.clone() })
                        .await;
                    if all_submitted {
                        let round_number = round.round_number;
                        let game = room.game.clone().expect("playing room has a game");
                        state
                            .gateway
                            .broadcast(
                                room_id,
                                ServerMessage::PhaseTransition {
                                    phase: GamePhase::ImageGenerate,
                                    game,
                                },
                            )
                            .await;
                        orchestrator::spawn_generation(
                            state.clone(),
                            room_id.clone(),
                            round_number,
                        );
                    }
                    None
                }
                Err(err) => Some(to_error(&err, "SUBMIT_PROMPT_FAILED")),
            }
        }

        ClientMessage::ResubmitPrompt { prompt } => {
            let result = state
                .service
                .resubmit_prompt(&state.images, room_id, player_id, &prompt)
                .await;
            match result {
                Ok((room, transitioned)) => {
                    if let Some(game) = room.game.clone() {
                        state
                            .gateway
                            .broadcast(room_id, ServerMessage::ImageProgress { game })
                            .await;
                    }
                    if transitioned {
                        if let Some(game) = room.game.clone() {
                            state
                                .gateway
                                .broadcast(
                                    room_id,
                                    ServerMessage::PhaseTransition {
                                        phase: GamePhase::ImageSelect,
                                        game,
                                    },
                                )
                                .await;
                        }
                    }
                    None
                }
                Err(err) if err.is_content_policy() => {
                    broadcast_progress(state, room_id).await;
                    Some(ServerMessage::PromptRejected {
                        reason: err.to_string(),
                    })
                }
                Err(err) => {
                    // A generation failure left the submission `failed` and
                    // the completion rule may just have advanced the round;
                    // precondition errors changed nothing and stay silent.
                    if matches!(err, GameError::Generation(_)) {
                        if let Ok(room) = state.service.get_room(room_id).await {
                            if let Some(game) = room.game {
                                state
                                    .gateway
                                    .broadcast(
                                        room_id,
                                        ServerMessage::ImageProgress { game: game.clone() },
                                    )
                                    .await;
                                if game.status == GamePhase::ImageSelect {
                                    state
                                        .gateway
                                        .broadcast(
                                            room_id,
                                            ServerMessage::PhaseTransition {
                                                phase: GamePhase::ImageSelect,
                                                game,
                                            },
                                        )
                                        .await;
                                }
                            }
                        }
                    }
                    Some(to_error(&err, "RESUBMIT_PROMPT_FAILED"))
                }
            }
        }

        ClientMessage::SelectImage { image_id } => {
            match state
                .service
                .select_image(room_id, player_id, &image_id)
                .await
            {
                Ok((room, all_selected)) => {
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room: room.clone() })
                        .await;
                    if all_selected {
                        if let Some(game) = room.game {
                            state
                                .gateway
                                .broadcast(
                                    room_id,
                                    ServerMessage::PhaseTransition {
                                        phase: GamePhase::RevealGuess,
                                        game,
                                    },
                                )
                                .await;
                        }
                    }
                    None
                }
                Err(err) => Some(to_error(&err, "SELECT_IMAGE_FAILED")),
            }
        }

        ClientMessage::SubmitGuess { image_id, guess } => {
            match state
                .service
                .submit_guess(room_id, player_id, &image_id, &guess)
                .await
            {
                Ok((room, outcome)) => {
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room: room.clone() })
                        .await;
                    if outcome.advanced {
                        // Same phase, new reveal cursor; clients re-render
                        // on the transition event.
                        if let Some(game) = room.game {
                            state
                                .gateway
                                .broadcast(
                                    room_id,
                                    ServerMessage::PhaseTransition {
                                        phase: GamePhase::RevealGuess,
                                        game,
                                    },
                                )
                                .await;
                        }
                    } else if outcome.scoring {
                        if let Some(game) = room.game {
                            state
                                .gateway
                                .broadcast(
                                    room_id,
                                    ServerMessage::PhaseTransition {
                                        phase: GamePhase::Scoring,
                                        game,
                                    },
                                )
                                .await;
                        }
                        orchestrator::run_scoring(state, room_id).await;
                    }
                    None
                }
                Err(err) => Some(to_error(&err, "SUBMIT_GUESS_FAILED")),
            }
        }

        ClientMessage::NavigateResult { direction } => {
            match state
                .service
                .navigate_result(room_id, player_id, direction)
                .await
            {
                Ok(room) => {
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room })
                        .await;
                    None
                }
                Err(err) => Some(to_error(&err, "NAVIGATE_RESULT_FAILED")),
            }
        }

        ClientMessage::CompleteReveal => {
            match state.service.complete_reveal(room_id, player_id).await {
                Ok((room, transitioned)) => {
                    if transitioned {
                        let phase = room.game.as_ref().expect("game present").status;
                        if let Some(game) = room.game.clone() {
                            state
                                .gateway
                                .broadcast(
                                    room_id,
                                    ServerMessage::PhaseTransition { phase, game },
                                )
                                .await;
                        }
                        state
                            .gateway
                            .broadcast(room_id, ServerMessage::RoomUpdate { room })
                            .await;
                    }
                    // Duplicate clicks are silently absorbed.
                    None
                }
                Err(err) => Some(to_error(&err, "COMPLETE_REVEAL_FAILED")),
            }
        }

        ClientMessage::NextRound => {
            if let Some(denied) = require_host(state, room_id, player_id).await {
                return Some(denied);
            }
            match state.service.start_next_round(room_id, player_id).await {
                Ok(room) => {
                    if let Some(game) = room.game.clone() {
                        state
                            .gateway
                            .broadcast(
                                room_id,
                                ServerMessage::PhaseTransition {
                                    phase: GamePhase::PromptSubmit,
                                    game,
                                },
                            )
                            .await;
                    }
                    state
                        .gateway
                        .broadcast(room_id, ServerMessage::RoomUpdate { room })
                        .await;
                    None
                }
                Err(err) => Some(to_error(&err, "NEXT_ROUND_FAILED")),
            }
        }
    }
}

/// Gatekeeper for host-only commands; the service re-validates.
async fn require_host(
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &str,
) -> Option<ServerMessage> {
    match host_check(state, room_id, player_id).await {
        Ok(()) => None,
        Err(err) => Some(to_error(&err, "NOT_HOST")),
    }
}

async fn host_check(state: &Arc<AppState>, room_id: &str, player_id: &str) -> GameResult<()> {
    let room = state.service.get_room(room_id).await?;
    if room.host_id != player_id {
        return Err(GameError::NotHost);
    }
    Ok(())
}

async fn broadcast_progress(state: &Arc<AppState>, room_id: &str) {
    if let Ok(room) = state.service.get_room(room_id).await {
        if let Some(game) = room.game {
            state
                .gateway
                .broadcast(room_id, ServerMessage::ImageProgress { game })
                .await;
        }
    }
}

/// Phase and validation errors surface under the failed operation's code;
/// everything else keeps its own taxonomy code.
fn to_error(err: &GameError, op_code: &'static str) -> ServerMessage {
    let code = match err {
        GameError::InvalidPhase { .. } | GameError::Validation(_) => op_code,
        other => other.code(),
    };
    ServerMessage::error(code, err.to_string())
}
