//! Phase orchestrator: the asynchronous work triggered by transitions.
//! Image generation runs as one task per submission; each task re-enters
//! the room critical section to record its result, so completions and
//! client commands interleave safely.

use crate::protocol::ServerMessage;
use crate::service::GenerationUpdate;
use crate::state::AppState;
use crate::types::{GamePhase, PlayerId, RoomId, SubmissionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Breather between progress fan-outs so clients can render each update.
const PROGRESS_PACING: Duration = Duration::from_millis(100);

/// Kick off generation for every pending prompt in the round. Called when
/// the last submit moved the round into `image_generate`.
pub fn spawn_generation(state: Arc<AppState>, room_id: RoomId, round_number: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_generation(state, room_id, round_number).await;
    })
}

async fn run_generation(state: Arc<AppState>, room_id: RoomId, round_number: u32) {
    let room = match state.service.get_room(&room_id).await {
        Ok(room) => room,
        Err(err) => {
            tracing::error!(%room_id, "Generation aborted, room unavailable: {}", err);
            return;
        }
    };
    let Some(round) = room.current_round() else {
        return;
    };
    if round.round_number != round_number {
        return;
    }

    let image_count = room.settings.image_count;
    let prompts: Vec<(PlayerId, String)> = round
        .prompts
        .values()
        .filter(|s| s.status == SubmissionStatus::Pending)
        .map(|s| (s.player_id.clone(), s.prompt.clone()))
        .collect();

    tracing::info!(
        %room_id,
        round_number,
        prompts = prompts.len(),
        "Generating images"
    );

    let rejections: Arc<Mutex<Vec<(PlayerId, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let tasks = prompts.into_iter().map(|(player_id, prompt)| {
        let state = state.clone();
        let room_id = room_id.clone();
        let rejections = rejections.clone();
        async move {
            match state
                .service
                .mark_generating(&room_id, round_number, &player_id)
                .await
            {
                Ok(Some(_)) => {}
                // Round moved on or the submission is gone.
                Ok(None) => return,
                Err(err) => {
                    tracing::error!(%room_id, %player_id, "mark_generating failed: {}", err);
                    return;
                }
            }

            let update = match state.images.generate(&prompt, image_count, &player_id).await {
                Ok(images) => GenerationUpdate::Ready(images),
                Err(err) if err.is_transient() => {
                    tracing::warn!(%room_id, %player_id, "Generation failed: {}", err);
                    GenerationUpdate::Failed
                }
                Err(policy) => {
                    tracing::info!(%room_id, %player_id, "Prompt rejected: {}", policy);
                    rejections
                        .lock()
                        .await
                        .push((player_id.clone(), policy.to_string()));
                    GenerationUpdate::Rejected
                }
            };

            match state
                .service
                .record_generation(&room_id, round_number, &player_id, update)
                .await
            {
                Ok(Some(updated)) => {
                    tokio::time::sleep(PROGRESS_PACING).await;
                    if let Some(game) = updated.game {
                        state
                            .gateway
                            .broadcast(&room_id, ServerMessage::ImageProgress { game })
                            .await;
                    }
                }
                Ok(None) => {
                    tracing::debug!(%room_id, %player_id, "Round ended before generation finished");
                }
                Err(err) => {
                    tracing::error!(%room_id, %player_id, "record_generation failed: {}", err);
                }
            }
        }
    });
    futures::future::join_all(tasks).await;

    match state.service.finish_generation(&room_id, round_number).await {
        Ok(Some((room, outcome))) => {
            if !outcome.rejected_players.is_empty() {
                // Round stays in image_generate; only the rejected
                // submitters hear about it.
                let rejections = rejections.lock().await;
                for player_id in &outcome.rejected_players {
                    let reason = rejections
                        .iter()
                        .find(|(id, _)| id == player_id)
                        .map(|(_, reason)| reason.clone())
                        .unwrap_or_else(|| "Prompt rejected by content policy".to_string());
                    state
                        .gateway
                        .unicast(
                            &room_id,
                            player_id,
                            ServerMessage::PromptRejected { reason },
                        )
                        .await;
                }
            } else if outcome.transitioned {
                if !outcome.failed_players.is_empty() {
                    tracing::warn!(
                        %room_id,
                        round_number,
                        failed = ?outcome.failed_players,
                        "Round continues without images for some players"
                    );
                }
                if let Some(game) = room.game {
                    state
                        .gateway
                        .broadcast(
                            &room_id,
                            ServerMessage::PhaseTransition {
                                phase: GamePhase::ImageSelect,
                                game,
                            },
                        )
                        .await;
                }
            }
        }
        Ok(None) => {
            // A resubmission is still in flight; its completion decides.
        }
        Err(err) => {
            tracing::error!(%room_id, "finish_generation failed: {}", err);
        }
    }
}

/// Score the round and fan out the results transition. Runs when the last
/// guess moved the round into `scoring`.
pub async fn run_scoring(state: &AppState, room_id: &str) {
    match state.service.score_round(room_id).await {
        Ok(room) => {
            if let Some(game) = room.game {
                state
                    .gateway
                    .broadcast(
                        room_id,
                        ServerMessage::PhaseTransition {
                            phase: GamePhase::RevealResults,
                            game,
                        },
                    )
                    .await;
            }
        }
        Err(err) => {
            tracing::error!(%room_id, "Scoring failed: {}", err);
            state
                .gateway
                .broadcast(
                    room_id,
                    ServerMessage::error("SCORING_FAILED", err.to_string()),
                )
                .await;
        }
    }
}
