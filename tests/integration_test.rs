use promptguessr::config::AppConfig;
use promptguessr::gateway::RoomEvent;
use promptguessr::images::{
    GenerateRequest, ImageError, ImageProvider, ImageResult, ImageService, MockProvider,
};
use promptguessr::protocol::{ClientMessage, LeaveReason, NavDirection, ServerMessage};
use promptguessr::state::AppState;
use promptguessr::store::MemoryStore;
use promptguessr::types::*;
use promptguessr::ws::handlers::{handle_join, handle_leave, handle_message};
use promptguessr::ws::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn app_with(provider: Box<dyn ImageProvider>) -> Arc<AppState> {
    let store = Arc::new(MemoryStore::new());
    let images = ImageService::new(provider, None, Duration::from_secs(5));
    Arc::new(AppState::new(AppConfig::default(), store, images))
}

fn app() -> Arc<AppState> {
    app_with(Box::new(MockProvider::instant()))
}

/// Mock wrapper that fails transiently for prompts mentioning "glitch".
struct FlakyProvider {
    inner: MockProvider,
}

impl FlakyProvider {
    fn new() -> Self {
        Self {
            inner: MockProvider::instant(),
        }
    }
}

#[async_trait::async_trait]
impl ImageProvider for FlakyProvider {
    async fn generate(&self, request: &GenerateRequest) -> ImageResult<Vec<GeneratedImage>> {
        if request.prompt.contains("glitch") {
            return Err(ImageError::ApiError("upstream went away".into()));
        }
        self.inner.generate(request).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

fn session(room_id: &str, player_id: &str) -> Session {
    Session {
        room_id: room_id.to_string(),
        player_id: player_id.to_string(),
    }
}

/// Create a room over the service (the HTTP surface's job), bind sessions
/// for every named player and ready them all up.
async fn lobby(state: &Arc<AppState>, names: &[&str]) -> (RoomId, Vec<PlayerId>) {
    let (room, host) = state.service.create_room(names[0], None).await.unwrap();
    let mut ids = vec![host];
    for name in &names[1..] {
        let (_, id) = state.service.join_room(&room.code, name).await.unwrap();
        ids.push(id);
    }
    for id in &ids {
        handle_join(state, &room.id, id).await.unwrap();
        let reply = handle_message(
            state,
            &session(&room.id, id),
            ClientMessage::PlayerReady { is_ready: true },
        )
        .await;
        assert!(reply.is_none(), "ready failed: {:?}", reply);
    }
    (room.id, ids)
}

async fn start_game(state: &Arc<AppState>, room_id: &str, host: &str) {
    let reply = handle_message(state, &session(room_id, host), ClientMessage::StartGame).await;
    assert!(reply.is_none(), "start failed: {:?}", reply);
}

async fn submit_prompt(state: &Arc<AppState>, room_id: &str, player_id: &str, prompt: &str) {
    let reply = handle_message(
        state,
        &session(room_id, player_id),
        ClientMessage::SubmitPrompt {
            prompt: prompt.to_string(),
        },
    )
    .await;
    assert!(reply.is_none(), "submit failed: {:?}", reply);
}

/// Poll the room until the game reaches the phase; generation runs on
/// spawned tasks, so transitions land asynchronously.
async fn wait_for_phase(state: &Arc<AppState>, room_id: &str, phase: GamePhase) -> Room {
    for _ in 0..200 {
        let room = state.service.get_room(room_id).await.unwrap();
        if room.game.as_ref().map(|g| g.status) == Some(phase) {
            return room;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {:?}", phase);
}

async fn wait_for_submission_status(
    state: &Arc<AppState>,
    room_id: &str,
    player_id: &str,
    status: SubmissionStatus,
) -> Room {
    for _ in 0..200 {
        let room = state.service.get_room(room_id).await.unwrap();
        if room
            .current_round()
            .and_then(|r| r.prompts.get(player_id))
            .map(|s| s.status)
            == Some(status)
        {
            return room;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for submission status {:?}", status);
}

/// Drain everything currently queued on a room event receiver.
fn drain(rx: &mut broadcast::Receiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phase_transitions(events: &[RoomEvent]) -> Vec<GamePhase> {
    events
        .iter()
        .filter_map(|e| match &e.message {
            ServerMessage::PhaseTransition { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

/// Scenario A: two players, perfect guesses, tied leaderboard ranked by
/// join order.
#[tokio::test]
async fn happy_path_with_mock_images() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob"]).await;
    let (alice, bob) = (&ids[0], &ids[1]);

    start_game(&state, &room_id, alice).await;
    let room = state.service.get_room(&room_id).await.unwrap();
    assert_eq!(room.game.as_ref().unwrap().status, GamePhase::PromptSubmit);

    submit_prompt(&state, &room_id, alice, "a blue cat").await;
    submit_prompt(&state, &room_id, bob, "a red dog running").await;

    // Generator returns 4 images each, then the round advances.
    let room = wait_for_phase(&state, &room_id, GamePhase::ImageSelect).await;
    let round = room.current_round().unwrap();
    for id in [alice, bob] {
        let submission = &round.prompts[id];
        assert_eq!(submission.status, SubmissionStatus::Ready);
        assert_eq!(submission.images.len(), 4);
    }

    // Alice picks her image 2, Bob his image 1.
    let alice_image = round.prompts[alice].images[2].id.clone();
    let bob_image = round.prompts[bob].images[1].id.clone();
    let reply = handle_message(
        &state,
        &session(&room_id, alice),
        ClientMessage::SelectImage {
            image_id: alice_image.clone(),
        },
    )
    .await;
    assert!(reply.is_none());
    let reply = handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::SelectImage {
            image_id: bob_image.clone(),
        },
    )
    .await;
    assert!(reply.is_none());

    let room = state.service.get_room(&room_id).await.unwrap();
    let round = room.current_round().unwrap();
    assert_eq!(round.status, RoundPhase::RevealGuess);
    assert_eq!(round.current_reveal_index, 0);
    assert_eq!(round.reveal_order[0], alice_image);

    // Reveal 0 is Alice's image; Bob guesses it exactly.
    let reply = handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::SubmitGuess {
            image_id: alice_image.clone(),
            guess: "a blue cat".to_string(),
        },
    )
    .await;
    assert!(reply.is_none());

    let room = state.service.get_room(&room_id).await.unwrap();
    assert_eq!(room.current_round().unwrap().current_reveal_index, 1);

    // Reveal 1 is Bob's image; Alice guesses it exactly, which closes the
    // reveal and triggers scoring.
    let reply = handle_message(
        &state,
        &session(&room_id, alice),
        ClientMessage::SubmitGuess {
            image_id: bob_image.clone(),
            guess: "a red dog running".to_string(),
        },
    )
    .await;
    assert!(reply.is_none());

    let room = wait_for_phase(&state, &room_id, GamePhase::RevealResults).await;
    let round = room.current_round().unwrap();
    assert_eq!(round.scores[alice], 100);
    assert_eq!(round.scores[bob], 100);
    assert!(round.bonus_points.is_empty(), "mean 100 earns no stumper");

    let leaderboard = &room.game.as_ref().unwrap().leaderboard;
    assert_eq!(leaderboard.scores[alice].total_score, 100);
    assert_eq!(leaderboard.scores[bob].total_score, 100);
    assert_eq!(
        leaderboard.rankings,
        vec![alice.clone(), bob.clone()],
        "ties break by earliest join"
    );
}

/// Scenario B: a content-policy rejection holds the round open for the
/// rejected submitter alone, and resubmission completes it.
#[tokio::test]
async fn content_policy_rejection_and_resubmission() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob", "Carol"]).await;
    let (alice, bob, carol) = (&ids[0], &ids[1], &ids[2]);

    start_game(&state, &room_id, alice).await;
    let mut rx = state.gateway.subscribe(&room_id).await;

    submit_prompt(&state, &room_id, alice, "a calm blue lake").await;
    submit_prompt(&state, &room_id, carol, "a misty green forest").await;
    // The mock provider rejects denylisted prompts.
    submit_prompt(&state, &room_id, bob, "something nsfw here").await;

    wait_for_submission_status(&state, &room_id, bob, SubmissionStatus::Rejected).await;
    // Give the remaining tasks and the completion rule a beat to finish.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let room = state.service.get_room(&room_id).await.unwrap();
    let round = room.current_round().unwrap();
    assert_eq!(round.status, RoundPhase::ImageGenerate, "round stays put");
    assert_eq!(round.prompts[alice].status, SubmissionStatus::Ready);
    assert_eq!(round.prompts[carol].status, SubmissionStatus::Ready);

    let events = drain(&mut rx);
    let rejections: Vec<_> = events
        .iter()
        .filter(|e| matches!(e.message, ServerMessage::PromptRejected { .. }))
        .collect();
    assert_eq!(rejections.len(), 1, "exactly one rejection notice");
    assert_eq!(
        rejections[0].target.as_deref(),
        Some(bob.as_str()),
        "only Bob is told"
    );
    let progress = events
        .iter()
        .filter(|e| matches!(e.message, ServerMessage::ImageProgress { .. }))
        .count();
    assert!(progress >= 2, "peers saw generation progress");
    assert!(
        phase_transitions(&events)
            .iter()
            .all(|p| *p != GamePhase::ImageSelect),
        "no transition while a rejection is pending"
    );

    // Bob resubmits an acceptable prompt; this call generates synchronously
    // and moves the round on.
    let reply = handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::ResubmitPrompt {
            prompt: "a quiet mountain village".to_string(),
        },
    )
    .await;
    assert!(reply.is_none(), "resubmit failed: {:?}", reply);

    let room = state.service.get_room(&room_id).await.unwrap();
    let round = room.current_round().unwrap();
    assert_eq!(round.status, RoundPhase::ImageSelect);
    assert_eq!(round.prompts[bob].status, SubmissionStatus::Ready);
    assert_eq!(round.prompts[bob].images.len(), 4);

    let events = drain(&mut rx);
    assert!(phase_transitions(&events).contains(&GamePhase::ImageSelect));
}

/// A resubmission that fails transiently is tolerated like any other
/// failed submission: once it was the last blocking rejection, the round
/// advances to image_select without it.
#[tokio::test]
async fn failed_resubmission_still_advances_the_round() {
    let state = app_with(Box::new(FlakyProvider::new()));
    let (room_id, ids) = lobby(&state, &["Alice", "Bob", "Carol"]).await;
    let (alice, bob, carol) = (&ids[0], &ids[1], &ids[2]);

    start_game(&state, &room_id, alice).await;
    submit_prompt(&state, &room_id, alice, "a calm blue lake").await;
    submit_prompt(&state, &room_id, carol, "a misty green forest").await;
    submit_prompt(&state, &room_id, bob, "something nsfw here").await;

    wait_for_submission_status(&state, &room_id, bob, SubmissionStatus::Rejected).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut rx = state.gateway.subscribe(&room_id).await;

    // Bob's replacement prompt hits a transient provider failure.
    let reply = handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::ResubmitPrompt {
            prompt: "a glitching arcade cabinet".to_string(),
        },
    )
    .await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => {
            assert_eq!(code, "GENERATION_FAILED");
        }
        other => panic!("expected error, got {:?}", other),
    }

    // No rejection blocks the round any more, so it moves on without
    // Bob's images.
    let room = state.service.get_room(&room_id).await.unwrap();
    let round = room.current_round().unwrap();
    assert_eq!(round.status, RoundPhase::ImageSelect);
    assert_eq!(round.prompts[bob].status, SubmissionStatus::Failed);
    assert!(round.prompts[bob].images.is_empty());
    assert_eq!(round.prompts[alice].status, SubmissionStatus::Ready);
    assert_eq!(round.prompts[carol].status, SubmissionStatus::Ready);

    let events = drain(&mut rx);
    assert!(phase_transitions(&events).contains(&GamePhase::ImageSelect));

    // The two players with images can still finish the selection.
    for player in [alice, carol] {
        let image = {
            let room = state.service.get_room(&room_id).await.unwrap();
            room.current_round().unwrap().prompts[player].images[0]
                .id
                .clone()
        };
        let reply = handle_message(
            &state,
            &session(&room_id, player),
            ClientMessage::SelectImage { image_id: image },
        )
        .await;
        assert!(reply.is_none(), "select failed: {:?}", reply);
    }
    let room = state.service.get_room(&room_id).await.unwrap();
    assert_eq!(
        room.current_round().unwrap().status,
        RoundPhase::RevealGuess
    );
}

/// A transient-style resubmission precondition: only rejected prompts may
/// be resubmitted.
#[tokio::test]
async fn resubmit_requires_a_rejected_prompt() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob"]).await;
    start_game(&state, &room_id, &ids[0]).await;

    submit_prompt(&state, &room_id, &ids[0], "a calm blue lake").await;
    let reply = handle_message(
        &state,
        &session(&room_id, &ids[0]),
        ClientMessage::ResubmitPrompt {
            prompt: "a different prompt".to_string(),
        },
    )
    .await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => {
            assert_eq!(code, "RESUBMIT_PROMPT_FAILED");
        }
        other => panic!("expected error, got {:?}", other),
    }
}

/// Scenario C: a stumper image pays its creator 50 and the guessers keep
/// their low scores.
#[tokio::test]
async fn stumper_bonus_scenario() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob", "Carol"]).await;
    let (alice, bob, carol) = (&ids[0], &ids[1], &ids[2]);

    start_game(&state, &room_id, alice).await;
    submit_prompt(&state, &room_id, alice, "hexagonal prism artifact").await;
    submit_prompt(&state, &room_id, bob, "a red dog running").await;
    submit_prompt(&state, &room_id, carol, "a blue cat sleeping").await;

    let room = wait_for_phase(&state, &room_id, GamePhase::ImageSelect).await;
    let round = room.current_round().unwrap();
    let images: Vec<ImageId> = [alice, bob, carol]
        .iter()
        .map(|id| round.prompts[*id].images[0].id.clone())
        .collect();

    for (player, image) in ids.iter().zip(&images) {
        handle_message(
            &state,
            &session(&room_id, player),
            ClientMessage::SelectImage {
                image_id: image.clone(),
            },
        )
        .await;
    }

    // Alice's image first: wildly wrong guesses.
    for (guesser, guess) in [(bob, "wooden spoon"), (carol, "orange sunset")] {
        let reply = handle_message(
            &state,
            &session(&room_id, guesser),
            ClientMessage::SubmitGuess {
                image_id: images[0].clone(),
                guess: guess.to_string(),
            },
        )
        .await;
        assert!(reply.is_none());
    }
    // Bob's image: exact guesses.
    for (guesser, guess) in [(alice, "a red dog running"), (carol, "a red dog running")] {
        handle_message(
            &state,
            &session(&room_id, guesser),
            ClientMessage::SubmitGuess {
                image_id: images[1].clone(),
                guess: guess.to_string(),
            },
        )
        .await;
    }
    // Carol's image: exact guesses.
    for (guesser, guess) in [(alice, "a blue cat sleeping"), (bob, "a blue cat sleeping")] {
        handle_message(
            &state,
            &session(&room_id, guesser),
            ClientMessage::SubmitGuess {
                image_id: images[2].clone(),
                guess: guess.to_string(),
            },
        )
        .await;
    }

    let room = wait_for_phase(&state, &room_id, GamePhase::RevealResults).await;
    let round = room.current_round().unwrap();

    assert_eq!(round.bonus_points.get(&images[0]), Some(&50));
    assert_eq!(round.bonus_points.len(), 1, "only Alice's image stumped");

    let bob_guess = round.guesses_for(&images[0]).unwrap()[bob].score.unwrap();
    let carol_guess = round.guesses_for(&images[0]).unwrap()[carol].score.unwrap();
    assert!(bob_guess < 40 && carol_guess < 40);

    // Alice: stumper bonus + two perfect guesses.
    assert_eq!(round.scores[alice], 50 + 100 + 100);
    assert_eq!(round.scores[bob], bob_guess + 100);
    assert_eq!(round.scores[carol], carol_guess + 100);
}

/// Scenario D: the host leaves; the next-earliest joiner inherits the room.
#[tokio::test]
async fn host_migration_on_leave() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob", "Carol"]).await;
    let (alice, bob) = (&ids[0], &ids[1]);

    let mut rx = state.gateway.subscribe(&room_id).await;
    handle_leave(&state, &session(&room_id, alice), LeaveReason::Left).await;

    let room = state.service.get_room(&room_id).await.unwrap();
    assert_eq!(room.players.len(), 2);
    assert_eq!(&room.host_id, bob);
    assert!(room.players[bob].is_host);

    let events = drain(&mut rx);
    let left = events
        .iter()
        .find_map(|e| match &e.message {
            ServerMessage::PlayerLeft {
                player_id,
                reason,
                new_host_id,
            } => Some((player_id.clone(), *reason, new_host_id.clone())),
            _ => None,
        })
        .expect("player_left was broadcast");
    assert_eq!(&left.0, alice);
    assert_eq!(left.1, LeaveReason::Left);
    assert_eq!(left.2.as_deref(), Some(bob.as_str()));
}

/// Scenario E: the last prompt lands while generation interleaves;
/// the round transitions to image_select exactly once.
#[tokio::test]
async fn concurrent_generation_transitions_once() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob"]).await;
    start_game(&state, &room_id, &ids[0]).await;

    let mut rx = state.gateway.subscribe(&room_id).await;
    submit_prompt(&state, &room_id, &ids[0], "a blue cat sitting").await;
    submit_prompt(&state, &room_id, &ids[1], "a red dog running").await;

    let room = wait_for_phase(&state, &room_id, GamePhase::ImageSelect).await;
    let round = room.current_round().unwrap();
    assert!(round
        .prompts
        .values()
        .all(|s| s.status == SubmissionStatus::Ready));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let events = drain(&mut rx);
    let selects = phase_transitions(&events)
        .into_iter()
        .filter(|p| *p == GamePhase::ImageSelect)
        .count();
    assert_eq!(selects, 1, "exactly one transition to image_select");
}

/// Scenario F: a double-clicked continue button must not double-fire.
#[tokio::test]
async fn duplicate_complete_reveal_is_a_noop() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob"]).await;
    let (alice, bob) = (&ids[0], &ids[1]);
    start_game(&state, &room_id, alice).await;

    submit_prompt(&state, &room_id, alice, "a blue cat sitting").await;
    submit_prompt(&state, &room_id, bob, "a red dog running").await;
    let room = wait_for_phase(&state, &room_id, GamePhase::ImageSelect).await;
    let round = room.current_round().unwrap();
    let alice_image = round.prompts[alice].images[0].id.clone();
    let bob_image = round.prompts[bob].images[0].id.clone();

    for (player, image) in [(alice, &alice_image), (bob, &bob_image)] {
        handle_message(
            &state,
            &session(&room_id, player),
            ClientMessage::SelectImage {
                image_id: image.clone(),
            },
        )
        .await;
    }
    handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::SubmitGuess {
            image_id: alice_image.clone(),
            guess: "a blue cat sitting".to_string(),
        },
    )
    .await;
    handle_message(
        &state,
        &session(&room_id, alice),
        ClientMessage::SubmitGuess {
            image_id: bob_image.clone(),
            guess: "a red dog running".to_string(),
        },
    )
    .await;
    wait_for_phase(&state, &room_id, GamePhase::RevealResults).await;

    // Anyone can page through the results; the cursor clamps.
    handle_message(
        &state,
        &session(&room_id, bob),
        ClientMessage::NavigateResult {
            direction: NavDirection::Next,
        },
    )
    .await;

    let mut rx = state.gateway.subscribe(&room_id).await;
    let reply = handle_message(
        &state,
        &session(&room_id, alice),
        ClientMessage::CompleteReveal,
    )
    .await;
    assert!(reply.is_none());
    let reply = handle_message(
        &state,
        &session(&room_id, alice),
        ClientMessage::CompleteReveal,
    )
    .await;
    assert!(reply.is_none());

    let room = state.service.get_room(&room_id).await.unwrap();
    assert_eq!(room.game.as_ref().unwrap().status, GamePhase::RoundEnd);

    let events = drain(&mut rx);
    assert_eq!(
        phase_transitions(&events),
        vec![GamePhase::RoundEnd],
        "one transition, no duplicate"
    );

    // The host can open round 2.
    let reply =
        handle_message(&state, &session(&room_id, bob), ClientMessage::NextRound).await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "NOT_HOST"),
        other => panic!("expected NOT_HOST, got {:?}", other),
    }
    let reply =
        handle_message(&state, &session(&room_id, alice), ClientMessage::NextRound).await;
    assert!(reply.is_none());
    let room = state.service.get_room(&room_id).await.unwrap();
    let game = room.game.as_ref().unwrap();
    assert_eq!(game.status, GamePhase::PromptSubmit);
    assert_eq!(game.current_round, 2);
    assert_eq!(game.rounds.len(), 2);
}

/// Host-only commands are rejected at the gateway before dispatch.
#[tokio::test]
async fn start_game_is_host_only() {
    let state = app();
    let (room_id, ids) = lobby(&state, &["Alice", "Bob"]).await;

    let reply = handle_message(
        &state,
        &session(&room_id, &ids[1]),
        ClientMessage::StartGame,
    )
    .await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "NOT_HOST"),
        other => panic!("expected NOT_HOST, got {:?}", other),
    }
}

/// Commands for a room the player never joined bounce with a structured
/// error instead of touching state.
#[tokio::test]
async fn unknown_player_is_rejected() {
    let state = app();
    let (room_id, _) = lobby(&state, &["Alice", "Bob"]).await;

    let reply = handle_message(
        &state,
        &session(&room_id, "ghost"),
        ClientMessage::PlayerReady { is_ready: true },
    )
    .await;
    match reply {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "PLAYER_NOT_IN_ROOM"),
        other => panic!("expected PLAYER_NOT_IN_ROOM, got {:?}", other),
    }
}
