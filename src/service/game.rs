use super::{validate_guess, validate_prompt, GameService};
use crate::error::{GameError, GameResult};
use crate::images::{ImageService, ImageError};
use crate::protocol::NavDirection;
use crate::types::*;
use chrono::Utc;

/// Outcome of recording one generation result.
#[derive(Debug)]
pub enum GenerationUpdate {
    Ready(Vec<GeneratedImage>),
    Rejected,
    Failed,
}

impl GenerationUpdate {
    pub fn from_error(err: &ImageError) -> Self {
        if err.is_transient() {
            GenerationUpdate::Failed
        } else {
            GenerationUpdate::Rejected
        }
    }
}

/// Result of the generation completion rule.
#[derive(Debug, Default)]
pub struct GenerationOutcome {
    /// True when the round moved on to `image_select`.
    pub transitioned: bool,
    pub rejected_players: Vec<PlayerId>,
    pub failed_players: Vec<PlayerId>,
}

/// What an accepted guess did to the round.
#[derive(Debug, Default)]
pub struct GuessOutcome {
    pub all_guessed: bool,
    /// The reveal cursor advanced to the next image.
    pub advanced: bool,
    /// The last image closed; the round is ready for scoring.
    pub scoring: bool,
}

fn require_player(room: &Room, player_id: &str) -> GameResult<()> {
    if room.players.contains_key(player_id) {
        Ok(())
    } else {
        Err(GameError::PlayerNotInRoom(player_id.to_string()))
    }
}

fn require_round_phase(round: &Round, expected: RoundPhase) -> GameResult<()> {
    if round.status == expected {
        Ok(())
    } else {
        Err(GameError::InvalidPhase {
            expected: expected.as_str(),
            actual: round.status.as_str().to_string(),
        })
    }
}

/// Players who have images to pick from. Owners of failed submissions are
/// excluded so a degraded round can still reach the reveal.
fn eligible_selectors(room: &Room, round: &Round) -> usize {
    room.players
        .keys()
        .filter(|id| {
            round
                .prompts
                .get(*id)
                .is_some_and(|s| s.status == SubmissionStatus::Ready)
        })
        .count()
}

impl GameService {
    /// Start the game. Host-only; needs a full lobby of ready players.
    pub async fn start_game(&self, room_id: &str, player_id: &str) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        if room.host_id != player_id {
            return Err(GameError::NotHost);
        }
        if room.status != RoomStatus::Lobby {
            return Err(GameError::GameInProgress);
        }
        if room.players.len() < 2 {
            return Err(GameError::NotEnoughPlayers);
        }
        if !room.players.values().all(|p| p.is_ready) {
            return Err(GameError::PlayersNotReady);
        }

        let now = Utc::now();
        let mut leaderboard = Leaderboard::default();
        for player in room.players.values() {
            leaderboard.scores.insert(
                player.id.clone(),
                LeaderboardEntry::new(player.id.clone(), player.display_name.clone()),
            );
        }
        leaderboard.rankings = rank_players(&room, &leaderboard);

        let game = Game {
            id: ulid::Ulid::new().to_string(),
            room_id: room.id.clone(),
            status: GamePhase::PromptSubmit,
            current_round: 1,
            rounds: vec![Round::new(1)],
            leaderboard,
            created_at: now,
            started_at: Some(now),
            finished_at: None,
        };

        room.status = RoomStatus::Playing;
        room.game = Some(game);

        self.store().update(&room).await?;
        tracing::info!(room_id = %room.id, "Game started");
        Ok(room)
    }

    /// Store a player's prompt. Returns whether every player has now
    /// submitted, which moves the round into `image_generate`.
    pub async fn submit_prompt(
        &self,
        room_id: &str,
        player_id: &str,
        text: &str,
    ) -> GameResult<(Room, bool)> {
        let text = validate_prompt(text)?;

        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        let player_count = room.players.len();
        let round = room
            .current_round_mut()
            .ok_or(GameError::InvalidPhase {
                expected: "prompt_submit",
                actual: "lobby".to_string(),
            })?;
        require_round_phase(round, RoundPhase::PromptSubmit)?;

        if round.prompts.contains_key(player_id) {
            return Err(GameError::Validation(
                "Prompt already submitted for this round".into(),
            ));
        }

        round.prompts.insert(
            player_id.to_string(),
            PromptSubmission {
                player_id: player_id.to_string(),
                prompt: text,
                submitted_at: Utc::now(),
                images: Vec::new(),
                status: SubmissionStatus::Pending,
            },
        );

        let all_submitted = round.prompts.len() == player_count;
        if all_submitted {
            round.status = RoundPhase::ImageGenerate;
            room.game.as_mut().expect("playing room has a game").status =
                GamePhase::ImageGenerate;
        }

        self.store().update(&room).await?;
        Ok((room, all_submitted))
    }

    /// Replace a rejected prompt and generate images for it right away.
    /// Returns whether the round transitioned to `image_select`.
    pub async fn resubmit_prompt(
        &self,
        images: &ImageService,
        room_id: &str,
        player_id: &str,
        text: &str,
    ) -> GameResult<(Room, bool)> {
        let text = validate_prompt(text)?;

        // Flip the submission to generating inside the critical section,
        // then call the generator without holding the room lock.
        let (round_number, image_count) = {
            let lock = self.room_lock(room_id).await;
            let _guard = lock.lock().await;
            let mut room = self.store().get_by_id(room_id).await?;

            require_player(&room, player_id)?;
            let image_count = room.settings.image_count;
            let round = room.current_round_mut().ok_or(GameError::InvalidPhase {
                expected: "image_generate",
                actual: "lobby".to_string(),
            })?;
            require_round_phase(round, RoundPhase::ImageGenerate)?;

            let submission = round
                .prompts
                .get_mut(player_id)
                .ok_or_else(|| GameError::PlayerNotInRoom(player_id.to_string()))?;
            if submission.status != SubmissionStatus::Rejected {
                return Err(GameError::Validation(
                    "Only rejected prompts can be resubmitted".into(),
                ));
            }

            submission.prompt = text.clone();
            submission.submitted_at = Utc::now();
            submission.images.clear();
            submission.status = SubmissionStatus::Generating;
            let round_number = round.round_number;

            self.store().update(&room).await?;
            (round_number, image_count)
        };

        match images.generate(&text, image_count, &player_id.to_string()).await {
            Ok(generated) => {
                self.record_generation(
                    room_id,
                    round_number,
                    player_id,
                    GenerationUpdate::Ready(generated),
                )
                .await?;
                if let Some((room, outcome)) =
                    self.finish_generation(room_id, round_number).await?
                {
                    return Ok((room, outcome.transitioned));
                }
                Ok((self.get_room(room_id).await?, false))
            }
            Err(err) => {
                self.record_generation(
                    room_id,
                    round_number,
                    player_id,
                    GenerationUpdate::from_error(&err),
                )
                .await?;
                // A resubmission that failed transiently no longer blocks
                // the round: once no rejections remain, the completion rule
                // advances it with the failure tolerated.
                self.finish_generation(room_id, round_number).await?;
                Err(err.into())
            }
        }
    }

    /// Orchestrator re-entry: flip a pending submission to `generating`.
    /// Returns `None` when the round has moved on.
    pub async fn mark_generating(
        &self,
        room_id: &str,
        round_number: u32,
        player_id: &str,
    ) -> GameResult<Option<Room>> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let Some(round) = room.current_round_mut() else {
            return Ok(None);
        };
        if round.round_number != round_number || round.status != RoundPhase::ImageGenerate {
            return Ok(None);
        }
        let Some(submission) = round.prompts.get_mut(player_id) else {
            return Ok(None);
        };
        if submission.status != SubmissionStatus::Pending {
            return Ok(None);
        }
        submission.status = SubmissionStatus::Generating;

        self.store().update(&room).await?;
        Ok(Some(room))
    }

    /// Orchestrator re-entry: store one prompt's generation result. Late
    /// completions for rounds that have moved on are dropped.
    pub async fn record_generation(
        &self,
        room_id: &str,
        round_number: u32,
        player_id: &str,
        update: GenerationUpdate,
    ) -> GameResult<Option<Room>> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let Some(round) = room.current_round_mut() else {
            return Ok(None);
        };
        if round.round_number != round_number || round.status != RoundPhase::ImageGenerate {
            tracing::debug!(
                room_id,
                round_number,
                player_id,
                "Dropping late generation result"
            );
            return Ok(None);
        }
        let Some(submission) = round.prompts.get_mut(player_id) else {
            return Ok(None);
        };

        match update {
            GenerationUpdate::Ready(images) => {
                submission.images = images;
                submission.status = SubmissionStatus::Ready;
            }
            GenerationUpdate::Rejected => {
                submission.images.clear();
                submission.status = SubmissionStatus::Rejected;
            }
            GenerationUpdate::Failed => {
                submission.images.clear();
                submission.status = SubmissionStatus::Failed;
            }
        }

        self.store().update(&room).await?;
        Ok(Some(room))
    }

    /// The completion rule: once no submission is in flight, any rejection
    /// holds the round in `image_generate` for resubmission; otherwise the
    /// round advances to `image_select`, tolerating failed submissions.
    pub async fn finish_generation(
        &self,
        room_id: &str,
        round_number: u32,
    ) -> GameResult<Option<(Room, GenerationOutcome)>> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let Some(round) = room.current_round_mut() else {
            return Ok(None);
        };
        if round.round_number != round_number || round.status != RoundPhase::ImageGenerate {
            return Ok(None);
        }
        let in_flight = round.prompts.values().any(|s| {
            matches!(
                s.status,
                SubmissionStatus::Pending | SubmissionStatus::Generating
            )
        });
        if in_flight {
            return Ok(None);
        }

        let mut outcome = GenerationOutcome::default();
        for submission in round.prompts.values() {
            match submission.status {
                SubmissionStatus::Rejected => {
                    outcome.rejected_players.push(submission.player_id.clone())
                }
                SubmissionStatus::Failed => {
                    outcome.failed_players.push(submission.player_id.clone())
                }
                _ => {}
            }
        }

        if outcome.rejected_players.is_empty() {
            round.status = RoundPhase::ImageSelect;
            room.game.as_mut().expect("playing room has a game").status =
                GamePhase::ImageSelect;
            outcome.transitioned = true;
            self.store().update(&room).await?;
        }

        Ok(Some((room, outcome)))
    }

    /// Record the player's choice among their own images. Returns whether
    /// everyone with images has now selected, which starts the reveal.
    pub async fn select_image(
        &self,
        room_id: &str,
        player_id: &str,
        image_id: &str,
    ) -> GameResult<(Room, bool)> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        let eligible = {
            let round = room.current_round().ok_or(GameError::InvalidPhase {
                expected: "image_select",
                actual: "lobby".to_string(),
            })?;
            require_round_phase(round, RoundPhase::ImageSelect)?;
            eligible_selectors(&room, round)
        };

        let round = room.current_round_mut().expect("checked above");
        let owns_image = round
            .prompts
            .get(player_id)
            .is_some_and(|s| s.images.iter().any(|i| i.id == image_id));
        if !owns_image {
            return Err(GameError::Validation(
                "You can only select one of your own images".into(),
            ));
        }
        if round.selections.contains_key(player_id) {
            return Err(GameError::Validation(
                "Image already selected for this round".into(),
            ));
        }

        round.selections.insert(
            player_id.to_string(),
            ImageSelection {
                player_id: player_id.to_string(),
                image_id: image_id.to_string(),
                selected_at: Utc::now(),
            },
        );
        round.reveal_order.push(image_id.to_string());

        let all_selected = round.selections.len() >= eligible;
        if all_selected {
            round.status = RoundPhase::RevealGuess;
            round.current_reveal_index = 0;
            room.game.as_mut().expect("playing room has a game").status =
                GamePhase::RevealGuess;
        }

        self.store().update(&room).await?;
        Ok((room, all_selected))
    }

    /// Store a guess on the currently revealed image. When the last
    /// expected guess lands, either the reveal cursor advances or the round
    /// moves to scoring.
    pub async fn submit_guess(
        &self,
        room_id: &str,
        player_id: &str,
        image_id: &str,
        guess_text: &str,
    ) -> GameResult<(Room, GuessOutcome)> {
        let guess_text = validate_guess(guess_text)?;

        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        let player_count = room.players.len();
        let owner_present = {
            let round = room.current_round().ok_or(GameError::InvalidPhase {
                expected: "reveal_guess",
                actual: "lobby".to_string(),
            })?;
            require_round_phase(round, RoundPhase::RevealGuess)?;

            if round.current_reveal_image().map(String::as_str) != Some(image_id) {
                return Err(GameError::Validation(
                    "That image is not currently being revealed".into(),
                ));
            }
            let owner = round.image_owner(image_id);
            if owner.map(String::as_str) == Some(player_id) {
                return Err(GameError::Validation(
                    "You cannot guess on your own image".into(),
                ));
            }
            owner.is_some_and(|o| room.players.contains_key(o))
        };

        let round = room.current_round_mut().expect("checked above");
        let bucket = round.guesses_for_mut(image_id);
        if bucket.contains_key(player_id) {
            return Err(GameError::Validation(
                "You already guessed on this image".into(),
            ));
        }
        bucket.insert(
            player_id.to_string(),
            Guess {
                id: ulid::Ulid::new().to_string(),
                image_id: image_id.to_string(),
                player_id: player_id.to_string(),
                guess_text,
                submitted_at: Utc::now(),
                score: None,
            },
        );

        // Orphaned images (submitter removed mid-game) expect a guess from
        // every remaining player.
        let expected = if owner_present {
            player_count.saturating_sub(1)
        } else {
            player_count
        };
        let guess_count = bucket.len();

        let mut outcome = GuessOutcome {
            all_guessed: guess_count >= expected,
            ..GuessOutcome::default()
        };
        if outcome.all_guessed {
            if round.current_reveal_index + 1 < round.reveal_order.len() {
                round.current_reveal_index += 1;
                outcome.advanced = true;
            } else {
                round.status = RoundPhase::Scoring;
                room.game.as_mut().expect("playing room has a game").status = GamePhase::Scoring;
                outcome.scoring = true;
            }
        }

        self.store().update(&room).await?;
        Ok((room, outcome))
    }

    /// Move the shared results cursor. Any player may navigate; the index
    /// clamps at both ends.
    pub async fn navigate_result(
        &self,
        room_id: &str,
        player_id: &str,
        direction: NavDirection,
    ) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        let game_status = room.game.as_ref().map(|g| g.status);
        if game_status != Some(GamePhase::RevealResults) {
            return Err(GameError::InvalidPhase {
                expected: "reveal_results",
                actual: game_status.map_or("lobby".to_string(), |s| s.as_str().to_string()),
            });
        }

        let round = room.current_round_mut().expect("checked above");
        let last = round.reveal_order.len().saturating_sub(1);
        round.current_result_index = match direction {
            NavDirection::Next => (round.current_result_index + 1).min(last),
            NavDirection::Previous => round.current_result_index.saturating_sub(1),
        };

        self.store().update(&room).await?;
        Ok(room)
    }

    /// Close the results screen. A no-op outside `reveal_results` so a
    /// double-click cannot skip a round.
    pub async fn complete_reveal(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> GameResult<(Room, bool)> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        if room.game.as_ref().map(|g| g.status) != Some(GamePhase::RevealResults) {
            return Ok((room, false));
        }

        let now = Utc::now();
        let round_count = room.settings.round_count;
        let game = room.game.as_mut().expect("checked above");
        if let Some(round) = game.rounds.last_mut() {
            round.status = RoundPhase::Completed;
            round.finished_at = Some(now);
        }

        if game.current_round >= round_count {
            game.status = GamePhase::GameEnd;
            game.finished_at = Some(now);
            room.status = RoomStatus::Finished;
            tracing::info!(room_id = %room.id, "Game finished");
        } else {
            game.status = GamePhase::RoundEnd;
        }

        self.store().update(&room).await?;
        Ok((room, true))
    }

    /// Host-only: open the next round.
    pub async fn start_next_round(&self, room_id: &str, player_id: &str) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        require_player(&room, player_id)?;
        if room.host_id != player_id {
            return Err(GameError::NotHost);
        }

        let round_count = room.settings.round_count;
        let game = room.game.as_mut().ok_or(GameError::InvalidPhase {
            expected: "round_end",
            actual: "lobby".to_string(),
        })?;
        if game.status != GamePhase::RoundEnd {
            return Err(GameError::InvalidPhase {
                expected: "round_end",
                actual: game.status.as_str().to_string(),
            });
        }
        if game.current_round >= round_count {
            return Err(GameError::Validation("All rounds have been played".into()));
        }

        game.current_round += 1;
        game.rounds.push(Round::new(game.current_round));
        game.status = GamePhase::PromptSubmit;
        let round_number = game.current_round;

        self.store().update(&room).await?;
        tracing::info!(room_id = %room.id, round_number, "Next round started");
        Ok(room)
    }
}

/// Player ids by total score descending, ties broken by earliest join.
pub(crate) fn rank_players(room: &Room, leaderboard: &Leaderboard) -> Vec<PlayerId> {
    let mut ids: Vec<PlayerId> = room.players.keys().cloned().collect();
    ids.sort_by_key(|id| {
        let total = leaderboard.scores.get(id).map_or(0, |e| e.total_score);
        let joined = room.players[id].joined_at;
        (std::cmp::Reverse(total), joined)
    });
    ids
}
