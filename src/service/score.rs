use super::GameService;
use crate::error::{GameError, GameResult};
use crate::scoring::{self, GuessScore};
use crate::types::*;
use std::collections::HashMap;

impl GameService {
    /// Score every revealed image, fold the results into the leaderboard
    /// and move the round to `reveal_results`.
    pub async fn score_round(&self, room_id: &str) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        {
            let round = room.current_round().ok_or(GameError::InvalidPhase {
                expected: "scoring",
                actual: "lobby".to_string(),
            })?;
            if round.status != RoundPhase::Scoring {
                return Err(GameError::InvalidPhase {
                    expected: "scoring",
                    actual: round.status.as_str().to_string(),
                });
            }
        }

        let present: HashMap<PlayerId, String> = room
            .players
            .iter()
            .map(|(id, p)| (id.clone(), p.display_name.clone()))
            .collect();
        let joined: HashMap<PlayerId, chrono::DateTime<chrono::Utc>> = room
            .players
            .iter()
            .map(|(id, p)| (id.clone(), p.joined_at))
            .collect();

        // Per-image scoring, in reveal (= selection) order.
        let mut perfect_guessers: Vec<PlayerId> = Vec::new();
        let mut picked_creators: Vec<PlayerId> = Vec::new();
        let round = room.current_round_mut().expect("checked above");
        for image_id in round.reveal_order.clone() {
            let Some(creator) = round.image_owner(&image_id).cloned() else {
                continue;
            };
            let Some(original) = round.prompts.get(&creator).map(|s| s.prompt.clone()) else {
                continue;
            };

            let mut guess_scores: Vec<GuessScore> = Vec::new();
            if let Some(idx) = round.guesses.iter().position(|(id, _)| *id == image_id) {
                for guess in round.guesses[idx].1.values_mut() {
                    let score = scoring::similarity(&original, &guess.guess_text);
                    guess.score = Some(score);
                    guess_scores.push(GuessScore {
                        player_id: guess.player_id.clone(),
                        score,
                    });
                }
            }

            let award = scoring::award_points(&guess_scores, &creator);
            for (player_id, points) in &award.guesser_points {
                *round.scores.entry(player_id.clone()).or_insert(0) += points;
            }
            if award.creator_bonus > 0 {
                round
                    .bonus_points
                    .insert(image_id.clone(), award.creator_bonus);
                // Orphaned creators keep the marker but earn nothing.
                if present.contains_key(&creator) {
                    *round.scores.entry(creator.clone()).or_insert(0) += award.creator_bonus;
                }
            }

            for gs in &guess_scores {
                if gs.score == 100 {
                    perfect_guessers.push(gs.player_id.clone());
                    picked_creators.push(creator.clone());
                }
            }
        }

        round.status = RoundPhase::RevealResults;
        round.current_result_index = 0;
        let round_scores = round.scores.clone();

        // Fold into the leaderboard: one roundScores entry per player per
        // completed round, totals re-summed, rankings rebuilt.
        let game = room.game.as_mut().expect("checked above");
        for (player_id, display_name) in &present {
            let entry = game
                .leaderboard
                .scores
                .entry(player_id.clone())
                .or_insert_with(|| {
                    LeaderboardEntry::new(player_id.clone(), display_name.clone())
                });
            let earned = round_scores.get(player_id).copied().unwrap_or(0);
            entry.total_score += earned;
            entry.round_scores.push(earned);
        }
        for player_id in &perfect_guessers {
            if let Some(entry) = game.leaderboard.scores.get_mut(player_id) {
                entry.guess_wins += 1;
            }
        }
        for player_id in &picked_creators {
            if let Some(entry) = game.leaderboard.scores.get_mut(player_id) {
                entry.prompt_picks += 1;
            }
        }
        let mut ids: Vec<PlayerId> = joined.keys().cloned().collect();
        ids.sort_by_key(|id| {
            let total = game.leaderboard.scores.get(id).map_or(0, |e| e.total_score);
            (std::cmp::Reverse(total), joined[id])
        });
        game.leaderboard.rankings = ids;
        game.status = GamePhase::RevealResults;

        self.store().update(&room).await?;
        tracing::info!(room_id = %room.id, "Round scored");
        Ok(room)
    }
}

#[cfg(test)]
mod tests {
    use crate::error::GameError;
    use crate::protocol::NavDirection;
    use crate::service::game::tests::{complete_generation, playing_room, service};
    use crate::types::*;

    /// Two players, both prompts generated and selected, every guess in.
    /// Returns (room_id, [alice, bob], [alice_image, bob_image]).
    async fn guessed_round(
        service: &crate::service::GameService,
        alice_guess: &str,
        bob_guess: &str,
    ) -> (RoomId, Vec<PlayerId>, Vec<ImageId>) {
        let (room_id, ids) = playing_room(service, &["Alice", "Bob"]).await;
        service
            .submit_prompt(&room_id, &ids[0], "a blue cat sitting")
            .await
            .unwrap();
        service
            .submit_prompt(&room_id, &ids[1], "a red dog running")
            .await
            .unwrap();
        complete_generation(service, &room_id, &ids).await;

        let alice_image = format!("{}_img_0", ids[0]);
        let bob_image = format!("{}_img_0", ids[1]);
        service
            .select_image(&room_id, &ids[0], &alice_image)
            .await
            .unwrap();
        service
            .select_image(&room_id, &ids[1], &bob_image)
            .await
            .unwrap();
        service
            .submit_guess(&room_id, &ids[1], &alice_image, bob_guess)
            .await
            .unwrap();
        service
            .submit_guess(&room_id, &ids[0], &bob_image, alice_guess)
            .await
            .unwrap();

        (room_id, ids, vec![alice_image, bob_image])
    }

    #[tokio::test]
    async fn perfect_guesses_score_100_each() {
        let service = service();
        let (room_id, ids, _) =
            guessed_round(&service, "a red dog running", "a blue cat sitting").await;

        let room = service.score_round(&room_id).await.unwrap();
        let game = room.game.as_ref().unwrap();
        assert_eq!(game.status, GamePhase::RevealResults);

        let round = room.current_round().unwrap();
        assert_eq!(round.scores[&ids[0]], 100);
        assert_eq!(round.scores[&ids[1]], 100);
        assert!(round.bonus_points.is_empty());

        for id in &ids {
            let entry = &game.leaderboard.scores[id];
            assert_eq!(entry.total_score, 100);
            assert_eq!(entry.round_scores, vec![100]);
            assert_eq!(entry.guess_wins, 1);
            assert_eq!(entry.prompt_picks, 1);
        }
        // Tie at 100: Alice joined first.
        assert_eq!(game.leaderboard.rankings, vec![ids[0].clone(), ids[1].clone()]);
    }

    #[tokio::test]
    async fn stumper_bonus_lands_on_the_creator() {
        let service = service();
        // Both guesses are far off both prompts.
        let (room_id, ids, images) =
            guessed_round(&service, "zzzz qqqq wwww", "xxxx vvvv kkkk").await;

        let room = service.score_round(&room_id).await.unwrap();
        let round = room.current_round().unwrap();

        assert_eq!(round.bonus_points[&images[0]], 50);
        assert_eq!(round.bonus_points[&images[1]], 50);

        // Each player: their (low) guess score plus the 50-point stumper.
        let alice_guess = round.guesses_for(&images[1]).unwrap()[&ids[0]]
            .score
            .unwrap();
        let bob_guess = round.guesses_for(&images[0]).unwrap()[&ids[1]]
            .score
            .unwrap();
        assert!(alice_guess < 40 && bob_guess < 40);
        assert_eq!(round.scores[&ids[0]], 50 + alice_guess);
        assert_eq!(round.scores[&ids[1]], 50 + bob_guess);

        let game = room.game.as_ref().unwrap();
        assert_eq!(game.leaderboard.scores[&ids[0]].guess_wins, 0);
        assert_eq!(game.leaderboard.scores[&ids[0]].prompt_picks, 0);
    }

    #[tokio::test]
    async fn every_scored_guess_is_in_range() {
        let service = service();
        let (room_id, _, _) =
            guessed_round(&service, "a red dog", "something about a feline").await;

        let room = service.score_round(&room_id).await.unwrap();
        let round = room.current_round().unwrap();
        for (_, bucket) in &round.guesses {
            for guess in bucket.values() {
                let score = guess.score.expect("scored after scoreRound");
                assert!(score <= 100);
            }
        }
    }

    #[tokio::test]
    async fn scoring_twice_is_rejected() {
        let service = service();
        let (room_id, _, _) =
            guessed_round(&service, "a red dog running", "a blue cat sitting").await;

        service.score_round(&room_id).await.unwrap();
        let err = service.score_round(&room_id).await.unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));
    }

    #[tokio::test]
    async fn results_navigation_clamps_at_both_ends() {
        let service = service();
        let (room_id, ids, _) =
            guessed_round(&service, "a red dog running", "a blue cat sitting").await;
        service.score_round(&room_id).await.unwrap();

        let room = service
            .navigate_result(&room_id, &ids[0], NavDirection::Previous)
            .await
            .unwrap();
        assert_eq!(room.current_round().unwrap().current_result_index, 0);

        let room = service
            .navigate_result(&room_id, &ids[1], NavDirection::Next)
            .await
            .unwrap();
        assert_eq!(room.current_round().unwrap().current_result_index, 1);

        let room = service
            .navigate_result(&room_id, &ids[1], NavDirection::Next)
            .await
            .unwrap();
        assert_eq!(room.current_round().unwrap().current_result_index, 1);
    }

    #[tokio::test]
    async fn complete_reveal_is_idempotent() {
        let service = service();
        let (room_id, ids, _) =
            guessed_round(&service, "a red dog running", "a blue cat sitting").await;
        service.score_round(&room_id).await.unwrap();

        let (room, transitioned) = service.complete_reveal(&room_id, &ids[0]).await.unwrap();
        assert!(transitioned);
        assert_eq!(room.game.as_ref().unwrap().status, GamePhase::RoundEnd);
        let round = room.game.as_ref().unwrap().rounds.last().unwrap();
        assert_eq!(round.status, RoundPhase::Completed);
        assert!(round.finished_at.is_some());

        let (room, transitioned) = service.complete_reveal(&room_id, &ids[0]).await.unwrap();
        assert!(!transitioned);
        assert_eq!(room.game.as_ref().unwrap().status, GamePhase::RoundEnd);
    }

    #[tokio::test]
    async fn final_round_ends_the_game() {
        let service = service();
        let (room_id, ids, _) =
            guessed_round(&service, "a red dog running", "a blue cat sitting").await;

        // Shrink the game to one round by playing the only round out.
        let room = service.get_room(&room_id).await.unwrap();
        assert_eq!(room.settings.round_count, 3);
        service.score_round(&room_id).await.unwrap();
        service.complete_reveal(&room_id, &ids[0]).await.unwrap();

        // Rounds 2 and 3.
        for _ in 0..2 {
            service.start_next_round(&room_id, &ids[0]).await.unwrap();
            service
                .submit_prompt(&room_id, &ids[0], "a blue cat sitting")
                .await
                .unwrap();
            service
                .submit_prompt(&room_id, &ids[1], "a red dog running")
                .await
                .unwrap();
            complete_generation(&service, &room_id, &ids).await;
            let round_number = service
                .get_room(&room_id)
                .await
                .unwrap()
                .current_round()
                .unwrap()
                .round_number;
            let alice_image = format!("{}_img_0", ids[0]);
            let bob_image = format!("{}_img_0", ids[1]);
            service
                .select_image(&room_id, &ids[0], &alice_image)
                .await
                .unwrap();
            service
                .select_image(&room_id, &ids[1], &bob_image)
                .await
                .unwrap();
            service
                .submit_guess(&room_id, &ids[1], &alice_image, "a blue cat sitting")
                .await
                .unwrap();
            service
                .submit_guess(&room_id, &ids[0], &bob_image, "a red dog running")
                .await
                .unwrap();
            service.score_round(&room_id).await.unwrap();
            let (room, _) = service.complete_reveal(&room_id, &ids[0]).await.unwrap();
            if round_number < 3 {
                assert_eq!(room.game.as_ref().unwrap().status, GamePhase::RoundEnd);
            } else {
                assert_eq!(room.game.as_ref().unwrap().status, GamePhase::GameEnd);
                assert_eq!(room.status, RoomStatus::Finished);
                assert!(room.game.as_ref().unwrap().finished_at.is_some());
            }
        }

        // No fourth round.
        let err = service
            .start_next_round(&room_id, &ids[0])
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::InvalidPhase { .. }));

        // Leaderboard has one entry per round for every player.
        let room = service.get_room(&room_id).await.unwrap();
        let game = room.game.as_ref().unwrap();
        for id in &ids {
            let entry = &game.leaderboard.scores[id];
            assert_eq!(entry.round_scores.len(), 3);
            assert_eq!(
                entry.total_score,
                entry.round_scores.iter().sum::<u32>()
            );
        }
    }
}
