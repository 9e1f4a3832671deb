use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type RoomId = String;
pub type PlayerId = String;
pub type GameId = String;
pub type RoundId = String;
pub type ImageId = String;
pub type GuessId = String;

/// Hard cap on players per room unless overridden at creation.
pub const DEFAULT_MAX_PLAYERS: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Lobby,
    Playing,
    Finished,
}

/// Game-level phase. Mirrors the current round's status while one is live,
/// and additionally covers the between-round and terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GamePhase {
    PromptSubmit,
    ImageGenerate,
    ImageSelect,
    RevealGuess,
    Scoring,
    RevealResults,
    RoundEnd,
    GameEnd,
}

impl GamePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GamePhase::PromptSubmit => "prompt_submit",
            GamePhase::ImageGenerate => "image_generate",
            GamePhase::ImageSelect => "image_select",
            GamePhase::RevealGuess => "reveal_guess",
            GamePhase::Scoring => "scoring",
            GamePhase::RevealResults => "reveal_results",
            GamePhase::RoundEnd => "round_end",
            GamePhase::GameEnd => "game_end",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    PromptSubmit,
    ImageGenerate,
    ImageSelect,
    RevealGuess,
    Scoring,
    RevealResults,
    Completed,
}

impl RoundPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundPhase::PromptSubmit => "prompt_submit",
            RoundPhase::ImageGenerate => "image_generate",
            RoundPhase::ImageSelect => "image_select",
            RoundPhase::RevealGuess => "reveal_guess",
            RoundPhase::Scoring => "scoring",
            RoundPhase::RevealResults => "reveal_results",
            RoundPhase::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Generating,
    Ready,
    Failed,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    Queued,
    Generating,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub is_connected: bool,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Per-room gameplay settings. Time limits are advertised to clients; the
/// server does not enforce them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomSettings {
    pub round_count: u32,
    pub prompt_time_limit: u32,
    pub selection_time_limit: u32,
    pub guessing_time_limit: u32,
    pub results_time_limit: u32,
    pub image_count: u32,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            round_count: 3,
            prompt_time_limit: 90,
            selection_time_limit: 45,
            guessing_time_limit: 60,
            results_time_limit: 15,
            image_count: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub created_at: DateTime<Utc>,
    pub created_by: PlayerId,
    pub status: RoomStatus,
    pub host_id: PlayerId,
    pub players: HashMap<PlayerId, Player>,
    pub max_players: usize,
    pub settings: RoomSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<Game>,
}

impl Room {
    pub fn current_round(&self) -> Option<&Round> {
        self.game.as_ref().and_then(|g| g.rounds.last())
    }

    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        self.game.as_mut().and_then(|g| g.rounds.last_mut())
    }

    /// The player with the earliest join time, for host migration.
    pub fn earliest_joined(&self) -> Option<&Player> {
        self.players.values().min_by_key(|p| p.joined_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub room_id: RoomId,
    pub status: GamePhase,
    /// 1-indexed; `rounds.len()` equals this while playing.
    pub current_round: u32,
    pub rounds: Vec<Round>,
    pub leaderboard: Leaderboard,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub id: RoundId,
    pub round_number: u32,
    pub status: RoundPhase,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub current_reveal_index: usize,
    pub current_result_index: usize,
    pub prompts: HashMap<PlayerId, PromptSubmission>,
    pub selections: HashMap<PlayerId, ImageSelection>,
    /// Selected image ids in selection order; both cursors index into this.
    pub reveal_order: Vec<ImageId>,
    /// Sequence of pairs so the reveal ordering survives serialization.
    pub guesses: Vec<(ImageId, HashMap<PlayerId, Guess>)>,
    pub bonus_points: HashMap<ImageId, u32>,
    pub scores: HashMap<PlayerId, u32>,
}

impl Round {
    pub fn new(round_number: u32) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            round_number,
            status: RoundPhase::PromptSubmit,
            started_at: Utc::now(),
            finished_at: None,
            current_reveal_index: 0,
            current_result_index: 0,
            prompts: HashMap::new(),
            selections: HashMap::new(),
            reveal_order: Vec::new(),
            guesses: Vec::new(),
            bonus_points: HashMap::new(),
            scores: HashMap::new(),
        }
    }

    pub fn guesses_for(&self, image_id: &str) -> Option<&HashMap<PlayerId, Guess>> {
        self.guesses
            .iter()
            .find(|(id, _)| id == image_id)
            .map(|(_, g)| g)
    }

    /// Bucket for an image's guesses, created on first use. Buckets are
    /// appended as the reveal cursor reaches each image, so their order
    /// matches `reveal_order`.
    pub fn guesses_for_mut(&mut self, image_id: &str) -> &mut HashMap<PlayerId, Guess> {
        if let Some(idx) = self.guesses.iter().position(|(id, _)| id == image_id) {
            return &mut self.guesses[idx].1;
        }
        self.guesses.push((image_id.to_string(), HashMap::new()));
        &mut self.guesses.last_mut().expect("just pushed").1
    }

    /// The image the reveal cursor currently points at.
    pub fn current_reveal_image(&self) -> Option<&ImageId> {
        self.reveal_order.get(self.current_reveal_index)
    }

    /// Owner of a selected image, resolved through the selections.
    pub fn image_owner(&self, image_id: &str) -> Option<&PlayerId> {
        self.selections
            .values()
            .find(|s| s.image_id == image_id)
            .map(|s| &s.player_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSubmission {
    pub player_id: PlayerId,
    pub prompt: String,
    pub submitted_at: DateTime<Utc>,
    pub images: Vec<GeneratedImage>,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub id: ImageId,
    /// The submitter's player id; images are keyed back to their prompt by it.
    pub prompt_id: PlayerId,
    pub player_id: PlayerId,
    pub image_url: String,
    pub thumbnail_url: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_image_id: Option<String>,
    pub status: ImageStatus,
    pub generated_at: DateTime<Utc>,
    pub metadata: ImageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    /// Wall-clock generation time in milliseconds.
    pub generation_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSelection {
    pub player_id: PlayerId,
    pub image_id: ImageId,
    pub selected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guess {
    pub id: GuessId,
    pub image_id: ImageId,
    pub player_id: PlayerId,
    pub guess_text: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub scores: HashMap<PlayerId, LeaderboardEntry>,
    /// Player ids by total score descending, ties broken by earliest join.
    pub rankings: Vec<PlayerId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub display_name: String,
    pub total_score: u32,
    pub round_scores: Vec<u32>,
    /// Guesses by this player that scored a perfect 100.
    pub guess_wins: u32,
    /// Perfect guesses by others on this player's images.
    pub prompt_picks: u32,
}

impl LeaderboardEntry {
    pub fn new(player_id: PlayerId, display_name: String) -> Self {
        Self {
            player_id,
            display_name,
            total_score: 0,
            round_scores: Vec::new(),
            guess_wins: 0,
            prompt_picks: 0,
        }
    }
}
