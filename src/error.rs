use crate::images::ImageError;
use crate::store::StoreError;
use crate::types::PlayerId;

pub type GameResult<T> = Result<T, GameError>;

/// The error taxonomy every layer speaks. The service returns these; the
/// gateway translates them to unicast `error` events and the HTTP surface
/// to status codes.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Room not found")]
    RoomNotFound,

    #[error("Room is full")]
    RoomFull,

    #[error("Game already in progress")]
    GameInProgress,

    #[error("Could not allocate a unique room code")]
    CodeExhaustion,

    #[error("Player {0} is not in this room")]
    PlayerNotInRoom(PlayerId),

    #[error("Only the host can do that")]
    NotHost,

    #[error("At least 2 players are required to start")]
    NotEnoughPlayers,

    #[error("All players must be ready to start")]
    PlayersNotReady,

    #[error("Invalid phase: expected {expected}, currently {actual}")]
    InvalidPhase {
        expected: &'static str,
        actual: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("Prompt rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("Image generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    /// Stable wire code for `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound => "ROOM_NOT_FOUND",
            GameError::RoomFull => "ROOM_FULL",
            GameError::GameInProgress => "GAME_IN_PROGRESS",
            GameError::CodeExhaustion => "CODE_EXHAUSTION",
            GameError::PlayerNotInRoom(_) => "PLAYER_NOT_IN_ROOM",
            GameError::NotHost => "NOT_HOST",
            GameError::NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            GameError::PlayersNotReady => "PLAYERS_NOT_READY",
            GameError::InvalidPhase { .. } => "INVALID_PHASE",
            GameError::Validation(_) => "VALIDATION_FAILED",
            GameError::ContentPolicy(_) => "CONTENT_POLICY_VIOLATION",
            GameError::Generation(_) => "GENERATION_FAILED",
            GameError::Store(StoreError::NotFound) => "ROOM_NOT_FOUND",
            GameError::Store(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Content-policy verdicts get a dedicated domain event on top of the
    /// error surface.
    pub fn is_content_policy(&self) -> bool {
        matches!(self, GameError::ContentPolicy(_))
    }
}

impl From<ImageError> for GameError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::ContentPolicy(reason) => GameError::ContentPolicy(reason),
            other => GameError::Generation(other.to_string()),
        }
    }
}
