use crate::types::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NavDirection {
    Next,
    Previous,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LeaveReason {
    Disconnect,
    Kicked,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Binds this connection to a (room, player) pair.
    #[serde(rename = "room:join")]
    JoinRoom {
        room_id: RoomId,
        player_id: PlayerId,
    },
    /// Gives up the seat entirely, unlike a plain disconnect.
    #[serde(rename = "room:leave")]
    LeaveRoom,
    #[serde(rename = "player:ready")]
    PlayerReady { is_ready: bool },
    #[serde(rename = "game:start")]
    StartGame,
    #[serde(rename = "game:submit_prompt")]
    SubmitPrompt { prompt: String },
    #[serde(rename = "game:resubmit_prompt")]
    ResubmitPrompt { prompt: String },
    #[serde(rename = "game:select_image")]
    SelectImage { image_id: ImageId },
    #[serde(rename = "game:submit_guess")]
    SubmitGuess { image_id: ImageId, guess: String },
    #[serde(rename = "game:navigate_result")]
    NavigateResult { direction: NavDirection },
    #[serde(rename = "game:complete_reveal")]
    CompleteReveal,
    #[serde(rename = "game:next_round")]
    NextRound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "room:update")]
    RoomUpdate { room: Room },
    #[serde(rename = "player:joined")]
    PlayerJoined { player: Player },
    #[serde(rename = "player:left")]
    PlayerLeft {
        player_id: PlayerId,
        reason: LeaveReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_host_id: Option<PlayerId>,
    },
    #[serde(rename = "player:ready_changed")]
    PlayerReadyChanged { player_id: PlayerId, is_ready: bool },
    #[serde(rename = "game:started")]
    GameStarted { game: Game },
    /// A prompt landed; never carries the prompt text.
    #[serde(rename = "game:prompt_submitted")]
    PromptSubmitted {
        player_id: PlayerId,
        submitted_count: usize,
        total_players: usize,
    },
    /// Unicast to the rejected submitter only.
    #[serde(rename = "game:prompt_rejected")]
    PromptRejected { reason: String },
    #[serde(rename = "game:phase_transition")]
    PhaseTransition { phase: GamePhase, game: Game },
    #[serde(rename = "game:image_progress")]
    ImageProgress { game: Game },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<serde_json::Value>,
    },
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }
}
