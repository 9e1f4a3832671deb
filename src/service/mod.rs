//! Room and game service: every state transition lives here, behind a
//! per-room critical section.

mod game;
mod room;
mod score;

use crate::error::{GameError, GameResult};
use crate::store::RoomStore;
use crate::types::{Room, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub use game::{GenerationOutcome, GenerationUpdate, GuessOutcome};

/// Single-writer-per-room service over the KV store. Each operation takes
/// the room's lock, loads the room, mutates it and persists it before
/// returning, so commands for one room apply in arrival order while rooms
/// stay fully independent of each other.
pub struct GameService {
    store: Arc<dyn RoomStore>,
    locks: Mutex<HashMap<RoomId, Arc<Mutex<()>>>>,
}

impl GameService {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn RoomStore> {
        &self.store
    }

    /// The room's critical-section handle, created on first use.
    pub(crate) async fn room_lock(&self, room_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Forget a deleted room's lock.
    pub(crate) async fn forget_room(&self, room_id: &str) {
        self.locks.lock().await.remove(room_id);
    }

    /// Read-only snapshot, no lock taken.
    pub async fn get_room(&self, room_id: &str) -> GameResult<Room> {
        Ok(self.store.get_by_id(room_id).await?)
    }

    /// Read-only snapshot by code, no lock taken.
    pub async fn get_room_by_code(&self, code: &str) -> GameResult<Room> {
        Ok(self.store.get_by_code(code).await?)
    }
}

pub(crate) fn validate_display_name(name: &str) -> GameResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::Validation("Display name is required".into()));
    }
    if name.chars().count() > 30 {
        return Err(GameError::Validation(
            "Display name must be at most 30 characters".into(),
        ));
    }
    Ok(name.to_string())
}

pub(crate) fn validate_prompt(text: &str) -> GameResult<String> {
    let text = text.trim();
    let len = text.chars().count();
    if !(10..=200).contains(&len) {
        return Err(GameError::Validation(
            "Prompt must be between 10 and 200 characters".into(),
        ));
    }
    Ok(text.to_string())
}

pub(crate) fn validate_guess(text: &str) -> GameResult<String> {
    let text = text.trim();
    let len = text.chars().count();
    if !(3..=200).contains(&len) {
        return Err(GameError::Validation(
            "Guess must be between 3 and 200 characters".into(),
        ));
    }
    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_is_trimmed_and_bounded() {
        assert_eq!(validate_display_name("  Alice ").unwrap(), "Alice");
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(31)).is_err());
    }

    #[test]
    fn prompt_length_bounds() {
        assert!(validate_prompt("a blue cat").is_ok());
        assert!(validate_prompt("too short").is_err());
        assert!(validate_prompt(&"p".repeat(201)).is_err());
    }

    #[test]
    fn guess_length_bounds() {
        assert!(validate_guess("cat").is_ok());
        assert!(validate_guess("it").is_err());
        assert!(validate_guess(&"g".repeat(200)).is_ok());
    }
}
