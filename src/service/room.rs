use super::{validate_display_name, GameService};
use crate::codes::{self, CODE_GENERATION_ATTEMPTS};
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::Utc;

impl GameService {
    /// Create a room with the caller as its sole player and host.
    pub async fn create_room(
        &self,
        display_name: &str,
        settings: Option<RoomSettings>,
    ) -> GameResult<(Room, PlayerId)> {
        let display_name = validate_display_name(display_name)?;

        let mut code = None;
        for _ in 0..CODE_GENERATION_ATTEMPTS {
            let candidate = codes::generate_code();
            if !self.store().is_code_taken(&candidate).await? {
                code = Some(candidate);
                break;
            }
        }
        let code = code.ok_or(GameError::CodeExhaustion)?;

        let now = Utc::now();
        let player = Player {
            id: ulid::Ulid::new().to_string(),
            display_name,
            is_host: true,
            is_ready: false,
            is_connected: true,
            joined_at: now,
            last_seen_at: now,
        };
        let player_id = player.id.clone();

        let mut players = std::collections::HashMap::new();
        players.insert(player_id.clone(), player);

        let room = Room {
            id: ulid::Ulid::new().to_string(),
            code,
            created_at: now,
            created_by: player_id.clone(),
            status: RoomStatus::Lobby,
            host_id: player_id.clone(),
            players,
            max_players: DEFAULT_MAX_PLAYERS,
            settings: settings.unwrap_or_default(),
            game: None,
        };

        self.store().create(&room).await?;
        tracing::info!(room_id = %room.id, code = %room.code, "Room created");

        Ok((room, player_id))
    }

    /// Join a lobby by code. Fails once the game has started or the room
    /// is at capacity.
    pub async fn join_room(&self, code: &str, display_name: &str) -> GameResult<(Room, PlayerId)> {
        let display_name = validate_display_name(display_name)?;
        let code = code.trim().to_uppercase();

        // Resolve the code outside the lock, then re-read under it.
        let room_id = self.store().get_by_code(&code).await?.id;

        let lock = self.room_lock(&room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(&room_id).await?;

        if room.status != RoomStatus::Lobby {
            return Err(GameError::GameInProgress);
        }
        if room.players.len() >= room.max_players {
            return Err(GameError::RoomFull);
        }

        let now = Utc::now();
        let player = Player {
            id: ulid::Ulid::new().to_string(),
            display_name,
            is_host: false,
            is_ready: false,
            is_connected: true,
            joined_at: now,
            last_seen_at: now,
        };
        let player_id = player.id.clone();
        room.players.insert(player_id.clone(), player);

        self.store().update(&room).await?;
        tracing::info!(room_id = %room.id, player_id = %player_id, "Player joined");

        Ok((room, player_id))
    }

    pub async fn set_ready(
        &self,
        room_id: &str,
        player_id: &str,
        is_ready: bool,
    ) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let player = room
            .players
            .get_mut(player_id)
            .ok_or_else(|| GameError::PlayerNotInRoom(player_id.to_string()))?;
        player.is_ready = is_ready;

        self.store().update(&room).await?;
        Ok(room)
    }

    /// Remove a player. Deletes the room when it empties; promotes the
    /// longest-standing player when the host leaves.
    pub async fn remove_player(
        &self,
        room_id: &str,
        player_id: &str,
    ) -> GameResult<(Option<Room>, Option<PlayerId>)> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let removed = room
            .players
            .remove(player_id)
            .ok_or_else(|| GameError::PlayerNotInRoom(player_id.to_string()))?;

        if room.players.is_empty() {
            self.store().delete(&room.id, &room.code).await?;
            drop(_guard);
            self.forget_room(room_id).await;
            tracing::info!(room_id = %room.id, "Room emptied and deleted");
            return Ok((None, None));
        }

        let mut new_host_id = None;
        if removed.is_host {
            let next_host = room
                .earliest_joined()
                .map(|p| p.id.clone())
                .expect("non-empty room has a player");
            if let Some(player) = room.players.get_mut(&next_host) {
                player.is_host = true;
            }
            room.host_id = next_host.clone();
            new_host_id = Some(next_host);
            tracing::info!(room_id = %room.id, new_host = ?new_host_id, "Host migrated");
        }

        self.store().update(&room).await?;
        Ok((Some(room), new_host_id))
    }

    /// Flip the connection flag without touching the player's seat.
    pub async fn update_connection(
        &self,
        room_id: &str,
        player_id: &str,
        is_connected: bool,
    ) -> GameResult<Room> {
        let lock = self.room_lock(room_id).await;
        let _guard = lock.lock().await;
        let mut room = self.store().get_by_id(room_id).await?;

        let player = room
            .players
            .get_mut(player_id)
            .ok_or_else(|| GameError::PlayerNotInRoom(player_id.to_string()))?;
        player.is_connected = is_connected;
        player.last_seen_at = Utc::now();

        self.store().update(&room).await?;
        Ok(room)
    }
}
