//! Room persistence: a TTL-bounded key-value store keyed by room id with a
//! secondary index by room code.

mod memory;
mod redis;

use crate::types::Room;
use async_trait::async_trait;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Rooms live for 24 hours; every write preserves the remaining TTL.
pub const ROOM_TTL_SECS: u64 = 60 * 60 * 24;

pub fn room_key(id: &str) -> String {
    format!("room:{}", id)
}

pub fn code_key(code: &str) -> String {
    format!("room:code:{}", code)
}

/// Set of live room ids.
pub const ACTIVE_ROOMS_KEY: &str = "active_rooms";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Room not found")]
    NotFound,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Persist a brand-new room under both its id and code keys.
    async fn create(&self, room: &Room) -> StoreResult<()>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Room>;

    /// Two-hop lookup via the code index.
    async fn get_by_code(&self, code: &str) -> StoreResult<Room>;

    /// Overwrite an existing room, preserving its TTL. Fails with
    /// [`StoreError::NotFound`] when the room key is gone.
    async fn update(&self, room: &Room) -> StoreResult<()>;

    /// Remove the room key, its code index entry and its active-set member.
    async fn delete(&self, id: &str, code: &str) -> StoreResult<()>;

    async fn is_code_taken(&self, code: &str) -> StoreResult<bool>;

    /// Connectivity probe for the health endpoints.
    async fn ping(&self) -> StoreResult<()>;
}

pub(crate) fn serialize_room(room: &Room) -> StoreResult<String> {
    serde_json::to_string(room).map_err(|e| StoreError::Unavailable(e.to_string()))
}

pub(crate) fn deserialize_room(json: &str) -> StoreResult<Room> {
    serde_json::from_str(json).map_err(|e| StoreError::Unavailable(e.to_string()))
}
