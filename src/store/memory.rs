use super::{deserialize_room, serialize_room, RoomStore, StoreError, StoreResult};
use crate::types::Room;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// In-memory store for tests and local development. Rooms are kept in their
/// serialized form so every read exercises the same round-trip as the Redis
/// store. TTL expiry is the one Redis behavior not simulated.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, String>,
    codes: HashMap<String, String>,
    active: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_room_count(&self) -> usize {
        self.inner.lock().expect("store poisoned").active.len()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn create(&self, room: &Room) -> StoreResult<()> {
        let json = serialize_room(room)?;
        let mut inner = self.inner.lock().expect("store poisoned");
        inner.rooms.insert(room.id.clone(), json);
        inner.codes.insert(room.code.clone(), room.id.clone());
        inner.active.insert(room.id.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Room> {
        let inner = self.inner.lock().expect("store poisoned");
        let json = inner.rooms.get(id).ok_or(StoreError::NotFound)?;
        deserialize_room(json)
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Room> {
        let id = {
            let inner = self.inner.lock().expect("store poisoned");
            inner.codes.get(code).cloned().ok_or(StoreError::NotFound)?
        };
        self.get_by_id(&id).await
    }

    async fn update(&self, room: &Room) -> StoreResult<()> {
        let json = serialize_room(room)?;
        let mut inner = self.inner.lock().expect("store poisoned");
        if !inner.rooms.contains_key(&room.id) {
            return Err(StoreError::NotFound);
        }
        inner.rooms.insert(room.id.clone(), json);
        Ok(())
    }

    async fn delete(&self, id: &str, code: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().expect("store poisoned");
        inner.rooms.remove(id);
        inner.codes.remove(code);
        inner.active.remove(id);
        Ok(())
    }

    async fn is_code_taken(&self, code: &str) -> StoreResult<bool> {
        let inner = self.inner.lock().expect("store poisoned");
        Ok(inner.codes.contains_key(code))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
