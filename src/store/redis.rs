use super::{
    code_key, deserialize_room, room_key, serialize_room, RoomStore, StoreError, StoreResult,
    ACTIVE_ROOMS_KEY, ROOM_TTL_SECS,
};
use crate::types::Room;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Redis-backed room store. The connection manager reconnects on its own;
/// individual command failures surface as [`StoreError::Unavailable`].
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self { conn })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl RoomStore for RedisStore {
    async fn create(&self, room: &Room) -> StoreResult<()> {
        let json = serialize_room(room)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(room_key(&room.id), json, ROOM_TTL_SECS).await?;
        let _: () = conn
            .set_ex(code_key(&room.code), &room.id, ROOM_TTL_SECS)
            .await?;
        let _: () = conn.sadd(ACTIVE_ROOMS_KEY, &room.id).await?;
        let _: () = conn.expire(ACTIVE_ROOMS_KEY, ROOM_TTL_SECS as i64).await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> StoreResult<Room> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn.get(room_key(id)).await?;
        match json {
            Some(json) => deserialize_room(&json),
            None => Err(StoreError::NotFound),
        }
    }

    async fn get_by_code(&self, code: &str) -> StoreResult<Room> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(code_key(code)).await?;
        match id {
            Some(id) => self.get_by_id(&id).await,
            None => Err(StoreError::NotFound),
        }
    }

    async fn update(&self, room: &Room) -> StoreResult<()> {
        let json = serialize_room(room)?;
        let mut conn = self.conn.clone();
        // SET XX KEEPTTL: only overwrite an existing key, keeping its TTL.
        let reply: Option<String> = redis::cmd("SET")
            .arg(room_key(&room.id))
            .arg(json)
            .arg("XX")
            .arg("KEEPTTL")
            .query_async(&mut conn)
            .await?;
        match reply {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound),
        }
    }

    async fn delete(&self, id: &str, code: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(&[room_key(id), code_key(code)]).await?;
        let _: () = conn.srem(ACTIVE_ROOMS_KEY, id).await?;
        Ok(())
    }

    async fn is_code_taken(&self, code: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let taken: bool = conn.exists(code_key(code)).await?;
        Ok(taken)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
