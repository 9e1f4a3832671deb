//! Per-room fan-out: one broadcast channel per live room carrying targeted
//! events. Connections subscribe on `room:join` and filter by target, which
//! yields broadcast and unicast delivery over a single ordered stream.

use crate::protocol::ServerMessage;
use crate::types::{PlayerId, RoomId};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RoomEvent {
    /// `None` broadcasts to the whole room; `Some` delivers to one player.
    pub target: Option<PlayerId>,
    pub message: ServerMessage,
}

#[derive(Default)]
pub struct Gateway {
    rooms: RwLock<HashMap<RoomId, broadcast::Sender<RoomEvent>>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, room_id: &str) -> broadcast::Sender<RoomEvent> {
        if let Some(sender) = self.rooms.read().await.get(room_id) {
            return sender.clone();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe a connection to a room's event stream.
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<RoomEvent> {
        self.sender(room_id).await.subscribe()
    }

    /// Send to every connection in the room. Send errors just mean nobody
    /// is listening.
    pub async fn broadcast(&self, room_id: &str, message: ServerMessage) {
        let _ = self.sender(room_id).await.send(RoomEvent {
            target: None,
            message,
        });
    }

    /// Send to a single player's connection(s) in the room.
    pub async fn unicast(&self, room_id: &str, player_id: &str, message: ServerMessage) {
        let _ = self.sender(room_id).await.send(RoomEvent {
            target: Some(player_id.to_string()),
            message,
        });
    }

    /// Drop a deleted room's channel.
    pub async fn drop_room(&self, room_id: &str) {
        self.rooms.write().await.remove(room_id);
    }
}
