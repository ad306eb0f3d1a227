//! In-process pub/sub hub for live delivery to connected sessions.
//!
//! Rooms are opaque string keys (`task:{id}`, `user:{id}`, `role:{ROLE}`).
//! Each room is a `tokio::sync::broadcast` channel; a socket subscribes to
//! every room it has joined and forwards what arrives.
//!
//! Producers:
//!   hub.publish(&Room::task(task_id), envelope).await;
//!
//! Consumers (WebSocket sessions):
//!   let rx = hub.subscribe(&Room::user(user_id)).await;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::common::{Role, TaskId, UserId};

/// Name of a broadcast room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room(String);

impl Room {
    pub fn task(task_id: TaskId) -> Self {
        Room(format!("task:{}", task_id))
    }

    pub fn user(user_id: UserId) -> Self {
        Room(format!("user:{}", user_id))
    }

    pub fn role(role: Role) -> Self {
        Room(format!("role:{}", role.as_room_key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Thread-safe, cloneable room registry.
/// Payloads are `serde_json::Value`; domains serialize their own envelopes.
#[derive(Clone)]
pub struct StreamHub {
    rooms: Arc<RwLock<HashMap<Room, broadcast::Sender<serde_json::Value>>>>,
    capacity: usize,
}

impl StreamHub {
    /// 256 messages per room before slow receivers start lagging.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Deliver to everyone in `room`. Returns the number of receivers reached;
    /// zero when the room is empty.
    pub async fn publish(&self, room: &Room, value: serde_json::Value) -> usize {
        let rooms = self.rooms.read().await;
        match rooms.get(room) {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// Deliver the same value to several rooms.
    pub async fn publish_many(&self, rooms: &[Room], value: &serde_json::Value) -> usize {
        let registry = self.rooms.read().await;
        rooms
            .iter()
            .filter_map(|room| registry.get(room))
            .map(|tx| tx.send(value.clone()).unwrap_or(0))
            .sum()
    }

    /// Join a room, creating it on first use.
    pub async fn subscribe(&self, room: &Room) -> broadcast::Receiver<serde_json::Value> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub async fn member_count(&self, room: &Room) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop rooms nobody listens to. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        rooms.retain(|_, tx| tx.receiver_count() > 0);
        before - rooms.len()
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}
