//! Channel-id keyed room registry.
//!
//! The map guard is short-lived: lookups clone the `Arc<Room>` out and the
//! caller works against the room's own write guard. Room references stay
//! stable until `force_close`.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::models::event::RoomEvent;
use crate::models::id::{ChannelId, ClientId, RoomId};
use crate::service::room::Room;

/// Outcome of a tenant-less room lookup.
pub enum Resolved {
    Room(Arc<Room>),
    /// More than one tenant owns a room with this id; callers must re-issue
    /// with a concrete client id. Carries the candidate channel ids.
    Ambiguous(Vec<ChannelId>),
    NotFound,
}

pub struct RoomRegistry {
    rooms: DashMap<ChannelId, Arc<Room>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    #[must_use]
    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<Room>> {
        self.rooms.get(channel_id).map(|r| Arc::clone(r.value()))
    }

    pub fn create_if_absent(&self, client_id: &ClientId, room_id: &RoomId) -> Arc<Room> {
        let channel_id = ChannelId::compose(client_id, room_id);
        let room = self
            .rooms
            .entry(channel_id.clone())
            .or_insert_with(|| {
                info!(channel_id = %channel_id, "Created room");
                Arc::new(Room::new(client_id.clone(), room_id.clone()))
            })
            .value()
            .clone();
        room
    }

    #[must_use]
    pub fn list_all(&self) -> Vec<Arc<Room>> {
        let mut rooms: Vec<Arc<Room>> =
            self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        rooms.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        rooms
    }

    #[must_use]
    pub fn list_by_client_id(&self, client_id: &ClientId) -> Vec<Arc<Room>> {
        let mut rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .filter(|e| &e.value().client_id == client_id)
            .map(|e| Arc::clone(e.value()))
            .collect();
        rooms.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        rooms
    }

    /// Resolve a room id, optionally scoped to a tenant. Without a tenant,
    /// a name owned by several tenants is ambiguous.
    #[must_use]
    pub fn resolve_by_room_id(&self, room_id: &RoomId, client_id: Option<&ClientId>) -> Resolved {
        if let Some(client_id) = client_id {
            let channel_id = ChannelId::compose(client_id, room_id);
            return match self.get(&channel_id) {
                Some(room) => Resolved::Room(room),
                None => Resolved::NotFound,
            };
        }

        let mut candidates: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .filter(|e| &e.value().room_id == room_id)
            .map(|e| Arc::clone(e.value()))
            .collect();
        candidates.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));

        match candidates.len() {
            0 => Resolved::NotFound,
            1 => Resolved::Room(candidates.remove(0)),
            _ => Resolved::Ambiguous(
                candidates
                    .into_iter()
                    .map(|r| r.channel_id.clone())
                    .collect(),
            ),
        }
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Mark the room for teardown, close all producers and transports,
    /// disconnect everyone, then drop it from the registry. Idempotent.
    pub async fn force_close(&self, channel_id: &ChannelId, bus: &dyn MessageBus, reason: &str) {
        let Some(room) = self.get(channel_id) else {
            return;
        };
        if !room.mark_closed() {
            return;
        }

        let event = RoomEvent::RoomEnded {
            reason: reason.to_string(),
        };
        bus.send_to_channel(channel_id, event.name(), event.payload());
        room.teardown(bus).await;
        self.rooms.remove(channel_id);

        info!(channel_id = %channel_id, reason, "Room force-closed");
    }

    /// Drop rooms that are empty with no outstanding holds. Returns how many
    /// were removed.
    pub async fn cleanup_empty_rooms(&self) -> usize {
        let candidates: Vec<Arc<Room>> =
            self.rooms.iter().map(|e| Arc::clone(e.value())).collect();

        let mut removed = 0;
        for room in candidates {
            if room.is_removable().await {
                self.rooms.remove(&room.channel_id);
                removed += 1;
                debug!(channel_id = %room.channel_id, "Removed empty room");
            }
        }
        if removed > 0 {
            info!(removed, remaining = self.rooms.len(), "Cleaned up empty rooms");
        }
        removed
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
