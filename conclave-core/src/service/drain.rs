//! Drain coordinator: flip the process-wide draining flag and, when forced,
//! notify then disconnect every connection.
//!
//! The flag update, the broadcast phase, the optional delay and the
//! disconnection phase each take only their own short-lived guards; no room
//! guard is ever held across the sleep. Once a forced drain starts it runs
//! to completion.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bus::{MessageBus, SocketHandle};
use crate::models::event::RoomEvent;
use crate::service::registry::RoomRegistry;

/// Upper bound on the notice-to-disconnect delay.
pub const MAX_NOTICE_DELAY_MS: u64 = 30_000;

/// Process-global draining flag.
pub struct DrainFlag {
    draining: RwLock<bool>,
}

impl DrainFlag {
    #[must_use]
    pub fn new() -> Self {
        Self {
            draining: RwLock::new(false),
        }
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        *self.draining.read()
    }

    pub fn set(&self, draining: bool) -> bool {
        let mut flag = self.draining.write();
        let changed = *flag != draining;
        *flag = draining;
        changed
    }
}

impl Default for DrainFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DrainRequest {
    pub draining: bool,
    pub force: bool,
    pub notice: Option<String>,
    #[serde(alias = "noticeMs")]
    pub notice_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainOutcome {
    pub draining: bool,
    pub forced: bool,
    pub notified_rooms: usize,
    pub disconnected_sockets: usize,
}

/// Apply a drain command. A forced drain broadcasts `serverRestarting` to
/// every room channel and every waiting socket, sleeps up to 30 s, then
/// disconnects room sockets followed by waiting sockets.
pub async fn apply_drain(
    registry: &RoomRegistry,
    bus: &dyn MessageBus,
    flag: &DrainFlag,
    req: DrainRequest,
) -> DrainOutcome {
    flag.set(req.draining);
    info!(draining = req.draining, force = req.force, "Drain flag updated");

    if !(req.force && req.draining) {
        return DrainOutcome {
            draining: req.draining,
            forced: false,
            notified_rooms: 0,
            disconnected_sockets: 0,
        };
    }

    let event = RoomEvent::ServerRestarting {
        notice: req.notice.clone(),
    };

    // Notice phase. Pending sockets are not in the bus channel, so they are
    // addressed individually; participant sockets get the channel broadcast.
    let rooms = registry.list_all();
    let mut notified: HashMap<String, Arc<dyn SocketHandle>> = HashMap::new();
    for room in &rooms {
        bus.send_to_channel(&room.channel_id, event.name(), event.payload());
        let inner = room.read().await;
        for participant in inner.clients.values() {
            notified.insert(
                participant.socket.id().to_string(),
                Arc::clone(&participant.socket),
            );
        }
        for entry in inner.pending.values() {
            entry.socket.send(event.name(), event.payload());
            notified.insert(entry.socket.id().to_string(), Arc::clone(&entry.socket));
        }
    }
    let notified_rooms = rooms.len();

    let delay = req.notice_delay_ms.unwrap_or(0).min(MAX_NOTICE_DELAY_MS);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    // Disconnect phase: room sockets first, then waiting sockets. Sockets
    // that joined after the notice are swept up too.
    let mut room_sockets: Vec<Arc<dyn SocketHandle>> = Vec::new();
    let mut pending_sockets: Vec<Arc<dyn SocketHandle>> = Vec::new();
    for room in registry.list_all() {
        let inner = room.read().await;
        for participant in inner.clients.values() {
            notified.remove(participant.socket.id());
            room_sockets.push(Arc::clone(&participant.socket));
        }
        for entry in inner.pending.values() {
            notified.remove(entry.socket.id());
            pending_sockets.push(Arc::clone(&entry.socket));
        }
        bus.disconnect_channel(&room.channel_id);
    }

    let mut disconnected = 0;
    for socket in room_sockets {
        socket.disconnect(false);
        disconnected += 1;
    }
    for socket in pending_sockets {
        socket.disconnect(false);
        disconnected += 1;
    }
    // Anyone notified earlier but no longer registered still gets torn down.
    for (_, socket) in notified {
        socket.disconnect(false);
        disconnected += 1;
    }

    if disconnected > 0 {
        warn!(
            rooms = notified_rooms,
            sockets = disconnected,
            "Forced drain disconnected all sockets"
        );
    }

    DrainOutcome {
        draining: true,
        forced: true,
        notified_rooms,
        disconnected_sockets: disconnected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::models::id::{ClientId, RoomId};
    use crate::test_helpers::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unforced_drain_only_sets_flag() {
        let registry = RoomRegistry::new();
        let bus = InMemoryBus::new();
        let flag = DrainFlag::new();

        let outcome = apply_drain(
            &registry,
            &bus,
            &flag,
            DrainRequest {
                draining: true,
                ..Default::default()
            },
        )
        .await;

        assert!(flag.is_draining());
        assert!(outcome.draining);
        assert!(!outcome.forced);
        assert_eq!(outcome.disconnected_sockets, 0);
    }

    #[tokio::test]
    async fn test_forced_drain_notifies_then_disconnects() {
        let registry = RoomRegistry::new();
        let bus = InMemoryBus::new();
        let flag = DrainFlag::new();

        let room = registry.create_if_absent(&ClientId::from("t1"), &RoomId::from("r1"));
        let member = Arc::new(RecordingSocket::new("member"));
        install_test_participant_with(
            &room,
            "a@x.y",
            "s1",
            crate::models::participant::ParticipantMode::Meeting,
            member.clone(),
            &bus,
        )
        .await;
        let waiting = enroll_test_pending(&room, "b@x.y", "s1").await;

        let outcome = apply_drain(
            &registry,
            &bus,
            &flag,
            DrainRequest {
                draining: true,
                force: true,
                notice: Some("rolling restart".to_string()),
                notice_delay_ms: Some(10),
            },
        )
        .await;

        assert!(outcome.forced);
        assert_eq!(outcome.notified_rooms, 1);
        assert_eq!(outcome.disconnected_sockets, 2);

        // Both got the notice with the reconnect hint, then the disconnect.
        for socket in [&member, &waiting] {
            assert!(socket.saw_event("serverRestarting"));
            let payload = socket.last_payload("serverRestarting").unwrap();
            assert_eq!(payload["reconnecting"], serde_json::json!(true));
            assert!(socket.is_disconnected());
        }
    }

    #[tokio::test]
    async fn test_notice_delay_is_clamped() {
        let req = DrainRequest {
            draining: true,
            force: true,
            notice: None,
            notice_delay_ms: Some(90_000),
        };
        assert_eq!(
            req.notice_delay_ms.unwrap_or(0).min(MAX_NOTICE_DELAY_MS),
            MAX_NOTICE_DELAY_MS
        );
    }

    #[tokio::test]
    async fn test_drain_can_be_lifted() {
        let registry = RoomRegistry::new();
        let bus = InMemoryBus::new();
        let flag = DrainFlag::new();

        apply_drain(
            &registry,
            &bus,
            &flag,
            DrainRequest {
                draining: true,
                ..Default::default()
            },
        )
        .await;
        assert!(flag.is_draining());

        apply_drain(
            &registry,
            &bus,
            &flag,
            DrainRequest {
                draining: false,
                ..Default::default()
            },
        )
        .await;
        assert!(!flag.is_draining());
    }
}
