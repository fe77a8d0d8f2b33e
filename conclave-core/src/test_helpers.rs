//! Shared fixtures for unit and integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::bus::{MessageBus, SocketHandle};
use crate::media::MediaProducer;
use crate::models::id::{ClientId, ProducerId, RoomId, SessionId, UserId, UserKey};
use crate::models::participant::{
    MediaKind, Participant, ParticipantMode, PendingEntry, ProducerRef, ProducerType,
};
use crate::service::room::Room;
use crate::Result;

/// Socket capability that records everything sent through it.
pub struct RecordingSocket {
    id: String,
    events: Mutex<Vec<(String, Value)>>,
    disconnected: AtomicBool,
}

impl RecordingSocket {
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            events: Mutex::new(Vec::new()),
            disconnected: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn saw_event(&self, name: &str) -> bool {
        self.events.lock().iter().any(|(n, _)| n == name)
    }

    #[must_use]
    pub fn last_payload(&self, name: &str) -> Option<Value> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
    }

    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl SocketHandle for RecordingSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, event: &str, payload: Value) {
        self.events.lock().push((event.to_string(), payload));
    }

    fn disconnect(&self, _close_immediate: bool) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Media producer stub with a close flag.
pub struct TestProducer {
    id: ProducerId,
    kind: MediaKind,
    producer_type: ProducerType,
    closed: AtomicBool,
}

impl TestProducer {
    #[must_use]
    pub fn new(kind: MediaKind, producer_type: ProducerType) -> Self {
        Self {
            id: ProducerId::new(),
            kind,
            producer_type,
            closed: AtomicBool::new(false),
        }
    }
}

impl MediaProducer for TestProducer {
    fn id(&self) -> &ProducerId {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn producer_type(&self) -> ProducerType {
        self.producer_type
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[must_use]
pub fn test_room(client_id: &str, room_id: &str) -> Room {
    Room::new(ClientId::from(client_id), RoomId::from(room_id))
}

#[must_use]
pub fn test_user_id(key: &str, session: &str) -> UserId {
    UserId::compose(
        &UserKey::from(key),
        &SessionId::from_string(session.to_string()),
    )
}

/// Install a meeting-mode participant with a fresh recording socket.
pub async fn install_test_participant(
    room: &Room,
    key: &str,
    session: &str,
    bus: &dyn MessageBus,
) -> UserId {
    install_test_participant_mode(room, key, session, ParticipantMode::Meeting, bus).await
}

pub async fn install_test_participant_mode(
    room: &Room,
    key: &str,
    session: &str,
    mode: ParticipantMode,
    bus: &dyn MessageBus,
) -> UserId {
    let socket = Arc::new(RecordingSocket::new(&format!("sock-{key}-{session}")));
    install_test_participant_with(room, key, session, mode, socket, bus).await
}

/// Install a participant with a caller-provided socket, so tests can assert
/// on what it received.
pub async fn install_test_participant_with(
    room: &Room,
    key: &str,
    session: &str,
    mode: ParticipantMode,
    socket: Arc<RecordingSocket>,
    bus: &dyn MessageBus,
) -> UserId {
    let user_key = UserKey::from(key);
    let user_id = test_user_id(key, session);
    let mut inner = room.write().await;
    let admitted_seq = inner.next_admit_seq();
    inner.install_participant(
        Participant {
            user_id: user_id.clone(),
            user_key,
            mode,
            socket,
            producer_transport: None,
            consumer_transport: None,
            producers: std::collections::HashMap::new(),
            consumer_count: 0,
            is_muted: false,
            is_camera_off: false,
            admitted_seq,
        },
        bus,
    );
    user_id
}

/// Enroll a waiting-room entry and return its socket.
pub async fn enroll_test_pending(room: &Room, key: &str, session: &str) -> Arc<RecordingSocket> {
    let socket = Arc::new(RecordingSocket::new(&format!("pend-{key}-{session}")));
    let mut inner = room.write().await;
    inner.enroll_pending(PendingEntry {
        user_key: UserKey::from(key),
        session_id: SessionId::from_string(session.to_string()),
        display_name: key.to_string(),
        socket: socket.clone(),
        enrolled_seq: 0,
    });
    socket
}

pub async fn try_publish_test_producer(
    room: &Room,
    user_id: &UserId,
    kind: MediaKind,
    producer_type: ProducerType,
) -> Result<ProducerId> {
    let handle = Arc::new(TestProducer::new(kind, producer_type));
    let id = handle.id.clone();
    let mut inner = room.write().await;
    inner.add_producer(
        user_id,
        ProducerRef {
            id: id.clone(),
            kind,
            producer_type,
            handle,
        },
    )?;
    Ok(id)
}

pub async fn publish_test_producer(
    room: &Room,
    user_id: &UserId,
    kind: MediaKind,
    producer_type: ProducerType,
) -> ProducerId {
    try_publish_test_producer(room, user_id, kind, producer_type)
        .await
        .expect("producer install failed")
}
