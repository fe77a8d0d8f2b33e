//! Per-room state machine.
//!
//! All room state lives behind a single write guard; every mutation reports
//! whether it changed anything and pushes its fan-out events onto the bus
//! before the guard is released. Engines (admission, moderation, chat) own
//! the compound operations and drive the primitives here.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::bus::MessageBus;
use crate::models::event::{ClosedProducerInfo, RoomEvent};
use crate::models::id::{ChannelId, ClientId, ProducerId, RoomId, UserId, UserKey};
use crate::models::participant::{
    MediaKind, Participant, PendingEntry, ProducerRef, ProducerType, Role,
};
use crate::models::policies::{PolicyChanges, PolicyUpdate, RoomPolicies};
use crate::{Error, Result};

/// Mutable room state, guarded by the room's write lock.
pub struct RoomInner {
    pub channel_id: ChannelId,
    pub clients: HashMap<UserId, Participant>,
    pub user_keys_by_id: HashMap<UserId, UserKey>,
    pub pending: HashMap<UserKey, PendingEntry>,
    pub allowed_user_keys: BTreeSet<UserKey>,
    pub locked_allowed_user_keys: BTreeSet<UserKey>,
    pub blocked_user_keys: BTreeSet<UserKey>,
    pub admin_user_keys: BTreeSet<UserKey>,
    pub host_user_key: Option<UserKey>,
    pub policies: RoomPolicies,
    pub screen_share_producer_id: Option<ProducerId>,
    pub hand_raised: Vec<UserId>,
    pub display_names: HashMap<UserKey, String>,
    pub pending_disconnects: HashSet<UserId>,
    admit_seq: u64,
    enroll_seq: u64,
}

/// What `remove_participant` tore down.
pub struct RemovedParticipant {
    pub user_id: UserId,
    pub user_key: UserKey,
    pub socket: Arc<dyn crate::bus::SocketHandle>,
    pub closed_producers: Vec<ClosedProducerInfo>,
}

impl RoomInner {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            clients: HashMap::new(),
            user_keys_by_id: HashMap::new(),
            pending: HashMap::new(),
            allowed_user_keys: BTreeSet::new(),
            locked_allowed_user_keys: BTreeSet::new(),
            blocked_user_keys: BTreeSet::new(),
            admin_user_keys: BTreeSet::new(),
            host_user_key: None,
            policies: RoomPolicies::default(),
            screen_share_producer_id: None,
            hand_raised: Vec::new(),
            display_names: HashMap::new(),
            pending_disconnects: HashSet::new(),
            admit_seq: 0,
            enroll_seq: 0,
        }
    }

    #[must_use]
    pub fn next_admit_seq(&mut self) -> u64 {
        self.admit_seq += 1;
        self.admit_seq
    }

    #[must_use]
    pub fn is_admin_key(&self, key: &UserKey) -> bool {
        self.admin_user_keys.contains(key)
    }

    #[must_use]
    pub fn is_admin_session(&self, user_id: &UserId) -> bool {
        self.user_keys_by_id
            .get(user_id)
            .map_or(false, |key| self.admin_user_keys.contains(key))
    }

    /// Sessions of one identity, in admission order.
    #[must_use]
    pub fn sessions_of(&self, key: &UserKey) -> Vec<UserId> {
        let mut ids: Vec<&Participant> = self
            .clients
            .values()
            .filter(|p| &p.user_key == key)
            .collect();
        ids.sort_by_key(|p| p.admitted_seq);
        ids.into_iter().map(|p| p.user_id.clone()).collect()
    }

    /// Send an event to every participant socket, with optional exclusions.
    pub fn broadcast_participants(
        &self,
        event: &RoomEvent,
        exclude: Option<&UserId>,
        include_attendees: bool,
    ) {
        let payload = event.payload();
        for participant in self.clients.values() {
            if Some(&participant.user_id) == exclude {
                continue;
            }
            if !include_attendees
                && participant.mode == crate::models::participant::ParticipantMode::WebinarAttendee
            {
                continue;
            }
            participant.socket.send(event.name(), payload.clone());
        }
    }

    /// Send an event to every active administrator session.
    pub fn notify_admins(&self, event: &RoomEvent) {
        let payload = event.payload();
        for participant in self.clients.values() {
            if self.admin_user_keys.contains(&participant.user_key) {
                participant.socket.send(event.name(), payload.clone());
            }
        }
    }

    /// Pending list snapshot pushed to administrators after waiting-room
    /// changes.
    pub fn emit_pending_snapshot(&self) {
        let mut entries: Vec<&PendingEntry> = self.pending.values().collect();
        entries.sort_by_key(|e| e.enrolled_seq);
        let event = RoomEvent::PendingUsersSnapshot {
            pending: entries
                .iter()
                .map(|e| (e.user_key.clone(), e.display_name.clone()))
                .collect(),
        };
        self.notify_admins(&event);
    }

    pub fn emit_hand_snapshot(&self, bus: &dyn MessageBus) {
        let event = RoomEvent::HandRaisedSnapshot {
            user_ids: self.hand_raised.clone(),
        };
        bus.send_to_channel(&self.channel_id, event.name(), event.payload());
    }

    /// Install an admitted participant. Clears any pending entry for the same
    /// identity; a surviving pending socket from a different session gets
    /// `joinApproved`.
    pub fn install_participant(&mut self, participant: Participant, bus: &dyn MessageBus) {
        let key = participant.user_key.clone();
        let session = participant.user_id.session_id();

        if let Some(entry) = self.pending.remove(&key) {
            let same_session = session.as_ref() == Some(&entry.session_id);
            if !same_session {
                let approved = RoomEvent::JoinApproved;
                entry.socket.send(approved.name(), approved.payload());
            }
            self.emit_pending_snapshot();
        }

        let display_name = self
            .display_names
            .get(&key)
            .cloned()
            .unwrap_or_else(|| key.local_handle().to_string());

        bus.join(&self.channel_id, Arc::clone(&participant.socket));
        self.user_keys_by_id
            .insert(participant.user_id.clone(), key.clone());
        self.clients
            .insert(participant.user_id.clone(), participant);

        let event = RoomEvent::UserAdmitted {
            user_key: key,
            display_name,
        };
        bus.send_to_channel(&self.channel_id, event.name(), event.payload());
    }

    /// Remove a participant: close transports and producers, notify peers of
    /// each closed producer, drop the identity maps. Admin and host
    /// membership are identity-scoped and survive unless explicitly demoted.
    pub fn remove_participant(
        &mut self,
        user_id: &UserId,
        bus: &dyn MessageBus,
    ) -> Option<RemovedParticipant> {
        let participant = self.clients.remove(user_id)?;
        self.user_keys_by_id.remove(user_id);
        self.pending_disconnects.remove(user_id);
        self.hand_raised.retain(|id| id != user_id);

        let mut closed = Vec::new();
        for producer in participant.producers.values() {
            producer.handle.close();
            if self.screen_share_producer_id.as_ref() == Some(&producer.id) {
                self.screen_share_producer_id = None;
            }
            closed.push(ClosedProducerInfo {
                producer_id: producer.id.clone(),
                user_id: user_id.clone(),
                kind: producer.kind,
                producer_type: producer.producer_type,
            });
        }
        for info in &closed {
            let event = RoomEvent::ProducerClosed {
                producer: info.clone(),
            };
            self.broadcast_participants(&event, Some(user_id), false);
        }

        if let Some(transport) = &participant.producer_transport {
            transport.close();
        }
        if let Some(transport) = &participant.consumer_transport {
            transport.close();
        }

        bus.leave(&self.channel_id, participant.socket.id());

        Some(RemovedParticipant {
            user_id: user_id.clone(),
            user_key: participant.user_key.clone(),
            socket: Arc::clone(&participant.socket),
            closed_producers: closed,
        })
    }

    /// Register a freshly published producer. One producer per
    /// `(kind, type)` tuple per participant; one screen-share video per room.
    pub fn add_producer(&mut self, user_id: &UserId, producer: ProducerRef) -> Result<()> {
        let is_screen_video =
            producer.kind == MediaKind::Video && producer.producer_type == ProducerType::Screen;
        if is_screen_video {
            if let Some(existing) = &self.screen_share_producer_id {
                let own = self
                    .clients
                    .get(user_id)
                    .map_or(false, |p| {
                        p.producers
                            .get(&(MediaKind::Video, ProducerType::Screen))
                            .map_or(false, |prev| &prev.id == existing)
                    });
                if !own {
                    return Err(Error::Conflict(
                        "Another participant is already sharing their screen".to_string(),
                    ));
                }
            }
        }

        let participant = self
            .clients
            .get_mut(user_id)
            .ok_or_else(|| Error::NotFound(format!("Participant {user_id} not found")))?;

        let slot = (producer.kind, producer.producer_type);
        if let Some(previous) = participant.producers.insert(slot, producer.clone()) {
            previous.handle.close();
        }
        if is_screen_video {
            self.screen_share_producer_id = Some(producer.id.clone());
        }
        Ok(())
    }

    /// Locate and unregister a producer by id. The screen-share marker is
    /// cleared only when the ids match.
    pub fn close_producer(&mut self, producer_id: &ProducerId) -> Option<ClosedProducerInfo> {
        for participant in self.clients.values_mut() {
            let slot = participant
                .producers
                .iter()
                .find(|(_, p)| &p.id == producer_id)
                .map(|(slot, _)| *slot);
            if let Some(slot) = slot {
                let producer = participant.producers.remove(&slot)?;
                producer.handle.close();
                if self.screen_share_producer_id.as_ref() == Some(producer_id) {
                    self.screen_share_producer_id = None;
                }
                return Some(ClosedProducerInfo {
                    producer_id: producer.id,
                    user_id: participant.user_id.clone(),
                    kind: producer.kind,
                    producer_type: producer.producer_type,
                });
            }
        }
        None
    }

    /// Enroll a waiting-room entry, superseding any prior entry for the same
    /// identity. A distinct prior socket is told and disconnected.
    pub fn enroll_pending(&mut self, mut entry: PendingEntry) {
        self.enroll_seq += 1;
        entry.enrolled_seq = self.enroll_seq;

        if let Some(previous) = self.pending.remove(&entry.user_key) {
            if previous.socket.id() != entry.socket.id() {
                let superseded = RoomEvent::JoinSuperseded;
                previous
                    .socket
                    .send(superseded.name(), superseded.payload());
                previous.socket.disconnect(false);
            }
        }

        self.display_names
            .insert(entry.user_key.clone(), entry.display_name.clone());
        self.pending.insert(entry.user_key.clone(), entry);
        self.emit_pending_snapshot();
    }

    pub fn remove_pending(&mut self, key: &UserKey) -> Option<PendingEntry> {
        let entry = self.pending.remove(key)?;
        self.emit_pending_snapshot();
        Some(entry)
    }
}

/// A room: identity, creation time, hold counter, and the guarded state.
pub struct Room {
    pub channel_id: ChannelId,
    pub client_id: ClientId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    inner: RwLock<RoomInner>,
    holds: AtomicUsize,
    closed: AtomicBool,
}

impl Room {
    #[must_use]
    pub fn new(client_id: ClientId, room_id: RoomId) -> Self {
        let channel_id = ChannelId::compose(&client_id, &room_id);
        Self {
            inner: RwLock::new(RoomInner::new(channel_id.clone())),
            channel_id,
            client_id,
            room_id,
            created_at: Utc::now(),
            holds: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RoomInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RoomInner> {
        self.inner.write().await
    }

    /// Defer teardown while a pending operation (transcription, minutes
    /// generation) references this room.
    pub fn hold(&self) {
        self.holds.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.holds.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn holds(&self) -> usize {
        self.holds.load(Ordering::SeqCst)
    }

    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Empty of participants and waiters, with no outstanding holds.
    pub async fn is_removable(&self) -> bool {
        if self.holds() > 0 {
            return false;
        }
        let inner = self.inner.read().await;
        inner.clients.is_empty() && inner.pending.is_empty()
    }

    // ---- policy & access mutations ----

    /// Apply a partial policy update, run waiting-room reconciliation, and
    /// emit one change event per flipped flag.
    pub async fn set_policies(
        &self,
        update: &PolicyUpdate,
        bus: &dyn MessageBus,
    ) -> PolicyChanges {
        let mut inner = self.inner.write().await;
        let changes = inner.policies.apply(update);
        if changes.is_empty() {
            return changes;
        }

        if changes.locked == Some(true) {
            // Grandfather clause: everyone currently in the room stays
            // admissible on reconnect.
            let keys: Vec<UserKey> = inner.clients.values().map(|p| p.user_key.clone()).collect();
            for key in keys {
                inner.locked_allowed_user_keys.insert(key);
            }
        }

        if changes.locked == Some(false) {
            // Unlock reconciliation: pending entries already on the allow
            // list are approved; the rest keep waiting.
            let ready: Vec<UserKey> = inner
                .pending
                .keys()
                .filter(|key| inner.allowed_user_keys.contains(*key))
                .cloned()
                .collect();
            for key in &ready {
                if let Some(entry) = inner.pending.remove(key) {
                    let approved = RoomEvent::JoinApproved;
                    entry.socket.send(approved.name(), approved.payload());
                }
            }
            if !ready.is_empty() {
                inner.emit_pending_snapshot();
            }
        }

        let mut events: Vec<RoomEvent> = Vec::new();
        if let Some(locked) = changes.locked {
            events.push(RoomEvent::RoomLockChanged { locked });
        }
        if let Some(chat_locked) = changes.chat_locked {
            events.push(RoomEvent::ChatLockChanged { chat_locked });
        }
        if let Some(no_guests) = changes.no_guests {
            events.push(RoomEvent::NoGuestsChanged { no_guests });
        }
        if let Some(tts_disabled) = changes.tts_disabled {
            events.push(RoomEvent::TtsDisabledChanged { tts_disabled });
        }
        if let Some(dm_enabled) = changes.dm_enabled {
            events.push(RoomEvent::DmStateChanged { dm_enabled });
        }
        for event in &events {
            bus.send_to_channel(&self.channel_id, event.name(), event.payload());
        }

        info!(channel_id = %self.channel_id, ?changes, "Room policies updated");
        changes
    }

    /// Add to the allow list. Blocked identities must be unblocked first.
    pub async fn allow_user(&self, key: &UserKey) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.blocked_user_keys.contains(key) {
            return Err(Error::Conflict(format!(
                "{key} is blocked; unblock before allowing"
            )));
        }
        Ok(inner.allowed_user_keys.insert(key.clone()))
    }

    pub async fn revoke_allowed_user(&self, key: &UserKey) -> bool {
        self.inner.write().await.allowed_user_keys.remove(key)
    }

    pub async fn allow_locked_user(&self, key: &UserKey) -> bool {
        self.inner
            .write()
            .await
            .locked_allowed_user_keys
            .insert(key.clone())
    }

    pub async fn revoke_locked_allowed_user(&self, key: &UserKey) -> bool {
        self.inner
            .write()
            .await
            .locked_allowed_user_keys
            .remove(key)
    }

    /// Insert into the block list. The allow list is left untouched; block
    /// wins at admission time until explicitly unblocked.
    pub async fn block_user(&self, key: &UserKey) -> bool {
        self.inner
            .write()
            .await
            .blocked_user_keys
            .insert(key.clone())
    }

    /// Remove from the block list. Prior allow state is not restored.
    pub async fn unblock_user(&self, key: &UserKey) -> bool {
        self.inner.write().await.blocked_user_keys.remove(key)
    }

    // ---- roles ----

    /// Grant the admin role to an active session's identity.
    pub async fn promote_to_admin(&self, user_id: &UserId, bus: &dyn MessageBus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let participant = inner
            .clients
            .get(user_id)
            .ok_or_else(|| Error::NotFound(format!("Participant {user_id} not found")))?;
        if !participant.mode.can_hold_admin() {
            return Err(Error::Conflict(format!(
                "{user_id} cannot hold the admin role in mode {:?}",
                participant.mode
            )));
        }
        let key = participant.user_key.clone();
        let changed = inner.admin_user_keys.insert(key);
        if changed {
            let event = RoomEvent::AdminUsersChanged {
                admin_user_keys: inner.admin_user_keys.iter().cloned().collect(),
            };
            bus.send_to_channel(&self.channel_id, event.name(), event.payload());
        }
        Ok(changed)
    }

    /// Revoke the admin role from an identity. The current host must be
    /// transferred away first.
    pub async fn demote_admin(&self, key: &UserKey, bus: &dyn MessageBus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.host_user_key.as_ref() == Some(key) {
            return Err(Error::Conflict(
                "Cannot demote the current host; transfer host first".to_string(),
            ));
        }
        let changed = inner.admin_user_keys.remove(key);
        if changed {
            let event = RoomEvent::AdminUsersChanged {
                admin_user_keys: inner.admin_user_keys.iter().cloned().collect(),
            };
            bus.send_to_channel(&self.channel_id, event.name(), event.payload());
        }
        Ok(changed)
    }

    /// Move the host marker to an identity already holding the admin role.
    pub async fn set_host(&self, key: &UserKey, bus: &dyn MessageBus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.admin_user_keys.contains(key) {
            return Err(Error::Conflict(format!(
                "{key} is not an administrator of this room"
            )));
        }
        if inner.host_user_key.as_ref() == Some(key) {
            return Ok(false);
        }
        inner.host_user_key = Some(key.clone());
        let event = RoomEvent::HostChanged {
            host_user_key: key.clone(),
        };
        bus.send_to_channel(&self.channel_id, event.name(), event.payload());
        Ok(true)
    }

    // ---- hands ----

    pub async fn raise_hand(&self, user_id: &UserId, bus: &dyn MessageBus) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(user_id) {
            return Err(Error::NotFound(format!("Participant {user_id} not found")));
        }
        if inner.hand_raised.iter().any(|id| id == user_id) {
            return Ok(false);
        }
        inner.hand_raised.push(user_id.clone());
        inner.emit_hand_snapshot(bus);
        Ok(true)
    }

    pub async fn lower_hand(&self, user_id: &UserId, bus: &dyn MessageBus) -> bool {
        let mut inner = self.inner.write().await;
        let before = inner.hand_raised.len();
        inner.hand_raised.retain(|id| id != user_id);
        let changed = inner.hand_raised.len() != before;
        if changed {
            inner.emit_hand_snapshot(bus);
        }
        changed
    }

    /// Lower every hand, the host's included.
    pub async fn clear_hands(&self, bus: &dyn MessageBus) -> bool {
        let mut inner = self.inner.write().await;
        if inner.hand_raised.is_empty() {
            return false;
        }
        inner.hand_raised.clear();
        inner.emit_hand_snapshot(bus);
        let event = RoomEvent::AdminHandsCleared;
        inner.notify_admins(&event);
        true
    }

    // ---- display names ----

    pub async fn set_display_name(
        &self,
        user_id: &UserId,
        display_name: String,
        bus: &dyn MessageBus,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let key = inner
            .user_keys_by_id
            .get(user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Participant {user_id} not found")))?;
        let changed = inner.display_names.get(&key) != Some(&display_name);
        if changed {
            inner.display_names.insert(key, display_name.clone());
            let event = RoomEvent::DisplayNameUpdated {
                user_id: user_id.clone(),
                display_name,
            };
            bus.send_to_channel(&self.channel_id, event.name(), event.payload());
        }
        Ok(changed)
    }

    // ---- snapshot ----

    /// Deterministic state snapshot taken under the room guard.
    pub async fn snapshot(&self) -> RoomSnapshot {
        let inner = self.inner.read().await;

        let mut participants: Vec<&Participant> = inner.clients.values().collect();
        participants.sort_by_key(|p| p.admitted_seq);
        let participants = participants
            .into_iter()
            .map(|p| ParticipantSummary {
                user_id: p.user_id.clone(),
                user_key: p.user_key.clone(),
                display_name: inner
                    .display_names
                    .get(&p.user_key)
                    .cloned()
                    .unwrap_or_else(|| p.user_key.local_handle().to_string()),
                mode: p.mode,
                role: p.role(&inner.admin_user_keys, inner.host_user_key.as_ref()),
                is_muted: p.is_muted,
                is_camera_off: p.is_camera_off,
                hand_raised: inner.hand_raised.contains(&p.user_id),
                producers: p
                    .producers
                    .values()
                    .map(|pr| ProducerSummary {
                        producer_id: pr.id.clone(),
                        kind: pr.kind,
                        producer_type: pr.producer_type,
                    })
                    .collect(),
            })
            .collect();

        let mut pending_entries: Vec<&PendingEntry> = inner.pending.values().collect();
        pending_entries.sort_by_key(|e| e.enrolled_seq);
        let pending = pending_entries
            .into_iter()
            .map(|e| PendingSummary {
                user_key: e.user_key.clone(),
                display_name: e.display_name.clone(),
            })
            .collect();

        // The host's user id is the earliest-admitted live session of the
        // host identity, when one is connected.
        let host_user_id = inner
            .host_user_key
            .as_ref()
            .and_then(|key| inner.sessions_of(key).into_iter().next());

        RoomSnapshot {
            channel_id: self.channel_id.clone(),
            client_id: self.client_id.clone(),
            room_id: self.room_id.clone(),
            created_at: self.created_at,
            participant_count: inner.clients.len(),
            pending_count: inner.pending.len(),
            participants,
            pending,
            allowed_user_keys: inner.allowed_user_keys.iter().cloned().collect(),
            locked_allowed_user_keys: inner.locked_allowed_user_keys.iter().cloned().collect(),
            blocked_user_keys: inner.blocked_user_keys.iter().cloned().collect(),
            admin_user_keys: inner.admin_user_keys.iter().cloned().collect(),
            host_user_key: inner.host_user_key.clone(),
            host_user_id,
            policies: inner.policies,
            screen_share_producer_id: inner.screen_share_producer_id.clone(),
            hand_raised_user_ids: inner.hand_raised.clone(),
        }
    }

    /// Close every producer and transport and drop all participants without
    /// per-peer notifications. Used by forced teardown; the caller has
    /// already broadcast `roomEnded`.
    pub async fn teardown(&self, bus: &dyn MessageBus) {
        let mut inner = self.inner.write().await;
        let user_ids: Vec<UserId> = inner.clients.keys().cloned().collect();
        for user_id in user_ids {
            if let Some(participant) = inner.clients.remove(&user_id) {
                for producer in participant.producers.values() {
                    producer.handle.close();
                }
                if let Some(t) = &participant.producer_transport {
                    t.close();
                }
                if let Some(t) = &participant.consumer_transport {
                    t.close();
                }
                participant.socket.disconnect(false);
            }
            inner.user_keys_by_id.remove(&user_id);
        }
        let pending_keys: Vec<UserKey> = inner.pending.keys().cloned().collect();
        for key in pending_keys {
            if let Some(entry) = inner.pending.remove(&key) {
                entry.socket.disconnect(false);
            }
        }
        inner.hand_raised.clear();
        inner.screen_share_producer_id = None;
        bus.disconnect_channel(&self.channel_id);
        debug!(channel_id = %self.channel_id, "Room torn down");
    }
}

// ---- snapshot types ----

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    #[serde(rename = "type")]
    pub producer_type: ProducerType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub user_id: UserId,
    pub user_key: UserKey,
    pub display_name: String,
    pub mode: crate::models::participant::ParticipantMode,
    pub role: Role,
    pub is_muted: bool,
    pub is_camera_off: bool,
    pub hand_raised: bool,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSummary {
    pub user_key: UserKey,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub channel_id: ChannelId,
    pub client_id: ClientId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub participant_count: usize,
    pub pending_count: usize,
    pub participants: Vec<ParticipantSummary>,
    pub pending: Vec<PendingSummary>,
    pub allowed_user_keys: Vec<UserKey>,
    pub locked_allowed_user_keys: Vec<UserKey>,
    pub blocked_user_keys: Vec<UserKey>,
    pub admin_user_keys: Vec<UserKey>,
    pub host_user_key: Option<UserKey>,
    pub host_user_id: Option<UserId>,
    pub policies: RoomPolicies,
    pub screen_share_producer_id: Option<ProducerId>,
    pub hand_raised_user_ids: Vec<UserId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::models::participant::ParticipantMode;
    use crate::test_helpers::*;

    #[tokio::test]
    async fn test_lock_grandfathers_current_participants() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        install_test_participant(&room, "alice@x.y", "s1", &bus).await;

        let update = PolicyUpdate {
            locked: Some(true),
            ..Default::default()
        };
        let changes = room.set_policies(&update, &bus).await;
        assert_eq!(changes.locked, Some(true));

        let snapshot = room.snapshot().await;
        assert!(snapshot
            .locked_allowed_user_keys
            .contains(&UserKey::from("alice@x.y")));
    }

    #[tokio::test]
    async fn test_unlock_admits_allowed_pending() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        room.set_policies(
            &PolicyUpdate {
                locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let socket = enroll_test_pending(&room, "bob@x.y", "s2").await;
        room.allow_user(&UserKey::from("bob@x.y")).await.unwrap();

        room.set_policies(
            &PolicyUpdate {
                locked: Some(false),
                ..Default::default()
            },
            &bus,
        )
        .await;

        assert!(socket.saw_event("joinApproved"));
        assert_eq!(room.snapshot().await.pending_count, 0);
    }

    #[tokio::test]
    async fn test_allow_blocked_key_is_rejected() {
        let room = test_room("t1", "r1");
        let key = UserKey::from("mallory@x.y");
        assert!(room.block_user(&key).await);
        assert!(room.allow_user(&key).await.is_err());
        assert!(room.unblock_user(&key).await);
        assert!(room.allow_user(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_block_then_unblock_restores_preimage() {
        let room = test_room("t1", "r1");
        let key = UserKey::from("carol@x.y");
        room.allow_user(&key).await.unwrap();

        let before = room.snapshot().await;
        room.block_user(&key).await;
        room.unblock_user(&key).await;
        let after = room.snapshot().await;

        assert_eq!(before.allowed_user_keys, after.allowed_user_keys);
        assert_eq!(before.blocked_user_keys, after.blocked_user_keys);
        assert_eq!(
            before.locked_allowed_user_keys,
            after.locked_allowed_user_keys
        );
    }

    #[tokio::test]
    async fn test_enroll_pending_supersedes_prior_socket() {
        let room = test_room("t1", "r1");
        let first = enroll_test_pending(&room, "dave@x.y", "s1").await;
        let _second = enroll_test_pending(&room, "dave@x.y", "s2").await;

        assert!(first.saw_event("joinSuperseded"));
        assert!(first.is_disconnected());
        assert_eq!(room.snapshot().await.pending_count, 1);
    }

    #[tokio::test]
    async fn test_identity_back_lookup_is_bijective() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        install_test_participant(&room, "alice@x.y", "s1", &bus).await;
        install_test_participant(&room, "alice@x.y", "s2", &bus).await;
        install_test_participant(&room, "bob@x.y", "s1", &bus).await;

        let inner = room.read().await;
        for user_id in inner.clients.keys() {
            assert!(inner.user_keys_by_id.contains_key(user_id));
        }
        for user_id in inner.user_keys_by_id.keys() {
            assert!(inner.clients.contains_key(user_id));
        }
    }

    #[tokio::test]
    async fn test_admission_clears_pending_for_identity() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let waiting = enroll_test_pending(&room, "erin@x.y", "s1").await;

        // Same identity admitted from a different session.
        install_test_participant(&room, "erin@x.y", "s2", &bus).await;

        assert!(waiting.saw_event("joinApproved"));
        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.pending_count, 0);
        assert_eq!(snapshot.participant_count, 1);
    }

    #[tokio::test]
    async fn test_promote_ghost_is_conflict() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let user_id =
            install_test_participant_mode(&room, "ghost@x.y", "s1", ParticipantMode::Ghost, &bus)
                .await;
        assert!(matches!(
            room.promote_to_admin(&user_id, &bus).await,
            Err(Error::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_host_must_be_admin() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let user_id = install_test_participant(&room, "frank@x.y", "s1", &bus).await;
        let key = UserKey::from("frank@x.y");

        assert!(room.set_host(&key, &bus).await.is_err());
        room.promote_to_admin(&user_id, &bus).await.unwrap();
        assert!(room.set_host(&key, &bus).await.unwrap());
        // Setting the same host twice reports no change.
        assert!(!room.set_host(&key, &bus).await.unwrap());
        // Demoting the host is refused until transferred.
        assert!(room.demote_admin(&key, &bus).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_hands_lowers_everyone() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let a = install_test_participant(&room, "a@x.y", "s1", &bus).await;
        let b = install_test_participant(&room, "b@x.y", "s1", &bus).await;

        room.raise_hand(&a, &bus).await.unwrap();
        room.raise_hand(&b, &bus).await.unwrap();
        assert_eq!(room.snapshot().await.hand_raised_user_ids.len(), 2);

        assert!(room.clear_hands(&bus).await);
        assert!(room.snapshot().await.hand_raised_user_ids.is_empty());
        assert!(!room.clear_hands(&bus).await);
    }

    #[tokio::test]
    async fn test_second_producer_close_is_noop() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let user_id = install_test_participant(&room, "a@x.y", "s1", &bus).await;
        let producer_id = publish_test_producer(
            &room,
            &user_id,
            MediaKind::Audio,
            ProducerType::Webcam,
        )
        .await;

        let mut inner = room.write().await;
        assert!(inner.close_producer(&producer_id).is_some());
        assert!(inner.close_producer(&producer_id).is_none());
    }

    #[tokio::test]
    async fn test_screen_share_marker_tracks_id() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let a = install_test_participant(&room, "a@x.y", "s1", &bus).await;
        let b = install_test_participant(&room, "b@x.y", "s1", &bus).await;

        let screen = publish_test_producer(&room, &a, MediaKind::Video, ProducerType::Screen).await;
        let webcam = publish_test_producer(&room, &b, MediaKind::Video, ProducerType::Webcam).await;

        {
            let mut inner = room.write().await;
            // Closing an unrelated producer preserves the marker.
            inner.close_producer(&webcam);
            assert_eq!(inner.screen_share_producer_id, Some(screen.clone()));
            inner.close_producer(&screen);
            assert_eq!(inner.screen_share_producer_id, None);
        }
    }

    #[tokio::test]
    async fn test_second_screen_share_is_conflict() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let a = install_test_participant(&room, "a@x.y", "s1", &bus).await;
        let b = install_test_participant(&room, "b@x.y", "s1", &bus).await;

        publish_test_producer(&room, &a, MediaKind::Video, ProducerType::Screen).await;
        let result = try_publish_test_producer(&room, &b, MediaKind::Video, ProducerType::Screen)
            .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_remove_participant_notifies_peers_and_keeps_roles() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let a = install_test_participant(&room, "a@x.y", "s1", &bus).await;
        let b_socket = std::sync::Arc::new(RecordingSocket::new("sock-b"));
        install_test_participant_with(
            &room,
            "b@x.y",
            "s1",
            ParticipantMode::Meeting,
            b_socket.clone(),
            &bus,
        )
        .await;
        room.promote_to_admin(&a, &bus).await.unwrap();
        publish_test_producer(&room, &a, MediaKind::Audio, ProducerType::Webcam).await;

        {
            let mut inner = room.write().await;
            let removed = inner.remove_participant(&a, &bus).unwrap();
            assert_eq!(removed.closed_producers.len(), 1);
        }

        assert!(b_socket.saw_event("producerClosed"));
        let snapshot = room.snapshot().await;
        assert!(snapshot.admin_user_keys.contains(&UserKey::from("a@x.y")));
        assert_eq!(snapshot.participant_count, 1);
    }
}
