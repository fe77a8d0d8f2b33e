//! Moderation: producer closure, bulk media enforcement, kicks, blocks and
//! host transfer.
//!
//! Every compound operation runs under a single room write guard; partial
//! results are reported as counts plus affected ids rather than failing the
//! whole call.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bus::MessageBus;
use crate::models::event::{ClosedProducerInfo, RoomEvent};
use crate::models::id::{ProducerId, UserId, UserKey};
use crate::models::participant::{MediaKind, ParticipantMode, ProducerType};
use crate::service::room::{Room, RoomInner};
use crate::{Error, Result};

/// Kind/type filter; omitted fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerSelector {
    pub kinds: Option<Vec<MediaKind>>,
    pub types: Option<Vec<ProducerType>>,
}

impl ProducerSelector {
    #[must_use]
    pub fn audio() -> Self {
        Self {
            kinds: Some(vec![MediaKind::Audio]),
            types: None,
        }
    }

    #[must_use]
    pub fn camera_video() -> Self {
        Self {
            kinds: Some(vec![MediaKind::Video]),
            types: Some(vec![ProducerType::Webcam]),
        }
    }

    #[must_use]
    pub fn screen() -> Self {
        Self {
            kinds: None,
            types: Some(vec![ProducerType::Screen]),
        }
    }
}

/// Which participant groups a bulk operation touches. Admins are never
/// included unless asked for explicitly.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BulkFlags {
    pub include_admins: bool,
    pub include_ghosts: bool,
    pub include_attendees: bool,
}

#[derive(Debug)]
pub struct CloseOutcome {
    pub closed: bool,
    pub producer: Option<ClosedProducerInfo>,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub closed: Vec<ClosedProducerInfo>,
    pub affected_user_ids: Vec<UserId>,
}

#[derive(Debug, Default)]
pub struct BlockOutcome {
    pub blocked_changed: bool,
    pub pending_rejected: bool,
    pub kicked: Vec<UserId>,
}

fn emit_producer_closed(inner: &RoomInner, info: &ClosedProducerInfo, reason: &str) {
    let peers = RoomEvent::ProducerClosed {
        producer: info.clone(),
    };
    inner.broadcast_participants(&peers, Some(&info.user_id), false);

    let admins = RoomEvent::AdminProducerClosed {
        producer: info.clone(),
        reason: reason.to_string(),
    };
    inner.notify_admins(&admins);
}

fn emit_media_enforced(inner: &RoomInner, owner: &UserId, reason: &str, closed: &[ClosedProducerInfo]) {
    if let Some(participant) = inner.clients.get(owner) {
        let event = RoomEvent::MediaEnforced {
            reason: reason.to_string(),
            producers: closed.to_vec(),
        };
        participant.socket.send(event.name(), event.payload());
    }
    let event = RoomEvent::AdminMediaEnforced {
        user_id: owner.clone(),
        reason: reason.to_string(),
        producers: closed.to_vec(),
    };
    inner.notify_admins(&event);
}

/// Close a single producer by id. Idempotent: a second call reports
/// `closed: false` and performs no side effects. Engine-side close
/// notifications racing an explicit close are absorbed the same way.
pub async fn close_producer_by_id(
    room: &Room,
    producer_id: &ProducerId,
    reason: &str,
) -> CloseOutcome {
    let mut inner = room.write().await;
    let Some(info) = inner.close_producer(producer_id) else {
        return CloseOutcome {
            closed: false,
            producer: None,
        };
    };

    emit_producer_closed(&inner, &info, reason);
    let owner = info.user_id.clone();
    emit_media_enforced(&inner, &owner, reason, std::slice::from_ref(&info));

    info!(
        channel_id = %room.channel_id,
        producer_id = %producer_id,
        user_id = %info.user_id,
        reason,
        "Producer closed"
    );
    CloseOutcome {
        closed: true,
        producer: Some(info),
    }
}

fn close_selected_locked(
    inner: &mut RoomInner,
    user_id: &UserId,
    selector: &ProducerSelector,
) -> Vec<ClosedProducerInfo> {
    let Some(participant) = inner.clients.get(user_id) else {
        return Vec::new();
    };
    let targets: Vec<ProducerId> = participant
        .select_producers(selector.kinds.as_deref(), selector.types.as_deref())
        .into_iter()
        .map(|p| p.id)
        .collect();

    let mut closed = Vec::new();
    for producer_id in targets {
        if let Some(info) = inner.close_producer(&producer_id) {
            closed.push(info);
        }
    }
    closed
}

fn apply_enforcement_flags(inner: &mut RoomInner, user_id: &UserId, closed: &[ClosedProducerInfo]) {
    let muted = closed.iter().any(|c| c.kind == MediaKind::Audio);
    let camera_off = closed
        .iter()
        .any(|c| c.kind == MediaKind::Video && c.producer_type == ProducerType::Webcam);
    if let Some(participant) = inner.clients.get_mut(user_id) {
        if muted {
            participant.is_muted = true;
        }
        if camera_off {
            participant.is_camera_off = true;
        }
    }
}

/// Close a participant's producers matching the selector. One aggregate
/// `mediaEnforced` goes to the owner; peers learn about each closure.
pub async fn close_client_producers(
    room: &Room,
    user_id: &UserId,
    selector: &ProducerSelector,
    reason: &str,
) -> Result<Vec<ClosedProducerInfo>> {
    let mut inner = room.write().await;
    if !inner.clients.contains_key(user_id) {
        return Err(Error::NotFound(format!("Participant {user_id} not found")));
    }

    let closed = close_selected_locked(&mut inner, user_id, selector);
    if !closed.is_empty() {
        for info in &closed {
            emit_producer_closed(&inner, info, reason);
        }
        apply_enforcement_flags(&mut inner, user_id, &closed);
        emit_media_enforced(&inner, user_id, reason, &closed);
        info!(
            channel_id = %room.channel_id,
            user_id = %user_id,
            closed = closed.len(),
            reason,
            "Participant media enforced"
        );
    }
    Ok(closed)
}

/// Apply a selector across the whole room, honoring the inclusion flags.
pub async fn bulk_close(
    room: &Room,
    selector: &ProducerSelector,
    flags: BulkFlags,
    reason: &str,
    bus: &dyn MessageBus,
) -> BulkOutcome {
    let mut inner = room.write().await;

    let targets: Vec<UserId> = inner
        .clients
        .values()
        .filter(|p| {
            if !flags.include_admins && inner.admin_user_keys.contains(&p.user_key) {
                return false;
            }
            match p.mode {
                ParticipantMode::Ghost => flags.include_ghosts,
                ParticipantMode::WebinarAttendee => flags.include_attendees,
                _ => true,
            }
        })
        .map(|p| p.user_id.clone())
        .collect();

    let mut outcome = BulkOutcome::default();
    for user_id in targets {
        let closed = close_selected_locked(&mut inner, &user_id, selector);
        if closed.is_empty() {
            continue;
        }
        for info in &closed {
            emit_producer_closed(&inner, info, reason);
        }
        apply_enforcement_flags(&mut inner, &user_id, &closed);
        emit_media_enforced(&inner, &user_id, reason, &closed);
        outcome.affected_user_ids.push(user_id);
        outcome.closed.extend(closed);
    }

    if !outcome.closed.is_empty() {
        let event = RoomEvent::AdminBulkMediaEnforced {
            reason: reason.to_string(),
            closed_count: outcome.closed.len(),
            affected_user_ids: outcome.affected_user_ids.clone(),
        };
        bus.send_to_channel(&room.channel_id, event.name(), event.payload());
        info!(
            channel_id = %room.channel_id,
            closed = outcome.closed.len(),
            affected = outcome.affected_user_ids.len(),
            reason,
            "Bulk media enforcement"
        );
    }
    outcome
}

fn kick_locked(
    inner: &mut RoomInner,
    user_id: &UserId,
    reason: &str,
    bus: &dyn MessageBus,
) -> bool {
    if !inner.clients.contains_key(user_id) {
        return false;
    }
    inner.pending_disconnects.insert(user_id.clone());

    let event = RoomEvent::Kicked {
        reason: reason.to_string(),
    };
    if let Some(participant) = inner.clients.get(user_id) {
        participant.socket.send(event.name(), event.payload());
    }
    if let Some(removed) = inner.remove_participant(user_id, bus) {
        removed.socket.disconnect(false);
        true
    } else {
        false
    }
}

/// Kick one session: `kicked` with the reason, then disconnect. Access
/// lists are left untouched. Self-kick is refused.
pub async fn kick(
    room: &Room,
    user_id: &UserId,
    reason: &str,
    requested_by: Option<&UserId>,
    bus: &dyn MessageBus,
) -> Result<bool> {
    if requested_by == Some(user_id) {
        return Err(Error::InvalidInput(
            "Administrators cannot kick themselves".to_string(),
        ));
    }
    let mut inner = room.write().await;
    if !inner.clients.contains_key(user_id) {
        return Err(Error::NotFound(format!("Participant {user_id} not found")));
    }
    let kicked = kick_locked(&mut inner, user_id, reason, bus);
    if kicked {
        info!(channel_id = %room.channel_id, user_id = %user_id, reason, "Participant kicked");
    }
    Ok(kicked)
}

/// Block an identity: deny future joins, reject a waiting entry, and
/// optionally kick every live session of the key.
pub async fn block_identity(
    room: &Room,
    key: &UserKey,
    kick_present: bool,
    reason: &str,
    bus: &dyn MessageBus,
) -> BlockOutcome {
    let mut inner = room.write().await;
    let mut outcome = BlockOutcome {
        blocked_changed: inner.blocked_user_keys.insert(key.clone()),
        ..Default::default()
    };

    if let Some(entry) = inner.remove_pending(key) {
        let rejected = RoomEvent::JoinRejected {
            reason: reason.to_string(),
        };
        entry.socket.send(rejected.name(), rejected.payload());
        entry.socket.disconnect(false);
        outcome.pending_rejected = true;
    }

    if kick_present {
        for user_id in inner.sessions_of(key) {
            if kick_locked(&mut inner, &user_id, reason, bus) {
                outcome.kicked.push(user_id);
            }
        }
    }

    info!(
        channel_id = %room.channel_id,
        user_key = %key,
        kick_present,
        kicked = outcome.kicked.len(),
        reason,
        "Identity blocked"
    );
    outcome
}

/// Kick every non-admin participant, honoring the ghost/attendee flags.
pub async fn remove_non_admins(
    room: &Room,
    include_ghosts: bool,
    include_attendees: bool,
    reason: &str,
    bus: &dyn MessageBus,
) -> Vec<UserId> {
    let mut inner = room.write().await;
    let targets: Vec<UserId> = inner
        .clients
        .values()
        .filter(|p| !inner.admin_user_keys.contains(&p.user_key))
        .filter(|p| match p.mode {
            ParticipantMode::Ghost => include_ghosts,
            ParticipantMode::WebinarAttendee => include_attendees,
            _ => true,
        })
        .map(|p| p.user_id.clone())
        .collect();

    let mut kicked = Vec::new();
    for user_id in targets {
        if kick_locked(&mut inner, &user_id, reason, bus) {
            kicked.push(user_id);
        }
    }
    if !kicked.is_empty() {
        info!(
            channel_id = %room.channel_id,
            kicked = kicked.len(),
            reason,
            "Removed non-admin participants"
        );
    }
    kicked
}

/// Transfer the host role to an active session, promoting it to admin if
/// needed. Ghosts and webinar attendees are ineligible.
pub async fn transfer_host(room: &Room, to_user_id: &UserId, bus: &dyn MessageBus) -> Result<bool> {
    let mut inner = room.write().await;
    let participant = inner
        .clients
        .get(to_user_id)
        .ok_or_else(|| Error::NotFound(format!("Participant {to_user_id} not found")))?;
    if !participant.mode.can_hold_admin() {
        return Err(Error::Conflict(format!(
            "{to_user_id} cannot become host in mode {:?}",
            participant.mode
        )));
    }
    let key = participant.user_key.clone();

    if inner.host_user_key.as_ref() == Some(&key) {
        return Ok(false);
    }

    if inner.admin_user_keys.insert(key.clone()) {
        let event = RoomEvent::AdminUsersChanged {
            admin_user_keys: inner.admin_user_keys.iter().cloned().collect(),
        };
        bus.send_to_channel(&room.channel_id, event.name(), event.payload());
    }
    inner.host_user_key = Some(key.clone());
    let event = RoomEvent::HostChanged {
        host_user_key: key.clone(),
    };
    bus.send_to_channel(&room.channel_id, event.name(), event.payload());

    info!(channel_id = %room.channel_id, user_id = %to_user_id, "Host transferred");
    Ok(true)
}
