//! Admission: the join decision table and waiting-room operations.
//!
//! Evaluation order is fixed; the first matching row wins. Block beats
//! everything except an operator token; admins bypass the lock; the lock
//! beats the guest gate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::bus::{MessageBus, SocketHandle};
use crate::models::event::RoomEvent;
use crate::models::id::{SessionId, UserId, UserKey};
use crate::models::participant::{Participant, ParticipantMode, PendingEntry};
use crate::service::room::{Room, RoomInner};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Blocked,
    GuestsDisabled,
    Draining,
}

impl RejectReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blocked => "blocked",
            Self::GuestsDisabled => "guests_disabled",
            Self::Draining => "draining",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit { as_admin: bool },
    Waitlist,
    Reject(RejectReason),
}

/// Pure decision table over the current room state.
#[must_use]
pub fn evaluate(
    inner: &RoomInner,
    user_key: &UserKey,
    is_admin_by_token: bool,
) -> AdmissionDecision {
    if inner.blocked_user_keys.contains(user_key) && !is_admin_by_token {
        return AdmissionDecision::Reject(RejectReason::Blocked);
    }
    if is_admin_by_token || inner.admin_user_keys.contains(user_key) {
        return AdmissionDecision::Admit { as_admin: true };
    }
    // An identity with a live session never lands in the waiting room a
    // second time; duplicate sessions ride on the earlier admission.
    let has_active_session = inner.clients.values().any(|p| &p.user_key == user_key);
    if inner.policies.locked
        && !inner.locked_allowed_user_keys.contains(user_key)
        && !has_active_session
    {
        return AdmissionDecision::Waitlist;
    }
    if inner.policies.no_guests
        && user_key.is_guest()
        && !inner.allowed_user_keys.contains(user_key)
    {
        return AdmissionDecision::Reject(RejectReason::GuestsDisabled);
    }
    AdmissionDecision::Admit { as_admin: false }
}

pub struct JoinRequest {
    pub user_key: UserKey,
    pub session_id: SessionId,
    pub mode: ParticipantMode,
    pub is_admin_by_token: bool,
    pub display_name: String,
    pub socket: Arc<dyn SocketHandle>,
}

pub enum JoinOutcome {
    Joined { user_id: UserId, as_admin: bool },
    Waiting,
    Rejected { reason: RejectReason },
}

/// Run one join request to completion under a single room guard.
///
/// `draining` short-circuits everything: a restarting process takes no new
/// participants.
pub async fn join(
    room: &Arc<Room>,
    req: JoinRequest,
    draining: bool,
    bus: &dyn MessageBus,
) -> Result<JoinOutcome> {
    if draining {
        return Ok(JoinOutcome::Rejected {
            reason: RejectReason::Draining,
        });
    }
    if room.is_closed() {
        return Err(Error::NotFound(format!(
            "Room {} is closed",
            room.channel_id
        )));
    }

    let mut inner = room.write().await;
    let decision = evaluate(&inner, &req.user_key, req.is_admin_by_token);

    match decision {
        AdmissionDecision::Reject(reason) => {
            info!(
                channel_id = %room.channel_id,
                user_key = %req.user_key,
                reason = reason.as_str(),
                "Join rejected"
            );
            Ok(JoinOutcome::Rejected { reason })
        }
        AdmissionDecision::Waitlist => {
            inner.enroll_pending(PendingEntry {
                user_key: req.user_key.clone(),
                session_id: req.session_id,
                display_name: req.display_name,
                socket: req.socket,
                enrolled_seq: 0,
            });
            info!(
                channel_id = %room.channel_id,
                user_key = %req.user_key,
                "Join waitlisted"
            );
            Ok(JoinOutcome::Waiting)
        }
        AdmissionDecision::Admit { as_admin } => {
            let user_id = UserId::compose(&req.user_key, &req.session_id);
            if inner.clients.contains_key(&user_id) {
                return Err(Error::Conflict(format!(
                    "Session {user_id} is already joined"
                )));
            }

            inner
                .display_names
                .insert(req.user_key.clone(), req.display_name.clone());
            let admitted_seq = inner.next_admit_seq();
            inner.install_participant(
                Participant {
                    user_id: user_id.clone(),
                    user_key: req.user_key.clone(),
                    mode: req.mode,
                    socket: req.socket,
                    producer_transport: None,
                    consumer_transport: None,
                    producers: HashMap::new(),
                    consumer_count: 0,
                    is_muted: false,
                    is_camera_off: false,
                    admitted_seq,
                },
                bus,
            );

            // Ghosts and attendees never pick up the admin role, token
            // claim or not.
            let grants_admin = as_admin && req.mode.can_hold_admin();
            if grants_admin && inner.admin_user_keys.insert(req.user_key.clone()) {
                let event = RoomEvent::AdminUsersChanged {
                    admin_user_keys: inner.admin_user_keys.iter().cloned().collect(),
                };
                bus.send_to_channel(&room.channel_id, event.name(), event.payload());
            }
            if grants_admin && inner.host_user_key.is_none() {
                inner.host_user_key = Some(req.user_key.clone());
                let event = RoomEvent::HostChanged {
                    host_user_key: req.user_key.clone(),
                };
                bus.send_to_channel(&room.channel_id, event.name(), event.payload());
            }

            info!(
                channel_id = %room.channel_id,
                user_id = %user_id,
                as_admin = grants_admin,
                "Participant admitted"
            );
            Ok(JoinOutcome::Joined {
                user_id,
                as_admin: grants_admin,
            })
        }
    }
}

/// Operator admit: approve a waiting identity. The key lands on both allow
/// lists so the follow-up join passes the lock and guest gates.
pub async fn admit_pending(room: &Room, key: &UserKey, bus: &dyn MessageBus) -> Result<bool> {
    let mut inner = room.write().await;
    let Some(entry) = inner.remove_pending(key) else {
        return Ok(false);
    };

    inner.locked_allowed_user_keys.insert(key.clone());
    if !inner.blocked_user_keys.contains(key) {
        inner.allowed_user_keys.insert(key.clone());
    }

    let approved = RoomEvent::JoinApproved;
    entry.socket.send(approved.name(), approved.payload());

    let admitted = RoomEvent::UserAdmitted {
        user_key: key.clone(),
        display_name: entry.display_name.clone(),
    };
    inner.notify_admins(&admitted);

    info!(channel_id = %room.channel_id, user_key = %key, "Pending user admitted");
    Ok(true)
}

/// Operator reject: turn a waiting identity away and drop its socket.
pub async fn reject_pending(
    room: &Room,
    key: &UserKey,
    reason: &str,
    _bus: &dyn MessageBus,
) -> Result<bool> {
    let mut inner = room.write().await;
    let Some(entry) = inner.remove_pending(key) else {
        return Ok(false);
    };

    let rejected = RoomEvent::JoinRejected {
        reason: reason.to_string(),
    };
    entry.socket.send(rejected.name(), rejected.payload());
    entry.socket.disconnect(false);

    let event = RoomEvent::UserRejected {
        user_key: key.clone(),
        reason: reason.to_string(),
    };
    inner.notify_admins(&event);

    info!(channel_id = %room.channel_id, user_key = %key, reason, "Pending user rejected");
    Ok(true)
}

/// Admit every waiting identity. Returns the keys that were admitted.
pub async fn admit_all_pending(room: &Room, bus: &dyn MessageBus) -> Result<Vec<UserKey>> {
    let keys: Vec<UserKey> = {
        let inner = room.read().await;
        inner.pending.keys().cloned().collect()
    };
    let mut admitted = Vec::new();
    for key in keys {
        if admit_pending(room, &key, bus).await? {
            admitted.push(key);
        }
    }
    Ok(admitted)
}

/// Reject every waiting identity. Returns the keys that were rejected.
pub async fn reject_all_pending(
    room: &Room,
    reason: &str,
    bus: &dyn MessageBus,
) -> Result<Vec<UserKey>> {
    let keys: Vec<UserKey> = {
        let inner = room.read().await;
        inner.pending.keys().cloned().collect()
    };
    let mut rejected = Vec::new();
    for key in keys {
        if reject_pending(room, &key, reason, bus).await? {
            rejected.push(key);
        }
    }
    Ok(rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::models::policies::PolicyUpdate;
    use crate::test_helpers::*;

    fn join_request(key: &str, session: &str, admin: bool) -> JoinRequest {
        JoinRequest {
            user_key: UserKey::from(key),
            session_id: SessionId::from_string(session.to_string()),
            mode: ParticipantMode::Meeting,
            is_admin_by_token: admin,
            display_name: key.to_string(),
            socket: Arc::new(RecordingSocket::new(&format!("sock-{key}-{session}"))),
        }
    }

    #[tokio::test]
    async fn test_blocked_user_is_rejected() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        room.block_user(&UserKey::from("alice@x.y")).await;

        let outcome = join(&room, join_request("alice@x.y", "s1", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JoinOutcome::Rejected {
                reason: RejectReason::Blocked
            }
        ));
    }

    #[tokio::test]
    async fn test_admin_token_bypasses_block_and_lock() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        room.block_user(&UserKey::from("boss@x.y")).await;
        room.set_policies(
            &PolicyUpdate {
                locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let outcome = join(&room, join_request("boss@x.y", "s1", true), false, &bus)
            .await
            .unwrap();
        match outcome {
            JoinOutcome::Joined { as_admin, .. } => assert!(as_admin),
            _ => panic!("expected joined"),
        }

        // The first admin becomes host.
        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.host_user_key, Some(UserKey::from("boss@x.y")));
    }

    #[tokio::test]
    async fn test_locked_room_waitlists_unknown_user() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        room.set_policies(
            &PolicyUpdate {
                locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let outcome = join(&room, join_request("alice@x.y", "s1", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Waiting));
        assert_eq!(room.snapshot().await.pending_count, 1);
    }

    #[tokio::test]
    async fn test_no_guests_rejects_unallowed_guest() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        room.set_policies(
            &PolicyUpdate {
                no_guests: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let outcome = join(&room, join_request("guest:g1", "s1", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JoinOutcome::Rejected {
                reason: RejectReason::GuestsDisabled
            }
        ));

        // An explicitly allowed guest passes the gate.
        room.allow_user(&UserKey::from("guest:g2")).await.unwrap();
        let outcome = join(&room, join_request("guest:g2", "s1", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_sessions_are_independent() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));

        let first = join(&room, join_request("alice@x.y", "s1", false), false, &bus)
            .await
            .unwrap();
        let second = join(&room, join_request("alice@x.y", "s2", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(first, JoinOutcome::Joined { .. }));
        assert!(matches!(second, JoinOutcome::Joined { .. }));
        assert_eq!(room.snapshot().await.participant_count, 2);

        // The same session joining twice is a conflict.
        let dup = join(&room, join_request("alice@x.y", "s1", false), false, &bus).await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_identity_never_pending_while_active() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));

        join(&room, join_request("alice@x.y", "s1", false), false, &bus)
            .await
            .unwrap();
        room.set_policies(
            &PolicyUpdate {
                locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;
        // Even with the grandfather entry revoked, a second session of an
        // active identity is admitted rather than waitlisted.
        room.revoke_locked_allowed_user(&UserKey::from("alice@x.y"))
            .await;

        let outcome = join(&room, join_request("alice@x.y", "s2", false), false, &bus)
            .await
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined { .. }));

        let snapshot = room.snapshot().await;
        assert_eq!(snapshot.pending_count, 0);
        assert_eq!(snapshot.participant_count, 2);
    }

    #[tokio::test]
    async fn test_draining_rejects_joins() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        let outcome = join(&room, join_request("alice@x.y", "s1", false), true, &bus)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            JoinOutcome::Rejected {
                reason: RejectReason::Draining
            }
        ));
    }

    #[tokio::test]
    async fn test_admit_pending_grants_both_allow_lists() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        room.set_policies(
            &PolicyUpdate {
                locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let socket = enroll_test_pending(&room, "alice@x.y", "s1").await;
        let changed = admit_pending(&room, &UserKey::from("alice@x.y"), &bus)
            .await
            .unwrap();
        assert!(changed);
        assert!(socket.saw_event("joinApproved"));

        let snapshot = room.snapshot().await;
        assert!(snapshot
            .locked_allowed_user_keys
            .contains(&UserKey::from("alice@x.y")));
        assert_eq!(snapshot.pending_count, 0);

        // Idempotent: a second admit reports no change.
        let changed = admit_pending(&room, &UserKey::from("alice@x.y"), &bus)
            .await
            .unwrap();
        assert!(!changed);
    }

    #[tokio::test]
    async fn test_reject_pending_disconnects() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        let socket = enroll_test_pending(&room, "bob@x.y", "s1").await;

        let changed = reject_pending(&room, &UserKey::from("bob@x.y"), "not invited", &bus)
            .await
            .unwrap();
        assert!(changed);
        assert!(socket.saw_event("joinRejected"));
        assert!(socket.is_disconnected());
        assert_eq!(room.snapshot().await.pending_count, 0);
    }

    #[tokio::test]
    async fn test_admit_all_pending() {
        let bus = InMemoryBus::new();
        let room = Arc::new(test_room("t1", "r1"));
        enroll_test_pending(&room, "a@x.y", "s1").await;
        enroll_test_pending(&room, "b@x.y", "s1").await;

        let admitted = admit_all_pending(&room, &bus).await.unwrap();
        assert_eq!(admitted.len(), 2);
        assert_eq!(room.snapshot().await.pending_count, 0);
    }
}
