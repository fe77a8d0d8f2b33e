//! Typed fan-out events.
//!
//! Every state mutation that peers or administrators observe maps to one
//! variant here. Payload schemas are additive: new fields are optional and
//! consumers ignore fields they do not know.

use serde_json::{json, Value};

use crate::models::id::{ProducerId, UserId, UserKey};
use crate::models::participant::{MediaKind, ProducerType};

/// Metadata of one closed producer as carried in enforcement payloads.
#[derive(Debug, Clone)]
pub struct ClosedProducerInfo {
    pub producer_id: ProducerId,
    pub user_id: UserId,
    pub kind: MediaKind,
    pub producer_type: ProducerType,
}

impl ClosedProducerInfo {
    fn to_json(&self) -> Value {
        json!({
            "producerId": self.producer_id.as_str(),
            "userId": self.user_id.as_str(),
            "kind": self.kind.as_str(),
            "type": self.producer_type.as_str(),
        })
    }
}

#[derive(Debug, Clone)]
pub enum RoomEvent {
    ProducerClosed {
        producer: ClosedProducerInfo,
    },
    AdminProducerClosed {
        producer: ClosedProducerInfo,
        reason: String,
    },
    MediaEnforced {
        reason: String,
        producers: Vec<ClosedProducerInfo>,
    },
    AdminMediaEnforced {
        user_id: UserId,
        reason: String,
        producers: Vec<ClosedProducerInfo>,
    },
    AdminBulkMediaEnforced {
        reason: String,
        closed_count: usize,
        affected_user_ids: Vec<UserId>,
    },
    RoomLockChanged {
        locked: bool,
    },
    ChatLockChanged {
        chat_locked: bool,
    },
    NoGuestsChanged {
        no_guests: bool,
    },
    TtsDisabledChanged {
        tts_disabled: bool,
    },
    DmStateChanged {
        dm_enabled: bool,
    },
    HostChanged {
        host_user_key: UserKey,
    },
    AdminUsersChanged {
        admin_user_keys: Vec<UserKey>,
    },
    PendingUsersSnapshot {
        pending: Vec<(UserKey, String)>,
    },
    UserAdmitted {
        user_key: UserKey,
        display_name: String,
    },
    UserRejected {
        user_key: UserKey,
        reason: String,
    },
    Kicked {
        reason: String,
    },
    HandRaisedSnapshot {
        user_ids: Vec<UserId>,
    },
    AdminHandsCleared,
    AdminNotice {
        text: String,
    },
    RoomEnded {
        reason: String,
    },
    ServerRestarting {
        notice: Option<String>,
    },
    DisplayNameUpdated {
        user_id: UserId,
        display_name: String,
    },
    JoinApproved,
    JoinRejected {
        reason: String,
    },
    JoinSuperseded,
    ChatMessage {
        from_user_id: UserId,
        display_name: String,
        content: String,
    },
    DirectMessage {
        from_user_id: UserId,
        display_name: String,
        content: String,
    },
}

impl RoomEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ProducerClosed { .. } => "producerClosed",
            Self::AdminProducerClosed { .. } => "admin:producerClosed",
            Self::MediaEnforced { .. } => "mediaEnforced",
            Self::AdminMediaEnforced { .. } => "admin:mediaEnforced",
            Self::AdminBulkMediaEnforced { .. } => "admin:bulkMediaEnforced",
            Self::RoomLockChanged { .. } => "roomLockChanged",
            Self::ChatLockChanged { .. } => "chatLockChanged",
            Self::NoGuestsChanged { .. } => "noGuestsChanged",
            Self::TtsDisabledChanged { .. } => "ttsDisabledChanged",
            Self::DmStateChanged { .. } => "dmStateChanged",
            Self::HostChanged { .. } => "hostChanged",
            Self::AdminUsersChanged { .. } => "adminUsersChanged",
            Self::PendingUsersSnapshot { .. } => "pendingUsersSnapshot",
            Self::UserAdmitted { .. } => "userAdmitted",
            Self::UserRejected { .. } => "userRejected",
            Self::Kicked { .. } => "kicked",
            Self::HandRaisedSnapshot { .. } => "handRaisedSnapshot",
            Self::AdminHandsCleared => "admin:handsCleared",
            Self::AdminNotice { .. } => "adminNotice",
            Self::RoomEnded { .. } => "roomEnded",
            Self::ServerRestarting { .. } => "serverRestarting",
            Self::DisplayNameUpdated { .. } => "displayNameUpdated",
            Self::JoinApproved => "joinApproved",
            Self::JoinRejected { .. } => "joinRejected",
            Self::JoinSuperseded => "joinSuperseded",
            Self::ChatMessage { .. } => "chatMessage",
            Self::DirectMessage { .. } => "directMessage",
        }
    }

    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::ProducerClosed { producer } => producer.to_json(),
            Self::AdminProducerClosed { producer, reason } => {
                let mut payload = producer.to_json();
                payload["reason"] = json!(reason);
                payload
            }
            Self::MediaEnforced { reason, producers } => json!({
                "reason": reason,
                "producers": producers.iter().map(ClosedProducerInfo::to_json).collect::<Vec<_>>(),
            }),
            Self::AdminMediaEnforced {
                user_id,
                reason,
                producers,
            } => json!({
                "userId": user_id.as_str(),
                "reason": reason,
                "producers": producers.iter().map(ClosedProducerInfo::to_json).collect::<Vec<_>>(),
            }),
            Self::AdminBulkMediaEnforced {
                reason,
                closed_count,
                affected_user_ids,
            } => json!({
                "reason": reason,
                "closedCount": closed_count,
                "affectedUserIds": affected_user_ids.iter().map(UserId::as_str).collect::<Vec<_>>(),
            }),
            Self::RoomLockChanged { locked } => json!({ "locked": locked }),
            Self::ChatLockChanged { chat_locked } => json!({ "chatLocked": chat_locked }),
            Self::NoGuestsChanged { no_guests } => json!({ "noGuests": no_guests }),
            Self::TtsDisabledChanged { tts_disabled } => json!({ "ttsDisabled": tts_disabled }),
            Self::DmStateChanged { dm_enabled } => json!({ "dmEnabled": dm_enabled }),
            Self::HostChanged { host_user_key } => json!({ "hostUserKey": host_user_key.as_str() }),
            Self::AdminUsersChanged { admin_user_keys } => json!({
                "adminUserKeys": admin_user_keys.iter().map(UserKey::as_str).collect::<Vec<_>>(),
            }),
            Self::PendingUsersSnapshot { pending } => json!({
                "pending": pending
                    .iter()
                    .map(|(key, name)| json!({ "userKey": key.as_str(), "displayName": name }))
                    .collect::<Vec<_>>(),
            }),
            Self::UserAdmitted {
                user_key,
                display_name,
            } => json!({
                "userKey": user_key.as_str(),
                "displayName": display_name,
            }),
            Self::UserRejected { user_key, reason } => json!({
                "userKey": user_key.as_str(),
                "reason": reason,
            }),
            Self::Kicked { reason } => json!({ "reason": reason }),
            Self::HandRaisedSnapshot { user_ids } => json!({
                "userIds": user_ids.iter().map(UserId::as_str).collect::<Vec<_>>(),
            }),
            Self::AdminHandsCleared => json!({}),
            Self::AdminNotice { text } => json!({ "text": text }),
            Self::RoomEnded { reason } => json!({ "reason": reason }),
            Self::ServerRestarting { notice } => json!({
                "reconnecting": true,
                "notice": notice,
            }),
            Self::DisplayNameUpdated {
                user_id,
                display_name,
            } => json!({
                "userId": user_id.as_str(),
                "displayName": display_name,
            }),
            Self::JoinApproved => json!({}),
            Self::JoinRejected { reason } => json!({ "reason": reason }),
            Self::JoinSuperseded => json!({}),
            Self::ChatMessage {
                from_user_id,
                display_name,
                content,
            } => json!({
                "fromUserId": from_user_id.as_str(),
                "displayName": display_name,
                "content": content,
            }),
            Self::DirectMessage {
                from_user_id,
                display_name,
                content,
            } => json!({
                "fromUserId": from_user_id.as_str(),
                "displayName": display_name,
                "content": content,
                "direct": true,
            }),
        }
    }
}
