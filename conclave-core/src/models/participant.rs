//! Participants, pending (waiting-room) entries and media producer refs.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::SocketHandle;
use crate::media::{MediaProducer, MediaTransport};
use crate::models::id::{ProducerId, SessionId, UserId, UserKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerType {
    Webcam,
    Screen,
}

impl ProducerType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webcam => "webcam",
            Self::Screen => "screen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webcam" => Some(Self::Webcam),
            "screen" => Some(Self::Screen),
            _ => None,
        }
    }
}

/// How a participant entered the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantMode {
    #[default]
    Meeting,
    /// Observes without broadcasting identity.
    Ghost,
    WebinarAttendee,
    Observer,
}

impl ParticipantMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "meeting" => Some(Self::Meeting),
            "ghost" => Some(Self::Ghost),
            "webinar_attendee" => Some(Self::WebinarAttendee),
            "observer" => Some(Self::Observer),
            _ => None,
        }
    }

    /// Ghosts and webinar attendees may not hold the admin role.
    #[must_use]
    pub const fn can_hold_admin(self) -> bool {
        !matches!(self, Self::Ghost | Self::WebinarAttendee)
    }
}

/// Capability-derived role; evaluated against the room's admin/host sets,
/// never against type identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Admin,
    Participant,
    Ghost,
    Attendee,
}

/// Handle to one published media stream, tagged by `(kind, type)`.
#[derive(Clone)]
pub struct ProducerRef {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub producer_type: ProducerType,
    pub handle: Arc<dyn MediaProducer>,
}

impl std::fmt::Debug for ProducerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("producer_type", &self.producer_type)
            .finish()
    }
}

/// One live session of an identity inside a room.
pub struct Participant {
    pub user_id: UserId,
    pub user_key: UserKey,
    pub mode: ParticipantMode,
    pub socket: Arc<dyn SocketHandle>,
    pub producer_transport: Option<Arc<dyn MediaTransport>>,
    pub consumer_transport: Option<Arc<dyn MediaTransport>>,
    /// At most one producer per `(kind, type)` tuple.
    pub producers: HashMap<(MediaKind, ProducerType), ProducerRef>,
    pub consumer_count: usize,
    pub is_muted: bool,
    pub is_camera_off: bool,
    /// Monotonic admission sequence, drives snapshot ordering.
    pub admitted_seq: u64,
}

impl Participant {
    /// Role predicate over the room's admin/host sets.
    #[must_use]
    pub fn role(&self, admins: &std::collections::BTreeSet<UserKey>, host: Option<&UserKey>) -> Role {
        match self.mode {
            ParticipantMode::Ghost => Role::Ghost,
            ParticipantMode::WebinarAttendee => Role::Attendee,
            _ => {
                if host == Some(&self.user_key) {
                    Role::Host
                } else if admins.contains(&self.user_key) {
                    Role::Admin
                } else {
                    Role::Participant
                }
            }
        }
    }

    /// Producers matching an optional kind/type selector. Omitted selector
    /// fields match everything.
    #[must_use]
    pub fn select_producers(
        &self,
        kinds: Option<&[MediaKind]>,
        types: Option<&[ProducerType]>,
    ) -> Vec<ProducerRef> {
        self.producers
            .values()
            .filter(|p| kinds.map_or(true, |ks| ks.contains(&p.kind)))
            .filter(|p| types.map_or(true, |ts| ts.contains(&p.producer_type)))
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("user_id", &self.user_id)
            .field("mode", &self.mode)
            .field("producers", &self.producers.len())
            .field("is_muted", &self.is_muted)
            .field("is_camera_off", &self.is_camera_off)
            .finish()
    }
}

/// Waiting-room record, keyed by user key: one pending slot per identity
/// regardless of how many sessions it opens.
pub struct PendingEntry {
    pub user_key: UserKey,
    pub session_id: SessionId,
    pub display_name: String,
    pub socket: Arc<dyn SocketHandle>,
    /// Monotonic enrollment sequence, drives snapshot ordering.
    pub enrolled_seq: u64,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("user_key", &self.user_key)
            .field("session_id", &self.session_id)
            .field("display_name", &self.display_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_admin_eligibility() {
        assert!(ParticipantMode::Meeting.can_hold_admin());
        assert!(ParticipantMode::Observer.can_hold_admin());
        assert!(!ParticipantMode::Ghost.can_hold_admin());
        assert!(!ParticipantMode::WebinarAttendee.can_hold_admin());
    }

    #[test]
    fn test_parse_kind_and_type() {
        assert_eq!(MediaKind::parse("audio"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::parse("data"), None);
        assert_eq!(ProducerType::parse("screen"), Some(ProducerType::Screen));
        assert_eq!(ProducerType::parse("slides"), None);
    }
}
