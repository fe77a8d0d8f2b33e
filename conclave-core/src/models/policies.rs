//! Room policy flags and partial policy updates.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoomPolicies {
    /// New non-admin joins enter the waiting room unless grandfathered.
    pub locked: bool,
    /// Non-admin chat broadcast is rejected.
    pub chat_locked: bool,
    /// Guest identities are rejected unless explicitly allowed.
    pub no_guests: bool,
    pub tts_disabled: bool,
    pub dm_enabled: bool,
    pub requires_meeting_invite_code: bool,
}

impl Default for RoomPolicies {
    fn default() -> Self {
        Self {
            locked: false,
            chat_locked: false,
            no_guests: false,
            tts_disabled: false,
            dm_enabled: true,
            requires_meeting_invite_code: false,
        }
    }
}

/// Partial update: only fields present are applied.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyUpdate {
    pub locked: Option<bool>,
    pub chat_locked: Option<bool>,
    pub no_guests: Option<bool>,
    pub tts_disabled: Option<bool>,
    pub dm_enabled: Option<bool>,
    pub requires_meeting_invite_code: Option<bool>,
}

/// Which flags actually changed, reported back to callers so a repeated
/// request yields `changed: {}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_locked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_guests: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_meeting_invite_code: Option<bool>,
}

impl PolicyChanges {
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.locked.is_none()
            && self.chat_locked.is_none()
            && self.no_guests.is_none()
            && self.tts_disabled.is_none()
            && self.dm_enabled.is_none()
            && self.requires_meeting_invite_code.is_none()
    }
}

impl RoomPolicies {
    /// Apply only the fields present in `update`; returns the diff.
    pub fn apply(&mut self, update: &PolicyUpdate) -> PolicyChanges {
        let mut changes = PolicyChanges::default();

        if let Some(v) = update.locked {
            if self.locked != v {
                self.locked = v;
                changes.locked = Some(v);
            }
        }
        if let Some(v) = update.chat_locked {
            if self.chat_locked != v {
                self.chat_locked = v;
                changes.chat_locked = Some(v);
            }
        }
        if let Some(v) = update.no_guests {
            if self.no_guests != v {
                self.no_guests = v;
                changes.no_guests = Some(v);
            }
        }
        if let Some(v) = update.tts_disabled {
            if self.tts_disabled != v {
                self.tts_disabled = v;
                changes.tts_disabled = Some(v);
            }
        }
        if let Some(v) = update.dm_enabled {
            if self.dm_enabled != v {
                self.dm_enabled = v;
                changes.dm_enabled = Some(v);
            }
        }
        if let Some(v) = update.requires_meeting_invite_code {
            if self.requires_meeting_invite_code != v {
                self.requires_meeting_invite_code = v;
                changes.requires_meeting_invite_code = Some(v);
            }
        }

        changes
    }
}
