use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Generate a 12-character nanoid for entity IDs
pub fn generate_id() -> String {
    nanoid!(12)
}

/// Stable identity string used for access control.
///
/// Derived from the caller's token: email when present, otherwise the stable
/// subject, otherwise a `guest:`-prefixed guest id. Allow/block lists are
/// indexed by this key; one identity may hold several live sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserKey(pub String);

impl UserKey {
    #[must_use]
    pub const fn from_string(key: String) -> Self {
        Self(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Guest identities carry the `guest:` prefix.
    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.0.starts_with("guest:")
    }

    /// The local handle: the part before `@` for email-shaped keys, the full
    /// key otherwise.
    #[must_use]
    pub fn local_handle(&self) -> &str {
        self.0.split('@').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Session id distinguishing concurrent connections of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Session-scoped identity: `"{user_key}#{session_id}"`.
///
/// Uniquely identifies one live session of an identity in a room; participant
/// maps are indexed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[must_use]
    pub fn compose(key: &UserKey, session: &SessionId) -> Self {
        Self(format!("{}#{}", key.0, session.0))
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Back-parse the stable key. The session suffix starts at the last `#`
    /// so keys containing `#` are not mis-split.
    #[must_use]
    pub fn user_key(&self) -> UserKey {
        match self.0.rsplit_once('#') {
            Some((key, _)) => UserKey(key.to_string()),
            None => UserKey(self.0.clone()),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.0
            .rsplit_once('#')
            .map(|(_, session)| SessionId(session.to_string()))
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Tenant id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant-scoped room name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub String);

impl RoomId {
    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Process-global room key: `"{client_id}:{room_id}"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    #[must_use]
    pub fn compose(client_id: &ClientId, room_id: &RoomId) -> Self {
        Self(format!("{}:{}", client_id.0, room_id.0))
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tenant part. The room id may itself contain `:` so only the first
    /// separator counts.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        match self.0.split_once(':') {
            Some((client, _)) => ClientId(client.to_string()),
            None => ClientId(String::new()),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        match self.0.split_once(':') {
            Some((_, room)) => RoomId(room.to_string()),
            None => RoomId(self.0.clone()),
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Producer ID type (12-char nanoid when locally generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProducerId(pub String);

impl ProducerId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProducerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProducerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProducerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Transport ID type (12-char nanoid when locally generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransportId(pub String);

impl TransportId {
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id())
    }

    #[must_use]
    pub const fn from_string(id: String) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransportId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransportId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id() {
        let id = generate_id();
        assert_eq!(id.len(), 12);
    }

    #[test]
    fn test_user_id_round_trip() {
        let key = UserKey::from("alice@x.y");
        let session = SessionId::from_string("s1".to_string());
        let user_id = UserId::compose(&key, &session);

        assert_eq!(user_id.as_str(), "alice@x.y#s1");
        assert_eq!(user_id.user_key(), key);
        assert_eq!(user_id.session_id().unwrap().as_str(), "s1");
    }

    #[test]
    fn test_user_key_with_hash_splits_on_last_separator() {
        let key = UserKey::from("weird#handle");
        let session = SessionId::from_string("s9".to_string());
        let user_id = UserId::compose(&key, &session);

        assert_eq!(user_id.user_key(), key);
    }

    #[test]
    fn test_channel_id_round_trip() {
        let channel = ChannelId::compose(&ClientId::from("t1"), &RoomId::from("daily:standup"));
        assert_eq!(channel.as_str(), "t1:daily:standup");
        assert_eq!(channel.client_id().as_str(), "t1");
        assert_eq!(channel.room_id().as_str(), "daily:standup");
    }

    #[test]
    fn test_guest_detection() {
        assert!(UserKey::from("guest:abc123").is_guest());
        assert!(!UserKey::from("alice@x.y").is_guest());
    }

    #[test]
    fn test_local_handle() {
        assert_eq!(UserKey::from("alice@x.y").local_handle(), "alice");
        assert_eq!(UserKey::from("guest:abc").local_handle(), "guest:abc");
    }
}
