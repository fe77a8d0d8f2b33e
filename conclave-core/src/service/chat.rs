//! Chat routing: room broadcast vs directed messages, plus the policy gates
//! the server owns (`/tts` and DM availability). Slash commands other than
//! `/tts` pass through untouched; clients intercept them.

use tracing::debug;

use crate::bus::MessageBus;
use crate::models::event::RoomEvent;
use crate::models::id::{UserId, UserKey};
use crate::service::room::{Room, RoomInner};
use crate::{Error, Result};

/// Punctuation stripped from the end of a DM handle token.
const HANDLE_TRAILING_PUNCTUATION: &[char] = &[',', ':', ';', '.', '!', '?'];

#[derive(Debug, PartialEq, Eq)]
pub enum ChatRoute {
    Broadcast {
        content: String,
    },
    /// Directed message: every live session of the matched identity.
    Direct {
        target_key: UserKey,
        targets: Vec<UserId>,
        content: String,
    },
}

/// Lookup normalization: case-folded, trailing punctuation stripped. This is
/// deliberately looser than display-name label normalization.
fn normalize_handle(token: &str) -> String {
    token
        .trim_end_matches(HANDLE_TRAILING_PUNCTUATION)
        .to_lowercase()
}

fn matches_participant(
    inner: &RoomInner,
    user_id: &UserId,
    key: &UserKey,
    needle: &str,
) -> bool {
    if user_id.as_str().to_lowercase() == needle {
        return true;
    }
    if key.as_str().to_lowercase() == needle {
        return true;
    }
    if key.local_handle().to_lowercase() == needle {
        return true;
    }
    if let Some(name) = inner.display_names.get(key) {
        if name.to_lowercase() == needle {
            return true;
        }
    }
    false
}

/// Decide where a message goes. Validation and the policy gates happen here;
/// delivery is the caller's business.
pub fn route_message(
    inner: &RoomInner,
    sender: &UserId,
    raw: &str,
    max_len: usize,
) -> Result<ChatRoute> {
    let content = raw.trim();
    if content.is_empty() {
        return Err(Error::InvalidInput("Message cannot be empty".to_string()));
    }
    if content.chars().count() > max_len {
        return Err(Error::InvalidInput(format!(
            "Message must be at most {max_len} characters"
        )));
    }

    let sender_key = sender.user_key();

    if content.starts_with("/tts") && inner.policies.tts_disabled {
        return Err(Error::Forbidden(
            "Text-to-speech is disabled in this room".to_string(),
        ));
    }

    // `@handle body` is a DM intent; a bare `@handle` stays a broadcast.
    if let Some(rest) = content.strip_prefix('@') {
        if let Some((token, body)) = rest.split_once(char::is_whitespace) {
            let body = body.trim();
            if !token.is_empty() && !body.is_empty() {
                return resolve_direct(inner, sender, &sender_key, token, body);
            }
        }
    }

    if inner.policies.chat_locked && !inner.admin_user_keys.contains(&sender_key) {
        return Err(Error::Forbidden(
            "Chat is locked in this room".to_string(),
        ));
    }

    Ok(ChatRoute::Broadcast {
        content: content.to_string(),
    })
}

fn resolve_direct(
    inner: &RoomInner,
    sender: &UserId,
    sender_key: &UserKey,
    token: &str,
    body: &str,
) -> Result<ChatRoute> {
    if !inner.policies.dm_enabled {
        return Err(Error::Forbidden(
            "Direct messages are disabled in this room".to_string(),
        ));
    }

    let needle = normalize_handle(token);
    if needle.is_empty() {
        return Err(Error::InvalidInput("Empty DM target".to_string()));
    }

    // Collect matches, folding the sessions of one identity together.
    let mut matched_keys: Vec<UserKey> = Vec::new();
    for participant in inner.clients.values() {
        if matches_participant(inner, &participant.user_id, &participant.user_key, &needle)
            && !matched_keys.contains(&participant.user_key)
        {
            matched_keys.push(participant.user_key.clone());
        }
    }

    match matched_keys.len() {
        0 => Err(Error::NotFound(format!("No participant matches @{token}"))),
        1 => {
            let target_key = matched_keys.remove(0);
            if &target_key == sender_key {
                return Err(Error::Forbidden(
                    "Cannot send a direct message to yourself".to_string(),
                ));
            }
            Ok(ChatRoute::Direct {
                targets: inner.sessions_of(&target_key),
                target_key,
                content: body.to_string(),
            })
        }
        _ => Err(Error::Ambiguous {
            message: format!("@{token} matches multiple participants"),
            candidates: matched_keys.into_iter().map(|k| k.0).collect(),
        }),
    }
}

/// Route and deliver one message under the room guard.
pub async fn deliver(
    room: &Room,
    sender: &UserId,
    raw: &str,
    max_len: usize,
    bus: &dyn MessageBus,
) -> Result<ChatRoute> {
    let inner = room.read().await;
    if !inner.clients.contains_key(sender) {
        return Err(Error::NotFound(format!("Participant {sender} not found")));
    }
    let route = route_message(&inner, sender, raw, max_len)?;

    let sender_key = sender.user_key();
    let display_name = inner
        .display_names
        .get(&sender_key)
        .cloned()
        .unwrap_or_else(|| sender_key.local_handle().to_string());

    match &route {
        ChatRoute::Broadcast { content } => {
            let event = RoomEvent::ChatMessage {
                from_user_id: sender.clone(),
                display_name,
                content: content.clone(),
            };
            bus.send_to_channel(&room.channel_id, event.name(), event.payload());
        }
        ChatRoute::Direct {
            targets, content, ..
        } => {
            let event = RoomEvent::DirectMessage {
                from_user_id: sender.clone(),
                display_name,
                content: content.clone(),
            };
            let payload = event.payload();
            for target in targets {
                if let Some(participant) = inner.clients.get(target) {
                    participant.socket.send(event.name(), payload.clone());
                }
            }
            // The sender sees their own DM as well.
            if let Some(participant) = inner.clients.get(sender) {
                participant.socket.send(event.name(), payload);
            }
            debug!(
                channel_id = %room.channel_id,
                from = %sender,
                sessions = targets.len(),
                "Direct message delivered"
            );
        }
    }
    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::models::policies::PolicyUpdate;
    use crate::test_helpers::*;

    async fn seeded_room() -> (crate::service::room::Room, InMemoryBus, UserId, UserId) {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let alice = install_test_participant(&room, "alice@x.y", "s1", &bus).await;
        let bob = install_test_participant(&room, "bob@x.y", "s1", &bus).await;
        (room, bus, alice, bob)
    }

    #[tokio::test]
    async fn test_plain_message_broadcasts() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let route = route_message(&inner, &alice, "hello room", 1000).unwrap();
        assert_eq!(
            route,
            ChatRoute::Broadcast {
                content: "hello room".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dm_by_local_handle_case_insensitive() {
        let (room, _bus, alice, bob) = seeded_room().await;
        let inner = room.read().await;
        let route = route_message(&inner, &alice, "@Bob, got a minute?", 1000).unwrap();
        match route {
            ChatRoute::Direct {
                target_key,
                targets,
                content,
            } => {
                assert_eq!(target_key, UserKey::from("bob@x.y"));
                assert_eq!(targets, vec![bob]);
                assert_eq!(content, "got a minute?");
            }
            ChatRoute::Broadcast { .. } => panic!("expected DM"),
        }
    }

    #[tokio::test]
    async fn test_dm_reaches_every_session_of_identity() {
        let (room, bus, alice, bob_s1) = seeded_room().await;
        let bob_s2 = install_test_participant(&room, "bob@x.y", "s2", &bus).await;

        let inner = room.read().await;
        let route = route_message(&inner, &alice, "@bob ping", 1000).unwrap();
        match route {
            ChatRoute::Direct { targets, .. } => {
                assert_eq!(targets, vec![bob_s1, bob_s2]);
            }
            ChatRoute::Broadcast { .. } => panic!("expected DM"),
        }
    }

    #[tokio::test]
    async fn test_dm_by_full_user_id() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let route = route_message(&inner, &alice, "@bob@x.y#s1 hi", 1000).unwrap();
        assert!(matches!(route, ChatRoute::Direct { .. }));
    }

    #[tokio::test]
    async fn test_bare_handle_is_broadcast() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let route = route_message(&inner, &alice, "@bob", 1000).unwrap();
        assert!(matches!(route, ChatRoute::Broadcast { .. }));
    }

    #[tokio::test]
    async fn test_self_dm_rejected() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let result = route_message(&inner, &alice, "@alice hi me", 1000);
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_unknown_target_not_found() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let result = route_message(&inner, &alice, "@nobody hi", 1000);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_ambiguous_target() {
        let (room, bus, alice, _bob) = seeded_room().await;
        // Two identities whose display name collides.
        let carol = install_test_participant(&room, "carol@x.y", "s1", &bus).await;
        room.set_display_name(&carol, "Bob".to_string(), &bus)
            .await
            .unwrap();

        let inner = room.read().await;
        let result = route_message(&inner, &alice, "@bob hello", 1000);
        match result {
            Err(Error::Ambiguous { candidates, .. }) => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_message_rejected() {
        let (room, _bus, alice, _bob) = seeded_room().await;
        let inner = room.read().await;
        let long = "x".repeat(1001);
        assert!(matches!(
            route_message(&inner, &alice, &long, 1000),
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_tts_gate() {
        let (room, bus, alice, _bob) = seeded_room().await;
        {
            let inner = room.read().await;
            assert!(route_message(&inner, &alice, "/tts hello", 1000).is_ok());
        }
        room.set_policies(
            &PolicyUpdate {
                tts_disabled: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;
        let inner = room.read().await;
        assert!(matches!(
            route_message(&inner, &alice, "/tts hello", 1000),
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_dm_gate() {
        let (room, bus, alice, _bob) = seeded_room().await;
        room.set_policies(
            &PolicyUpdate {
                dm_enabled: Some(false),
                ..Default::default()
            },
            &bus,
        )
        .await;
        let inner = room.read().await;
        assert!(matches!(
            route_message(&inner, &alice, "@bob hi", 1000),
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_chat_lock_blocks_non_admins() {
        let (room, bus, alice, bob) = seeded_room().await;
        room.promote_to_admin(&alice, &bus).await.unwrap();
        room.set_policies(
            &PolicyUpdate {
                chat_locked: Some(true),
                ..Default::default()
            },
            &bus,
        )
        .await;

        let inner = room.read().await;
        assert!(route_message(&inner, &alice, "admins still talk", 1000).is_ok());
        assert!(matches!(
            route_message(&inner, &bob, "but I cannot", 1000),
            Err(Error::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_deliver_direct_message() {
        let bus = InMemoryBus::new();
        let room = test_room("t1", "r1");
        let alice = install_test_participant(&room, "alice@x.y", "s1", &bus).await;
        let bob_socket = std::sync::Arc::new(RecordingSocket::new("bob-sock"));
        install_test_participant_with(
            &room,
            "bob@x.y",
            "s1",
            crate::models::participant::ParticipantMode::Meeting,
            bob_socket.clone(),
            &bus,
        )
        .await;

        deliver(&room, &alice, "@bob psst", 1000, &bus).await.unwrap();
        assert!(bob_socket.saw_event("directMessage"));
        let payload = bob_socket.last_payload("directMessage").unwrap();
        assert_eq!(payload["content"], serde_json::json!("psst"));
    }
}
