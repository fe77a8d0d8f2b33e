//! Administrator socket events.
//!
//! One event per operation, all funneling into the same engine functions the
//! operator HTTP surface uses. Authorization is rechecked on every event
//! against the room's current admin set, so a demotion mid-session cuts the
//! socket off immediately.

use serde_json::{json, Value};

use conclave_core::models::id::{ChannelId, ProducerId, UserId, UserKey};
use conclave_core::models::participant::{MediaKind, ProducerType};
use conclave_core::models::policies::PolicyUpdate;
use conclave_core::service::{admission, moderation};
use conclave_core::service::drain::DrainRequest;
use conclave_core::service::moderation::{BulkFlags, ProducerSelector};
use conclave_core::{Error, Result};

use crate::http::ApiState;

/// Legacy event names kept for older admin clients.
fn canonical(event: &str) -> &str {
    match event {
        "roomLock" => "admin:setPolicies",
        "kickUser" => "admin:kickUser",
        "muteUser" => "admin:muteUser",
        "blockUser" => "admin:blockUser",
        "transferHost" => "admin:transferHost",
        other => other,
    }
}

fn str_field(payload: &Value, field: &str) -> Result<String> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("Missing field '{field}'")))
}

fn opt_str_field(payload: &Value, field: &str) -> Option<String> {
    payload.get(field).and_then(Value::as_str).map(str::to_string)
}

fn reason_field(payload: &Value) -> String {
    opt_str_field(payload, "reason").unwrap_or_else(|| "moderation".to_string())
}

fn bool_field(payload: &Value, field: &str) -> bool {
    payload.get(field).and_then(Value::as_bool).unwrap_or(false)
}

fn selector_from(payload: &Value) -> Result<ProducerSelector> {
    let kinds = match payload.get("kinds").and_then(Value::as_array) {
        Some(values) => Some(
            values
                .iter()
                .filter_map(Value::as_str)
                .map(|s| {
                    MediaKind::parse(s)
                        .ok_or_else(|| Error::InvalidInput(format!("Unknown media kind '{s}'")))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    let types = match payload.get("types").and_then(Value::as_array) {
        Some(values) => Some(
            values
                .iter()
                .filter_map(Value::as_str)
                .map(|s| {
                    ProducerType::parse(s)
                        .ok_or_else(|| Error::InvalidInput(format!("Unknown producer type '{s}'")))
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        None => None,
    };
    Ok(ProducerSelector { kinds, types })
}

/// Dispatch one administrator event against its room.
///
/// The caller must hold the admin role at the moment of dispatch; the check
/// runs against room state, not against anything cached on the socket.
pub async fn dispatch(
    state: &ApiState,
    channel_id: &ChannelId,
    caller: &UserId,
    event: &str,
    payload: &Value,
) -> Result<Value> {
    let room = state
        .sfu
        .registry
        .get(channel_id)
        .ok_or_else(|| Error::NotFound(format!("Room {channel_id} not found")))?;

    {
        let inner = room.read().await;
        if !inner.is_admin_session(caller) {
            return Err(Error::Forbidden(
                "Administrator role required".to_string(),
            ));
        }
    }

    let bus = state.sfu.bus.as_ref();
    match canonical(event) {
        "admin:setPolicies" => {
            let update: PolicyUpdate = serde_json::from_value(payload.clone())?;
            let changed = room.set_policies(&update, bus).await;
            Ok(json!({ "success": true, "changed": changed }))
        }
        "admin:notice" => {
            let text = str_field(payload, "text")?;
            if text.trim().is_empty() {
                return Err(Error::InvalidInput("Notice text cannot be empty".to_string()));
            }
            let event = conclave_core::models::event::RoomEvent::AdminNotice {
                text: text.trim().to_string(),
            };
            bus.send_to_channel(channel_id, event.name(), event.payload());
            Ok(json!({ "success": true }))
        }
        "admin:getSnapshot" => {
            let snapshot = room.snapshot().await;
            Ok(json!({ "success": true, "snapshot": serde_json::to_value(snapshot)? }))
        }
        "admin:closeProducer" => {
            let producer_id = ProducerId::from_string(str_field(payload, "producerId")?);
            let outcome =
                moderation::close_producer_by_id(&room, &producer_id, &reason_field(payload))
                    .await;
            Ok(json!({ "success": true, "closed": outcome.closed }))
        }
        "admin:kickUser" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            let kicked =
                moderation::kick(&room, &target, &reason_field(payload), Some(caller), bus)
                    .await?;
            Ok(json!({ "success": true, "kicked": kicked }))
        }
        "admin:muteUser" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            let closed = moderation::close_client_producers(
                &room,
                &target,
                &ProducerSelector::audio(),
                &reason_field(payload),
            )
            .await?;
            Ok(json!({ "success": true, "closedCount": closed.len() }))
        }
        "admin:videoOff" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            let closed = moderation::close_client_producers(
                &room,
                &target,
                &ProducerSelector::camera_video(),
                &reason_field(payload),
            )
            .await?;
            Ok(json!({ "success": true, "closedCount": closed.len() }))
        }
        "admin:stopScreenShare" => {
            let closed = match opt_str_field(payload, "userId") {
                Some(user_id) => {
                    let target = UserId::from_string(user_id);
                    moderation::close_client_producers(
                        &room,
                        &target,
                        &ProducerSelector::screen(),
                        &reason_field(payload),
                    )
                    .await?
                    .len()
                }
                None => {
                    // No target: close whatever currently holds the marker.
                    let marker = room.read().await.screen_share_producer_id.clone();
                    match marker {
                        Some(producer_id) => usize::from(
                            moderation::close_producer_by_id(
                                &room,
                                &producer_id,
                                &reason_field(payload),
                            )
                            .await
                            .closed,
                        ),
                        None => 0,
                    }
                }
            };
            Ok(json!({ "success": true, "closedCount": closed }))
        }
        "admin:closeUserMedia" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            let closed = moderation::close_client_producers(
                &room,
                &target,
                &selector_from(payload)?,
                &reason_field(payload),
            )
            .await?;
            Ok(json!({ "success": true, "closedCount": closed.len() }))
        }
        "admin:bulkMedia" => {
            let flags = BulkFlags {
                include_admins: bool_field(payload, "includeAdmins"),
                include_ghosts: bool_field(payload, "includeGhosts"),
                include_attendees: bool_field(payload, "includeAttendees"),
            };
            let outcome = moderation::bulk_close(
                &room,
                &selector_from(payload)?,
                flags,
                &reason_field(payload),
                bus,
            )
            .await;
            Ok(json!({
                "success": true,
                "closedCount": outcome.closed.len(),
                "affectedUserIds": outcome
                    .affected_user_ids
                    .iter()
                    .map(UserId::as_str)
                    .collect::<Vec<_>>(),
            }))
        }
        "admin:blockUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            let outcome = moderation::block_identity(
                &room,
                &key,
                bool_field(payload, "kickPresent"),
                &reason_field(payload),
                bus,
            )
            .await;
            Ok(json!({
                "success": true,
                "changed": outcome.blocked_changed,
                "kicked": outcome.kicked.iter().map(UserId::as_str).collect::<Vec<_>>(),
            }))
        }
        "admin:unblockUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": room.unblock_user(&key).await }))
        }
        "admin:allowUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": room.allow_user(&key).await? }))
        }
        "admin:revokeAllowedUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": room.revoke_allowed_user(&key).await }))
        }
        "admin:allowLockedUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": room.allow_locked_user(&key).await }))
        }
        "admin:revokeLockedAllowedUser" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({
                "success": true,
                "changed": room.revoke_locked_allowed_user(&key).await
            }))
        }
        "admin:admitPending" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": admission::admit_pending(&room, &key, bus).await? }))
        }
        "admin:rejectPending" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            let reason = opt_str_field(payload, "reason").unwrap_or_else(|| "rejected".to_string());
            Ok(json!({
                "success": true,
                "changed": admission::reject_pending(&room, &key, &reason, bus).await?
            }))
        }
        "admin:admitAllPending" => {
            let admitted = admission::admit_all_pending(&room, bus).await?;
            Ok(json!({
                "success": true,
                "admitted": admitted.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            }))
        }
        "admin:rejectAllPending" => {
            let reason = opt_str_field(payload, "reason").unwrap_or_else(|| "rejected".to_string());
            let rejected = admission::reject_all_pending(&room, &reason, bus).await?;
            Ok(json!({
                "success": true,
                "rejected": rejected.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            }))
        }
        "admin:clearHands" => {
            Ok(json!({ "success": true, "changed": room.clear_hands(bus).await }))
        }
        "admin:transferHost" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            Ok(json!({ "success": true, "changed": moderation::transfer_host(&room, &target, bus).await? }))
        }
        "admin:promoteAdmin" => {
            let target = UserId::from_string(str_field(payload, "userId")?);
            Ok(json!({ "success": true, "changed": room.promote_to_admin(&target, bus).await? }))
        }
        "admin:demoteAdmin" => {
            let key = UserKey::from_string(str_field(payload, "userKey")?);
            Ok(json!({ "success": true, "changed": room.demote_admin(&key, bus).await? }))
        }
        "admin:removeNonAdmins" => {
            let kicked = moderation::remove_non_admins(
                &room,
                bool_field(payload, "includeGhosts"),
                bool_field(payload, "includeAttendees"),
                &reason_field(payload),
                bus,
            )
            .await;
            Ok(json!({
                "success": true,
                "kicked": kicked.iter().map(UserId::as_str).collect::<Vec<_>>(),
            }))
        }
        "admin:endRoom" => {
            let reason = opt_str_field(payload, "reason").unwrap_or_else(|| "ended".to_string());
            let _ = state.transcribers.stop(channel_id).await;
            state
                .sfu
                .registry
                .force_close(channel_id, bus, &reason)
                .await;
            Ok(json!({ "success": true }))
        }
        "admin:drain" => {
            let req: DrainRequest = serde_json::from_value(payload.clone())?;
            let outcome = conclave_core::service::drain::apply_drain(
                &state.sfu.registry,
                bus,
                &state.sfu.drain,
                req,
            )
            .await;
            Ok(json!({ "success": true, "outcome": serde_json::to_value(outcome)? }))
        }
        other => Err(Error::InvalidInput(format!("Unknown admin event '{other}'"))),
    }
}
