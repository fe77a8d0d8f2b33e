//! Room policy, lifecycle and media-moderation endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use conclave_core::models::event::RoomEvent;
use conclave_core::models::id::{ProducerId, UserId};
use conclave_core::models::policies::PolicyUpdate;
use conclave_core::service::moderation::{self, ProducerSelector};

use super::{resolve_room, ApiState, AppResult, OperatorAuth, Tenant};

fn default_reason() -> String {
    "moderation".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasonBody {
    #[serde(default = "default_reason")]
    pub reason: String,
}

impl ReasonBody {
    fn fallback() -> Self {
        Self {
            reason: default_reason(),
        }
    }
}

pub async fn set_policies(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(update): Json<PolicyUpdate>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let changed = room.set_policies(&update, state.sfu.bus.as_ref()).await;
    Ok(Json(json!({ "success": true, "changed": changed })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeBody {
    pub text: String,
}

pub async fn notice(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<NoticeBody>,
) -> AppResult<Json<Value>> {
    if body.text.trim().is_empty() {
        return Err(super::AppError::bad_request("Notice text cannot be empty"));
    }
    let room = resolve_room(&state, &room_id, &tenant)?;
    let event = RoomEvent::AdminNotice {
        text: body.text.trim().to_string(),
    };
    state
        .sfu
        .bus
        .send_to_channel(&room.channel_id, event.name(), event.payload());
    Ok(Json(json!({ "success": true })))
}

pub async fn end_room(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;

    // Stop the audio tap first so its transcript survives for minutes.
    let _ = state.transcribers.stop(&room.channel_id).await;
    state
        .sfu
        .registry
        .force_close(&room.channel_id, state.sfu.bus.as_ref(), &reason)
        .await;
    Ok(Json(json!({ "success": true })))
}

pub async fn close_producer(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, producer_id)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;
    let producer_id = ProducerId::from_string(producer_id);

    let outcome = moderation::close_producer_by_id(&room, &producer_id, &reason).await;
    Ok(Json(json!({
        "success": true,
        "closed": outcome.closed,
        "producer": outcome.producer.map(|p| json!({
            "producerId": p.producer_id.as_str(),
            "userId": p.user_id.as_str(),
            "kind": p.kind.as_str(),
            "type": p.producer_type.as_str(),
        })),
    })))
}

pub async fn kick_user(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;
    let user_id = UserId::from_string(user_id);

    let kicked = moderation::kick(&room, &user_id, &reason, None, state.sfu.bus.as_ref()).await?;
    Ok(Json(json!({ "success": true, "kicked": kicked })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaBody {
    #[serde(flatten)]
    pub selector: ProducerSelector,
    #[serde(default = "default_reason")]
    pub reason: String,
}

pub async fn close_user_media(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    Json(body): Json<MediaBody>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let user_id = UserId::from_string(user_id);

    let closed =
        moderation::close_client_producers(&room, &user_id, &body.selector, &body.reason).await?;
    Ok(Json(json!({
        "success": true,
        "closedCount": closed.len(),
        "producerIds": closed.iter().map(|p| p.producer_id.as_str()).collect::<Vec<_>>(),
    })))
}

async fn enforce_selector(
    state: &ApiState,
    tenant: &Tenant,
    room_id: &str,
    user_id: String,
    selector: ProducerSelector,
    reason: String,
) -> AppResult<Json<Value>> {
    let room = resolve_room(state, room_id, tenant)?;
    let user_id = UserId::from_string(user_id);
    let closed =
        moderation::close_client_producers(&room, &user_id, &selector, &reason).await?;
    Ok(Json(json!({
        "success": true,
        "closedCount": closed.len(),
    })))
}

pub async fn mute_user(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;
    enforce_selector(
        &state,
        &tenant,
        &room_id,
        user_id,
        ProducerSelector::audio(),
        reason,
    )
    .await
}

pub async fn video_off_user(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;
    enforce_selector(
        &state,
        &tenant,
        &room_id,
        user_id,
        ProducerSelector::camera_video(),
        reason,
    )
    .await
}

pub async fn stop_screen_user(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    body: Option<Json<ReasonBody>>,
) -> AppResult<Json<Value>> {
    let reason = body.map_or_else(ReasonBody::fallback, |Json(b)| b).reason;
    enforce_selector(
        &state,
        &tenant,
        &room_id,
        user_id,
        ProducerSelector::screen(),
        reason,
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockSessionBody {
    pub kick_present: bool,
    pub reason: String,
}

impl Default for BlockSessionBody {
    fn default() -> Self {
        Self {
            kick_present: false,
            reason: default_reason(),
        }
    }
}

/// Block the identity behind one session id.
pub async fn block_user_session(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
    body: Option<Json<BlockSessionBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let body = body.map_or_else(BlockSessionBody::default, |Json(b)| b);
    let key = UserId::from_string(user_id).user_key();

    let outcome = moderation::block_identity(
        &room,
        &key,
        body.kick_present,
        &body.reason,
        state.sfu.bus.as_ref(),
    )
    .await;
    Ok(Json(json!({
        "success": true,
        "changed": outcome.blocked_changed,
        "kicked": outcome.kicked.iter().map(UserId::as_str).collect::<Vec<_>>(),
    })))
}

pub async fn unblock_user_session(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let key = UserId::from_string(user_id).user_key();
    let changed = room.unblock_user(&key).await;
    Ok(Json(json!({ "success": true, "changed": changed })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoveNonAdminsBody {
    pub include_ghosts: bool,
    pub include_attendees: bool,
    pub reason: String,
}

impl Default for RemoveNonAdminsBody {
    fn default() -> Self {
        Self {
            include_ghosts: false,
            include_attendees: false,
            reason: default_reason(),
        }
    }
}

pub async fn remove_non_admins(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    body: Option<Json<RemoveNonAdminsBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let body = body.map_or_else(RemoveNonAdminsBody::default, |Json(b)| b);

    let kicked = moderation::remove_non_admins(
        &room,
        body.include_ghosts,
        body.include_attendees,
        &body.reason,
        state.sfu.bus.as_ref(),
    )
    .await;
    Ok(Json(json!({
        "success": true,
        "kickedCount": kicked.len(),
        "kicked": kicked.iter().map(UserId::as_str).collect::<Vec<_>>(),
    })))
}

pub async fn clear_hands(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let changed = room.clear_hands(state.sfu.bus.as_ref()).await;
    Ok(Json(json!({ "success": true, "changed": changed })))
}
