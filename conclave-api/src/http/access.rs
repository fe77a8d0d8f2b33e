//! Access lists and waiting-room endpoints.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use conclave_core::models::id::UserKey;
use conclave_core::service::{admission, moderation};

use super::{resolve_room, ApiState, AppError, AppResult, OperatorAuth, Tenant};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessBody {
    pub user_keys: Vec<String>,
    #[serde(default)]
    pub kick_present: bool,
    #[serde(default)]
    pub reason: Option<String>,
    /// Target the lock bypass list instead of the guest allow list.
    #[serde(default)]
    pub locked_list: bool,
}

impl AccessBody {
    fn keys(&self) -> Result<Vec<UserKey>, AppError> {
        if self.user_keys.is_empty() {
            return Err(AppError::bad_request("userKeys cannot be empty"));
        }
        Ok(self
            .user_keys
            .iter()
            .map(|k| UserKey::from_string(k.clone()))
            .collect())
    }

    fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("policy")
    }
}

pub async fn get_access(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let snapshot = room.snapshot().await;
    Ok(Json(json!({
        "allowedUserKeys": snapshot.allowed_user_keys,
        "lockedAllowedUserKeys": snapshot.locked_allowed_user_keys,
        "blockedUserKeys": snapshot.blocked_user_keys,
        "adminUserKeys": snapshot.admin_user_keys,
    })))
}

pub async fn allow(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<AccessBody>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let mut changed = Vec::new();
    for key in body.keys()? {
        let added = if body.locked_list {
            room.allow_locked_user(&key).await
        } else {
            room.allow_user(&key).await?
        };
        if added {
            changed.push(key.0);
        }
    }
    Ok(Json(json!({ "success": true, "changed": changed })))
}

pub async fn revoke(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<AccessBody>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let mut changed = Vec::new();
    for key in body.keys()? {
        let removed = if body.locked_list {
            room.revoke_locked_allowed_user(&key).await
        } else {
            room.revoke_allowed_user(&key).await
        };
        if removed {
            changed.push(key.0);
        }
    }
    Ok(Json(json!({ "success": true, "changed": changed })))
}

pub async fn block(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<AccessBody>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let mut changed = Vec::new();
    let mut kicked: Vec<String> = Vec::new();
    for key in body.keys()? {
        let outcome = moderation::block_identity(
            &room,
            &key,
            body.kick_present,
            body.reason(),
            state.sfu.bus.as_ref(),
        )
        .await;
        if outcome.blocked_changed {
            changed.push(key.0);
        }
        kicked.extend(outcome.kicked.iter().map(|u| u.as_str().to_string()));
    }
    Ok(Json(json!({
        "success": true,
        "changed": changed,
        "kicked": kicked,
    })))
}

pub async fn unblock(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    Json(body): Json<AccessBody>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let mut changed = Vec::new();
    for key in body.keys()? {
        if room.unblock_user(&key).await {
            changed.push(key.0);
        }
    }
    Ok(Json(json!({ "success": true, "changed": changed })))
}

pub async fn admit_pending(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_key)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let key = UserKey::from_string(user_key);
    let changed = admission::admit_pending(&room, &key, state.sfu.bus.as_ref()).await?;
    Ok(Json(json!({ "success": true, "changed": changed })))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectBody {
    pub reason: Option<String>,
}

pub async fn reject_pending(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path((room_id, user_key)): Path<(String, String)>,
    body: Option<Json<RejectBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let key = UserKey::from_string(user_key);
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "rejected".to_string());
    let changed = admission::reject_pending(&room, &key, &reason, state.sfu.bus.as_ref()).await?;
    Ok(Json(json!({ "success": true, "changed": changed })))
}

pub async fn admit_all(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let admitted = admission::admit_all_pending(&room, state.sfu.bus.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "admitted": admitted.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
    })))
}

pub async fn reject_all(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
    body: Option<Json<RejectBody>>,
) -> AppResult<Json<Value>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "rejected".to_string());
    let rejected =
        admission::reject_all_pending(&room, &reason, state.sfu.bus.as_ref()).await?;
    Ok(Json(json!({
        "success": true,
        "rejected": rejected.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
    })))
}
