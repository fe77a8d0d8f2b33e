//! Health and status endpoints. `/health` and `/status` are
//! unauthenticated; `/rooms` requires the operator secret.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{ApiState, AppResult, OperatorAuth};

pub async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "instanceId": state.sfu.instance_id(),
        "version": state.sfu.version(),
        "uptimeSeconds": state.sfu.uptime().as_secs(),
    }))
}

pub async fn status(State(state): State<ApiState>) -> Json<Value> {
    let rooms = state.sfu.registry.list_all();
    let mut participants = 0;
    let mut pending = 0;
    for room in &rooms {
        let inner = room.read().await;
        participants += inner.clients.len();
        pending += inner.pending.len();
    }

    Json(json!({
        "status": "ok",
        "instanceId": state.sfu.instance_id(),
        "version": state.sfu.version(),
        "uptimeSeconds": state.sfu.uptime().as_secs(),
        "draining": state.sfu.drain.is_draining(),
        "roomCount": rooms.len(),
        "participantCount": participants,
        "pendingCount": pending,
        "transcriptionEnabled": state.transcribers.enabled(),
    }))
}

pub async fn rooms(_auth: OperatorAuth, State(state): State<ApiState>) -> AppResult<Json<Value>> {
    let mut rooms = Vec::new();
    for room in state.sfu.registry.list_all() {
        let inner = room.read().await;
        rooms.push(json!({
            "channelId": room.channel_id.as_str(),
            "clientId": room.client_id.as_str(),
            "roomId": room.room_id.as_str(),
            "participantCount": inner.clients.len(),
            "pendingCount": inner.pending.len(),
            "locked": inner.policies.locked,
        }));
    }
    Ok(Json(json!({ "rooms": rooms })))
}
