//! Cluster overview and room inspection.

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use conclave_core::service::room::RoomSnapshot;

use super::{resolve_room, ApiState, AppResult, OperatorAuth, Tenant};

pub async fn overview(
    _auth: OperatorAuth,
    State(state): State<ApiState>,
) -> AppResult<Json<Value>> {
    let rooms = state.sfu.registry.list_all();
    let mut participants = 0;
    for room in &rooms {
        participants += room.read().await.clients.len();
    }
    let workers = state.sfu.workers();

    Ok(Json(json!({
        "instanceId": state.sfu.instance_id(),
        "version": state.sfu.version(),
        "uptimeSeconds": state.sfu.uptime().as_secs(),
        "draining": state.sfu.drain.is_draining(),
        "roomCount": rooms.len(),
        "participantCount": participants,
        "workerCount": workers.len(),
    })))
}

pub async fn workers(
    _auth: OperatorAuth,
    State(state): State<ApiState>,
) -> AppResult<Json<Value>> {
    Ok(Json(json!({ "workers": state.sfu.workers() })))
}

pub async fn list_rooms(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
) -> AppResult<Json<Value>> {
    let rooms = match &tenant.0 {
        Some(client_id) => state.sfu.registry.list_by_client_id(client_id),
        None => state.sfu.registry.list_all(),
    };

    let mut snapshots: Vec<RoomSnapshot> = Vec::with_capacity(rooms.len());
    for room in rooms {
        snapshots.push(room.snapshot().await);
    }
    Ok(Json(json!({ "rooms": snapshots })))
}

pub async fn get_room(
    _auth: OperatorAuth,
    tenant: Tenant,
    State(state): State<ApiState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<RoomSnapshot>> {
    let room = resolve_room(&state, &room_id, &tenant)?;
    Ok(Json(room.snapshot().await))
}
