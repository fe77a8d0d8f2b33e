//! Minutes endpoint: summarize-then-PDF for a room, live or ended.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use conclave_core::models::id::{ChannelId, ClientId, RoomId};
use conclave_core::service::registry::Resolved;

use super::{ApiState, AppError, AppResult, OperatorAuth};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinutesBody {
    pub room_id: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Find the channel the request means. Live rooms resolve through the
/// registry; ended rooms resolve through the retained transcript and PDF
/// caches, with the same ambiguity rules.
fn resolve_channel(
    state: &ApiState,
    room_id: &RoomId,
    client_id: Option<&ClientId>,
) -> Result<(ChannelId, bool), AppError> {
    match state.sfu.registry.resolve_by_room_id(room_id, client_id) {
        Resolved::Room(room) => {
            let channel_id = room.channel_id.clone();
            return Ok((channel_id, true));
        }
        Resolved::Ambiguous(candidates) => {
            return Err(conclave_core::Error::ambiguous_room(
                room_id.as_str(),
                candidates.into_iter().map(|c| c.0).collect(),
            )
            .into());
        }
        Resolved::NotFound => {}
    }

    let mut candidates: Vec<ChannelId> = state
        .transcribers
        .stopped_channels()
        .into_iter()
        .chain(state.minutes.cached_channels())
        .filter(|c| &c.room_id() == room_id)
        .filter(|c| client_id.map_or(true, |t| &c.client_id() == t))
        .collect();
    candidates.sort();
    candidates.dedup();

    match candidates.len() {
        0 => Err(AppError::not_found(format!(
            "No room or minutes found for {room_id}"
        ))),
        1 => Ok((candidates.remove(0), false)),
        _ => Err(conclave_core::Error::ambiguous_room(
            room_id.as_str(),
            candidates.into_iter().map(|c| c.0).collect(),
        )
        .into()),
    }
}

pub async fn minutes(
    _auth: OperatorAuth,
    State(state): State<ApiState>,
    Json(body): Json<MinutesBody>,
) -> AppResult<Response> {
    if body.room_id.trim().is_empty() {
        return Err(AppError::bad_request("roomId cannot be empty"));
    }
    let room_id = RoomId::from_string(body.room_id.clone());
    let client_id = body.client_id.map(ClientId::from_string);

    let (channel_id, room_in_registry) = resolve_channel(&state, &room_id, client_id.as_ref())?;

    // A registered but empty room counts as inactive so its output caches.
    let room_active = if room_in_registry {
        match state.sfu.registry.get(&channel_id) {
            Some(room) => room.read().await.clients.len() > 0,
            None => false,
        }
    } else {
        false
    };

    let live_transcript = state.transcribers.transcript_text(&channel_id);
    let pdf = state
        .minutes
        .generate(&channel_id, &room_id, room_active, live_transcript)
        .await
        .map_err(|e| AppError::from_core_ref(&e))?;

    let filename = format!("minutes-{room_id}.pdf");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        pdf,
    )
        .into_response())
}
