// Module: http
// Operator HTTP surface over the shared engine functions.

pub mod access;
pub mod admin;
pub mod auth;
pub mod drain;
pub mod error;
pub mod minutes;
pub mod rooms;
pub mod status;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use conclave_core::models::id::RoomId;
use conclave_core::service::registry::Resolved;
use conclave_core::service::room::Room;
use conclave_core::SfuState;
use conclave_transcribe::{MinutesGenerator, TranscriberRegistry};

pub use auth::{OperatorAuth, Tenant};
pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    pub sfu: Arc<SfuState>,
    pub transcribers: Arc<TranscriberRegistry>,
    pub minutes: Arc<MinutesGenerator>,
}

/// Resolve a room id within an optional tenant scope, mapping ambiguity to
/// the 409 conflict payload.
pub(crate) fn resolve_room(
    state: &ApiState,
    room_id: &str,
    tenant: &Tenant,
) -> Result<Arc<Room>, AppError> {
    let room_id = RoomId::from_string(room_id.to_string());
    match state
        .sfu
        .registry
        .resolve_by_room_id(&room_id, tenant.0.as_ref())
    {
        Resolved::Room(room) => Ok(room),
        Resolved::Ambiguous(candidates) => Err(conclave_core::Error::ambiguous_room(
            room_id.as_str(),
            candidates.into_iter().map(|c| c.0).collect(),
        )
        .into()),
        Resolved::NotFound => Err(AppError::not_found(format!("Room {room_id} not found"))),
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Health & status
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/rooms", get(status::rooms))
        // Drain
        .route("/drain", post(drain::apply))
        .route("/admin/drain", post(drain::apply))
        // Cluster & workers
        .route("/admin/overview", get(admin::overview))
        .route("/admin/workers", get(admin::workers))
        .route("/admin/rooms", get(admin::list_rooms))
        .route("/admin/rooms/:room_id", get(admin::get_room))
        // Room policy & lifecycle
        .route("/admin/rooms/:room_id/policies", post(rooms::set_policies))
        .route("/admin/rooms/:room_id/notice", post(rooms::notice))
        .route("/admin/rooms/:room_id/end", post(rooms::end_room))
        // Media moderation
        .route(
            "/admin/rooms/:room_id/producers/:producer_id/close",
            post(rooms::close_producer),
        )
        .route(
            "/admin/rooms/:room_id/users/remove-non-admins",
            post(rooms::remove_non_admins),
        )
        .route("/admin/rooms/:room_id/users/:user_id/kick", post(rooms::kick_user))
        .route(
            "/admin/rooms/:room_id/users/:user_id/media",
            post(rooms::close_user_media),
        )
        .route("/admin/rooms/:room_id/users/:user_id/mute", post(rooms::mute_user))
        .route(
            "/admin/rooms/:room_id/users/:user_id/video-off",
            post(rooms::video_off_user),
        )
        .route(
            "/admin/rooms/:room_id/users/:user_id/stop-screen",
            post(rooms::stop_screen_user),
        )
        .route(
            "/admin/rooms/:room_id/users/:user_id/block",
            post(rooms::block_user_session),
        )
        .route(
            "/admin/rooms/:room_id/users/:user_id/unblock",
            post(rooms::unblock_user_session),
        )
        // Access lists
        .route("/admin/rooms/:room_id/access", get(access::get_access))
        .route("/admin/rooms/:room_id/access/allow", post(access::allow))
        .route("/admin/rooms/:room_id/access/revoke", post(access::revoke))
        .route("/admin/rooms/:room_id/access/block", post(access::block))
        .route("/admin/rooms/:room_id/access/unblock", post(access::unblock))
        // Waiting room
        .route(
            "/admin/rooms/:room_id/pending/admit-all",
            post(access::admit_all),
        )
        .route(
            "/admin/rooms/:room_id/pending/reject-all",
            post(access::reject_all),
        )
        .route(
            "/admin/rooms/:room_id/pending/:user_key/admit",
            post(access::admit_pending),
        )
        .route(
            "/admin/rooms/:room_id/pending/:user_key/reject",
            post(access::reject_pending),
        )
        // Hands
        .route("/admin/rooms/:room_id/hands/clear", post(rooms::clear_hands))
        // Minutes
        .route("/minutes", post(minutes::minutes))
        // Realtime adapter
        .route("/ws/rooms/:room_id", get(crate::ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
