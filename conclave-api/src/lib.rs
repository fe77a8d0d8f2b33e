//! Control-plane API for Conclave: the shared-secret operator HTTP surface,
//! the administrator socket-event dispatcher, and the WebSocket adapter that
//! frames both the join flow and admin events onto the core's message bus.

pub mod admin_events;
pub mod http;
pub mod ws;

pub use http::{create_router, ApiState, AppError, AppResult};
