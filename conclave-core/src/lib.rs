//! Core of the Conclave SFU control plane: identity, room state, admission,
//! moderation, chat routing, drain coordination and event fan-out. The media
//! engine and the realtime transport framing are external collaborators
//! reached through the [`media`] and [`bus`] seams.

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod models;
pub mod service;
pub mod state;
pub mod test_helpers;

pub use config::Config;
pub use error::{Error, Result};
pub use state::SfuState;
