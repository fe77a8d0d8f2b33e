pub mod event;
pub mod id;
pub mod identity;
pub mod participant;
pub mod policies;

pub use event::{ClosedProducerInfo, RoomEvent};
pub use id::{
    generate_id, ChannelId, ClientId, ProducerId, RoomId, SessionId, TransportId, UserId, UserKey,
};
pub use identity::{compose_user_id, derive_key, normalize_display_name, AuthToken};
pub use participant::{
    MediaKind, Participant, ParticipantMode, PendingEntry, ProducerRef, ProducerType, Role,
};
pub use policies::{PolicyChanges, PolicyUpdate, RoomPolicies};
