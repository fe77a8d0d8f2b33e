pub mod admission;
pub mod chat;
pub mod drain;
pub mod moderation;
pub mod registry;
pub mod room;

pub use admission::{AdmissionDecision, JoinOutcome, JoinRequest, RejectReason};
pub use drain::{DrainFlag, DrainOutcome, DrainRequest};
pub use moderation::{BlockOutcome, BulkFlags, BulkOutcome, CloseOutcome, ProducerSelector};
pub use registry::{Resolved, RoomRegistry};
pub use room::{ParticipantSummary, PendingSummary, Room, RoomInner, RoomSnapshot};
