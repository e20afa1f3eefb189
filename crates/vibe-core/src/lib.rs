pub mod activity;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod participant;
pub mod room_code;

pub use errors::RelayError;
pub use ids::{ConnectionId, IdSource, ParticipantId, RoomId, SequentialIdSource, UuidIdSource};
pub use participant::{Participant, ParticipantInfo, Role};
