//! Contract with the out-of-band room-listing store.
//!
//! Rooms emit an [`ActivityEvent`] after every membership change. Reporters
//! must not block: they are called while the room is locked.

use serde::Serialize;

use crate::ids::RoomId;
use crate::participant::ParticipantInfo;

/// Room composition at the moment an event was emitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomActivity {
    pub room_id: RoomId,
    pub sender: Option<ParticipantInfo>,
    pub receiver_count: usize,
}

impl RoomActivity {
    pub fn is_active(&self) -> bool {
        self.sender.is_some() || self.receiver_count > 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "room", rename_all = "snake_case")]
pub enum ActivityEvent {
    SenderJoined(RoomActivity),
    ReceiverJoined(RoomActivity),
    /// A leave or lazy removal that left the room non-empty.
    MembershipReduced(RoomActivity),
    RoomEmptied(RoomActivity),
}

impl ActivityEvent {
    pub fn activity(&self) -> &RoomActivity {
        match self {
            Self::SenderJoined(a)
            | Self::ReceiverJoined(a)
            | Self::MembershipReduced(a)
            | Self::RoomEmptied(a) => a,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SenderJoined(_) => "sender_joined",
            Self::ReceiverJoined(_) => "receiver_joined",
            Self::MembershipReduced(_) => "membership_reduced",
            Self::RoomEmptied(_) => "room_emptied",
        }
    }
}

pub trait ActivityReporter: Send + Sync {
    fn report(&self, event: ActivityEvent);
}

/// Reporter for deployments without a listing store.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReporter;

impl ActivityReporter for NoopReporter {
    fn report(&self, _event: ActivityEvent) {}
}
