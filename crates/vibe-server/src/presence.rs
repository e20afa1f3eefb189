//! Membership snapshots pushed to every slot of a room.

use vibe_core::ids::RoomId;
use vibe_core::messages::ServerMessage;
use vibe_core::participant::ParticipantInfo;

use crate::connection::SendError;
use crate::room::{RoomInner, Slot};

/// Room composition: the current sender and receivers in join order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Presence {
    pub sender: Option<ParticipantInfo>,
    pub receivers: Vec<ParticipantInfo>,
}

impl Presence {
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::UsersUpdate {
            sender: self.sender.clone(),
            receivers: self.receivers.clone(),
        }
    }
}

/// Send `json` to each slot. Returns the sequence numbers of slots whose
/// peer is gone; a full queue only loses this message.
pub(crate) fn deliver<'a>(slots: impl IntoIterator<Item = &'a Slot>, json: &str) -> Vec<u64> {
    closed_slots(slots, |slot| slot.handle.send(json.to_owned()))
}

/// Like [`deliver`], but a full queue coalesces the snapshot instead of
/// dropping it, so every live slot ends on the latest presence.
pub(crate) fn deliver_presence<'a>(
    slots: impl IntoIterator<Item = &'a Slot>,
    json: &str,
) -> Vec<u64> {
    closed_slots(slots, |slot| slot.handle.send_presence(json.to_owned()))
}

fn closed_slots<'a>(
    slots: impl IntoIterator<Item = &'a Slot>,
    send: impl Fn(&Slot) -> Result<(), SendError>,
) -> Vec<u64> {
    slots
        .into_iter()
        .filter_map(|slot| match send(slot) {
            Ok(()) | Err(SendError::Full) => None,
            Err(SendError::Closed) => Some(slot.seq),
        })
        .collect()
}

/// Push the current composition to every slot, sender included.
///
/// Slots that fail delivery are removed after the pass completes, then one
/// follow-up snapshot goes out describing the reduced room. Returns how many
/// slots were removed in total.
pub(crate) fn broadcast_presence(room_id: &RoomId, inner: &mut RoomInner) -> usize {
    let mut pruned = 0;
    loop {
        let json = match inner.presence().to_message().encode() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(room_id = %room_id, error = %e, "Failed to encode presence");
                return pruned;
            }
        };

        let failed = deliver_presence(inner.slots(), &json);
        if failed.is_empty() {
            return pruned;
        }

        let removed = inner.remove_seqs(&failed);
        if removed == 0 {
            return pruned;
        }
        tracing::debug!(room_id = %room_id, removed, "Dropped unreachable slots during presence");
        pruned += removed;
    }
}
