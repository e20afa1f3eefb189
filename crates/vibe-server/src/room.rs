//! A room: one optional sender slot plus receiver slots in join order.
//!
//! Every operation runs under the room's mutex. Fan-out inside the lock only
//! enqueues onto per-connection queues, so a slow peer never holds the lock;
//! in exchange every slot observes this room's messages in mutation order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use vibe_core::activity::{ActivityEvent, ActivityReporter, RoomActivity};
use vibe_core::ids::{ParticipantId, RoomId};
use vibe_core::messages::{AppMessage, ServerMessage, PRESENCE_REQUEST};
use vibe_core::participant::{Participant, Role};

use crate::connection::ConnectionHandle;
use crate::presence::{self, Presence};

/// Proof of a join, needed to leave or to route as that slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotToken {
    role: Role,
    participant_id: ParticipantId,
    seq: u64,
}

impl SlotToken {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }
}

pub(crate) struct Slot {
    pub(crate) participant: Participant,
    pub(crate) handle: ConnectionHandle,
    pub(crate) seq: u64,
}

impl Slot {
    fn matches(&self, token: &SlotToken) -> bool {
        self.seq == token.seq && self.participant.id == token.participant_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    Joined(Role),
    Left(Role),
    /// Slots dropped after failed deliveries.
    Pruned(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub active: bool,
    pub sender_present: bool,
    pub receiver_count: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered { receivers: usize, pruned: usize },
    /// `presence_request`: presence is push-only.
    Ignored,
    /// Receiver-originated application message; there is no target.
    Dropped,
    /// The origin is no longer this room's sender.
    Rejected,
}

pub(crate) struct RoomInner {
    sender: Option<Slot>,
    receivers: Vec<Slot>,
    next_seq: u64,
    last_activity: Instant,
}

impl RoomInner {
    fn new() -> Self {
        Self {
            sender: None,
            receivers: Vec::new(),
            next_seq: 1,
            last_activity: Instant::now(),
        }
    }

    /// Install a slot for `participant`, returning any slot it displaced.
    fn install(
        &mut self,
        participant: Participant,
        handle: ConnectionHandle,
    ) -> (SlotToken, Option<Slot>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let token = SlotToken {
            role: participant.role,
            participant_id: participant.id.clone(),
            seq,
        };
        let slot = Slot {
            participant,
            handle,
            seq,
        };

        let displaced = match token.role {
            Role::Sender => self.sender.replace(slot),
            Role::Receiver => {
                let previous = self
                    .receivers
                    .iter()
                    .position(|s| s.participant.id == token.participant_id)
                    .map(|idx| self.receivers.remove(idx));
                self.receivers.push(slot);
                previous
            }
        };
        (token, displaced)
    }

    /// Remove the slot the token was issued for, if it is still installed.
    fn remove(&mut self, token: &SlotToken) -> Option<Slot> {
        match token.role {
            Role::Sender => {
                if self.sender.as_ref().is_some_and(|s| s.matches(token)) {
                    self.sender.take()
                } else {
                    None
                }
            }
            Role::Receiver => self
                .receivers
                .iter()
                .position(|s| s.matches(token))
                .map(|idx| self.receivers.remove(idx)),
        }
    }

    pub(crate) fn remove_seqs(&mut self, seqs: &[u64]) -> usize {
        let before = self.len();
        if self.sender.as_ref().is_some_and(|s| seqs.contains(&s.seq)) {
            self.sender = None;
        }
        self.receivers.retain(|s| !seqs.contains(&s.seq));
        before - self.len()
    }

    /// Sender first, then receivers in join order.
    pub(crate) fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.sender.iter().chain(self.receivers.iter())
    }

    pub(crate) fn presence(&self) -> Presence {
        Presence {
            sender: self.sender.as_ref().map(|s| s.participant.info()),
            receivers: self.receivers.iter().map(|s| s.participant.info()).collect(),
        }
    }

    fn is_current_sender(&self, token: &SlotToken) -> bool {
        token.role == Role::Sender && self.sender.as_ref().is_some_and(|s| s.matches(token))
    }

    fn len(&self) -> usize {
        usize::from(self.sender.is_some()) + self.receivers.len()
    }

    fn is_inert(&self) -> bool {
        self.len() == 0
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn activity(&self, room_id: &RoomId) -> RoomActivity {
        RoomActivity {
            room_id: room_id.clone(),
            sender: self.sender.as_ref().map(|s| s.participant.info()),
            receiver_count: self.receivers.len(),
        }
    }
}

pub struct Room {
    id: RoomId,
    inner: Mutex<RoomInner>,
    reporter: Arc<dyn ActivityReporter>,
}

impl Room {
    pub fn new(id: RoomId, reporter: Arc<dyn ActivityReporter>) -> Self {
        Self {
            id,
            inner: Mutex::new(RoomInner::new()),
            reporter,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// Install a slot and push presence before returning.
    ///
    /// A sender join replaces the current sender; a receiver join with an id
    /// already present replaces that receiver. Replaced connections are not
    /// closed here: they stay open until their transport notices.
    pub fn join(&self, participant: Participant, handle: ConnectionHandle) -> SlotToken {
        let role = participant.role;
        let mut inner = self.inner.lock();
        let (token, displaced) = inner.install(participant, handle);
        if let Some(old) = displaced {
            info!(
                room_id = %self.id,
                participant_id = %old.participant.id,
                role = %role,
                connection_id = %old.handle.id(),
                "Slot replaced, previous connection orphaned"
            );
        }
        debug!(
            room_id = %self.id,
            participant_id = %token.participant_id,
            role = %role,
            "Joined room"
        );
        self.publish(&mut inner, MembershipChange::Joined(role));
        token
    }

    /// Remove the token's slot. Returns false (and broadcasts nothing) when
    /// the slot is already gone or was replaced by a newer join.
    pub fn leave(&self, token: &SlotToken) -> bool {
        let mut inner = self.inner.lock();
        let Some(slot) = inner.remove(token) else {
            debug!(
                room_id = %self.id,
                participant_id = %token.participant_id,
                "Leave for a slot no longer installed"
            );
            return false;
        };

        if slot.participant.role == Role::Sender {
            match ServerMessage::Disconnect.encode() {
                Ok(json) => {
                    let failed = presence::deliver(inner.receivers.iter(), &json);
                    inner.remove_seqs(&failed);
                }
                Err(e) => {
                    tracing::error!(room_id = %self.id, error = %e, "Failed to encode disconnect")
                }
            }
        }

        debug!(
            room_id = %self.id,
            participant_id = %slot.participant.id,
            role = %slot.participant.role,
            "Left room"
        );
        self.publish(&mut inner, MembershipChange::Left(slot.participant.role));
        true
    }

    /// Fan an application message out to every receiver, verbatim.
    ///
    /// Only the current sender may originate; unreachable receivers are
    /// dropped and one presence update follows the pass.
    pub fn route(&self, from: &SlotToken, message: &AppMessage) -> RouteOutcome {
        if message.kind() == PRESENCE_REQUEST {
            return RouteOutcome::Ignored;
        }
        if from.role != Role::Sender {
            return RouteOutcome::Dropped;
        }

        let mut inner = self.inner.lock();
        if !inner.is_current_sender(from) {
            return RouteOutcome::Rejected;
        }
        inner.touch();

        let failed = presence::deliver(inner.receivers.iter(), message.raw());
        let receivers = inner.receivers.len() - failed.len();
        let mut pruned = 0;
        if !failed.is_empty() {
            pruned = inner.remove_seqs(&failed);
            self.publish(&mut inner, MembershipChange::Pruned(pruned));
        }
        RouteOutcome::Delivered { receivers, pruned }
    }

    pub fn presence(&self) -> Presence {
        self.inner.lock().presence()
    }

    /// Whether the token's slot is still installed (not left or replaced).
    pub fn holds(&self, token: &SlotToken) -> bool {
        let inner = self.inner.lock();
        match token.role {
            Role::Sender => inner.sender.as_ref().is_some_and(|s| s.matches(token)),
            Role::Receiver => inner.receivers.iter().any(|s| s.matches(token)),
        }
    }

    pub fn summary(&self) -> RoomSummary {
        let inner = self.inner.lock();
        RoomSummary {
            room_id: self.id.clone(),
            active: !inner.is_inert(),
            sender_present: inner.sender.is_some(),
            receiver_count: inner.receivers.len(),
        }
    }

    pub fn is_inert(&self) -> bool {
        self.inner.lock().is_inert()
    }

    /// Inert and untouched for at least `max_idle`.
    pub fn is_idle_inert(&self, max_idle: Duration) -> bool {
        let inner = self.inner.lock();
        inner.is_inert() && inner.last_activity.elapsed() >= max_idle
    }

    /// Push presence and report the change. Runs with the room locked.
    fn publish(&self, inner: &mut RoomInner, change: MembershipChange) {
        inner.touch();
        let pruned = presence::broadcast_presence(&self.id, inner);
        if pruned > 0 {
            debug!(room_id = %self.id, pruned, ?change, "Presence pass dropped slots");
        }

        let activity = inner.activity(&self.id);
        let event = match change {
            _ if !activity.is_active() => ActivityEvent::RoomEmptied(activity),
            MembershipChange::Joined(Role::Sender) => ActivityEvent::SenderJoined(activity),
            MembershipChange::Joined(Role::Receiver) => ActivityEvent::ReceiverJoined(activity),
            MembershipChange::Left(_) | MembershipChange::Pruned(_) => {
                ActivityEvent::MembershipReduced(activity)
            }
        };
        self.reporter.report(event);
    }
}
