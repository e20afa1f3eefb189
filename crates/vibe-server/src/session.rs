//! Per-connection control loop: `Connecting -> Joined -> Closed`.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::{debug, trace};

use vibe_core::ids::{IdSource, RoomId};
use vibe_core::messages::{Inbound, JoinRequest};
use vibe_core::participant::Participant;

use crate::connection::ConnectionHandle;
use crate::registry::RoomRegistry;
use crate::room::{Room, RouteOutcome, SlotToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Joined,
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Close,
}

pub struct Session {
    registry: Arc<RoomRegistry>,
    ids: Arc<dyn IdSource>,
    room_id: RoomId,
    handle: ConnectionHandle,
    state: SessionState,
    joined: Option<(Arc<Room>, SlotToken)>,
}

impl Session {
    pub fn new(
        registry: Arc<RoomRegistry>,
        ids: Arc<dyn IdSource>,
        room_id: RoomId,
        handle: ConnectionHandle,
    ) -> Self {
        Self {
            registry,
            ids,
            room_id,
            handle,
            state: SessionState::Connecting,
            joined: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn token(&self) -> Option<&SlotToken> {
        self.joined.as_ref().map(|(_, token)| token)
    }

    /// Join the room. Only valid while connecting; later calls are ignored.
    pub fn join(&mut self, request: JoinRequest) {
        if self.state != SessionState::Connecting {
            debug!(room_id = %self.room_id, state = ?self.state, "Join ignored");
            return;
        }
        let participant = Participant::resolve(request.role, request.user, self.ids.as_ref());
        let room = self.registry.get_or_create(&self.room_id);
        let token = room.join(participant, self.handle.clone());
        tracing::info!(
            room_id = %self.room_id,
            participant_id = %token.participant_id(),
            role = %token.role(),
            connection_id = %self.handle.id(),
            "Session joined"
        );
        self.joined = Some((room, token));
        self.state = SessionState::Joined;
    }

    /// Handle one inbound frame. Malformed frames are dropped.
    pub fn handle_frame(&mut self, raw: &str) -> Step {
        let inbound = match Inbound::parse(raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!(
                    room_id = %self.room_id,
                    connection_id = %self.handle.id(),
                    error = %e,
                    "Dropping inbound frame"
                );
                return Step::Continue;
            }
        };

        match (self.state, inbound) {
            (SessionState::Closed, _) => Step::Close,
            (_, Inbound::Leave) => Step::Close,
            (SessionState::Connecting, Inbound::Join(request)) => {
                self.join(request);
                Step::Continue
            }
            (SessionState::Connecting, Inbound::App(msg)) => {
                debug!(room_id = %self.room_id, kind = msg.kind(), "Message before join dropped");
                Step::Continue
            }
            (SessionState::Joined, Inbound::Join(_)) => {
                debug!(room_id = %self.room_id, "Repeated join ignored");
                Step::Continue
            }
            (SessionState::Joined, Inbound::App(msg)) => {
                if let Some((room, token)) = &self.joined {
                    let outcome = room.route(token, &msg);
                    trace!(room_id = %self.room_id, kind = msg.kind(), ?outcome, "Routed");
                    if outcome == RouteOutcome::Rejected {
                        debug!(
                            room_id = %self.room_id,
                            participant_id = %token.participant_id(),
                            "Message from replaced sender rejected"
                        );
                    }
                }
                Step::Continue
            }
        }
    }

    /// Leave the room (once) and stop.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some((room, token)) = self.joined.take() {
            room.leave(&token);
            tracing::info!(
                room_id = %self.room_id,
                participant_id = %token.participant_id(),
                role = %token.role(),
                "Session closed"
            );
        }
        self.state = SessionState::Closed;
    }

    /// Drive the session until the inbound stream ends, the client leaves,
    /// or the connection is closed from the write side.
    pub async fn run<S>(mut self, preset: Option<JoinRequest>, mut inbound: S)
    where
        S: Stream<Item = String> + Unpin,
    {
        if let Some(request) = preset {
            self.join(request);
        }

        let handle = self.handle.clone();
        loop {
            tokio::select! {
                _ = handle.closed() => break,
                frame = inbound.next() => match frame {
                    Some(raw) => {
                        if self.handle_frame(&raw) == Step::Close {
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
        self.close();
    }
}
