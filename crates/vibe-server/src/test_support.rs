use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use vibe_core::activity::{ActivityEvent, ActivityReporter};
use vibe_core::ids::ParticipantId;
use vibe_core::participant::{Participant, Role};

use crate::connection::ConnectionHandle;

#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingReporter {
    pub(crate) fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ActivityEvent::kind).collect()
    }
}

impl ActivityReporter for RecordingReporter {
    fn report(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }
}

pub(crate) fn client(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<String>) {
    ConnectionHandle::channel(capacity)
}

/// Participant named `{id}-name`.
pub(crate) fn participant(id: &str, role: Role) -> Participant {
    Participant {
        id: ParticipantId::from_raw(id),
        name: format!("{id}-name"),
        role,
    }
}

/// Every queued message, parsed as JSON.
pub(crate) fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(serde_json::from_str(&msg).unwrap_or(Value::String(msg)));
    }
    out
}

/// Everything the writer task would send: the queue, then any coalesced presence.
pub(crate) fn drain_client(handle: &ConnectionHandle, rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut out = drain(rx);
    if let Some(msg) = handle.take_pending_presence() {
        out.push(serde_json::from_str(&msg).unwrap_or(Value::String(msg)));
    }
    out
}

/// The last `users_update` a client would end on.
pub(crate) fn last_presence(
    handle: &ConnectionHandle,
    rx: &mut mpsc::Receiver<String>,
) -> Option<Value> {
    drain_client(handle, rx)
        .into_iter()
        .filter(|msg| msg["type"] == "users_update")
        .last()
}
