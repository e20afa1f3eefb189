use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vibe_core::activity::{ActivityEvent, ActivityReporter};
use vibe_store::RoomRepo;

/// Reporter that queues events for the background recorder.
///
/// Rooms report while locked, so this never waits: on a full queue the
/// event is dropped and logged.
#[derive(Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<ActivityEvent>,
}

impl ChannelReporter {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ActivityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ActivityReporter for ChannelReporter {
    fn report(&self, event: ActivityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    room_id = %event.activity().room_id,
                    event = event.kind(),
                    "Activity queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Activity recorder stopped, event discarded");
            }
        }
    }
}

/// Drain queued events into the room-listing store until every reporter is
/// gone or `stop` fires. On `stop` the queue is closed and what is already
/// buffered is still written.
pub fn spawn_recorder(
    repo: RoomRepo,
    mut rx: mpsc::Receiver<ActivityEvent>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = rx.recv() => event,
                _ = stop.cancelled() => {
                    rx.close();
                    let mut flushed = 0usize;
                    while let Some(event) = rx.recv().await {
                        record(&repo, &event);
                        flushed += 1;
                    }
                    tracing::info!(flushed, "Activity recorder stopped");
                    return;
                }
            };
            match event {
                Some(event) => record(&repo, &event),
                None => break,
            }
        }
        tracing::info!("Activity recorder channel closed");
    })
}

fn record(repo: &RoomRepo, event: &ActivityEvent) {
    if let Err(e) = repo.apply(event) {
        tracing::warn!(
            room_id = %event.activity().room_id,
            event = event.kind(),
            error = %e,
            "Failed to record room activity"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vibe_core::activity::RoomActivity;
    use vibe_core::ids::RoomId;
    use vibe_core::participant::Role;
    use vibe_store::Database;

    use crate::room::Room;
    use crate::test_support::{client, participant};

    fn emptied(id: &str) -> ActivityEvent {
        ActivityEvent::RoomEmptied(RoomActivity {
            room_id: RoomId::parse(id).unwrap(),
            sender: None,
            receiver_count: 0,
        })
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (reporter, mut rx) = ChannelReporter::new(1);
        reporter.report(emptied("ROOM1"));
        reporter.report(emptied("ROOM2"));
        assert_eq!(rx.try_recv().unwrap().activity().room_id.as_str(), "ROOM1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn report_after_recorder_gone_is_harmless() {
        let (reporter, rx) = ChannelReporter::new(4);
        drop(rx);
        reporter.report(emptied("ROOM1"));
    }

    #[tokio::test]
    async fn recorder_persists_room_lifecycle() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let (reporter, rx) = ChannelReporter::new(16);
        let handle = spawn_recorder(repo.clone(), rx, CancellationToken::new());

        let room = Room::new(RoomId::parse("ABCDEF").unwrap(), Arc::new(reporter));
        let (s, _s_rx) = client(8);
        let (r, _r_rx) = client(8);
        let s_token = room.join(participant("S", Role::Sender), s);
        let r_token = room.join(participant("R1", Role::Receiver), r);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let listing = repo.list().unwrap();
        assert_eq!(listing.active_rooms.len(), 1);
        assert_eq!(listing.active_rooms[0].receivers, 1);
        assert_eq!(listing.active_rooms[0].sender.as_ref().unwrap().id.as_str(), "S");

        room.leave(&s_token);
        room.leave(&r_token);
        drop(room);

        // Dropping the last reporter ends the recorder.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        let listing = repo.list().unwrap();
        assert!(listing.active_rooms.is_empty());
        assert_eq!(listing.closed_rooms.len(), 1);
        assert_eq!(listing.closed_rooms[0].last_event, "room_emptied");
    }

    #[tokio::test]
    async fn stop_flushes_buffered_events() {
        let repo = RoomRepo::new(Database::in_memory().unwrap());
        let (reporter, rx) = ChannelReporter::new(16);
        let stop = CancellationToken::new();

        // Queue before the recorder runs so the events are still buffered at stop.
        for id in ["ROOM1", "ROOM2", "ROOM3"] {
            reporter.report(emptied(id));
        }
        stop.cancel();
        let handle = spawn_recorder(repo.clone(), rx, stop);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(repo.list().unwrap().total, 3);

        // The reporter outlives the recorder and its reports are discarded.
        reporter.report(emptied("ROOM4"));
        assert_eq!(repo.list().unwrap().total, 3);
    }
}
