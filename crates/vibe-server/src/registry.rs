use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use vibe_core::activity::ActivityReporter;
use vibe_core::ids::RoomId;
use vibe_core::room_code;

use crate::room::{Room, RoomSummary};

const ROOM_CODE_ATTEMPTS: usize = 32;

/// All resident rooms, created lazily on first reference.
///
/// Rooms are independent: the map lock is held only for lookup or insert,
/// never across a room operation.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    reporter: Arc<dyn ActivityReporter>,
}

impl RoomRegistry {
    pub fn new(reporter: Arc<dyn ActivityReporter>) -> Self {
        Self {
            rooms: DashMap::new(),
            reporter,
        }
    }

    /// Get the room, creating it if unseen. Concurrent first references to
    /// one id all observe the same room.
    pub fn get_or_create(&self, room_id: &RoomId) -> Arc<Room> {
        if let Some(room) = self.rooms.get(room_id) {
            return Arc::clone(room.value());
        }
        let room = self.rooms.entry(room_id.clone()).or_insert_with(|| {
            tracing::debug!(room_id = %room_id, "Room created");
            Arc::new(Room::new(room_id.clone(), Arc::clone(&self.reporter)))
        });
        Arc::clone(room.value())
    }

    pub fn get(&self, room_id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.get(room_id).map(|room| Arc::clone(room.value()))
    }

    /// Summaries of every resident room, ordered by room id.
    pub fn snapshot(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let mut summaries: Vec<RoomSummary> = rooms.iter().map(|room| room.summary()).collect();
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }

    pub fn count(&self) -> usize {
        self.rooms.len()
    }

    /// A fresh code not naming any resident room.
    pub fn allocate_room_code(&self) -> Option<RoomId> {
        self.allocate_room_code_excluding(|_| false)
    }

    /// A fresh code naming neither a resident room nor one `known` reports,
    /// such as a closed room still in the listing.
    pub fn allocate_room_code_excluding(
        &self,
        known: impl Fn(&RoomId) -> bool,
    ) -> Option<RoomId> {
        room_code::generate_unique_room_code(ROOM_CODE_ATTEMPTS, |code| {
            self.rooms.contains_key(code) || known(code)
        })
    }

    /// Evict rooms that are inert, idle for `max_idle`, and held by no session.
    pub fn reap_inert(&self, max_idle: Duration) -> usize {
        let before = self.rooms.len();
        self.rooms
            .retain(|_, room| Arc::strong_count(room) > 1 || !room.is_idle_inert(max_idle));
        before.saturating_sub(self.rooms.len())
    }
}

/// Start a background task that periodically evicts inert rooms.
pub fn start_reaper_task(
    registry: Arc<RoomRegistry>,
    interval: Duration,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.reap_inert(max_idle);
            if removed > 0 {
                tracing::info!(removed = removed, "Inert room cleanup");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use vibe_core::activity::NoopReporter;
    use vibe_core::participant::Role;

    use crate::test_support::{client, participant};

    fn registry() -> Arc<RoomRegistry> {
        Arc::new(RoomRegistry::new(Arc::new(NoopReporter)))
    }

    fn room_id(id: &str) -> RoomId {
        RoomId::parse(id).unwrap()
    }

    #[test]
    fn get_or_create_reuses_resident_room() {
        let registry = registry();
        let a = registry.get_or_create(&room_id("ABCDEF"));
        let b = registry.get_or_create(&room_id("ABCDEF"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_joins_share_one_room() {
        let registry = registry();
        let id = room_id("RACE01");
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tasks.push(tokio::spawn(async move { registry.get_or_create(&id) }));
        }
        let mut rooms = Vec::new();
        for task in tasks {
            rooms.push(task.await.unwrap());
        }
        assert!(rooms.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn snapshot_reports_every_resident_room() {
        let registry = registry();
        let busy = registry.get_or_create(&room_id("BUSY"));
        registry.get_or_create(&room_id("EMPTY"));

        let (s, _s_rx) = client(8);
        let (r, _r_rx) = client(8);
        busy.join(participant("S", Role::Sender), s);
        busy.join(participant("R1", Role::Receiver), r);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].room_id.as_str(), "BUSY");
        assert!(snapshot[0].active);
        assert!(snapshot[0].sender_present);
        assert_eq!(snapshot[0].receiver_count, 1);
        assert!(!snapshot[1].active);
    }

    #[test]
    fn unknown_room_is_absent_not_an_error() {
        let registry = registry();
        assert!(registry.get(&room_id("NOPE")).is_none());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn reaper_evicts_only_unreferenced_inert_rooms() {
        let registry = registry();
        let held = registry.get_or_create(&room_id("HELD"));
        let busy = registry.get_or_create(&room_id("BUSY"));
        registry.get_or_create(&room_id("IDLE"));

        let (r, _rx) = client(8);
        busy.join(participant("R1", Role::Receiver), r);
        drop(busy);

        assert_eq!(registry.reap_inert(Duration::ZERO), 1);
        assert!(registry.get(&room_id("IDLE")).is_none());
        assert!(registry.get(&room_id("BUSY")).is_some());
        assert!(registry.get(&room_id("HELD")).is_some());

        drop(held);
        assert_eq!(registry.reap_inert(Duration::from_secs(3600)), 0);
        assert_eq!(registry.reap_inert(Duration::ZERO), 1);
    }

    #[test]
    fn allocated_codes_avoid_resident_rooms() {
        let registry = registry();
        let code = registry.allocate_room_code().unwrap();
        assert!(registry.get(&code).is_none());
        assert_eq!(code.as_str().len(), vibe_core::room_code::ROOM_CODE_LEN);
    }

    #[test]
    fn allocation_honours_external_knowledge() {
        let registry = registry();
        assert!(registry.allocate_room_code_excluding(|_| true).is_none());
        let code = registry
            .allocate_room_code_excluding(|code| code.as_str().starts_with('A'))
            .unwrap();
        assert!(!code.as_str().starts_with('A'));
    }
}
