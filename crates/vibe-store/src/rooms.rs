use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use vibe_core::activity::ActivityEvent;
use vibe_core::ids::{ParticipantId, RoomId};
use vibe_core::participant::ParticipantInfo;

use crate::database::Database;
use crate::error::StoreError;

/// Listing entry for one room ever seen by the relay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: RoomId,
    pub active: bool,
    pub sender: Option<ParticipantInfo>,
    pub receivers: usize,
    pub last_event: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListing {
    pub active_rooms: Vec<RoomRecord>,
    pub closed_rooms: Vec<RoomRecord>,
    pub total: usize,
}

impl RoomListing {
    pub fn partition(records: Vec<RoomRecord>) -> Self {
        let total = records.len();
        let (active_rooms, closed_rooms) = records.into_iter().partition(|r| r.active);
        Self {
            active_rooms,
            closed_rooms,
            total,
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT room_id, active, sender_id, sender_name, receiver_count, \
     last_event, created_at, updated_at FROM rooms";

type RawRow = (String, bool, Option<String>, Option<String>, i64, String, String, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn into_record(raw: RawRow) -> Result<RoomRecord, StoreError> {
    let (room_id, active, sender_id, sender_name, receivers, last_event, created_at, updated_at) =
        raw;
    let room_id = RoomId::parse(&room_id).map_err(|e| StoreError::CorruptRow {
        table: "rooms",
        column: "room_id",
        detail: e.to_string(),
    })?;
    let receivers = usize::try_from(receivers).map_err(|_| StoreError::CorruptRow {
        table: "rooms",
        column: "receiver_count",
        detail: format!("negative count {receivers}"),
    })?;
    let sender = sender_id.map(|id| ParticipantInfo {
        id: ParticipantId::from_raw(id),
        name: sender_name.unwrap_or_default(),
    });
    Ok(RoomRecord {
        room_id,
        active,
        sender,
        receivers,
        last_event,
        created_at,
        updated_at,
    })
}

/// Room-listing repository fed by room activity events.
#[derive(Clone)]
pub struct RoomRepo {
    db: Database,
}

impl RoomRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record the room composition carried by `event`.
    #[instrument(skip(self, event), fields(room_id = %event.activity().room_id, event = event.kind()))]
    pub fn apply(&self, event: &ActivityEvent) -> Result<(), StoreError> {
        let activity = event.activity();
        let now = Utc::now().to_rfc3339();
        let (sender_id, sender_name) = match &activity.sender {
            Some(info) => (Some(info.id.as_str()), Some(info.name.as_str())),
            None => (None, None),
        };
        let receiver_count = i64::try_from(activity.receiver_count).unwrap_or(i64::MAX);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (room_id, active, sender_id, sender_name, receiver_count, last_event, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                 ON CONFLICT(room_id) DO UPDATE SET
                     active = excluded.active,
                     sender_id = excluded.sender_id,
                     sender_name = excluded.sender_name,
                     receiver_count = excluded.receiver_count,
                     last_event = excluded.last_event,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    activity.room_id.as_str(),
                    activity.is_active(),
                    sender_id,
                    sender_name,
                    receiver_count,
                    event.kind(),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(room_id = %room_id))]
    pub fn get(&self, room_id: &RoomId) -> Result<RoomRecord, StoreError> {
        let raw = self.db.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE room_id = ?1"),
                [room_id.as_str()],
                read_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("room {room_id}"))
                }
                other => other.into(),
            })
        })?;
        into_record(raw)
    }

    /// Every known room, most recently updated first, split into active and closed.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<RoomListing, StoreError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY updated_at DESC"))?;
            let rows = stmt
                .query_map([], read_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        let records = rows
            .into_iter()
            .map(into_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RoomListing::partition(records))
    }

    /// Mark every room closed. Used at startup: in-memory membership does not
    /// survive a restart, so rows left active by a previous process are stale.
    #[instrument(skip(self))]
    pub fn close_all(&self) -> Result<usize, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE rooms SET active = 0, sender_id = NULL, sender_name = NULL, receiver_count = 0,
                     last_event = 'server_restart', updated_at = ?1
                 WHERE active = 1",
                [now],
            )?;
            Ok(changed)
        })
    }
}
