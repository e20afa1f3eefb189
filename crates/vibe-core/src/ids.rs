use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::errors::RelayError;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ParticipantId, "user");
branded_id!(ConnectionId, "conn");

pub const ROOM_ID_MAX_LEN: usize = 64;

/// Name of a room. Any non-empty string of ASCII letters, digits, `-` and `_`
/// up to [`ROOM_ID_MAX_LEN`] characters; generated codes are a subset.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    pub fn parse(value: &str) -> Result<Self, RelayError> {
        if value.is_empty() {
            return Err(RelayError::InvalidRoomId("empty".into()));
        }
        if value.len() > ROOM_ID_MAX_LEN {
            return Err(RelayError::InvalidRoomId(format!(
                "length {} exceeds {ROOM_ID_MAX_LEN}",
                value.len()
            )));
        }
        if let Some((index, ch)) = value
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_'))
        {
            return Err(RelayError::InvalidRoomId(format!(
                "invalid character '{ch}' at position {index}"
            )));
        }
        Ok(Self(value.to_owned()))
    }

    /// For codes built from a known-valid alphabet.
    pub(crate) fn from_trusted(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomId {
    type Err = RelayError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for RoomId {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl AsRef<str> for RoomId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of participant identifiers for clients that join without one.
pub trait IdSource: Send + Sync {
    fn next_participant_id(&self) -> ParticipantId;
}

/// Production source: time-ordered UUIDs, unique for the process lifetime.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIdSource;

impl IdSource for UuidIdSource {
    fn next_participant_id(&self) -> ParticipantId {
        ParticipantId::new()
    }
}

/// Deterministic source producing `{prefix}{n}` with n counting from 1.
#[derive(Debug)]
pub struct SequentialIdSource {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdSource for SequentialIdSource {
    fn next_participant_id(&self) -> ParticipantId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        ParticipantId::from_raw(format!("{}{n}", self.prefix))
    }
}
