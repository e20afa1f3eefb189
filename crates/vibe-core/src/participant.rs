use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::RelayError;
use crate::ids::{IdSource, ParticipantId};

/// Display name used when a client joins without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(Self::Sender),
            "receiver" => Ok(Self::Receiver),
            other => Err(RelayError::UnknownRole(other.to_owned())),
        }
    }
}

/// Public view of a participant, as listed in presence updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    pub name: String,
}

/// User block of a join request. Both fields may be omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UserDecl {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A joined client: identity is fixed for the lifetime of its session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
}

impl Participant {
    /// Build the participant for a join, taking an id from `ids` when the
    /// client supplied none (or a blank one).
    pub fn resolve(role: Role, user: Option<UserDecl>, ids: &dyn IdSource) -> Self {
        let user = user.unwrap_or_default();
        let id = match user.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ParticipantId::from_raw(id),
            _ => ids.next_participant_id(),
        };
        let name = match user.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => DEFAULT_DISPLAY_NAME.to_owned(),
        };
        Self { id, name, role }
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}
