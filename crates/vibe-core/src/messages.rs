//! Wire messages exchanged over a relay connection.
//!
//! Inbound frames are JSON objects. A frame with a string `type` field is an
//! application message (or the `leave` control message); a frame without one
//! but with a `role` field is a join request. Application payloads are kept as
//! the original text and forwarded verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::RelayError;
use crate::participant::{ParticipantInfo, Role, UserDecl};

pub const PRESENCE_REQUEST: &str = "presence_request";
pub const LEAVE: &str = "leave";

/// `{role, user?: {id?, name?}}`
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JoinRequest {
    pub role: Role,
    #[serde(default)]
    pub user: Option<UserDecl>,
}

impl JoinRequest {
    pub fn new(role: Role, user: Option<UserDecl>) -> Self {
        Self { role, user }
    }
}

/// Application message routed by its `type`; everything else is opaque.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppMessage {
    kind: String,
    raw: String,
}

impl AppMessage {
    pub fn parse(raw: impl Into<String>) -> Result<Self, RelayError> {
        let raw = raw.into();
        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        let kind = message_type(&value)
            .ok_or_else(|| RelayError::MalformedMessage("missing string field `type`".into()))?
            .to_owned();
        Ok(Self { kind, raw })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The frame exactly as the client sent it.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Join(JoinRequest),
    Leave,
    App(AppMessage),
}

impl Inbound {
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        if !value.is_object() {
            return Err(RelayError::MalformedMessage("expected a JSON object".into()));
        }

        if let Some(kind) = message_type(&value) {
            if kind == LEAVE {
                return Ok(Self::Leave);
            }
            return Ok(Self::App(AppMessage {
                kind: kind.to_owned(),
                raw: raw.to_owned(),
            }));
        }

        if value.get("role").is_some() {
            return serde_json::from_value::<JoinRequest>(value)
                .map(Self::Join)
                .map_err(|e| RelayError::MalformedMessage(format!("join request: {e}")));
        }

        Err(RelayError::MalformedMessage(
            "neither `type` nor `role` present".into(),
        ))
    }
}

fn message_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

/// Messages originated by the relay itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "users_update")]
    UsersUpdate {
        sender: Option<ParticipantInfo>,
        receivers: Vec<ParticipantInfo>,
    },

    /// Sent to receivers when the current sender leaves.
    #[serde(rename = "disconnect")]
    Disconnect,
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Encode(e.to_string()))
    }
}
