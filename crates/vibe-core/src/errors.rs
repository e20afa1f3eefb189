/// Errors raised while decoding client input or encoding relay output.
/// None of these are fatal: they are scoped to one message or one session.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("invalid room id: {0}")]
    InvalidRoomId(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MalformedMessage(_) => "malformed_message",
            Self::UnknownRole(_) => "unknown_role",
            Self::InvalidRoomId(_) => "invalid_room_id",
            Self::Encode(_) => "encode",
        }
    }
}
