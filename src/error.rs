use thiserror::Error;

pub type SignalingResult<T> = Result<T, SignalingError>;

#[derive(Debug, Error)]
pub enum SignalingError {
    /// Room id was empty, whitespace or too long.
    #[error("invalid room id: {0:?}")]
    InvalidRoom(String),
    /// The session tried to relay or leave without having joined a room.
    #[error("session has not joined a room")]
    NotInRoom,
    /// The frame was not a well-formed client message.
    #[error("could not parse message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
    /// Only JSON text frames are understood.
    #[error("binary frames are not supported")]
    UnsupportedFrame,
    #[error("could not encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl SignalingError {
    /// Code sent to the browser in `error` frames.
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::InvalidRoom(_) => "invalid-room",
            SignalingError::NotInRoom => "not-in-room",
            SignalingError::InvalidMessage(_) | SignalingError::UnsupportedFrame => {
                "invalid-message"
            }
            SignalingError::Encode(_) => "internal",
        }
    }
}
