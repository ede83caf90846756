use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SignalingError;

// Frames sent by the browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join-room")]
    JoinRoom { room_id: String },
    #[serde(rename = "leave-room")]
    LeaveRoom,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "offer")]
    Offer { offer: Value },
    #[serde(rename = "answer")]
    Answer { answer: Value },
    #[serde(rename = "candidate")]
    Candidate { candidate: Value },
    #[serde(rename = "send-message")]
    SendMessage { message: Value },
    #[serde(rename = "test")]
    Test { message: String },
}

// Frames sent back to the browser
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected { session_id: String, timestamp: u64 },
    #[serde(rename = "created")]
    Created { room_id: String },
    #[serde(rename = "joined")]
    Joined { room_id: String, peers: Vec<String> },
    #[serde(rename = "full")]
    Full { room_id: String },
    #[serde(rename = "user-joined")]
    UserJoined { session_id: String },
    #[serde(rename = "left")]
    Left { room_id: String },
    #[serde(rename = "user-left")]
    UserLeft { session_id: String },
    #[serde(rename = "ready")]
    Ready { from: String },
    #[serde(rename = "offer")]
    Offer { from: String, offer: Value },
    #[serde(rename = "answer")]
    Answer { from: String, answer: Value },
    #[serde(rename = "candidate")]
    Candidate { from: String, candidate: Value },
    #[serde(rename = "message")]
    Message { from: String, message: Value },
    #[serde(rename = "test-response")]
    TestResponse { message: String },
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        serde_json::from_str(text).map_err(SignalingError::from)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::LeaveRoom => "leave-room",
            ClientMessage::Ready => "ready",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::Candidate { .. } => "candidate",
            ClientMessage::SendMessage { .. } => "send-message",
            ClientMessage::Test { .. } => "test",
        }
    }
}

impl ServerMessage {
    pub fn from_error(err: &SignalingError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub fn to_ws(&self) -> Result<Message, SignalingError> {
        let text = serde_json::to_string(self).map_err(SignalingError::Encode)?;
        Ok(Message::Text(text))
    }
}
