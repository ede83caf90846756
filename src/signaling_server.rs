use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{SignalingError, SignalingResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::rooms::{Departure, JoinOutcome, RoomRegistry};

pub type SessionSender = mpsc::UnboundedSender<Message>;

// Shared gateway state: connected sessions and room membership
#[derive(Clone)]
pub struct SignalingState {
    pub sessions: Arc<RwLock<HashMap<String, SessionInfo>>>,
    pub rooms: Arc<RwLock<RoomRegistry>>,
    pub config: Arc<Config>,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub sender: SessionSender,
    pub created_at: SystemTime,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl SignalingState {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(RoomRegistry::new())),
            config: Arc::new(config),
        }
    }

    /// Registers a new connection and returns its id with the outbound queue.
    pub async fn register_session(&self) -> (String, mpsc::UnboundedReceiver<Message>) {
        let session_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let session_info = SessionInfo {
            sender: tx,
            created_at: SystemTime::now(),
        };
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session_info);

        self.send_to(
            &session_id,
            &ServerMessage::Connected {
                session_id: session_id.clone(),
                timestamp: unix_millis(),
            },
        )
        .await;
        (session_id, rx)
    }

    /// Drops the session, vacating its room and telling whoever is left.
    pub async fn disconnect_session(&self, session_id: &str) {
        {
            let mut rooms = self.rooms.write().await;
            if let Some(departure) = rooms.leave(session_id) {
                info!(session_id, room_id = %departure.room_id, "session left room on disconnect");
                self.notify_departure(session_id, &departure).await;
            }
        }

        if let Some(session) = self.sessions.write().await.remove(session_id) {
            let lifetime = session.created_at.elapsed().unwrap_or_default();
            info!(session_id, ?lifetime, "session destroyed");
        }
    }

    pub async fn get_active_sessions_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn get_room_count(&self) -> usize {
        self.rooms.read().await.room_count()
    }

    pub async fn send_to(&self, session_id: &str, message: &ServerMessage) {
        let frame = match message.to_ws() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session_id, error = %e, "dropping unencodable message");
                return;
            }
        };
        self.send_raw(session_id, frame).await;
    }

    async fn send_raw(&self, session_id: &str, frame: Message) {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) => {
                if session.sender.send(frame).is_err() {
                    debug!(session_id, "outbound queue closed");
                }
            }
            None => debug!(session_id, "no such session"),
        }
    }

    /// Handles one parsed frame from `session_id`.
    pub async fn handle_client_message(
        &self,
        session_id: &str,
        message: ClientMessage,
    ) -> SignalingResult<()> {
        debug!(session_id, kind = message.kind(), "client message");
        let from = session_id.to_string();
        match message {
            ClientMessage::JoinRoom { room_id } => self.join_room(session_id, &room_id).await,
            ClientMessage::LeaveRoom => self.leave_room(session_id).await,
            ClientMessage::Ready => self.relay(session_id, ServerMessage::Ready { from }).await,
            ClientMessage::Offer { offer } => {
                self.relay(session_id, ServerMessage::Offer { from, offer })
                    .await
            }
            ClientMessage::Answer { answer } => {
                self.relay(session_id, ServerMessage::Answer { from, answer })
                    .await
            }
            ClientMessage::Candidate { candidate } => {
                self.relay(session_id, ServerMessage::Candidate { from, candidate })
                    .await
            }
            ClientMessage::SendMessage { message } => {
                self.broadcast_to_room(session_id, ServerMessage::Message { from, message })
                    .await
            }
            ClientMessage::Test { message } => {
                info!(session_id, %message, "test message");
                self.send_to(
                    session_id,
                    &ServerMessage::TestResponse {
                        message: format!("Server received: {message}"),
                    },
                )
                .await;
                Ok(())
            }
        }
    }

    /// Parses a text frame and dispatches it, answering failures with an `error` frame.
    pub async fn handle_text(&self, session_id: &str, text: &str) {
        let result = match ClientMessage::parse(text) {
            Ok(message) => self.handle_client_message(session_id, message).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            self.reject(session_id, &e).await;
        }
    }

    /// Answers a frame that could not be served with an `error` frame.
    pub async fn reject(&self, session_id: &str, err: &SignalingError) {
        warn!(session_id, error = %err, "rejected client message");
        self.send_to(session_id, &ServerMessage::from_error(err))
            .await;
    }

    // Room-changing operations keep the registry locked while they queue
    // notifications, so every session sees membership frames in order.
    async fn join_room(&self, session_id: &str, room_id: &str) -> SignalingResult<()> {
        let mut rooms = self.rooms.write().await;
        let result = rooms.join(room_id, session_id)?;

        if let Some(departure) = &result.departure {
            info!(session_id, room_id = %departure.room_id, "session switched rooms");
            self.notify_departure(session_id, departure).await;
        }

        match result.outcome {
            JoinOutcome::Created { room_id } => {
                info!(session_id, %room_id, "session created room as initiator");
                self.send_to(session_id, &ServerMessage::Created { room_id })
                    .await;
            }
            JoinOutcome::Joined { room_id, peers } => {
                info!(session_id, %room_id, "session joined room");
                self.send_to(
                    session_id,
                    &ServerMessage::Joined {
                        room_id,
                        peers: peers.clone(),
                    },
                )
                .await;
                if !result.rejoined {
                    let notice = ServerMessage::UserJoined {
                        session_id: session_id.to_string(),
                    };
                    for peer in &peers {
                        self.send_to(peer, &notice).await;
                    }
                }
            }
            JoinOutcome::Full { room_id } => {
                warn!(session_id, %room_id, "room is full, rejecting");
                self.send_to(session_id, &ServerMessage::Full { room_id })
                    .await;
            }
        }
        Ok(())
    }

    async fn leave_room(&self, session_id: &str) -> SignalingResult<()> {
        let mut rooms = self.rooms.write().await;
        let departure = rooms.leave(session_id).ok_or(SignalingError::NotInRoom)?;

        info!(session_id, room_id = %departure.room_id, "session left room");
        self.notify_departure(session_id, &departure).await;
        self.send_to(
            session_id,
            &ServerMessage::Left {
                room_id: departure.room_id,
            },
        )
        .await;
        Ok(())
    }

    async fn notify_departure(&self, session_id: &str, departure: &Departure) {
        if departure.remaining.is_empty() {
            info!(room_id = %departure.room_id, "room deleted (empty)");
            return;
        }
        let notice = ServerMessage::UserLeft {
            session_id: session_id.to_string(),
        };
        for peer in &departure.remaining {
            self.send_to(peer, &notice).await;
        }
    }

    // Forwards to the other occupant of the sender's room.
    async fn relay(&self, session_id: &str, message: ServerMessage) -> SignalingResult<()> {
        let rooms = self.rooms.read().await;
        if rooms.room_of(session_id).is_none() {
            return Err(SignalingError::NotInRoom);
        }
        let peers = rooms.peers_of(session_id);

        if peers.is_empty() {
            debug!(session_id, "no peer in room, dropping relay");
            return Ok(());
        }

        let frame = message.to_ws()?;
        for peer in &peers {
            debug!(from = session_id, to = %peer, "relaying signaling message");
            self.send_raw(peer, frame.clone()).await;
        }
        Ok(())
    }

    // Delivers to every occupant, sender included.
    async fn broadcast_to_room(
        &self,
        session_id: &str,
        message: ServerMessage,
    ) -> SignalingResult<()> {
        let rooms = self.rooms.read().await;
        if rooms.room_of(session_id).is_none() {
            return Err(SignalingError::NotInRoom);
        }
        let mut targets = rooms.peers_of(session_id);
        targets.push(session_id.to_string());

        let frame = message.to_ws()?;
        for target in &targets {
            self.send_raw(target, frame.clone()).await;
        }
        Ok(())
    }
}

// Browser WebSocket upgrade
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SignalingState>,
) -> Response {
    debug!("websocket connection request received");
    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let (session_id, rx) = state.register_session().await;
    info!(%session_id, "client connected");

    let (sender, mut receiver) = socket.split();
    let ping_interval = state.config.ping_interval();
    let ping_timeout = state.config.ping_timeout();

    // Writer: drains the outbound queue and keeps the connection alive
    let mut sender_task = {
        let mut rx = tokio_stream::wrappers::UnboundedReceiverStream::new(rx);
        let mut sender = sender;
        let session_id = session_id.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ping_interval);
            ticker.tick().await;
            loop {
                let message = tokio::select! {
                    next = rx.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                    _ = ticker.tick() => Message::Ping(Vec::new()),
                };
                if sender.send(message).await.is_err() {
                    debug!(%session_id, "failed to write to socket");
                    break;
                }
            }
            let _ = sender.close().await;
            debug!(%session_id, "sender task ended");
        })
    };

    // Reader: parses frames until close, error, or silence
    let mut receiver_task = {
        let state = state.clone();
        let session_id = session_id.clone();
        tokio::spawn(async move {
            loop {
                let next = match tokio::time::timeout(ping_timeout, receiver.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(%session_id, ?ping_timeout, "client timed out");
                        break;
                    }
                };
                match next {
                    Some(Ok(Message::Text(text))) => state.handle_text(&session_id, &text).await,
                    Some(Ok(Message::Ping(data))) => {
                        state.send_raw(&session_id, Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Binary(_))) => {
                        state.reject(&session_id, &SignalingError::UnsupportedFrame).await;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        warn!(%session_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
            debug!(%session_id, "receiver task ended");
        })
    };

    tokio::select! {
        _ = &mut sender_task => receiver_task.abort(),
        _ = &mut receiver_task => sender_task.abort(),
    }

    state.disconnect_session(&session_id).await;
    info!(%session_id, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(frame: Message) -> ServerMessage {
        match frame {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerMessage {
        decode(rx.try_recv().expect("expected a queued frame"))
    }

    async fn connect(state: &SignalingState) -> (String, mpsc::UnboundedReceiver<Message>) {
        let (id, mut rx) = state.register_session().await;
        assert!(matches!(next(&mut rx), ServerMessage::Connected { .. }));
        (id, rx)
    }

    async fn send(state: &SignalingState, session_id: &str, value: serde_json::Value) {
        state.handle_text(session_id, &value.to_string()).await;
    }

    #[tokio::test]
    async fn connected_frame_carries_session_id() {
        let state = SignalingState::new(Config::default());
        let (id, mut rx) = state.register_session().await;
        match next(&mut rx) {
            ServerMessage::Connected { session_id, .. } => assert_eq!(session_id, id),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(state.get_active_sessions_count().await, 1);
    }

    #[tokio::test]
    async fn join_flow_assigns_initiator_and_notifies() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        let (c, mut rx_c) = connect(&state).await;

        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::Created {
                room_id: "r1".into()
            }
        );

        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Joined {
                room_id: "r1".into(),
                peers: vec![a.clone()]
            }
        );
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::UserJoined {
                session_id: b.clone()
            }
        );

        send(&state, &c, json!({"type": "join-room", "room_id": "r1"})).await;
        assert_eq!(
            next(&mut rx_c),
            ServerMessage::Full {
                room_id: "r1".into()
            }
        );
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn negotiation_is_forwarded_only_to_the_peer() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        send(&state, &b, json!({"type": "ready"})).await;
        assert_eq!(next(&mut rx_a), ServerMessage::Ready { from: b.clone() });

        let offer = json!({"type": "offer", "sdp": "v=0"});
        send(&state, &a, json!({"type": "offer", "offer": offer.clone()})).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Offer {
                from: a.clone(),
                offer
            }
        );

        let answer = json!({"type": "answer", "sdp": "v=0"});
        send(&state, &b, json!({"type": "answer", "answer": answer.clone()})).await;
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::Answer {
                from: b.clone(),
                answer
            }
        );

        let candidate = json!({"candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host", "sdpMLineIndex": 0});
        send(&state, &a, json!({"type": "candidate", "candidate": candidate.clone()})).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Candidate {
                from: a.clone(),
                candidate
            }
        );

        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn chat_reaches_everyone_in_the_room() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        let message = json!({"message": "hi", "senderName": "ana", "timestamp": 1});
        send(&state, &a, json!({"type": "send-message", "message": message.clone()})).await;
        let expected = ServerMessage::Message {
            from: a.clone(),
            message,
        };
        assert_eq!(next(&mut rx_a), expected);
        assert_eq!(next(&mut rx_b), expected);
    }

    #[tokio::test]
    async fn relay_outside_a_room_is_an_error() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;

        send(&state, &a, json!({"type": "offer", "offer": {}})).await;
        match next(&mut rx_a) {
            ServerMessage::Error { code, .. } => assert_eq!(code, "not-in-room"),
            other => panic!("unexpected {other:?}"),
        }

        send(&state, &a, json!({"type": "leave-room"})).await;
        assert!(matches!(next(&mut rx_a), ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn lone_occupant_relay_is_dropped() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        next(&mut rx_a);

        send(&state, &a, json!({"type": "ready"})).await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_frames_get_an_error_reply() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;

        state.handle_text(&a, "{not json").await;
        match next(&mut rx_a) {
            ServerMessage::Error { code, .. } => assert_eq!(code, "invalid-message"),
            other => panic!("unexpected {other:?}"),
        }

        send(&state, &a, json!({"type": "join-room", "room_id": "  "})).await;
        match next(&mut rx_a) {
            ServerMessage::Error { code, .. } => assert_eq!(code, "invalid-room"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_probe_is_echoed() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        send(&state, &a, json!({"type": "test", "message": "Hello"})).await;
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::TestResponse {
                message: "Server received: Hello".into()
            }
        );
    }

    #[tokio::test]
    async fn leave_and_disconnect_notify_the_remaining_peer() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        send(&state, &b, json!({"type": "leave-room"})).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Left {
                room_id: "r1".into()
            }
        );
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::UserLeft {
                session_id: b.clone()
            }
        );

        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        state.disconnect_session(&a).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::UserLeft {
                session_id: a.clone()
            }
        );
        assert_eq!(state.get_active_sessions_count().await, 1);
        assert_eq!(state.get_room_count().await, 1);

        state.disconnect_session(&b).await;
        assert_eq!(state.get_active_sessions_count().await, 0);
        assert_eq!(state.get_room_count().await, 0);
    }

    #[tokio::test]
    async fn switching_rooms_tells_the_old_peer() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        send(&state, &b, json!({"type": "join-room", "room_id": "r2"})).await;
        assert_eq!(
            next(&mut rx_a),
            ServerMessage::UserLeft {
                session_id: b.clone()
            }
        );
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Created {
                room_id: "r2".into()
            }
        );
    }

    #[tokio::test]
    async fn rejoining_does_not_renotify_the_peer() {
        let state = SignalingState::new(Config::default());
        let (a, mut rx_a) = connect(&state).await;
        let (b, mut rx_b) = connect(&state).await;
        send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;
        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        while rx_a.try_recv().is_ok() {}
        while rx_b.try_recv().is_ok() {}

        send(&state, &b, json!({"type": "join-room", "room_id": "r1"})).await;
        assert_eq!(
            next(&mut rx_b),
            ServerMessage::Joined {
                room_id: "r1".into(),
                peers: vec![a.clone()]
            }
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn join_racing_a_disconnect_keeps_frames_ordered() {
        for _ in 0..200 {
            let state = SignalingState::new(Config::default());
            let (a, _rx_a) = connect(&state).await;
            let (b, mut rx_b) = connect(&state).await;
            send(&state, &a, json!({"type": "join-room", "room_id": "r1"})).await;

            let leaver = {
                let state = state.clone();
                let a = a.clone();
                tokio::spawn(async move { state.disconnect_session(&a).await })
            };
            let joiner = {
                let state = state.clone();
                let b = b.clone();
                tokio::spawn(async move {
                    let frame = json!({"type": "join-room", "room_id": "r1"}).to_string();
                    state.handle_text(&b, &frame).await
                })
            };
            leaver.await.unwrap();
            joiner.await.unwrap();

            let mut frames = Vec::new();
            while let Ok(frame) = rx_b.try_recv() {
                frames.push(decode(frame));
            }
            match frames.as_slice() {
                [ServerMessage::Created { .. }] => {}
                [
                    ServerMessage::Joined { peers, .. },
                    ServerMessage::UserLeft { session_id },
                ] => {
                    assert_eq!(peers, &vec![a.clone()]);
                    assert_eq!(session_id, &a);
                }
                other => panic!("unexpected frame order: {other:?}"),
            }
        }
    }
}
