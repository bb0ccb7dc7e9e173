//! Control-message dispatch.

use tracing::{debug, warn};

use crate::error::SignalingError;
use crate::protocol::{ChallengeSolution, ControlMessage, ErrorReason};
use crate::signaling::challenge::ChallengeEngine;
use crate::signaling::registry::RoomRegistry;
use crate::signaling::room::PeerSocket;

/// Per-connection state owned by the socket loop.
pub struct Connection {
    socket: PeerSocket,
    room: Option<String>,
}

impl Connection {
    pub fn new(socket: PeerSocket) -> Self {
        Self { socket, room: None }
    }

    pub fn socket(&self) -> &PeerSocket {
        &self.socket
    }

    /// The room this connection currently belongs to.
    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }
}

#[derive(Clone)]
pub struct SignalingRouter {
    registry: RoomRegistry,
    challenges: ChallengeEngine,
}

impl SignalingRouter {
    pub fn new(registry: RoomRegistry, challenges: ChallengeEngine) -> Self {
        Self {
            registry,
            challenges,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn challenges(&self) -> &ChallengeEngine {
        &self.challenges
    }

    /// Handle one inbound text frame. Errors are reported to the sender
    /// and never close the connection.
    pub fn handle_text(&self, conn: &mut Connection, text: &str) {
        match ControlMessage::parse(text) {
            Ok(message) => self.dispatch(conn, message),
            Err(reason) => {
                warn!(socket = %conn.socket.id(), ?reason, "rejected control frame");
                conn.socket.send(ControlMessage::error(reason));
            }
        }
    }

    pub fn dispatch(&self, conn: &mut Connection, message: ControlMessage) {
        let kind = message.kind();
        if let Err(e) = self.route(conn, message) {
            warn!(socket = %conn.socket.id(), kind, "request failed: {e}");
            conn.socket.send(ControlMessage::error(e.reason()));
        }
    }

    /// The control connection closed.
    pub fn disconnect(&self, conn: &mut Connection) {
        if let Some(room_id) = conn.room.take() {
            self.registry.disconnect(&room_id, conn.socket.id());
        }
    }

    fn route(&self, conn: &mut Connection, message: ControlMessage) -> Result<(), SignalingError> {
        match message {
            ControlMessage::ChallengeRequest => {
                let target = self.challenges.issue(None);
                conn.socket.send(ControlMessage::ChallengeResponse {
                    target,
                    difficulty: self.challenges.difficulty(),
                });
            }
            ControlMessage::CreateRoom {
                room_name,
                challenge,
            } => {
                self.admit(challenge, None)?;
                let room_id = self.registry.create(room_name.as_deref())?;
                conn.socket.send(ControlMessage::RoomCreated {
                    room_id: room_id.clone(),
                });
                self.registry.join(&room_id, conn.socket.clone(), true)?;
                self.switch_room(conn, room_id);
            }
            ControlMessage::JoinRoom { room_id, challenge } => {
                self.admit(challenge, Some(&room_id))?;
                self.registry.join(&room_id, conn.socket.clone(), false)?;
                self.switch_room(conn, room_id);
            }
            ControlMessage::LeaveRoom { room_id } => {
                self.registry.leave(&room_id, conn.socket.id())?;
                if conn.room.as_deref() == Some(room_id.as_str()) {
                    conn.room = None;
                }
            }
            ControlMessage::RoomStatus { room_id, challenge } => {
                self.admit(challenge, Some(&room_id))?;
                let status = self.registry.status(&room_id);
                conn.socket
                    .send(ControlMessage::RoomStatusResponse { room_id, status });
            }
            ControlMessage::Offer { ref room_id, .. }
            | ControlMessage::Answer { ref room_id, .. }
            | ControlMessage::IceCandidate { ref room_id, .. } => {
                let recipients = self.registry.relay(room_id, conn.socket.id(), &message)?;
                debug!(room_id = %room_id, kind = message.kind(), recipients, "relayed");
            }
            ControlMessage::ChallengeResponse { .. }
            | ControlMessage::RoomCreated { .. }
            | ControlMessage::RoomJoined { .. }
            | ControlMessage::RoomLeft { .. }
            | ControlMessage::RoomStatusResponse { .. }
            | ControlMessage::ParticipantJoined { .. }
            | ControlMessage::ParticipantLeft { .. }
            | ControlMessage::RoomReady { .. }
            | ControlMessage::Error { .. } => {
                return Err(ErrorReason::UnknownMessageType.into());
            }
        }
        Ok(())
    }

    fn admit(
        &self,
        challenge: Option<ChallengeSolution>,
        context: Option<&str>,
    ) -> Result<(), SignalingError> {
        let solution = challenge.ok_or(SignalingError::Protocol(ErrorReason::MissingData))?;
        if self
            .challenges
            .validate(&solution.target, &solution.nonce, context)
        {
            Ok(())
        } else {
            Err(SignalingError::InvalidChallenge)
        }
    }

    /// Record the new room and drop out of the previous one.
    fn switch_room(&self, conn: &mut Connection, room_id: String) {
        if let Some(previous) = conn.room.replace(room_id) {
            if conn.room.as_deref() != Some(previous.as_str()) {
                self.registry.disconnect(&previous, conn.socket.id());
            }
        }
    }
}
