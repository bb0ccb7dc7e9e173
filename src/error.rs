use crate::protocol::ErrorReason;

/// Failures of room and admission operations on the signaling server.
///
/// Each variant maps onto the [`ErrorReason`] reported to the client; none
/// of them closes the control connection.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("Room {0} does not exist")]
    RoomNotFound(String),

    #[error("Room {0} is full")]
    RoomFull(String),

    #[error("Socket is not a member of room {0}")]
    NotInRoom(String),

    #[error("No free room id after {0} attempts")]
    RoomIdUnavailable(usize),

    #[error("Invalid challenge")]
    InvalidChallenge,

    #[error("Protocol error: {0:?}")]
    Protocol(ErrorReason),
}

impl SignalingError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            SignalingError::RoomNotFound(_) => ErrorReason::RoomNotFound,
            SignalingError::RoomFull(_) => ErrorReason::RoomFull,
            SignalingError::NotInRoom(_) => ErrorReason::NotInRoom,
            SignalingError::RoomIdUnavailable(_) => ErrorReason::RoomIdUnavailable,
            SignalingError::InvalidChallenge => ErrorReason::InvalidChallenge,
            SignalingError::Protocol(reason) => *reason,
        }
    }
}

impl From<ErrorReason> for SignalingError {
    fn from(reason: ErrorReason) -> Self {
        SignalingError::Protocol(reason)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid listen address {0}: {1}")]
    ListenAddr(String, std::net::AddrParseError),

    #[error("Challenge difficulty must be between 1 and 16, got {0}")]
    Difficulty(u32),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// Failures surfaced by the control-socket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server rejected request: {0:?}")]
    Rejected(ErrorReason),

    #[error("No nonce found for challenge within {0} iterations")]
    Unsolvable(u64),

    #[error("Challenge solver task failed: {0}")]
    Solver(#[from] tokio::task::JoinError),

    #[error("Unexpected reply {0}")]
    UnexpectedReply(&'static str),

    #[error("Connection closed")]
    Closed,
}
