use mls_crypto::MlsError;

use crate::peer::message::MessageError;
use crate::peer::packet::{PacketError, PacketKind};
use crate::peer::transport::TransportState;

/// Violations of the in-channel handshake sequence. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("Encrypted packet received before the channel is secure")]
    EncryptedBeforeSecure,

    #[error("Unexpected {kind:?} packet in state {state:?}")]
    UnexpectedPacket {
        kind: PacketKind,
        state: TransportState,
    },

    #[error("Group key agreement failed: {0}")]
    Group(#[from] MlsError),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Failed to open sealed message: {0}")]
    Decrypt(MlsError),

    #[error("Failed to seal message: {0}")]
    Encrypt(MlsError),

    #[error("Plaintext application message rejected")]
    PlaintextRejected,

    #[error("Transport is not secure yet")]
    NotSecure,

    #[error("Transport is closed")]
    Closed,
}

impl TransportError {
    /// Whether the connection has to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Connection(_) | TransportError::Handshake(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FileTransferError {
    #[error("No acknowledgement for request {0} within the idle timeout")]
    IdleTimeout(u64),

    #[error("Transfer {0} cancelled")]
    Cancelled(u64),

    #[error("Unknown offer {0}")]
    UnknownOffer(u64),

    #[error("Unknown transfer {0}")]
    UnknownRequest(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Message(#[from] MessageError),
}
