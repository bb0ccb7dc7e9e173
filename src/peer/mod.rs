//! Peer side: the MLS-secured data channel and what runs over it.

pub mod codec;
pub mod error;
pub mod file_transfer;
pub mod loopback;
pub mod message;
pub mod packet;
pub mod session;
pub mod transport;

use std::time::Duration;

pub use error::{FileTransferError, HandshakeError, TransportError};
pub use file_transfer::{FileTransfers, TransferEvent};
pub use message::{AppMessage, FileOffer};
pub use session::PeerSession;
pub use transport::{
    PeerConnection, PeerEventHandler, PeerTransport, Role, Signal, TransportEvent,
    TransportHandle, TransportState,
};

pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Peer-side tunables.
#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Bytes per `FileChunk`.
    pub chunk_size: usize,
    /// How long a sender waits for each `FileAck`.
    pub idle_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}
