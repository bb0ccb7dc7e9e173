//! Two-peer encrypted rooms.
//!
//! The [`signaling`] relay admits clients through a proof-of-work challenge,
//! pairs them in rooms of two and forwards their connection setup. Once
//! connected, peers run [`peer::PeerTransport`]: a data channel whose traffic
//! is sealed with a two-party MLS group, carrying chat and chunked file
//! transfers.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod peer;
pub mod protocol;
pub mod signaling;

pub use client::{RoomSignals, SignalingClient};
pub use config::{Args, ServerConfig};
pub use error::{ClientError, ConfigError, SignalingError};
pub use protocol::{ControlMessage, ErrorReason};
