//! Room signaling relay: admission, room lifecycle and message relay.

pub mod challenge;
pub mod naming;
pub mod registry;
pub mod room;
pub mod router;
pub mod server;

pub use challenge::{ChallengeConfig, ChallengeEngine};
pub use registry::{RegistryConfig, RoomRegistry};
pub use room::{PeerSocket, Room, RoomLifecycle};
pub use router::{Connection, SignalingRouter};
pub use server::{app, serve, AppState};
