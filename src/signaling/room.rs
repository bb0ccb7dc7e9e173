use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::error::SignalingError;
use crate::protocol::ControlMessage;

/// Maximum number of members in a room.
pub const ROOM_CAPACITY: usize = 2;

/// Handle to one control connection.
///
/// Messages pushed here are serialized by the connection's writer task.
#[derive(Clone, Debug)]
pub struct PeerSocket {
    id: Uuid,
    tx: mpsc::UnboundedSender<ControlMessage>,
}

impl PeerSocket {
    pub fn new(tx: mpsc::UnboundedSender<ControlMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    /// A socket together with the receiving end of its outbound queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message; returns false when the connection is gone.
    pub fn send(&self, message: ControlMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

impl PartialEq for PeerSocket {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PeerSocket {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomLifecycle {
    Open,
    Full,
    /// Empty, with a deletion pending.
    Draining,
    Deleted,
}

pub struct Room {
    id: String,
    members: Vec<PeerSocket>,
    lifecycle: RoomLifecycle,
    deletion: Option<AbortHandle>,
}

impl Room {
    pub fn new(id: String) -> Self {
        Self {
            id,
            members: Vec::with_capacity(ROOM_CAPACITY),
            lifecycle: RoomLifecycle::Open,
            deletion: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= ROOM_CAPACITY
    }

    pub fn lifecycle(&self) -> RoomLifecycle {
        self.lifecycle
    }

    pub fn contains(&self, socket_id: Uuid) -> bool {
        self.members.iter().any(|m| m.id() == socket_id)
    }

    pub fn members(&self) -> &[PeerSocket] {
        &self.members
    }

    pub(crate) fn push(&mut self, socket: PeerSocket) -> Result<(), SignalingError> {
        if self.is_full() {
            return Err(SignalingError::RoomFull(self.id.clone()));
        }
        self.members.push(socket);
        self.lifecycle = if self.is_full() {
            RoomLifecycle::Full
        } else {
            RoomLifecycle::Open
        };
        Ok(())
    }

    pub(crate) fn remove(&mut self, socket_id: Uuid) -> Option<PeerSocket> {
        let index = self.members.iter().position(|m| m.id() == socket_id)?;
        let socket = self.members.remove(index);
        if self.lifecycle == RoomLifecycle::Full {
            self.lifecycle = RoomLifecycle::Open;
        }
        Some(socket)
    }

    /// Send to every member except `except`.
    pub fn broadcast_except(&self, except: Uuid, message: &ControlMessage) {
        for member in self.members.iter().filter(|m| m.id() != except) {
            member.send(message.clone());
        }
    }

    pub(crate) fn start_draining(&mut self, deletion: AbortHandle) {
        self.cancel_deletion();
        self.deletion = Some(deletion);
        self.lifecycle = RoomLifecycle::Draining;
    }

    pub(crate) fn cancel_deletion(&mut self) {
        if let Some(handle) = self.deletion.take() {
            handle.abort();
        }
        if self.lifecycle == RoomLifecycle::Draining {
            self.lifecycle = RoomLifecycle::Open;
        }
    }

    pub(crate) fn mark_deleted(&mut self) {
        if let Some(handle) = self.deletion.take() {
            handle.abort();
        }
        self.members.clear();
        self.lifecycle = RoomLifecycle::Deleted;
    }
}
