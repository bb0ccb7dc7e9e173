//! Room table with deferred deletion.
//!
//! Lock order is always table, then room. Timers never hold a lock while
//! sleeping and re-check the room when they fire.

use std::collections::{hash_map::Entry, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SignalingError;
use crate::protocol::{ControlMessage, RoomAvailability};
use crate::signaling::naming::{random_base, sanitize_room_name, with_suffix};
use crate::signaling::room::{PeerSocket, Room, RoomLifecycle, ROOM_CAPACITY};

/// Default time an empty room survives before deletion (60 seconds).
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Default number of suffixes tried before giving up on a room id.
pub const DEFAULT_ID_ATTEMPTS: usize = 16;

pub struct RegistryConfig {
    pub grace_period: Duration,
    pub id_attempts: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            id_attempts: DEFAULT_ID_ATTEMPTS,
        }
    }
}

type SharedRoom = Arc<Mutex<Room>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    rooms: Mutex<HashMap<String, SharedRoom>>,
    grace_period: Duration,
    id_attempts: usize,
}

impl Inner {
    fn room(&self, room_id: &str) -> Option<SharedRoom> {
        lock(&self.rooms).get(room_id).cloned()
    }

    /// Timer body: delete `room_id` if it is still the same empty room.
    fn expire(&self, room_id: &str, scheduled: &Weak<Mutex<Room>>) {
        let mut rooms = lock(&self.rooms);
        let Some(current) = rooms.get(room_id).cloned() else {
            return;
        };
        let same_room = scheduled
            .upgrade()
            .map(|room| Arc::ptr_eq(&room, &current))
            .unwrap_or(false);
        if !same_room {
            return;
        }

        let mut room = lock(&current);
        if room.lifecycle() == RoomLifecycle::Draining && room.is_empty() {
            room.mark_deleted();
            rooms.remove(room_id);
            info!(room_id, "room deleted after grace period");
        }
    }
}

/// Creates, looks up and deletes rooms.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Inner>,
}

impl RoomRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                rooms: Mutex::new(HashMap::new()),
                grace_period: config.grace_period,
                id_attempts: config.id_attempts.max(1),
            }),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.rooms).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn exists(&self, room_id: &str) -> bool {
        self.inner.room(room_id).is_some()
    }

    pub fn participants(&self, room_id: &str) -> Option<usize> {
        self.inner.room(room_id).map(|room| lock(&room).len())
    }

    pub fn lifecycle(&self, room_id: &str) -> Option<RoomLifecycle> {
        self.inner.room(room_id).map(|room| lock(&room).lifecycle())
    }

    /// Register a new empty room and return its id.
    ///
    /// The room starts draining: if nobody joins within the grace period
    /// it is removed again.
    pub fn create(&self, desired_name: Option<&str>) -> Result<String, SignalingError> {
        let mut rng = rand::thread_rng();
        let base = desired_name
            .map(sanitize_room_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| random_base(&mut rng));

        let mut rooms = lock(&self.inner.rooms);
        for _ in 0..self.inner.id_attempts {
            let room_id = with_suffix(&mut rng, &base);
            if let Entry::Vacant(slot) = rooms.entry(room_id.clone()) {
                let room = Arc::new(Mutex::new(Room::new(room_id.clone())));
                let deletion = self.schedule_deletion(&room_id, &room);
                lock(&room).start_draining(deletion);
                slot.insert(room);
                info!(room_id = %room_id, "room created");
                return Ok(room_id);
            }
            debug!(room_id = %room_id, "room id collision, retrying");
        }
        Err(SignalingError::RoomIdUnavailable(self.inner.id_attempts))
    }

    /// Add `socket` to a room and notify everyone involved.
    ///
    /// Existing members get `ParticipantJoined`; the joiner gets
    /// `RoomJoined` unless it is the creator (`initial`). When the room
    /// fills up both members get `RoomReady`, with the earlier member as
    /// initiator. Returns the new member count.
    pub fn join(
        &self,
        room_id: &str,
        socket: PeerSocket,
        initial: bool,
    ) -> Result<usize, SignalingError> {
        let shared = self
            .inner
            .room(room_id)
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;
        let mut room = lock(&shared);

        if room.lifecycle() == RoomLifecycle::Deleted {
            return Err(SignalingError::RoomNotFound(room_id.to_string()));
        }
        if room.contains(socket.id()) {
            return Ok(room.len());
        }
        if room.len() >= ROOM_CAPACITY {
            return Err(SignalingError::RoomFull(room_id.to_string()));
        }

        room.cancel_deletion();
        let joiner = socket.id();
        room.push(socket.clone())?;
        let participants = room.len();

        room.broadcast_except(
            joiner,
            &ControlMessage::ParticipantJoined {
                room_id: room_id.to_string(),
                participants,
            },
        );
        if !initial {
            socket.send(ControlMessage::RoomJoined {
                room_id: room_id.to_string(),
                participants,
            });
        }
        if participants == ROOM_CAPACITY {
            for member in room.members() {
                member.send(ControlMessage::RoomReady {
                    room_id: room_id.to_string(),
                    is_initiator: member.id() != joiner,
                    participants,
                });
            }
            info!(room_id, "room ready");
        }

        debug!(room_id, participants, "socket joined room");
        Ok(participants)
    }

    /// Explicit leave: acknowledge to the leaver, notify the rest.
    pub fn leave(&self, room_id: &str, socket_id: Uuid) -> Result<(), SignalingError> {
        let departed = self.depart(room_id, socket_id)?;
        departed.send(ControlMessage::RoomLeft {
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    /// The control connection of `socket_id` went away.
    pub fn disconnect(&self, room_id: &str, socket_id: Uuid) {
        if let Err(e) = self.depart(room_id, socket_id) {
            debug!(room_id, "disconnect ignored: {e}");
        }
    }

    fn depart(&self, room_id: &str, socket_id: Uuid) -> Result<PeerSocket, SignalingError> {
        let shared = self
            .inner
            .room(room_id)
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;
        let mut room = lock(&shared);

        let departed = room
            .remove(socket_id)
            .ok_or_else(|| SignalingError::NotInRoom(room_id.to_string()))?;
        let participants = room.len();
        room.broadcast_except(
            socket_id,
            &ControlMessage::ParticipantLeft {
                room_id: room_id.to_string(),
                participants,
            },
        );

        if room.is_empty() {
            let deletion = self.schedule_deletion(room_id, &shared);
            room.start_draining(deletion);
            info!(room_id, grace = ?self.inner.grace_period, "room empty, deletion scheduled");
        }
        Ok(departed)
    }

    /// Remove a room immediately. Deleting a missing room is a no-op.
    pub fn delete(&self, room_id: &str) {
        let removed = lock(&self.inner.rooms).remove(room_id);
        if let Some(room) = removed {
            lock(&room).mark_deleted();
            info!(room_id, "room deleted");
        }
    }

    pub fn status(&self, room_id: &str) -> RoomAvailability {
        match self.inner.room(room_id) {
            None => RoomAvailability::NotFound,
            Some(room) => {
                let room = lock(&room);
                match room.lifecycle() {
                    RoomLifecycle::Deleted => RoomAvailability::NotFound,
                    _ if room.is_full() => RoomAvailability::Full,
                    _ => RoomAvailability::Open,
                }
            }
        }
    }

    /// Forward a relay message to every member of the room but the sender.
    ///
    /// Returns the number of recipients.
    pub fn relay(
        &self,
        room_id: &str,
        sender: Uuid,
        message: &ControlMessage,
    ) -> Result<usize, SignalingError> {
        let shared = self
            .inner
            .room(room_id)
            .ok_or_else(|| SignalingError::RoomNotFound(room_id.to_string()))?;
        let room = lock(&shared);
        if !room.contains(sender) {
            return Err(SignalingError::NotInRoom(room_id.to_string()));
        }
        room.broadcast_except(sender, message);
        Ok(room.len() - 1)
    }

    fn schedule_deletion(&self, room_id: &str, room: &SharedRoom) -> AbortHandle {
        let inner = Arc::downgrade(&self.inner);
        let scheduled = Arc::downgrade(room);
        let room_id = room_id.to_string();
        let grace = self.inner.grace_period;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = inner.upgrade() {
                inner.expire(&room_id, &scheduled);
            }
        })
        .abort_handle()
    }
}
