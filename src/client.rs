//! Control-socket client for the signaling relay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::peer::error::TransportError;
use crate::peer::session::SignalSink;
use crate::peer::transport::{Signal, TransportHandle};
use crate::protocol::{ChallengeSolution, ControlMessage, RoomAvailability};
use crate::signaling::challenge::{solve, MAX_SOLVE_ITERATIONS};

type Handler = Arc<dyn Fn(&ControlMessage) + Send + Sync>;

#[derive(Clone, Default)]
struct Handlers {
    by_kind: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl Handlers {
    fn add(&self, kind: &str, handler: Handler) {
        self.by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind.to_string())
            .or_default()
            .push(handler);
    }

    fn dispatch(&self, message: &ControlMessage) {
        let handlers = self
            .by_kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message.kind())
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(message);
        }
    }
}

pub struct SignalingClient {
    outgoing: mpsc::UnboundedSender<Message>,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<ControlMessage>>,
    handlers: Handlers,
    room: Mutex<Option<String>>,
    max_iterations: u64,
    tasks: [JoinHandle<()>; 2],
}

impl SignalingClient {
    /// Connect to a relay at `url`, e.g. `ws://127.0.0.1:4173/ws`.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let handlers = Handlers::default();

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = write.send(message).await {
                    warn!("failed to send control message: {e}");
                    break;
                }
            }
        });

        let dispatch = handlers.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("control socket error: {e}");
                        break;
                    }
                };
                match serde_json::from_str::<ControlMessage>(&text) {
                    Ok(message) => {
                        dispatch.dispatch(&message);
                        if inbox_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("ignoring unreadable control message: {e}"),
                }
            }
        });

        Ok(Self {
            outgoing,
            inbox: tokio::sync::Mutex::new(inbox),
            handlers,
            room: Mutex::new(None),
            max_iterations: MAX_SOLVE_ITERATIONS,
            tasks: [writer, reader],
        })
    }

    /// Register `handler` for every incoming message tagged `kind`.
    pub fn on<F>(&self, kind: &str, handler: F)
    where
        F: Fn(&ControlMessage) + Send + Sync + 'static,
    {
        self.handlers.add(kind, Arc::new(handler));
    }

    /// Feed relayed offers, answers and candidates into a transport.
    pub fn forward_signals(&self, transport: TransportHandle) {
        for kind in ["offer", "answer", "ice_candidate"] {
            let transport = transport.clone();
            self.on(kind, move |message| {
                if let Some(signal) = Signal::from_control(message.clone()) {
                    transport.signal(signal);
                }
            });
        }
    }

    /// Room this client last created or joined.
    pub fn room(&self) -> Option<String> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_room(&self, room: Option<String>) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = room;
    }

    pub fn send(&self, message: &ControlMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(message)?;
        self.outgoing
            .send(Message::Text(json))
            .map_err(|_| ClientError::Closed)
    }

    /// Next message from the relay, in arrival order.
    pub async fn next_message(&self) -> Result<ControlMessage, ClientError> {
        self.inbox.lock().await.recv().await.ok_or(ClientError::Closed)
    }

    /// Skip messages until `pick` accepts one. An error reply fails the wait.
    async fn await_reply<T>(
        &self,
        expected: &'static str,
        pick: impl Fn(ControlMessage) -> Option<T>,
    ) -> Result<T, ClientError> {
        loop {
            let message = self.next_message().await?;
            if let ControlMessage::Error { reason, .. } = message {
                return Err(ClientError::Rejected(reason));
            }
            let kind = message.kind();
            match pick(message) {
                Some(value) => return Ok(value),
                None => debug!(kind, expected, "skipping message"),
            }
        }
    }

    /// Fetch a challenge and find a nonce for it.
    pub async fn solve_challenge(
        &self,
        context: Option<&str>,
    ) -> Result<ChallengeSolution, ClientError> {
        self.send(&ControlMessage::ChallengeRequest)?;
        let (target, difficulty) = self
            .await_reply("challenge_response", |message| match message {
                ControlMessage::ChallengeResponse { target, difficulty } => {
                    Some((target, difficulty))
                }
                _ => None,
            })
            .await?;
        let max_iterations = self.max_iterations;
        let context = context.map(str::to_string);
        let (target, nonce) = tokio::task::spawn_blocking(move || {
            let nonce = solve(&target, difficulty, context.as_deref(), max_iterations);
            (target, nonce)
        })
        .await?;
        let nonce = nonce.ok_or(ClientError::Unsolvable(max_iterations))?;
        Ok(ChallengeSolution { target, nonce })
    }

    /// Create a room and return its id. The creator is already a member.
    pub async fn create_room(&self, room_name: Option<&str>) -> Result<String, ClientError> {
        let challenge = self.solve_challenge(None).await?;
        self.send(&ControlMessage::CreateRoom {
            room_name: room_name.map(str::to_string),
            challenge: Some(challenge),
        })?;
        let room_id = self
            .await_reply("room_created", |message| match message {
                ControlMessage::RoomCreated { room_id } => Some(room_id),
                _ => None,
            })
            .await?;
        self.set_room(Some(room_id.clone()));
        Ok(room_id)
    }

    /// Join `room_id` and return the participant count after joining.
    pub async fn join_room(&self, room_id: &str) -> Result<usize, ClientError> {
        let challenge = self.solve_challenge(Some(room_id)).await?;
        self.send(&ControlMessage::JoinRoom {
            room_id: room_id.to_string(),
            challenge: Some(challenge),
        })?;
        let participants = self
            .await_reply("room_joined", |message| match message {
                ControlMessage::RoomJoined { participants, .. } => Some(participants),
                _ => None,
            })
            .await?;
        self.set_room(Some(room_id.to_string()));
        Ok(participants)
    }

    /// Wait for the room to fill. Returns whether this client initiates.
    pub async fn wait_ready(&self) -> Result<bool, ClientError> {
        self.await_reply("room_ready", |message| match message {
            ControlMessage::RoomReady { is_initiator, .. } => Some(is_initiator),
            _ => None,
        })
        .await
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.send(&ControlMessage::LeaveRoom {
            room_id: room_id.to_string(),
        })?;
        self.await_reply("room_left", |message| match message {
            ControlMessage::RoomLeft { .. } => Some(()),
            _ => None,
        })
        .await?;
        self.set_room(None);
        Ok(())
    }

    pub async fn room_status(&self, room_id: &str) -> Result<RoomAvailability, ClientError> {
        let challenge = self.solve_challenge(Some(room_id)).await?;
        self.send(&ControlMessage::RoomStatus {
            room_id: room_id.to_string(),
            challenge: Some(challenge),
        })?;
        self.await_reply("room_status_response", |message| match message {
            ControlMessage::RoomStatusResponse { status, .. } => Some(status),
            _ => None,
        })
        .await
    }

    pub fn send_signal(&self, room_id: &str, signal: Signal) -> Result<(), ClientError> {
        self.send(&signal.into_control(room_id))
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Relays a transport's signaling output through a room.
pub struct RoomSignals {
    client: Arc<SignalingClient>,
    room_id: String,
}

impl RoomSignals {
    pub fn new(client: Arc<SignalingClient>, room_id: impl Into<String>) -> Self {
        Self {
            client,
            room_id: room_id.into(),
        }
    }
}

impl SignalSink for RoomSignals {
    fn send_signal(&self, signal: Signal) -> Result<(), TransportError> {
        self.client
            .send_signal(&self.room_id, signal)
            .map_err(|e| TransportError::Connection(e.to_string()))
    }
}
