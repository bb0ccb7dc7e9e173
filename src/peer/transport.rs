//! Peer-to-peer data channel secured by a two-party MLS group.
//!
//! A [`PeerTransport`] owns one [`PeerConnection`] and one [`GroupSession`]
//! and is driven by [`TransportEvent`]s queued through a [`TransportHandle`].
//! Everything observable leaves through a [`PeerEventHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use mls_crypto::GroupSession;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::peer::error::{HandshakeError, TransportError};
use crate::peer::message::AppMessage;
use crate::peer::packet::{split_header, Packet, PacketError, PacketKind, GROUP_OPEN_PAYLOAD};
use crate::protocol::ControlMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Opens the data channel and creates the group.
    Initiator,
    Responder,
}

impl Role {
    pub fn from_initiator_flag(is_initiator: bool) -> Self {
        if is_initiator {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    ChannelOpen,
    Handshaking,
    Secure,
    Closed,
}

/// Session description or ICE candidate exchanged through the relay.
/// The payload is opaque to everything but the platform connection.
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
}

impl Signal {
    pub fn into_control(self, room_id: impl Into<String>) -> ControlMessage {
        let room_id = room_id.into();
        match self {
            Signal::Offer(payload) => ControlMessage::Offer { room_id, payload },
            Signal::Answer(payload) => ControlMessage::Answer { room_id, payload },
            Signal::IceCandidate(payload) => ControlMessage::IceCandidate { room_id, payload },
        }
    }

    pub fn from_control(message: ControlMessage) -> Option<Self> {
        match message {
            ControlMessage::Offer { payload, .. } => Some(Signal::Offer(payload)),
            ControlMessage::Answer { payload, .. } => Some(Signal::Answer(payload)),
            ControlMessage::IceCandidate { payload, .. } => Some(Signal::IceCandidate(payload)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum TransportEvent {
    /// Begin connecting. The initiator asks the platform for a data channel.
    Start,
    /// Remote signaling input.
    Signal(Signal),
    /// The platform wants a (re)negotiation offer.
    NegotiationNeeded,
    ChannelOpen,
    /// Raw data-channel frame from the peer.
    Frame(Vec<u8>),
    /// Encoded application message to seal and send.
    SendApplication(Vec<u8>),
    ConnectionFailed(String),
    Close,
}

/// Platform peer connection (WebRTC or an in-process stand-in).
///
/// Implementations report asynchronous platform events back by queueing
/// [`TransportEvent::NegotiationNeeded`], [`TransportEvent::ChannelOpen`],
/// [`TransportEvent::Frame`] and [`TransportEvent::ConnectionFailed`] on the
/// transport's handle.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create the ordered, reliable data channel. Initiator only.
    async fn create_data_channel(&self) -> Result<(), TransportError>;

    /// Create an offer, apply it locally and return it for the relay.
    async fn create_offer(&self) -> Result<Value, TransportError>;

    /// Create an answer to the applied remote offer, apply it locally and
    /// return it for the relay.
    async fn create_answer(&self) -> Result<Value, TransportError>;

    async fn set_remote_description(&self, description: Value) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: Value) -> Result<(), TransportError>;

    /// Send one binary frame over the data channel.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Receives everything a transport produces.
#[async_trait]
pub trait PeerEventHandler: Send + Sync {
    /// Called when signaling output must be relayed to the peer.
    async fn on_signal(&self, signal: Signal) -> Result<(), TransportError>;

    async fn on_state_change(&self, _state: TransportState) {}

    /// Called with every authenticated application message.
    async fn on_application(&self, message: AppMessage);

    /// Terminal callback. `reason` is set when the transport failed.
    async fn on_closed(&self, reason: Option<String>);
}

/// Cloneable handle used to feed a transport and to send through it.
#[derive(Clone, Debug)]
pub struct TransportHandle {
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Receiver<TransportState>,
    cancel: CancellationToken,
}

/// Receiving half created together with a [`TransportHandle`].
#[derive(Debug)]
pub struct TransportInbox {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    state: watch::Sender<TransportState>,
    cancel: CancellationToken,
}

pub fn channel() -> (TransportHandle, TransportInbox) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(TransportState::Idle);
    let cancel = CancellationToken::new();
    (
        TransportHandle {
            events: events_tx,
            state: state_rx,
            cancel: cancel.clone(),
        },
        TransportInbox {
            events: events_rx,
            state: state_tx,
            cancel,
        },
    )
}

impl TransportHandle {
    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_secure(&self) -> bool {
        self.state() == TransportState::Secure
    }

    /// Queue an event. Returns `false` once the transport has stopped.
    pub fn push(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn start(&self) -> bool {
        self.push(TransportEvent::Start)
    }

    pub fn signal(&self, signal: Signal) -> bool {
        self.push(TransportEvent::Signal(signal))
    }

    pub fn close(&self) -> bool {
        self.push(TransportEvent::Close)
    }

    /// Encode and queue an application message for sealing.
    pub fn send(&self, message: &AppMessage) -> Result<(), TransportError> {
        match self.state() {
            TransportState::Secure => {}
            TransportState::Closed => return Err(TransportError::Closed),
            _ => return Err(TransportError::NotSecure),
        }
        let bytes = message.encode()?;
        if self.push(TransportEvent::SendApplication(bytes)) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    /// Token cancelled when the transport closes. Work tied to this
    /// connection should hang off a child of it.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Wait until the transport reaches `target` or closes.
    pub async fn wait_for(&self, target: TransportState) -> TransportState {
        let mut state = self.state.clone();
        let reached = match state
            .wait_for(|s| *s == target || *s == TransportState::Closed)
            .await
        {
            Ok(reached) => *reached,
            Err(_) => TransportState::Closed,
        };
        reached
    }
}

pub struct PeerTransport<C, G> {
    role: Role,
    state: TransportState,
    connection: Arc<C>,
    group: G,
    handler: Arc<dyn PeerEventHandler>,
    inbox: TransportInbox,
}

impl<C, G> PeerTransport<C, G>
where
    C: PeerConnection + 'static,
    G: GroupSession + 'static,
{
    pub fn new(
        role: Role,
        connection: Arc<C>,
        group: G,
        handler: Arc<dyn PeerEventHandler>,
        inbox: TransportInbox,
    ) -> Self {
        Self {
            role,
            state: TransportState::Idle,
            connection,
            group,
            handler,
            inbox,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process events until the transport closes or every handle is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.inbox.events.recv().await {
            if let Err(e) = self.handle(event).await {
                if e.is_fatal() {
                    error!(role = ?self.role, "transport failed: {e}");
                    self.close(Some(e.to_string())).await;
                } else {
                    warn!(role = ?self.role, "dropped input: {e}");
                }
            }
            if self.state == TransportState::Closed {
                return;
            }
        }
        self.close(None).await;
    }

    pub async fn handle(&mut self, event: TransportEvent) -> Result<(), TransportError> {
        if self.state == TransportState::Closed {
            return Err(TransportError::Closed);
        }
        match event {
            TransportEvent::Start => self.start().await,
            TransportEvent::Signal(signal) => self.on_signal(signal).await,
            TransportEvent::NegotiationNeeded => self.negotiate().await,
            TransportEvent::ChannelOpen => self.on_channel_open().await,
            TransportEvent::Frame(frame) => self.on_frame(&frame).await,
            TransportEvent::SendApplication(bytes) => self.send_application(&bytes).await,
            TransportEvent::ConnectionFailed(reason) => Err(TransportError::Connection(reason)),
            TransportEvent::Close => {
                self.close(None).await;
                Ok(())
            }
        }
    }

    async fn start(&mut self) -> Result<(), TransportError> {
        if self.state != TransportState::Idle {
            return Ok(());
        }
        self.set_state(TransportState::Connecting).await;
        if self.role == Role::Initiator {
            self.connection.create_data_channel().await?;
        }
        Ok(())
    }

    async fn on_signal(&mut self, signal: Signal) -> Result<(), TransportError> {
        if self.state == TransportState::Idle {
            self.set_state(TransportState::Connecting).await;
        }
        match signal {
            Signal::Offer(offer) => {
                self.connection.set_remote_description(offer).await?;
                let answer = self.connection.create_answer().await?;
                debug!(role = ?self.role, "answering offer");
                self.handler.on_signal(Signal::Answer(answer)).await
            }
            Signal::Answer(answer) => self.connection.set_remote_description(answer).await,
            Signal::IceCandidate(candidate) => self.connection.add_ice_candidate(candidate).await,
        }
    }

    async fn negotiate(&mut self) -> Result<(), TransportError> {
        let offer = self.connection.create_offer().await?;
        debug!(role = ?self.role, "sending offer");
        self.handler.on_signal(Signal::Offer(offer)).await
    }

    async fn on_channel_open(&mut self) -> Result<(), TransportError> {
        if !matches!(self.state, TransportState::Idle | TransportState::Connecting) {
            debug!(state = ?self.state, "ignoring repeated channel open");
            return Ok(());
        }
        self.set_state(TransportState::ChannelOpen).await;
        info!(role = ?self.role, "data channel open");

        if self.role == Role::Initiator {
            self.group.create_group().map_err(HandshakeError::from)?;
            self.send_packet(Packet::plaintext(
                PacketKind::GroupOpen,
                GROUP_OPEN_PAYLOAD.to_vec(),
            ))
            .await?;
            self.set_state(TransportState::Handshaking).await;
        }
        Ok(())
    }

    /// Dispatch one inbound frame.
    pub async fn on_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        // Only the header byte is inspected before the channel is secure.
        let header = *frame.first().ok_or(PacketError::Empty)?;
        let (encrypted, _) = split_header(header);
        if encrypted && self.state != TransportState::Secure {
            return Err(HandshakeError::EncryptedBeforeSecure.into());
        }

        let packet = Packet::decode(frame)?;
        match packet.kind {
            PacketKind::ApplicationMessage if !packet.encrypted => {
                Err(TransportError::PlaintextRejected)
            }
            PacketKind::ApplicationMessage => self.on_sealed(&packet.payload).await,
            kind => self.on_handshake(kind, &packet.payload).await,
        }
    }

    async fn on_sealed(&mut self, ciphertext: &[u8]) -> Result<(), TransportError> {
        let plaintext = self
            .group
            .decrypt(ciphertext)
            .map_err(TransportError::Decrypt)?;
        let message = AppMessage::decode(&plaintext)?;
        self.handler.on_application(message).await;
        Ok(())
    }

    async fn on_handshake(&mut self, kind: PacketKind, payload: &[u8]) -> Result<(), TransportError> {
        let unexpected = HandshakeError::UnexpectedPacket {
            kind,
            state: self.state,
        };
        match (kind, self.role, self.state) {
            (PacketKind::GroupOpen, Role::Responder, TransportState::ChannelOpen) => {
                let key_package = self.group.key_package().map_err(HandshakeError::from)?;
                self.send_packet(Packet::plaintext(PacketKind::KeyPackage, key_package))
                    .await?;
                debug!("sent key package");
                self.set_state(TransportState::Handshaking).await;
            }
            (PacketKind::KeyPackage, Role::Initiator, TransportState::Handshaking) => {
                let welcome = self
                    .group
                    .add_member(payload)
                    .map_err(HandshakeError::from)?;
                self.send_packet(Packet::plaintext(PacketKind::Welcome, welcome))
                    .await?;
                debug!("sent welcome");
                self.set_state(TransportState::Secure).await;
            }
            (PacketKind::Welcome, Role::Responder, TransportState::Handshaking) => {
                self.group.join_group(payload).map_err(HandshakeError::from)?;
                if !self.group.is_secure() {
                    return Err(unexpected.into());
                }
                self.set_state(TransportState::Secure).await;
            }
            _ => return Err(unexpected.into()),
        }
        Ok(())
    }

    async fn send_application(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.state != TransportState::Secure {
            return Err(TransportError::NotSecure);
        }
        let sealed = self.group.encrypt(bytes).map_err(TransportError::Encrypt)?;
        self.send_packet(Packet::sealed(sealed)).await
    }

    async fn send_packet(&mut self, packet: Packet) -> Result<(), TransportError> {
        self.connection.send(packet.encode()).await
    }

    async fn set_state(&mut self, state: TransportState) {
        if self.state == state {
            return;
        }
        debug!(role = ?self.role, from = ?self.state, to = ?state, "transport state");
        self.state = state;
        self.inbox.state.send_replace(state);
        if state == TransportState::Secure {
            info!(role = ?self.role, "channel secure");
        }
        self.handler.on_state_change(state).await;
    }

    /// Tear down the connection. Idempotent.
    pub async fn close(&mut self, reason: Option<String>) {
        if self.state == TransportState::Closed {
            return;
        }
        self.set_state(TransportState::Closed).await;
        self.inbox.cancel.cancel();
        self.inbox.events.close();
        self.connection.close().await;
        info!(role = ?self.role, reason = reason.as_deref().unwrap_or("local"), "transport closed");
        self.handler.on_closed(reason).await;
    }
}
