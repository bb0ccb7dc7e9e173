use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::peer::error::{FileTransferError, TransportError};
use crate::peer::file_transfer::{FileSource, FileTransfers, SinkOpener, TransferEvent};
use crate::peer::message::{AppMessage, FileOffer};
use crate::peer::transport::{PeerEventHandler, Signal, TransportHandle, TransportState};
use crate::peer::PeerConfig;

/// Carries signaling output to the remote peer, usually through the relay.
pub trait SignalSink: Send + Sync {
    fn send_signal(&self, signal: Signal) -> Result<(), TransportError>;
}

/// Hands signals straight to another in-process transport.
impl SignalSink for TransportHandle {
    fn send_signal(&self, signal: Signal) -> Result<(), TransportError> {
        if self.signal(signal) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speaker {
    Local,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatLine {
    pub speaker: Speaker,
    pub text: String,
}

/// Application state on top of one secure transport: chat history and file
/// transfers in both directions.
pub struct PeerSession {
    transport: TransportHandle,
    signals: Arc<dyn SignalSink>,
    files: FileTransfers,
    history: Mutex<Vec<ChatLine>>,
    close_reason: Mutex<Option<String>>,
}

impl PeerSession {
    pub fn new(
        transport: TransportHandle,
        signals: Arc<dyn SignalSink>,
        opener: Arc<dyn SinkOpener>,
        config: PeerConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransferEvent>) {
        let (files, transfers) = FileTransfers::new(
            Arc::new(transport.clone()),
            opener,
            config,
            transport.child_token(),
        );
        let session = Arc::new(Self {
            transport,
            signals,
            files,
            history: Mutex::new(Vec::new()),
            close_reason: Mutex::new(None),
        });
        (session, transfers)
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    pub fn files(&self) -> &FileTransfers {
        &self.files
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let text = text.into();
        self.transport.send(&AppMessage::Text(text.clone()))?;
        self.push_line(Speaker::Local, text);
        Ok(())
    }

    pub fn offer_file(
        &self,
        name: impl Into<String>,
        size: u64,
        preview: Option<String>,
        source: Arc<dyn FileSource>,
    ) -> Result<FileOffer, FileTransferError> {
        self.files.offer(name, size, preview, source)
    }

    pub fn request_file(&self, offer_id: u64) -> Result<u64, FileTransferError> {
        self.files.request(offer_id)
    }

    pub fn received_offers(&self) -> Vec<FileOffer> {
        self.files.received_offers()
    }

    pub fn history(&self) -> Vec<ChatLine> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failure reason once the transport closed abnormally.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push_line(&self, speaker: Speaker, text: String) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ChatLine { speaker, text });
    }
}

#[async_trait]
impl PeerEventHandler for PeerSession {
    async fn on_signal(&self, signal: Signal) -> Result<(), TransportError> {
        self.signals.send_signal(signal)
    }

    async fn on_state_change(&self, state: TransportState) {
        debug!(?state, "session transport state");
    }

    async fn on_application(&self, message: AppMessage) {
        match message {
            AppMessage::Text(text) => self.push_line(Speaker::Remote, text),
            other => {
                if let Err(e) = self.files.dispatch(other).await {
                    warn!("file transfer message dropped: {e}");
                }
            }
        }
    }

    async fn on_closed(&self, reason: Option<String>) {
        self.files.shutdown();
        if let Some(reason) = &reason {
            info!(%reason, "peer session ended");
        }
        *self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason;
    }
}
