//! Chunked, acknowledged file transfer over application messages.
//!
//! The sender streams one request at a time per task: read a chunk, send it,
//! wait for its `FileAck`, repeat, and finish with `FileDone`. Missing an ack
//! for longer than the idle timeout aborts the transfer for good. The
//! receiver opens its output lazily on the first chunk and acks every chunk
//! once it is written.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::peer::error::{FileTransferError, TransportError};
use crate::peer::message::{AppMessage, FileOffer};
use crate::peer::transport::TransportHandle;
use crate::peer::PeerConfig;

pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Where outbound application messages go.
pub trait MessageSink: Send + Sync + 'static {
    fn send_message(&self, message: &AppMessage) -> Result<(), TransportError>;
}

impl MessageSink for TransportHandle {
    fn send_message(&self, message: &AppMessage) -> Result<(), TransportError> {
        self.send(message)
    }
}

/// Content behind an advertised offer. Opened once per request.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn open(&self) -> io::Result<FileReader>;
}

/// Creates the output for an incoming file.
#[async_trait]
pub trait SinkOpener: Send + Sync {
    async fn open(&self, offer: &FileOffer) -> io::Result<FileWriter>;
}

pub struct DiskFile {
    path: PathBuf,
}

impl DiskFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl FileSource for DiskFile {
    async fn open(&self) -> io::Result<FileReader> {
        Ok(Box::new(tokio::fs::File::open(&self.path).await?))
    }
}

pub struct MemoryFile {
    bytes: Arc<[u8]>,
}

impl MemoryFile {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[async_trait]
impl FileSource for MemoryFile {
    async fn open(&self) -> io::Result<FileReader> {
        Ok(Box::new(io::Cursor::new(self.bytes.clone())))
    }
}

/// Saves incoming files under one directory.
pub struct DownloadDir {
    root: PathBuf,
}

impl DownloadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Target path for `name`, stripped of any directory components.
    pub fn path_for(&self, name: &str) -> PathBuf {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "download".into());
        self.root.join(file_name)
    }
}

#[async_trait]
impl SinkOpener for DownloadDir {
    async fn open(&self, offer: &FileOffer) -> io::Result<FileWriter> {
        tokio::fs::create_dir_all(&self.root).await?;
        let file = tokio::fs::File::create(self.path_for(&offer.name)).await?;
        Ok(Box::new(file))
    }
}

/// Keeps received files in memory, keyed by name.
#[derive(Clone, Default)]
pub struct MemorySink {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemorySink {
    pub fn file(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl SinkOpener for MemorySink {
    async fn open(&self, offer: &FileOffer) -> io::Result<FileWriter> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(offer.name.clone(), Vec::new());
        Ok(Box::new(MemoryWriter {
            name: offer.name.clone(),
            files: self.files.clone(),
        }))
    }
}

struct MemoryWriter {
    name: String,
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }
}

/// Outcome notifications for finished transfers.
#[derive(Debug)]
pub enum TransferEvent {
    Sent {
        request_id: u64,
        bytes: u64,
    },
    Received {
        request_id: u64,
        offer: FileOffer,
        bytes: u64,
    },
    Aborted {
        request_id: u64,
        error: FileTransferError,
    },
}

struct Advertised {
    offer: FileOffer,
    source: Arc<dyn FileSource>,
}

struct Incoming {
    offer: FileOffer,
    writer: Option<FileWriter>,
    received: u64,
}

#[derive(Default)]
struct Tables {
    advertised: HashMap<u64, Advertised>,
    /// Ack channel of every running sender task.
    outgoing: HashMap<u64, mpsc::UnboundedSender<()>>,
    offers: HashMap<u64, FileOffer>,
    incoming: HashMap<u64, Incoming>,
}

pub struct FileTransfers {
    sink: Arc<dyn MessageSink>,
    opener: Arc<dyn SinkOpener>,
    config: PeerConfig,
    cancel: CancellationToken,
    tables: Arc<Mutex<Tables>>,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl FileTransfers {
    /// `cancel` should be a child of the transport's token so that closing
    /// the connection stops every sender.
    pub fn new(
        sink: Arc<dyn MessageSink>,
        opener: Arc<dyn SinkOpener>,
        config: PeerConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<TransferEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let transfers = Self {
            sink,
            opener,
            config,
            cancel,
            tables: Arc::default(),
            events,
        };
        (transfers, events_rx)
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn active_sends(&self) -> usize {
        self.tables().outgoing.len()
    }

    pub fn active_receives(&self) -> usize {
        self.tables().incoming.len()
    }

    /// Offers advertised by the peer.
    pub fn received_offers(&self) -> Vec<FileOffer> {
        self.tables().offers.values().cloned().collect()
    }

    /// Advertise `source` to the peer.
    pub fn offer(
        &self,
        name: impl Into<String>,
        size: u64,
        preview: Option<String>,
        source: Arc<dyn FileSource>,
    ) -> Result<FileOffer, FileTransferError> {
        let offer = FileOffer {
            id: rand::random(),
            name: name.into(),
            size,
            preview,
        };
        self.sink
            .send_message(&AppMessage::FileOffer(offer.clone()))?;
        self.tables().advertised.insert(
            offer.id,
            Advertised {
                offer: offer.clone(),
                source,
            },
        );
        info!(offer = offer.id, name = %offer.name, size, "offered file");
        Ok(offer)
    }

    /// Start streaming an advertised file for `request_id`.
    pub async fn handle_request(
        &self,
        offer_id: u64,
        request_id: u64,
    ) -> Result<(), FileTransferError> {
        let (offer, source) = {
            let tables = self.tables();
            if tables.outgoing.contains_key(&request_id) {
                debug!(request = request_id, "duplicate file request");
                return Ok(());
            }
            let advertised = tables
                .advertised
                .get(&offer_id)
                .ok_or(FileTransferError::UnknownOffer(offer_id))?;
            (advertised.offer.clone(), advertised.source.clone())
        };

        let reader = source.open().await?;
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        self.tables().outgoing.insert(request_id, acks_tx);
        info!(request = request_id, name = %offer.name, "sending file");

        let sender = ChunkSender {
            request_id,
            reader,
            sink: self.sink.clone(),
            acks: acks_rx,
            chunk_size: self.config.chunk_size.max(1),
            idle_timeout: self.config.idle_timeout,
            cancel: self.cancel.child_token(),
        };
        let tables = self.tables.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let outcome = sender.run().await;
            tables
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .outgoing
                .remove(&request_id);
            let event = match outcome {
                Ok(bytes) => {
                    info!(request = request_id, bytes, "file sent");
                    TransferEvent::Sent { request_id, bytes }
                }
                Err(error) => {
                    warn!(request = request_id, "file transfer aborted: {error}");
                    TransferEvent::Aborted { request_id, error }
                }
            };
            let _ = events.send(event);
        });
        Ok(())
    }

    pub fn handle_ack(&self, request_id: u64) -> Result<(), FileTransferError> {
        let tables = self.tables();
        let acks = tables
            .outgoing
            .get(&request_id)
            .ok_or(FileTransferError::UnknownRequest(request_id))?;
        acks.send(())
            .map_err(|_| FileTransferError::UnknownRequest(request_id))
    }

    pub fn handle_offer(&self, offer: FileOffer) {
        debug!(offer = offer.id, name = %offer.name, size = offer.size, "peer offered file");
        self.tables().offers.insert(offer.id, offer);
    }

    /// Ask the peer for one of its offers. Returns the new request id.
    pub fn request(&self, offer_id: u64) -> Result<u64, FileTransferError> {
        let offer = self
            .tables()
            .offers
            .get(&offer_id)
            .cloned()
            .ok_or(FileTransferError::UnknownOffer(offer_id))?;
        let request_id: u64 = rand::random();
        self.tables().incoming.insert(
            request_id,
            Incoming {
                offer,
                writer: None,
                received: 0,
            },
        );
        if let Err(e) = self.sink.send_message(&AppMessage::FileRequest {
            offer_id,
            request_id,
        }) {
            self.tables().incoming.remove(&request_id);
            return Err(e.into());
        }
        Ok(request_id)
    }

    pub async fn handle_chunk(&self, request_id: u64, data: &[u8]) -> Result<(), FileTransferError> {
        let mut incoming = self
            .tables()
            .incoming
            .remove(&request_id)
            .ok_or(FileTransferError::UnknownRequest(request_id))?;

        match self.append(&mut incoming, data).await {
            Ok(()) => {
                self.tables().incoming.insert(request_id, incoming);
                self.sink
                    .send_message(&AppMessage::FileAck { request_id })?;
                Ok(())
            }
            Err(e) => {
                warn!(request = request_id, "failed to store chunk: {e}");
                let _ = self.events.send(TransferEvent::Aborted {
                    request_id,
                    error: FileTransferError::Io(io::Error::new(e.kind(), e.to_string())),
                });
                Err(e.into())
            }
        }
    }

    async fn append(&self, incoming: &mut Incoming, data: &[u8]) -> io::Result<()> {
        let writer = match incoming.writer.take() {
            Some(writer) => writer,
            None => self.opener.open(&incoming.offer).await?,
        };
        incoming.writer.insert(writer).write_all(data).await?;
        incoming.received += data.len() as u64;
        Ok(())
    }

    pub async fn handle_done(&self, request_id: u64) -> Result<(), FileTransferError> {
        let mut incoming = self
            .tables()
            .incoming
            .remove(&request_id)
            .ok_or(FileTransferError::UnknownRequest(request_id))?;

        // Empty files never saw a chunk.
        let mut writer = match incoming.writer.take() {
            Some(writer) => writer,
            None => self.opener.open(&incoming.offer).await?,
        };
        writer.flush().await?;
        writer.shutdown().await?;

        info!(
            request = request_id,
            name = %incoming.offer.name,
            bytes = incoming.received,
            "file received"
        );
        let _ = self.events.send(TransferEvent::Received {
            request_id,
            offer: incoming.offer,
            bytes: incoming.received,
        });
        Ok(())
    }

    /// Route a file-transfer message. Text is ignored.
    pub async fn dispatch(&self, message: AppMessage) -> Result<(), FileTransferError> {
        match message {
            AppMessage::Text(_) => Ok(()),
            AppMessage::FileOffer(offer) => {
                self.handle_offer(offer);
                Ok(())
            }
            AppMessage::FileRequest {
                offer_id,
                request_id,
            } => self.handle_request(offer_id, request_id).await,
            AppMessage::FileChunk { request_id, data } => {
                self.handle_chunk(request_id, &data).await
            }
            AppMessage::FileDone { request_id } => self.handle_done(request_id).await,
            AppMessage::FileAck { request_id } => self.handle_ack(request_id),
        }
    }

    /// Stop every sender and drop partial downloads.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let mut tables = self.tables();
        tables.outgoing.clear();
        tables.incoming.clear();
    }
}

struct ChunkSender {
    request_id: u64,
    reader: FileReader,
    sink: Arc<dyn MessageSink>,
    acks: mpsc::UnboundedReceiver<()>,
    chunk_size: usize,
    idle_timeout: std::time::Duration,
    cancel: CancellationToken,
}

impl ChunkSender {
    async fn run(mut self) -> Result<u64, FileTransferError> {
        let request_id = self.request_id;
        let mut buf = vec![0u8; self.chunk_size];
        let mut sent = 0u64;
        loop {
            let len = self.fill(&mut buf).await?;
            if len == 0 {
                self.sink
                    .send_message(&AppMessage::FileDone { request_id })?;
                return Ok(sent);
            }
            // Acks carry no sequence number; only one sent after this chunk counts.
            while self.acks.try_recv().is_ok() {}
            self.sink.send_message(&AppMessage::FileChunk {
                request_id,
                data: buf[..len].to_vec(),
            })?;
            sent += len as u64;

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(FileTransferError::Cancelled(request_id)),
                ack = tokio::time::timeout(self.idle_timeout, self.acks.recv()) => match ack {
                    Ok(Some(())) => {}
                    Ok(None) => return Err(FileTransferError::Cancelled(request_id)),
                    Err(_) => return Err(FileTransferError::IdleTimeout(request_id)),
                },
            }
        }
    }

    /// Read until `buf` is full or the source ends.
    async fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.reader.read(&mut buf[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<AppMessage>>,
    }

    impl Outbox {
        fn take(&self) -> Vec<AppMessage> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl MessageSink for Outbox {
        fn send_message(&self, message: &AppMessage) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn transfers(chunk_size: usize) -> (FileTransfers, Arc<Outbox>, MemorySink, mpsc::UnboundedReceiver<TransferEvent>) {
        let outbox = Arc::new(Outbox::default());
        let sink = MemorySink::default();
        let config = PeerConfig {
            chunk_size,
            ..PeerConfig::default()
        };
        let (transfers, events) = FileTransfers::new(
            outbox.clone(),
            Arc::new(sink.clone()),
            config,
            CancellationToken::new(),
        );
        (transfers, outbox, sink, events)
    }

    #[tokio::test(start_paused = true)]
    async fn one_chunk_in_flight_until_acked() {
        let (transfers, outbox, _, mut events) = transfers(4);
        let offer = transfers
            .offer("a.bin", 10, None, Arc::new(MemoryFile::new(vec![7u8; 10])))
            .unwrap();
        assert!(matches!(outbox.take()[0], AppMessage::FileOffer(_)));

        transfers.handle_request(offer.id, 9).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            outbox.take(),
            vec![AppMessage::FileChunk {
                request_id: 9,
                data: vec![7; 4]
            }]
        );

        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbox.take().len(), 1);

        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            outbox.take(),
            vec![AppMessage::FileChunk {
                request_id: 9,
                data: vec![7; 2]
            }]
        );

        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbox.take(), vec![AppMessage::FileDone { request_id: 9 }]);
        assert!(matches!(
            events.recv().await,
            Some(TransferEvent::Sent {
                request_id: 9,
                bytes: 10
            })
        ));
        assert_eq!(transfers.active_sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ack_releases_only_one_chunk() {
        let (transfers, outbox, _, mut events) = transfers(4);
        let offer = transfers
            .offer("b.bin", 12, None, Arc::new(MemoryFile::new(vec![7u8; 12])))
            .unwrap();
        outbox.take();
        transfers.handle_request(offer.id, 9).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbox.take().len(), 1);

        transfers.handle_ack(9).unwrap();
        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            outbox.take(),
            vec![AppMessage::FileChunk {
                request_id: 9,
                data: vec![7; 4]
            }]
        );

        // The second chunk is still unacknowledged, so nothing else goes out.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(outbox.take().is_empty());
        assert_eq!(transfers.active_sends(), 1);

        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbox.take().len(), 1);
        transfers.handle_ack(9).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(outbox.take(), vec![AppMessage::FileDone { request_id: 9 }]);
        assert!(matches!(
            events.recv().await,
            Some(TransferEvent::Sent {
                request_id: 9,
                bytes: 12
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_ack_aborts_after_idle_timeout() {
        let (transfers, outbox, _, mut events) = transfers(4);
        let offer = transfers
            .offer("a.bin", 12, None, Arc::new(MemoryFile::new(vec![1u8; 12])))
            .unwrap();
        outbox.take();
        transfers.handle_request(offer.id, 5).await.unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(outbox.take().len(), 1);
        assert_eq!(transfers.active_sends(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(
            events.recv().await,
            Some(TransferEvent::Aborted {
                request_id: 5,
                error: FileTransferError::IdleTimeout(5)
            })
        ));
        assert_eq!(transfers.active_sends(), 0);
        assert!(matches!(
            transfers.handle_ack(5),
            Err(FileTransferError::UnknownRequest(5))
        ));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(outbox.take().is_empty());
    }

    #[tokio::test]
    async fn receiver_writes_acks_and_completes() {
        let (transfers, outbox, sink, mut events) = transfers(4);
        transfers.handle_offer(FileOffer {
            id: 3,
            name: "notes.txt".into(),
            size: 5,
            preview: None,
        });
        let request_id = transfers.request(3).unwrap();
        assert_eq!(
            outbox.take(),
            vec![AppMessage::FileRequest {
                offer_id: 3,
                request_id
            }]
        );
        assert_eq!(sink.file("notes.txt"), None);

        transfers.handle_chunk(request_id, b"hel").await.unwrap();
        transfers.handle_chunk(request_id, b"lo").await.unwrap();
        assert_eq!(
            outbox.take(),
            vec![
                AppMessage::FileAck { request_id },
                AppMessage::FileAck { request_id }
            ]
        );
        transfers.handle_done(request_id).await.unwrap();

        assert_eq!(sink.file("notes.txt"), Some(b"hello".to_vec()));
        assert_eq!(transfers.active_receives(), 0);
        match events.recv().await {
            Some(TransferEvent::Received { offer, bytes, .. }) => {
                assert_eq!(offer.id, 3);
                assert_eq!(bytes, 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_rejected() {
        let (transfers, _, _, _) = transfers(4);
        assert!(matches!(
            transfers.request(1),
            Err(FileTransferError::UnknownOffer(1))
        ));
        assert!(matches!(
            transfers.handle_request(1, 2).await,
            Err(FileTransferError::UnknownOffer(1))
        ));
        assert!(matches!(
            transfers.handle_chunk(2, b"x").await,
            Err(FileTransferError::UnknownRequest(2))
        ));
        assert!(matches!(
            transfers.handle_done(2).await,
            Err(FileTransferError::UnknownRequest(2))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_senders() {
        let (transfers, _, _, mut events) = transfers(4);
        let offer = transfers
            .offer("a.bin", 8, None, Arc::new(MemoryFile::new(vec![0u8; 8])))
            .unwrap();
        transfers.handle_request(offer.id, 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        transfers.shutdown();
        assert!(matches!(
            events.recv().await,
            Some(TransferEvent::Aborted {
                request_id: 1,
                error: FileTransferError::Cancelled(1)
            })
        ));
    }

    #[test]
    fn download_paths_drop_directories() {
        let dir = DownloadDir::new("/tmp/in");
        assert_eq!(dir.path_for("../../etc/passwd"), PathBuf::from("/tmp/in/passwd"));
        assert_eq!(dir.path_for(".."), PathBuf::from("/tmp/in/download"));
    }
}
