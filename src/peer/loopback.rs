//! In-process [`PeerConnection`] pair.
//!
//! Stands in for a WebRTC connection: descriptions are opaque JSON, the data
//! channel opens on both ends once each side has applied a local and a remote
//! description, and frames are handed to the other transport's queue in order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::peer::error::TransportError;
use crate::peer::transport::{PeerConnection, TransportEvent, TransportHandle};

#[derive(Default)]
struct LinkState {
    channel_requested: bool,
    local_set: [bool; 2],
    remote_set: [bool; 2],
    open: bool,
    closed: bool,
}

struct Link {
    handles: [TransportHandle; 2],
    state: Mutex<LinkState>,
    offers: AtomicUsize,
}

impl Link {
    fn state(&self) -> std::sync::MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_open(&self) {
        let mut state = self.state();
        let ready = state.channel_requested
            && state.local_set.iter().all(|set| *set)
            && state.remote_set.iter().all(|set| *set);
        if ready && !state.open && !state.closed {
            state.open = true;
            drop(state);
            for handle in &self.handles {
                handle.push(TransportEvent::ChannelOpen);
            }
        }
    }
}

pub struct LoopbackConnection {
    side: usize,
    link: Arc<Link>,
    muted: AtomicBool,
}

/// Connect the transports behind `a` and `b`.
pub fn pair(a: TransportHandle, b: TransportHandle) -> (LoopbackConnection, LoopbackConnection) {
    let link = Arc::new(Link {
        handles: [a, b],
        state: Mutex::new(LinkState::default()),
        offers: AtomicUsize::new(0),
    });
    let side = |side| LoopbackConnection {
        side,
        link: link.clone(),
        muted: AtomicBool::new(false),
    };
    (side(0), side(1))
}

impl LoopbackConnection {
    fn local(&self) -> &TransportHandle {
        &self.link.handles[self.side]
    }

    fn remote(&self) -> &TransportHandle {
        &self.link.handles[1 - self.side]
    }

    /// Drop outgoing frames while set, like a stalled network.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        let state = self.link.state();
        state.open && !state.closed
    }

    fn description(&self, kind: &str) -> Value {
        let serial = self.link.offers.fetch_add(1, Ordering::SeqCst);
        json!({ "type": kind, "sdp": format!("loopback-{}-{serial}", self.side) })
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_data_channel(&self) -> Result<(), TransportError> {
        self.link.state().channel_requested = true;
        self.local().push(TransportEvent::NegotiationNeeded);
        Ok(())
    }

    async fn create_offer(&self) -> Result<Value, TransportError> {
        let offer = self.description("offer");
        self.link.state().local_set[self.side] = true;
        self.link.maybe_open();
        Ok(offer)
    }

    async fn create_answer(&self) -> Result<Value, TransportError> {
        if !self.link.state().remote_set[self.side] {
            return Err(TransportError::Connection(
                "answer requested without a remote offer".into(),
            ));
        }
        let answer = self.description("answer");
        self.link.state().local_set[self.side] = true;
        self.link.maybe_open();
        Ok(answer)
    }

    async fn set_remote_description(&self, description: Value) -> Result<(), TransportError> {
        if description.get("sdp").is_none() {
            return Err(TransportError::Connection(
                "session description without sdp".into(),
            ));
        }
        self.link.state().remote_set[self.side] = true;
        self.link.maybe_open();
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: Value) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        if self.muted.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.remote().push(TransportEvent::Frame(frame)) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }

    async fn close(&self) {
        let was_open = {
            let mut state = self.link.state();
            let was_open = state.open && !state.closed;
            state.closed = true;
            was_open
        };
        if was_open {
            self.remote().push(TransportEvent::ConnectionFailed(
                "remote peer closed the connection".into(),
            ));
        }
    }
}
