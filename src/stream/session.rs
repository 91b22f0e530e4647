//! Viewer session lifecycle
//!
//! A viewer session wraps one transport peer session. It owns the viewer's
//! frame queue and tracks the connection state reported by the engine.

use super::packet::EncodedPacket;
use super::queue::{EnqueueOutcome, FrameQueue};
use super::StreamError;
use crate::transport::{ConnectionState, PeerSession, SenderHandle};
use log::{debug, info};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created, awaiting negotiation
    New,
    /// Connecting (ICE in progress)
    Connecting,
    /// Connected and streaming
    Connected,
    /// Disconnected (can reconnect)
    Disconnected,
    /// Failed (cannot recover)
    Failed,
    /// Closed (terminated)
    Closed,
}

impl SessionState {
    /// Whether the session is finished and will never carry media again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl From<ConnectionState> for SessionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::New => SessionState::New,
            ConnectionState::Connecting => SessionState::Connecting,
            ConnectionState::Connected => SessionState::Connected,
            ConnectionState::Disconnected => SessionState::Disconnected,
            ConnectionState::Failed => SessionState::Failed,
            ConnectionState::Closed => SessionState::Closed,
        }
    }
}

/// A single viewer
pub struct ViewerSession {
    /// Unique session ID
    id: String,
    /// Transport session
    peer: Arc<dyn PeerSession>,
    /// Pending outbound packets, owned by this session
    queue: Arc<FrameQueue>,
    /// Sender of the outbound video track, once attached
    video_sender: RwLock<Option<SenderHandle>>,
    /// Current session state
    state: RwLock<SessionState>,
    /// Set by the first close
    closing: AtomicBool,
    /// Session creation time
    created_at: Instant,
}

impl ViewerSession {
    /// Create a new session
    pub fn new(id: String, peer: Arc<dyn PeerSession>, queue: Arc<FrameQueue>) -> Self {
        Self {
            id,
            peer,
            queue,
            video_sender: RwLock::new(None),
            state: RwLock::new(SessionState::New),
            closing: AtomicBool::new(false),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> &Arc<dyn PeerSession> {
        &self.peer
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    /// Record the sender of the negotiated outbound video track
    pub fn attach_video_track(&self, sender: SenderHandle) {
        *self.video_sender.write() = Some(sender);
    }

    pub fn video_sender(&self) -> Option<SenderHandle> {
        self.video_sender.read().clone()
    }

    pub fn has_video_track(&self) -> bool {
        self.video_sender.read().is_some()
    }

    /// Update session state
    ///
    /// A closed session stays closed.
    pub fn set_state(&self, state: SessionState) {
        let mut current = self.state.write();
        if *current != state && *current != SessionState::Closed {
            debug!("Session {} state change: {:?} -> {:?}", self.id, *current, state);
            *current = state;
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the fan-out should hand this session packets
    pub fn accepts_frames(&self) -> bool {
        self.has_video_track() && !self.state().is_terminal() && !self.queue.is_closed()
    }

    /// Queue a packet for this viewer without blocking
    pub fn enqueue(&self, packet: EncodedPacket) -> EnqueueOutcome {
        self.queue.enqueue(packet)
    }

    /// Get session age
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Close the session
    ///
    /// Marks the queue closed so the send loop sees end-of-stream, then
    /// releases the transport session. Only the first call does any work.
    pub async fn close(&self) -> Result<(), StreamError> {
        if self.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let discarded = self.queue.close();
        self.set_state(SessionState::Closed);

        self.peer
            .close()
            .await
            .map_err(|e| StreamError::Teardown(format!("session {}: {}", self.id, e)))?;

        info!("Session {} closed ({} pending packets discarded)", self.id, discarded);
        Ok(())
    }
}

impl std::fmt::Debug for ViewerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("pending", &self.queue.len())
            .finish()
    }
}
