//! Real-time transport engine seam
//!
//! The stream core drives peer sessions only through these traits. The
//! webrtc-rs backed engine lives in [`webrtc_engine`]; tests use an
//! in-memory engine.

#[cfg(feature = "webrtc-transport")]
pub mod webrtc_engine;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(feature = "webrtc-transport")]
pub use webrtc_engine::WebRtcEngine;

use crate::config::VideoCodec;
use crate::stream::{FrameQueue, SessionDescription};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Error reported by the transport engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for TransportError {}

/// Media kind of a track or transceiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Connection state as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A codec the engine can negotiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
    pub payload_type: u8,
}

impl CodecCapability {
    /// Capability for one of the configured video codecs
    pub fn video(codec: VideoCodec) -> Self {
        Self {
            mime_type: codec.mime_type().to_string(),
            clock_rate: 90_000,
            channels: 0,
            sdp_fmtp_line: codec.sdp_fmtp_line().to_string(),
            payload_type: codec.rtp_payload_type(),
        }
    }

    /// Media kind implied by the mime type prefix
    pub fn kind(&self) -> Option<MediaKind> {
        match self.mime_type.split('/').next() {
            Some("video") => Some(MediaKind::Video),
            Some("audio") => Some(MediaKind::Audio),
            _ => None,
        }
    }
}

/// Identifies the sender created for an outbound track
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderHandle {
    pub track_id: String,
}

impl SenderHandle {
    pub fn new(track_id: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
        }
    }
}

/// Snapshot of one transceiver of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransceiverInfo {
    /// Position in the session's transceiver list
    pub index: usize,
    pub kind: MediaKind,
    /// Track id of the attached sender, if any
    pub sender_track_id: Option<String>,
}

impl TransceiverInfo {
    pub fn is_sender(&self, sender: &SenderHandle) -> bool {
        self.sender_track_id.as_deref() == Some(sender.track_id.as_str())
    }
}

/// Observer for connection state changes
pub type ConnectionStateHandler =
    Box<dyn Fn(ConnectionState) -> BoxFuture<'static, ()> + Send + Sync>;

/// Factory for peer sessions
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Create a new, unnegotiated session
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>, TransportError>;

    /// Codecs the engine advertises for a media kind, in preference order
    fn codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability>;
}

/// One peer-to-peer session owned by the engine
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Add an outbound video track fed from `queue`
    ///
    /// The engine's send loop drains the queue until it reports end-of-stream.
    async fn add_video_track(&self, queue: Arc<FrameQueue>) -> Result<SenderHandle, TransportError>;

    /// List the session's transceivers
    async fn transceivers(&self) -> Vec<TransceiverInfo>;

    /// Replace the codec preference list of a transceiver
    async fn set_codec_preferences(
        &self,
        transceiver: usize,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), TransportError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    /// Create an offer for a session the server initiates
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    /// Register the connection state observer
    fn on_connection_state_change(&self, handler: ConnectionStateHandler);

    fn connection_state(&self) -> ConnectionState;

    /// Release transport resources
    async fn close(&self) -> Result<(), TransportError>;
}
