//! Offer/answer signaling
//!
//! Two flows end in a registered [`ViewerSession`] with one outbound video
//! track whose codec is forced to the configured codec:
//! - the viewer offers and the engine's answer is returned directly
//! - the viewer sends a `request`, gets a server offer tagged with the
//!   session ID, and posts its answer back with that ID

use super::keyframe::KeyFrameCoordinator;
use super::queue::FrameQueue;
use super::registry::SessionRegistry;
use super::session::{SessionState, ViewerSession};
use super::StreamError;
use crate::config::{QueueConfig, VideoCodec, WebRTCConfig};
use crate::transport::{
    ConnectionState, MediaKind, PeerSession, SenderHandle, TransportEngine, TransportError,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Signaling payload: `{"sdp": "...", "type": "offer"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: SdpType::Answer,
        }
    }

    /// Parse a signaling payload from JSON
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        serde_json::from_str(json)
            .map_err(|e| StreamError::MalformedOffer(format!("Invalid session description: {}", e)))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, StreamError> {
        serde_json::to_string(self)
            .map_err(|e| StreamError::Transport(format!("Failed to serialize description: {}", e)))
    }

    /// Check the type and that the body looks like SDP
    fn validate(&self, expected: SdpType) -> Result<(), StreamError> {
        if self.sdp_type != expected {
            return Err(StreamError::MalformedOffer(format!(
                "expected an {}, got {}",
                expected, self.sdp_type
            )));
        }
        if !self.sdp.trim_start().starts_with("v=") {
            return Err(StreamError::MalformedOffer(
                "SDP must start with a version line".to_string(),
            ));
        }
        Ok(())
    }
}

/// Message posted to the signaling endpoint, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Ask the server to open the exchange with its own offer
    Request,
    /// Viewer offer, answered in the response
    Offer { sdp: String },
    /// Viewer answer to a server offer
    Answer { id: String, sdp: String },
}

impl SignalingMessage {
    pub fn from_json(json: &str) -> Result<Self, StreamError> {
        serde_json::from_str(json)
            .map_err(|e| StreamError::MalformedOffer(format!("Invalid signaling message: {}", e)))
    }
}

/// Server offer returned for a `request`: `{"id": ..., "sdp": ..., "type": "offer"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerOffer {
    pub id: String,
    #[serde(flatten)]
    pub description: SessionDescription,
}

impl ServerOffer {
    pub fn to_json(&self) -> Result<String, StreamError> {
        serde_json::to_string(self)
            .map_err(|e| StreamError::Transport(format!("Failed to serialize offer: {}", e)))
    }
}

fn negotiation(step: &str, e: TransportError) -> StreamError {
    StreamError::Negotiation(format!("{}: {}", step, e))
}

/// Entry point for viewer signaling
pub struct SignalingHandler {
    engine: Arc<dyn TransportEngine>,
    registry: Arc<SessionRegistry>,
    keyframes: Arc<KeyFrameCoordinator>,
    codec: VideoCodec,
    max_sessions: usize,
    queue_config: QueueConfig,
}

impl SignalingHandler {
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        registry: Arc<SessionRegistry>,
        keyframes: Arc<KeyFrameCoordinator>,
        config: &WebRTCConfig,
        queue_config: QueueConfig,
    ) -> Self {
        Self {
            engine,
            registry,
            keyframes,
            codec: config.video_codec,
            max_sessions: config.max_sessions,
            queue_config,
        }
    }

    /// Codec every viewer is negotiated onto
    pub fn codec(&self) -> VideoCodec {
        self.codec
    }

    /// Handle an offer and produce the answer
    ///
    /// The session is registered and a key frame requested before
    /// negotiation completes. If negotiation fails the session is removed
    /// and closed again, so a rejected offer never stays registered.
    pub async fn handle_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, StreamError> {
        offer.validate(SdpType::Offer)?;
        let session = self.open_session().await?;

        match negotiate(session.peer().as_ref(), offer).await {
            Ok(answer) => {
                debug!("Session {} answered with {}", session.id(), self.codec);
                Ok(answer)
            }
            Err(e) => {
                warn!("Session {} negotiation failed: {}", session.id(), e);
                self.abandon(&session).await;
                Err(e)
            }
        }
    }

    /// Open a session on the server's initiative and return its offer
    ///
    /// The session stays registered until its answer arrives through
    /// [`handle_answer`](Self::handle_answer) or the transport gives up.
    pub async fn handle_request(&self) -> Result<ServerOffer, StreamError> {
        let session = self.open_session().await?;

        match local_offer(session.peer().as_ref()).await {
            Ok(description) => {
                debug!("Session {} offered {}", session.id(), self.codec);
                Ok(ServerOffer {
                    id: session.id().to_string(),
                    description,
                })
            }
            Err(e) => {
                warn!("Session {} could not create an offer: {}", session.id(), e);
                self.abandon(&session).await;
                Err(e)
            }
        }
    }

    /// Apply a viewer's answer to the server offer of session `session_id`
    pub async fn handle_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), StreamError> {
        answer.validate(SdpType::Answer)?;
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| StreamError::UnknownSession(session_id.to_string()))?;
        info!("Session {} answer received", session_id);

        if let Err(e) = session.peer().set_remote_description(answer).await {
            let e = negotiation("set remote description", e);
            warn!("Session {} rejected the answer: {}", session_id, e);
            self.abandon(&session).await;
            return Err(e);
        }

        // Media starts flowing now; give the viewer a fresh key frame
        self.keyframes.request_key_frame();
        Ok(())
    }

    /// Create, wire and register a session with its video track
    async fn open_session(&self) -> Result<Arc<ViewerSession>, StreamError> {
        let peer = self
            .engine
            .create_session()
            .await
            .map_err(|e| negotiation("create session", e))?;
        let queue = Arc::new(FrameQueue::new(&self.queue_config));
        let session_id = format!("rtc-{}", Uuid::new_v4().simple());
        let session = Arc::new(ViewerSession::new(session_id.clone(), peer.clone(), queue.clone()));
        self.watch_connection_state(&session);

        let sender = match self.attach_video(peer.as_ref(), queue).await {
            Ok(sender) => sender,
            Err(e) => {
                discard(&session).await;
                return Err(e);
            }
        };
        session.attach_video_track(sender);

        if let Err(e) = self.registry.try_add(session.clone(), self.max_sessions) {
            warn!("Rejecting session {}: {}", session_id, e);
            discard(&session).await;
            return Err(e);
        }

        // A failure reported before registration had nothing to remove
        let state = session.state();
        if state.is_terminal() {
            warn!("Session {} reached {:?} during setup", session_id, state);
            self.abandon(&session).await;
            return Err(StreamError::Negotiation(format!(
                "session {} reached {:?} during setup",
                session_id, state
            )));
        }

        info!(
            "Session {} created ({} sessions live)",
            session_id,
            self.registry.len()
        );
        self.keyframes.request_key_frame();
        Ok(session)
    }

    /// Deregister and close a session that failed after registration
    async fn abandon(&self, session: &ViewerSession) {
        self.registry.remove(session.id());
        discard(session).await;
    }

    /// Add the outbound video track and pin its codec
    async fn attach_video(
        &self,
        peer: &dyn PeerSession,
        queue: Arc<FrameQueue>,
    ) -> Result<SenderHandle, StreamError> {
        let sender = peer
            .add_video_track(queue)
            .await
            .map_err(|e| negotiation("add video track", e))?;
        self.force_codec(peer, &sender).await?;
        Ok(sender)
    }

    /// Restrict the track's transceiver to the configured codec
    async fn force_codec(&self, peer: &dyn PeerSession, sender: &SenderHandle) -> Result<(), StreamError> {
        let mime_type = self.codec.mime_type();
        let codecs: Vec<_> = self
            .engine
            .codec_capabilities(MediaKind::Video)
            .into_iter()
            .filter(|codec| codec.mime_type == mime_type)
            .collect();
        if codecs.is_empty() {
            return Err(StreamError::Negotiation(format!(
                "engine does not support {}",
                mime_type
            )));
        }

        let transceiver = peer
            .transceivers()
            .await
            .into_iter()
            .find(|t| t.is_sender(sender))
            .ok_or_else(|| {
                StreamError::Negotiation(format!("no transceiver for track {}", sender.track_id))
            })?;

        peer.set_codec_preferences(transceiver.index, codecs)
            .await
            .map_err(|e| negotiation("set codec preferences", e))
    }

    /// Deregister and close the session once the transport gives up on it
    fn watch_connection_state(&self, session: &Arc<ViewerSession>) {
        let weak: Weak<ViewerSession> = Arc::downgrade(session);
        let registry = self.registry.clone();

        session.peer().on_connection_state_change(Box::new(move |state| {
            let weak = weak.clone();
            let registry = registry.clone();
            Box::pin(async move {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                info!("Session {} connection state: {:?}", session.id(), state);

                match state {
                    ConnectionState::Failed | ConnectionState::Closed => {
                        session.set_state(SessionState::from(state));
                        if let Some(session) = registry.remove(session.id()) {
                            if state == ConnectionState::Failed {
                                warn!("Session {} failed, removing", session.id());
                            }
                            if let Err(e) = session.close().await {
                                warn!("{}", e);
                            }
                        }
                    }
                    other => session.set_state(SessionState::from(other)),
                }
            })
        }));
    }
}

/// Offer/answer exchange against the engine
async fn negotiate(
    peer: &dyn PeerSession,
    offer: SessionDescription,
) -> Result<SessionDescription, StreamError> {
    peer.set_remote_description(offer)
        .await
        .map_err(|e| negotiation("set remote description", e))?;
    let answer = peer
        .create_answer()
        .await
        .map_err(|e| negotiation("create answer", e))?;
    peer.set_local_description(answer.clone())
        .await
        .map_err(|e| negotiation("set local description", e))?;

    // The local description carries the gathered candidates when available.
    Ok(peer.local_description().await.unwrap_or(answer))
}

/// Server-side offer with gathered candidates
async fn local_offer(peer: &dyn PeerSession) -> Result<SessionDescription, StreamError> {
    let offer = peer
        .create_offer()
        .await
        .map_err(|e| negotiation("create offer", e))?;
    peer.set_local_description(offer.clone())
        .await
        .map_err(|e| negotiation("set local description", e))?;

    Ok(peer.local_description().await.unwrap_or(offer))
}

/// Close a session that never made it into service
async fn discard(session: &ViewerSession) {
    if let Err(e) = session.close().await {
        warn!("{}", e);
    }
}
