//! In-memory transport engine for tests

use super::{
    CodecCapability, ConnectionState, ConnectionStateHandler, MediaKind, PeerSession,
    SenderHandle, TransceiverInfo, TransportEngine, TransportError,
};
use crate::config::VideoCodec;
use crate::stream::{FrameQueue, SessionDescription, ViewerSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct MockEngine {
    codecs: Vec<CodecCapability>,
    reject_offers: AtomicBool,
    fail_during_setup: AtomicBool,
    close_delay: Mutex<Duration>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self::with_codecs(VideoCodec::all().into_iter().map(CodecCapability::video).collect())
    }

    pub(crate) fn with_codecs(codecs: Vec<CodecCapability>) -> Self {
        Self {
            codecs,
            reject_offers: AtomicBool::new(false),
            fail_during_setup: AtomicBool::new(false),
            close_delay: Mutex::new(Duration::ZERO),
            peers: Mutex::new(Vec::new()),
        }
    }

    /// Make every later session reject the remote description
    pub(crate) fn reject_offers(&self, reject: bool) {
        self.reject_offers.store(reject, Ordering::SeqCst);
    }

    /// Make every later session report `Failed` while its codec is pinned
    pub(crate) fn fail_during_setup(&self, fail: bool) {
        self.fail_during_setup.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub(crate) fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub(crate) fn last_peer(&self) -> Option<Arc<MockPeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>, TransportError> {
        let mut peer = MockPeer::new(
            *self.close_delay.lock(),
            self.reject_offers.load(Ordering::SeqCst),
        );
        peer.fail_during_setup = self.fail_during_setup.load(Ordering::SeqCst);
        let peer = Arc::new(peer);
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }

    fn codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability> {
        self.codecs
            .iter()
            .filter(|codec| codec.kind() == Some(kind))
            .cloned()
            .collect()
    }
}

pub(crate) struct MockPeer {
    reject_offer: bool,
    fail_during_setup: bool,
    close_delay: Mutex<Duration>,
    closes: AtomicUsize,
    state: Mutex<ConnectionState>,
    handler: Mutex<Option<Arc<ConnectionStateHandler>>>,
    tracks: Mutex<Vec<(SenderHandle, Arc<FrameQueue>)>>,
    preferences: Mutex<Vec<(usize, Vec<CodecCapability>)>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
}

impl MockPeer {
    pub(crate) fn new(close_delay: Duration, reject_offer: bool) -> Self {
        Self {
            reject_offer,
            fail_during_setup: false,
            close_delay: Mutex::new(close_delay),
            closes: AtomicUsize::new(0),
            state: Mutex::new(ConnectionState::New),
            handler: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            preferences: Mutex::new(Vec::new()),
            remote: Mutex::new(None),
            local: Mutex::new(None),
        }
    }

    pub(crate) fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock() = delay;
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Codec preferences installed so far, by transceiver index
    pub(crate) fn codec_preferences(&self) -> Vec<(usize, Vec<CodecCapability>)> {
        self.preferences.lock().clone()
    }

    pub(crate) fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    /// Report a connection state change the way the engine would
    pub(crate) async fn emit(&self, state: ConnectionState) {
        *self.state.lock() = state;
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(state).await;
        }
    }
}

#[async_trait]
impl PeerSession for MockPeer {
    async fn add_video_track(&self, queue: Arc<FrameQueue>) -> Result<SenderHandle, TransportError> {
        let mut tracks = self.tracks.lock();
        let sender = SenderHandle::new(format!("video-{}", tracks.len()));
        tracks.push((sender.clone(), queue));
        Ok(sender)
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        // Index 0 stands in for the receive-only audio line of a browser offer.
        let mut transceivers = vec![TransceiverInfo {
            index: 0,
            kind: MediaKind::Audio,
            sender_track_id: None,
        }];
        for (i, (sender, _)) in self.tracks.lock().iter().enumerate() {
            transceivers.push(TransceiverInfo {
                index: i + 1,
                kind: MediaKind::Video,
                sender_track_id: Some(sender.track_id.clone()),
            });
        }
        transceivers
    }

    async fn set_codec_preferences(
        &self,
        transceiver: usize,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), TransportError> {
        if transceiver > self.tracks.lock().len() {
            return Err(TransportError::new("no such transceiver"));
        }
        self.preferences.lock().push((transceiver, codecs));
        if self.fail_during_setup {
            self.emit(ConnectionState::Failed).await;
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        if self.reject_offer {
            return Err(TransportError::new("description rejected by mock engine"));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if self.tracks.lock().is_empty() {
            return Err(TransportError::new("nothing to offer"));
        }
        Ok(SessionDescription::offer(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n",
        ))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if self.remote.lock().is_none() {
            return Err(TransportError::new("no remote description"));
        }
        Ok(SessionDescription::answer(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=mock\r\nt=0 0\r\n",
        ))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    fn on_connection_state_change(&self, handler: ConnectionStateHandler) {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn close(&self) -> Result<(), TransportError> {
        let delay = *self.close_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionState::Closed).await;
        Ok(())
    }
}

/// A session with an attached video track on a fresh mock peer
pub(crate) async fn test_session(id: &str) -> (Arc<ViewerSession>, Arc<MockPeer>) {
    let peer = Arc::new(MockPeer::new(Duration::ZERO, false));
    let queue = Arc::new(FrameQueue::unbounded());
    let sender = peer
        .add_video_track(queue.clone())
        .await
        .expect("mock track");
    let session = Arc::new(ViewerSession::new(id.to_string(), peer.clone(), queue));
    session.attach_video_track(sender);
    (session, peer)
}
