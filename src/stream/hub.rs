//! Stream hub
//!
//! Owns the process-wide stream state and exposes the two faces of the core:
//! the signaling side used by the HTTP layer and the producer side used by
//! the packet source.

use super::fanout::Broadcaster;
use super::keyframe::KeyFrameCoordinator;
use super::registry::SessionRegistry;
use super::signaling::{ServerOffer, SessionDescription, SignalingHandler};
use super::StreamError;
use crate::config::Config;
use crate::transport::TransportEngine;
use bytes::Bytes;
use log::info;
use std::sync::Arc;

pub struct StreamHub {
    registry: Arc<SessionRegistry>,
    keyframes: Arc<KeyFrameCoordinator>,
    broadcaster: Broadcaster,
    signaling: SignalingHandler,
}

impl StreamHub {
    /// Create the hub
    ///
    /// `keyframes` is shared with the engine so viewer-side picture loss
    /// reports reach the producer through the same flag.
    pub fn new(
        engine: Arc<dyn TransportEngine>,
        keyframes: Arc<KeyFrameCoordinator>,
        config: &Config,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(registry.clone());
        let signaling = SignalingHandler::new(
            engine,
            registry.clone(),
            keyframes.clone(),
            &config.webrtc,
            config.queue,
        );

        Self {
            registry,
            keyframes,
            broadcaster,
            signaling,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn keyframes(&self) -> &Arc<KeyFrameCoordinator> {
        &self.keyframes
    }

    /// Accept a viewer's offer
    pub async fn handle_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, StreamError> {
        self.signaling.handle_offer(offer).await
    }

    /// Open a session with a server offer
    pub async fn handle_request(&self) -> Result<ServerOffer, StreamError> {
        self.signaling.handle_request().await
    }

    /// Complete a server-offered session with the viewer's answer
    pub async fn handle_answer(
        &self,
        session_id: &str,
        answer: SessionDescription,
    ) -> Result<(), StreamError> {
        self.signaling.handle_answer(session_id, answer).await
    }

    /// Fan one encoded packet out to every viewer
    pub fn push_packet(&self, data: impl Into<Bytes>) -> usize {
        self.broadcaster.push_packet(data)
    }

    pub fn wants_frame(&self) -> bool {
        self.broadcaster.wants_frame()
    }

    /// Read and clear the pending key frame request
    pub fn consume_key_frame_request(&self) -> bool {
        self.keyframes.consume_key_frame_request()
    }

    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Close every viewer before the process exits
    pub async fn shutdown_all(&self) {
        info!("Shutting down {} sessions", self.registry.len());
        self.registry.shutdown_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::SessionState;
    use crate::transport::mock::MockEngine;
    use crate::transport::ConnectionState;
    use std::time::Duration;

    const OFFER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n";

    fn hub() -> (StreamHub, Arc<MockEngine>) {
        let engine = Arc::new(MockEngine::new());
        let hub = StreamHub::new(
            engine.clone(),
            Arc::new(KeyFrameCoordinator::new()),
            &Config::default(),
        );
        (hub, engine)
    }

    #[tokio::test]
    async fn test_two_viewers_then_one_fails() {
        let (hub, engine) = hub();
        assert!(!hub.wants_frame());

        let answer = hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        assert!(answer.to_json().unwrap().contains(r#""type":"answer""#));
        assert_eq!(hub.session_count(), 1);
        assert!(hub.consume_key_frame_request());
        let a_peer = engine.last_peer().unwrap();
        let a = hub.registry().snapshot()[0].clone();

        hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        assert_eq!(hub.session_count(), 2);
        assert!(hub.consume_key_frame_request());
        assert!(!hub.consume_key_frame_request());
        let b = hub
            .registry()
            .snapshot()
            .into_iter()
            .find(|s| s.id() != a.id())
            .unwrap();

        assert!(hub.wants_frame());
        hub.push_packet(Bytes::from_static(b"p0"));
        hub.push_packet(Bytes::from_static(b"p1"));
        for session in [&a, &b] {
            let p0 = session.queue().dequeue().await.unwrap();
            let p1 = session.queue().dequeue().await.unwrap();
            assert_eq!((&p0.data[..], p0.pts), (&b"p0"[..], 0));
            assert_eq!((&p1.data[..], p1.pts), (&b"p1"[..], 1));
        }

        a_peer.emit(ConnectionState::Failed).await;
        assert_eq!(hub.session_count(), 1);

        assert_eq!(hub.push_packet(Bytes::from_static(b"p2")), 1);
        assert!(a.queue().dequeue().await.is_none());
        let p2 = b.queue().dequeue().await.unwrap();
        assert_eq!((&p2.data[..], p2.pts), (&b"p2"[..], 2));
    }

    #[tokio::test]
    async fn test_both_signaling_flows_share_the_fan_out() {
        let (hub, _engine) = hub();
        hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        let offer = hub.handle_request().await.unwrap();
        hub.handle_answer(&offer.id, SessionDescription::answer(OFFER_SDP))
            .await
            .unwrap();
        assert_eq!(hub.session_count(), 2);

        assert_eq!(hub.push_packet(Bytes::from_static(b"p0")), 2);
        let requested = hub.registry().get(&offer.id).unwrap();
        let p0 = requested.queue().dequeue().await.unwrap();
        assert_eq!((&p0.data[..], p0.pts), (&b"p0"[..], 0));
    }

    #[tokio::test]
    async fn test_shutdown_with_two_viewers() {
        let (hub, engine) = hub();
        engine.set_close_delay(Duration::from_millis(50));
        hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        let sessions = hub.registry().snapshot();

        hub.shutdown_all().await;

        assert_eq!(hub.session_count(), 0);
        assert!(!hub.wants_frame());
        for session in sessions {
            assert_eq!(session.state(), SessionState::Closed);
            assert!(session.queue().is_closed());
        }
        for peer in engine.peers() {
            assert_eq!(peer.close_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_closed_session_no_longer_receives() {
        let (hub, _engine) = hub();
        hub.handle_offer(SessionDescription::offer(OFFER_SDP)).await.unwrap();
        let session = hub.registry().snapshot()[0].clone();

        hub.registry().remove(session.id());
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(hub.push_packet(Bytes::from_static(b"late")), 0);
        assert!(session.queue().is_empty());
        assert!(!hub.wants_frame());
    }
}
