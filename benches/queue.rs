use async_trait::async_trait;
use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use rtc_fanout::stream::{Broadcaster, EncodedPacket, FrameQueue, TimeBase};
use rtc_fanout::transport::{
    CodecCapability, ConnectionState, ConnectionStateHandler, SenderHandle, TransceiverInfo,
};
use rtc_fanout::{PeerSession, SessionDescription, SessionRegistry, TransportError, ViewerSession};
use std::sync::Arc;

/// Peer that accepts everything and sends nothing
struct NullPeer;

#[async_trait]
impl PeerSession for NullPeer {
    async fn add_video_track(&self, _queue: Arc<FrameQueue>) -> Result<SenderHandle, TransportError> {
        Ok(SenderHandle::new("video"))
    }
    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        Vec::new()
    }
    async fn set_codec_preferences(&self, _: usize, _: Vec<CodecCapability>) -> Result<(), TransportError> {
        Ok(())
    }
    async fn set_remote_description(&self, _: SessionDescription) -> Result<(), TransportError> {
        Ok(())
    }
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0"))
    }
    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::answer("v=0"))
    }
    async fn set_local_description(&self, _: SessionDescription) -> Result<(), TransportError> {
        Ok(())
    }
    async fn local_description(&self) -> Option<SessionDescription> {
        None
    }
    fn on_connection_state_change(&self, _: ConnectionStateHandler) {}
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Connected
    }
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

fn bench_queue_roundtrip(c: &mut Criterion) {
    let queue = FrameQueue::unbounded();
    let packet = EncodedPacket::new(Bytes::from(vec![0u8; 4096]), 0, TimeBase::default());

    c.bench_function("queue_enqueue_dequeue", |b| {
        b.iter(|| {
            queue.enqueue(packet.clone());
            let _ = queue.try_dequeue().expect("queued packet");
        })
    });
}

fn bench_fanout_50_viewers(c: &mut Criterion) {
    let registry = Arc::new(SessionRegistry::new());
    let mut sessions = Vec::new();
    for i in 0..50 {
        let session = Arc::new(ViewerSession::new(
            format!("rtc-{}", i),
            Arc::new(NullPeer),
            Arc::new(FrameQueue::unbounded()),
        ));
        session.attach_video_track(SenderHandle::new(format!("video-{}", i)));
        registry.add(session.clone());
        sessions.push(session);
    }
    let broadcaster = Broadcaster::new(registry);
    let frame = Bytes::from(vec![0u8; 16 * 1024]);

    c.bench_function("push_packet_50_viewers", |b| {
        b.iter(|| {
            broadcaster.push_packet(frame.clone());
            for session in &sessions {
                let _ = session.queue().try_dequeue();
            }
        })
    });
}

criterion_group!(benches, bench_queue_roundtrip, bench_fanout_50_viewers);
criterion_main!(benches);
