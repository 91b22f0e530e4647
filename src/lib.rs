//! rtc-fanout - live video fan-out over WebRTC
//!
//! One encoded video source, many browser viewers. Each viewer negotiates a
//! session through an HTTP offer/answer exchange and receives the same
//! packets through its own queue, so a slow viewer never stalls the source.

pub mod config;
pub mod stream;
pub mod transport;

// Re-exports
pub use config::{Config, OverflowPolicy, QueueConfig, VideoCodec, WebRTCConfig};
pub use stream::{
    KeyFrameCoordinator, SdpType, ServerOffer, SessionDescription, SessionRegistry,
    SignalingMessage, StreamError, StreamHub, ViewerSession,
};
pub use transport::{PeerSession, TransportEngine, TransportError};
#[cfg(feature = "webrtc-transport")]
pub use transport::WebRtcEngine;
