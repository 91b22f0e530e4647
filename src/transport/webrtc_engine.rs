//! webrtc-rs backed transport engine
//!
//! Each peer session owns one `RTCPeerConnection`. Outbound video tracks
//! are `TrackLocalStaticSample`s fed by a send loop that drains the
//! viewer's frame queue; the RTP packetizer for the negotiated codec lives
//! inside webrtc-rs.

use super::{
    CodecCapability, ConnectionState, ConnectionStateHandler, MediaKind, PeerSession,
    SenderHandle, TransceiverInfo, TransportEngine, TransportError,
};
use crate::config::{VideoCodec, WebRTCConfig};
use crate::stream::{FrameQueue, KeyFrameCoordinator, SdpType, SessionDescription};
use async_trait::async_trait;
use futures::future::BoxFuture;
use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const STREAM_ID: &str = "rtc-fanout";

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError(e.to_string())
    }
}

fn video_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_string(),
            parameter: parameter.to_string(),
        })
        .collect()
}

fn codec_parameters(codec: VideoCodec) -> RTCRtpCodecParameters {
    RTCRtpCodecParameters {
        capability: RTCRtpCodecCapability {
            mime_type: codec.mime_type().to_string(),
            clock_rate: 90000,
            channels: 0,
            sdp_fmtp_line: codec.sdp_fmtp_line().to_string(),
            rtcp_feedback: video_feedback(),
        },
        payload_type: codec.rtp_payload_type(),
        ..Default::default()
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let sdp = description.sdp;
    let rtc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(sdp)?,
        SdpType::Rollback => {
            return Err(TransportError::new("rollback descriptions are not supported"))
        }
    };
    Ok(rtc)
}

fn from_rtc_description(description: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        sdp: description.sdp,
        sdp_type,
    })
}

fn from_rtc_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Transport engine backed by webrtc-rs
pub struct WebRtcEngine {
    api: API,
    video_codec: VideoCodec,
    ice_servers: Vec<String>,
    ice_gathering_timeout: Duration,
    frame_interval: Duration,
    codecs: Arc<Vec<RTCRtpCodecParameters>>,
    keyframes: Arc<KeyFrameCoordinator>,
}

impl WebRtcEngine {
    /// Build the engine with every supported video codec registered
    ///
    /// Picture loss and full intra requests from viewers are forwarded to
    /// `keyframes`.
    pub fn new(config: &WebRTCConfig, keyframes: Arc<KeyFrameCoordinator>) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        let codecs: Vec<RTCRtpCodecParameters> =
            VideoCodec::all().into_iter().map(codec_parameters).collect();
        for codec in &codecs {
            media_engine
                .register_codec(codec.clone(), RTPCodecType::Video)
                .map_err(|e| {
                    TransportError(format!(
                        "Failed to register {}: {}",
                        codec.capability.mime_type, e
                    ))
                })?;
        }

        // Interceptors provide NACK responses and RTCP reports
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| TransportError(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            video_codec: config.video_codec,
            ice_servers: config.ice_servers.clone(),
            ice_gathering_timeout: config.ice_gathering_timeout(),
            frame_interval: config.frame_interval(),
            codecs: Arc::new(codecs),
            keyframes,
        })
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn create_session(&self) -> Result<Arc<dyn PeerSession>, TransportError> {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = self
            .api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| TransportError(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(WebRtcPeer {
            pc: Arc::new(pc),
            video_codec: self.video_codec,
            codecs: self.codecs.clone(),
            keyframes: self.keyframes.clone(),
            ice_gathering_timeout: self.ice_gathering_timeout,
            frame_interval: self.frame_interval,
        }))
    }

    fn codec_capabilities(&self, kind: MediaKind) -> Vec<CodecCapability> {
        if kind != MediaKind::Video {
            return Vec::new();
        }
        self.codecs
            .iter()
            .map(|codec| CodecCapability {
                mime_type: codec.capability.mime_type.clone(),
                clock_rate: codec.capability.clock_rate,
                channels: codec.capability.channels,
                sdp_fmtp_line: codec.capability.sdp_fmtp_line.clone(),
                payload_type: codec.payload_type,
            })
            .collect()
    }
}

/// One viewer's `RTCPeerConnection`
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    video_codec: VideoCodec,
    codecs: Arc<Vec<RTCRtpCodecParameters>>,
    keyframes: Arc<KeyFrameCoordinator>,
    ice_gathering_timeout: Duration,
    frame_interval: Duration,
}

impl WebRtcPeer {
    /// Registered parameters for an advertised capability
    fn parameters_for(&self, codec: &CodecCapability) -> Option<RTCRtpCodecParameters> {
        self.codecs
            .iter()
            .find(|p| p.capability.mime_type == codec.mime_type && p.payload_type == codec.payload_type)
            .cloned()
    }

    /// Drain `queue` into `track` until end-of-stream
    fn spawn_send_loop(&self, track: Arc<TrackLocalStaticSample>, queue: Arc<FrameQueue>) {
        let frame_interval = self.frame_interval;
        tokio::spawn(async move {
            let mut last_sent: Option<Instant> = None;
            while let Some(packet) = queue.dequeue().await {
                let now = Instant::now();
                let duration = last_sent.map_or(frame_interval, |last| now - last);
                last_sent = Some(now);

                let sample = Sample {
                    data: packet.data,
                    duration,
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    debug!("Track {} dropped sample {}: {}", track.id(), packet.pts, e);
                }
            }
            debug!("Track {} send loop finished", track.id());
        });
    }

    /// Forward viewer key frame requests until the sender stops
    fn spawn_rtcp_reader(&self, sender: Arc<RTCRtpSender>) {
        let keyframes = self.keyframes.clone();
        tokio::spawn(async move {
            while let Ok((packets, _)) = sender.read_rtcp().await {
                for packet in packets {
                    let packet = packet.as_any();
                    if packet.is::<PictureLossIndication>() || packet.is::<FullIntraRequest>() {
                        keyframes.request_key_frame();
                    }
                }
            }
        });
    }
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn add_video_track(&self, queue: Arc<FrameQueue>) -> Result<SenderHandle, TransportError> {
        // The sample packetizer binds to the track's own codec
        let capability = codec_parameters(self.video_codec).capability;

        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            format!("video-{}", Uuid::new_v4().simple()),
            STREAM_ID.to_string(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError(format!("Failed to add video track: {}", e)))?;

        let handle = SenderHandle::new(track.id());
        self.spawn_rtcp_reader(sender);
        self.spawn_send_loop(track, queue);
        Ok(handle)
    }

    async fn transceivers(&self) -> Vec<TransceiverInfo> {
        let mut infos = Vec::new();
        for (index, transceiver) in self.pc.get_transceivers().await.iter().enumerate() {
            let kind = match transceiver.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                RTPCodecType::Unspecified => continue,
            };
            let sender_track_id = transceiver
                .sender()
                .await
                .track()
                .await
                .map(|track| track.id().to_owned());
            infos.push(TransceiverInfo {
                index,
                kind,
                sender_track_id,
            });
        }
        infos
    }

    async fn set_codec_preferences(
        &self,
        transceiver: usize,
        codecs: Vec<CodecCapability>,
    ) -> Result<(), TransportError> {
        let parameters = codecs
            .iter()
            .map(|codec| {
                self.parameters_for(codec)
                    .ok_or_else(|| TransportError(format!("{} is not registered", codec.mime_type)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let transceivers = self.pc.get_transceivers().await;
        let transceiver = transceivers
            .get(transceiver)
            .ok_or_else(|| TransportError(format!("no transceiver at index {}", transceiver)))?;
        transceiver.set_codec_preferences(parameters).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        let description = to_rtc_description(description)?;
        self.pc.set_remote_description(description).await?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await?;
        from_rtc_description(offer).ok_or_else(|| TransportError::new("engine produced an untyped offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc_description(answer).ok_or_else(|| TransportError::new("engine produced an untyped answer"))
    }

    /// Apply the local description and wait for ICE gathering
    ///
    /// Candidates are not trickled, so the answer must carry them all.
    async fn set_local_description(&self, description: SessionDescription) -> Result<(), TransportError> {
        let description = to_rtc_description(description)?;
        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(description).await?;

        if tokio::time::timeout(self.ice_gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            return Err(TransportError(format!(
                "ICE gathering did not complete within {:?}",
                self.ice_gathering_timeout
            )));
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc_description)
    }

    fn on_connection_state_change(&self, handler: ConnectionStateHandler) {
        let handler = Arc::new(handler);
        self.pc.on_peer_connection_state_change(Box::new(move |state| {
            let handler = handler.clone();
            Box::pin(async move {
                match from_rtc_state(state) {
                    // Run outside the engine's callback; the handler may close this connection.
                    Some(state) => {
                        let fut: BoxFuture<'static, ()> = handler(state);
                        tokio::spawn(fut);
                    }
                    None => warn!("Ignoring unspecified peer connection state"),
                }
            })
        }));
    }

    fn connection_state(&self) -> ConnectionState {
        from_rtc_state(self.pc.connection_state()).unwrap_or(ConnectionState::New)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError(format!("Failed to close connection: {}", e)))?;
        debug!("Peer connection closed");
        Ok(())
    }
}
