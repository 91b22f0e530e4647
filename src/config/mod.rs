//! Configuration management for rtc-fanout

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Video codec forced onto every viewer's outbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    VP8,
    VP9,
    AV1,
}

impl VideoCodec {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
            VideoCodec::VP8 => "vp8",
            VideoCodec::VP9 => "vp9",
            VideoCodec::AV1 => "av1",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "video/H264",
            VideoCodec::VP8 => "video/VP8",
            VideoCodec::VP9 => "video/VP9",
            VideoCodec::AV1 => "video/AV1",
        }
    }

    pub fn rtp_payload_type(&self) -> u8 {
        match self {
            VideoCodec::H264 => 96,
            VideoCodec::VP8 => 97,
            VideoCodec::VP9 => 98,
            VideoCodec::AV1 => 99,
        }
    }

    /// fmtp line advertised for the codec
    pub fn sdp_fmtp_line(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
            VideoCodec::VP8 => "",
            VideoCodec::VP9 => "profile-id=0",
            VideoCodec::AV1 => "",
        }
    }

    /// All codecs a transport engine may advertise
    pub fn all() -> [VideoCodec; 4] {
        [VideoCodec::H264, VideoCodec::VP8, VideoCodec::VP9, VideoCodec::AV1]
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a bounded frame queue does when a viewer falls behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending packet
    #[default]
    DropOldest,
    /// Tear the viewer session down
    Disconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP signaling configuration
    #[serde(default)]
    pub http: HttpConfig,

    /// WebRTC configuration
    #[serde(default)]
    pub webrtc: WebRTCConfig,

    /// Per-viewer frame queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port for signaling
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted signaling body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// WebRTC session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRTCConfig {
    /// Codec every viewer is forced to negotiate
    #[serde(default)]
    pub video_codec: VideoCodec,

    /// ICE server URLs (STUN/TURN); empty means host candidates only
    #[serde(default)]
    pub ice_servers: Vec<String>,

    /// How long to wait for ICE gathering before answering
    #[serde(default = "default_ice_gathering_timeout_ms")]
    pub ice_gathering_timeout_ms: u64,

    /// Maximum concurrent viewers (0 = unlimited)
    #[serde(default)]
    pub max_sessions: usize,

    /// Duration of the first sample written on a fresh track
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl WebRTCConfig {
    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for WebRTCConfig {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            ice_servers: Vec::new(),
            ice_gathering_timeout_ms: default_ice_gathering_timeout_ms(),
            max_sessions: 0,
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

/// Frame queue capacity policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueConfig {
    /// Maximum pending packets per viewer (0 = unbounded)
    #[serde(default)]
    pub capacity: usize,

    /// Policy applied once `capacity` is reached
    #[serde(default)]
    pub overflow: OverflowPolicy,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, overflow: OverflowPolicy) -> Self {
        Self { capacity, overflow }
    }

    pub fn is_bounded(&self) -> bool {
        self.capacity > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.http.port == 0 {
            return Err("HTTP port must be non-zero".into());
        }

        if self.http.max_body_bytes == 0 {
            return Err("HTTP max_body_bytes must be non-zero".into());
        }

        if self.webrtc.ice_servers.iter().any(|url| url.trim().is_empty()) {
            return Err("WebRTC ice_servers must not contain empty URLs".into());
        }

        if self.webrtc.ice_gathering_timeout_ms == 0 {
            return Err("WebRTC ICE gathering timeout must be non-zero".into());
        }

        if self.webrtc.frame_interval_ms == 0 {
            return Err("WebRTC frame interval must be non-zero".into());
        }

        Ok(())
    }
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_max_body_bytes() -> usize { 10 * 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_ice_gathering_timeout_ms() -> u64 { 3000 }
fn default_frame_interval_ms() -> u64 { 33 }
