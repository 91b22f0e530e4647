//! Live stream fan-out core
//!
//! This module owns everything between one video producer and many viewers:
//! - Per-viewer frame queues and session lifecycle
//! - The process-wide session registry and packet fan-out
//! - Key frame request coordination
//! - Offer/answer signaling with a single forced codec

pub mod fanout;
pub mod hub;
pub mod keyframe;
pub mod packet;
pub mod queue;
pub mod registry;
pub mod session;
pub mod signaling;

pub use fanout::Broadcaster;
pub use hub::StreamHub;
pub use keyframe::KeyFrameCoordinator;
pub use packet::{EncodedPacket, TimeBase};
pub use queue::{EnqueueOutcome, FrameQueue};
pub use registry::SessionRegistry;
pub use session::{SessionState, ViewerSession};
pub use signaling::{SdpType, ServerOffer, SessionDescription, SignalingHandler, SignalingMessage};

use std::error::Error;
use std::fmt;

/// Stream-related errors
#[derive(Debug)]
pub enum StreamError {
    /// Signaling payload could not be decoded into an offer
    MalformedOffer(String),
    /// Transport engine rejected the offer/answer exchange
    Negotiation(String),
    /// Maximum number of viewers reached
    SessionLimit(usize),
    /// No live session has the given ID
    UnknownSession(String),
    /// A session with the same ID is already registered
    DuplicateSession(String),
    /// Transport failed after negotiation
    Transport(String),
    /// Closing a session failed
    Teardown(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::MalformedOffer(msg) => write!(f, "Malformed offer: {}", msg),
            StreamError::Negotiation(msg) => write!(f, "Negotiation failed: {}", msg),
            StreamError::SessionLimit(max) => write!(f, "Maximum sessions reached ({})", max),
            StreamError::UnknownSession(id) => write!(f, "No session with ID {}", id),
            StreamError::DuplicateSession(id) => write!(f, "Session {} already registered", id),
            StreamError::Transport(msg) => write!(f, "Transport failure: {}", msg),
            StreamError::Teardown(msg) => write!(f, "Teardown failed: {}", msg),
        }
    }
}

impl Error for StreamError {}
