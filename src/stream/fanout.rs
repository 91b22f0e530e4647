//! Packet fan-out from the single producer to every viewer
//!
//! ```text
//!   producer ──push_packet()──► Broadcaster ──for_each──► ViewerSession ─► FrameQueue ─► send loop
//!                                   │                      ViewerSession ─► FrameQueue ─► send loop
//!                             timestamp counter            ViewerSession ─► FrameQueue ─► send loop
//! ```
//!
//! Every viewer receives the same timestamped packet. Enqueue never blocks,
//! so a stalled viewer cannot hold up the producer or the other viewers.

use super::packet::{EncodedPacket, TimeBase};
use super::queue::EnqueueOutcome;
use super::registry::SessionRegistry;
use super::session::{SessionState, ViewerSession};
use bytes::Bytes;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// Producer-facing fan-out routine
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
    /// Next timestamp; also serializes concurrent pushes
    next_pts: Mutex<u64>,
    time_base: TimeBase,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self::with_time_base(registry, TimeBase::default())
    }

    pub fn with_time_base(registry: Arc<SessionRegistry>, time_base: TimeBase) -> Self {
        Self {
            registry,
            next_pts: Mutex::new(0),
            time_base,
        }
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    /// Timestamp the next pushed packet will carry
    pub fn next_timestamp(&self) -> u64 {
        *self.next_pts.lock()
    }

    /// Whether any viewer would receive a packet right now
    ///
    /// Lets the encoder skip work while nobody is watching.
    pub fn wants_frame(&self) -> bool {
        self.registry.any(|session| session.accepts_frames())
    }

    /// Timestamp a packet and queue it for every receiving viewer
    ///
    /// Returns the number of viewers the packet was queued for.
    pub fn push_packet(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let mut overflowed = Vec::new();
        let mut delivered = 0;

        {
            // Held across the fan-out so per-viewer timestamps stay ordered
            // even with several producers.
            let mut next_pts = self.next_pts.lock();
            let packet = EncodedPacket::new(data, *next_pts, self.time_base);
            *next_pts += 1;

            self.registry.for_each(|session| {
                if !session.accepts_frames() {
                    return;
                }
                match session.enqueue(packet.clone()) {
                    EnqueueOutcome::Queued => delivered += 1,
                    EnqueueOutcome::DroppedOldest => {
                        delivered += 1;
                        debug!("Session {} is behind, dropped oldest packet", session.id());
                    }
                    EnqueueOutcome::Overflowed => overflowed.push(session.clone()),
                    EnqueueOutcome::Closed => {}
                }
            });
        }

        for session in overflowed {
            self.disconnect(session);
        }

        delivered
    }

    /// Tear down a viewer whose queue overflowed
    fn disconnect(&self, session: Arc<ViewerSession>) {
        if self.registry.remove(session.id()).is_none() {
            return;
        }
        warn!(
            "Session {} exceeded its frame queue capacity ({}), disconnecting",
            session.id(),
            session.queue().config().capacity
        );
        session.set_state(SessionState::Failed);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.close().await {
                        warn!("{}", e);
                    }
                });
            }
            Err(_) => warn!(
                "Session {} removed outside a runtime; transport close skipped",
                session.id()
            ),
        }
    }
}
