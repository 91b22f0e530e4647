//! Encoded packets as they travel from the producer to each viewer
//!
//! Payloads are `Bytes`, so every viewer's copy of a packet shares one
//! allocation and fan-out only bumps a reference count.

use bytes::Bytes;
use std::fmt;

/// Rational time base of packet timestamps (seconds per tick = num / den)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeBase {
    pub num: u32,
    pub den: u32,
}

impl TimeBase {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Convert a tick count to seconds
    pub fn to_seconds(&self, ticks: u64) -> f64 {
        if self.den == 0 {
            return 0.0;
        }
        ticks as f64 * self.num as f64 / self.den as f64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::new(1, 48_000)
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// One opaque encoded video packet with its fan-out timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    /// Encoded payload (reference counted)
    pub data: Bytes,
    /// Presentation timestamp assigned at fan-out
    pub pts: u64,
    /// Time base of `pts`
    pub time_base: TimeBase,
}

impl EncodedPacket {
    pub fn new(data: Bytes, pts: u64, time_base: TimeBase) -> Self {
        Self { data, pts, time_base }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
