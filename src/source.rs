//! Looping H.264 file source
//!
//! Reads an Annex-B elementary stream, splits it into access units and feeds
//! them to the hub at a fixed rate. A pending key frame request makes the
//! source jump ahead to the next IDR access unit.

use bytes::Bytes;
use log::{debug, info};
use rtc_fanout::StreamHub;
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const NAL_SLICE: u8 = 1;
const NAL_IDR: u8 = 5;

#[derive(Debug)]
pub enum SourceError {
    Io(std::io::Error),
    /// File holds no decodable access unit
    Empty,
    /// File holds no IDR, so a new viewer could never start decoding
    NoKeyFrame,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "IO error: {}", e),
            SourceError::Empty => write!(f, "no H.264 access units found"),
            SourceError::NoKeyFrame => write!(f, "no IDR frame found"),
        }
    }
}

impl Error for SourceError {}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        SourceError::Io(e)
    }
}

/// One coded picture with its parameter sets, start codes included
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub data: Bytes,
    pub key_frame: bool,
}

/// Byte ranges of NAL units (start codes excluded)
fn nal_ranges(stream: &[u8]) -> Vec<(usize, usize)> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= stream.len() {
        if stream[i] == 0 && stream[i + 1] == 0 && stream[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (n, &(_, payload_start)) in starts.iter().enumerate() {
        let mut end = starts.get(n + 1).map_or(stream.len(), |&(code, _)| code);
        // Four byte start codes leave a trailing zero on the previous unit
        while end > payload_start && stream[end - 1] == 0 {
            end -= 1;
        }
        if end > payload_start {
            ranges.push((payload_start, end));
        }
    }
    ranges
}

/// Split an Annex-B stream into access units
pub fn split_access_units(stream: &[u8]) -> Vec<AccessUnit> {
    let mut units = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    let mut has_picture = false;
    let mut key_frame = false;

    for (start, end) in nal_ranges(stream) {
        let nal = &stream[start..end];
        let nal_type = nal[0] & 0x1f;
        let is_vcl = nal_type == NAL_SLICE || nal_type == NAL_IDR;
        // first_mb_in_slice == 0 is a single set bit in ue(v)
        let first_slice = is_vcl && nal.get(1).is_some_and(|b| b & 0x80 != 0);
        let starts_new = if is_vcl { first_slice } else { matches!(nal_type, 6..=9) };

        if starts_new && has_picture {
            units.push(AccessUnit {
                data: Bytes::from(std::mem::take(&mut current)),
                key_frame,
            });
            has_picture = false;
            key_frame = false;
        }

        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(nal);
        has_picture |= is_vcl;
        key_frame |= nal_type == NAL_IDR;
    }

    if has_picture {
        units.push(AccessUnit {
            data: Bytes::from(current),
            key_frame,
        });
    }
    units
}

/// Access units of a file, replayed forever
pub struct FileSource {
    units: Vec<AccessUnit>,
    position: usize,
}

impl FileSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let stream = std::fs::read(path)?;
        let source = Self::from_units(split_access_units(&stream))?;
        info!(
            "Loaded {} access units from {:?} ({} key frames)",
            source.units.len(),
            path,
            source.units.iter().filter(|u| u.key_frame).count()
        );
        Ok(source)
    }

    pub fn from_units(units: Vec<AccessUnit>) -> Result<Self, SourceError> {
        if units.is_empty() {
            return Err(SourceError::Empty);
        }
        let position = units
            .iter()
            .position(|u| u.key_frame)
            .ok_or(SourceError::NoKeyFrame)?;
        Ok(Self { units, position })
    }

    /// Move to the next key frame at or after the current position
    pub fn seek_key_frame(&mut self) {
        let len = self.units.len();
        if let Some(offset) = (0..len).find(|o| self.units[(self.position + o) % len].key_frame) {
            self.position = (self.position + offset) % len;
        }
    }

    /// Take the current access unit and advance, wrapping at the end
    pub fn next_unit(&mut self) -> &AccessUnit {
        let unit = &self.units[self.position];
        self.position = (self.position + 1) % self.units.len();
        unit
    }
}

/// Feed `source` into `hub` at `fps` until the task is dropped
pub async fn run_file_source(mut source: FileSource, hub: Arc<StreamHub>, fps: u32) {
    let period = Duration::from_secs(1) / fps.max(1);
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if !hub.wants_frame() {
            continue;
        }
        if hub.consume_key_frame_request() {
            source.seek_key_frame();
            debug!("Key frame requested, restarting at next IDR");
        }
        let unit = source.next_unit();
        hub.push_packet(unit.data.clone());
    }
}
